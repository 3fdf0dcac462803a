// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. Compilation happens outside the
// engine (see build.rs); this module only loads the bytecode.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::GraphicsContext;

pub struct ShaderModule {
    context: Arc<GraphicsContext>,
    raw: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V bytes.
    ///
    /// `read_spv` checks the magic number and copies into aligned words, so
    /// the input may come from any byte buffer.
    pub fn from_spirv_bytes(context: Arc<GraphicsContext>, bytes: &[u8]) -> Result<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V bytecode")?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let raw = unsafe { context.device().create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self { context, raw })
    }

    pub fn from_file(context: Arc<GraphicsContext>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader {}", path.display()))?;

        Self::from_spirv_bytes(context, &bytes)
            .with_context(|| format!("Failed to load shader {}", path.display()))
    }

    pub fn raw(&self) -> vk::ShaderModule {
        self.raw
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.context.device().destroy_shader_module(self.raw, None) };
    }
}
