// Backend module - Vulkan abstraction layer
//
// Design: Thin RAII owners around ash, one per Vulkan object family
// Sharing: GraphicsContext is held in an Arc by everything created from it

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod queue;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::Buffer;
pub use descriptor::{DescriptorBudget, DescriptorSet};
pub use device::GraphicsContext;
pub use pipeline::{Pipeline, PipelineConfig, PipelineLayout};
pub use shader::ShaderModule;
pub use swapchain::Swapchain;
pub use texture::Texture;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Uniform buffer bindings per descriptor set, starting at binding 0.
pub const NUM_UNIFORMS: u32 = 1;

/// Combined image sampler bindings per set, following the uniforms.
pub const NUM_SAMPLERS: u32 = 1;
