// Descriptor sets - per-object shader bindings
//
// Every drawable owns one Vulkan descriptor set per frame slot. Layout per
// set: NUM_UNIFORMS uniform buffers at bindings 0.., then NUM_SAMPLERS
// combined image samplers. The context's pool is sized for a fixed number of
// drawables and that number is enforced here, before Vulkan is asked.

use anyhow::{ensure, Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Buffer, GraphicsContext, Texture, MAX_FRAMES_IN_FLIGHT, NUM_SAMPLERS, NUM_UNIFORMS};
use crate::error::DescriptorError;

/// Bindings shared by every frame slot's layout.
pub fn layout_bindings() -> Vec<vk::DescriptorSetLayoutBinding> {
    let uniforms = (0..NUM_UNIFORMS).map(|binding| {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()
    });
    let samplers = (NUM_UNIFORMS..NUM_UNIFORMS + NUM_SAMPLERS).map(|binding| {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()
    });

    uniforms.chain(samplers).collect()
}

/// Per-type descriptor counts for `capacity` drawables across all frame slots.
pub fn pool_sizes(capacity: u32) -> Vec<vk::DescriptorPoolSize> {
    let sets = max_sets(capacity);
    [
        (vk::DescriptorType::UNIFORM_BUFFER, NUM_UNIFORMS),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, NUM_SAMPLERS),
    ]
    .into_iter()
    .filter(|&(_, per_set)| per_set > 0)
    .map(|(ty, per_set)| vk::DescriptorPoolSize {
        ty,
        descriptor_count: sets * per_set,
    })
    .collect()
}

/// One set per frame slot per drawable.
pub fn max_sets(capacity: u32) -> u32 {
    MAX_FRAMES_IN_FLIGHT as u32 * capacity
}

fn check_frame(frame: usize) -> Result<(), DescriptorError> {
    if frame < MAX_FRAMES_IN_FLIGHT {
        Ok(())
    } else {
        Err(DescriptorError::InvalidFrame { frame })
    }
}

/// How many drawables may hold descriptor sets at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorBudget {
    capacity: u32,
    in_use: u32,
}

impl DescriptorBudget {
    pub fn new(capacity: u32) -> Self {
        Self { capacity, in_use: 0 }
    }

    pub fn in_use(&self) -> u32 {
        self.in_use
    }

    pub fn reserve(&mut self) -> Result<(), DescriptorError> {
        if self.in_use >= self.capacity {
            return Err(DescriptorError::PoolExhausted {
                capacity: self.capacity,
            });
        }
        self.in_use += 1;
        Ok(())
    }

    pub fn release(&mut self) {
        debug_assert!(self.in_use > 0, "descriptor budget released more than reserved");
        self.in_use = self.in_use.saturating_sub(1);
    }
}

/// Descriptor sets of one drawable, one per frame slot.
///
/// Callers update a slot only after that slot's in-flight fence has been
/// waited on, which the frame loop guarantees for the current slot.
pub struct DescriptorSet {
    context: Arc<GraphicsContext>,
    sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
    uniforms: HashMap<(usize, u32), Buffer>,
    textures: HashMap<(usize, u32), Arc<Texture>>,
}

impl DescriptorSet {
    pub fn new(context: Arc<GraphicsContext>) -> Result<Self> {
        context.reserve_descriptor_object()?;

        // Dropping `descriptor` from here on returns the reservation
        let mut descriptor = Self {
            context,
            sets: [vk::DescriptorSet::null(); MAX_FRAMES_IN_FLIGHT],
            uniforms: HashMap::new(),
            textures: HashMap::new(),
        };

        let layouts = descriptor.context.descriptor_set_layouts();
        ensure!(
            layouts.len() == MAX_FRAMES_IN_FLIGHT,
            "Descriptor set layouts have not been created"
        );

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor.context.descriptor_pool())
            .set_layouts(layouts);
        let allocated = unsafe { descriptor.context.device().allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        descriptor.sets.copy_from_slice(&allocated);
        Ok(descriptor)
    }

    pub fn raw(&self, frame: usize) -> Result<vk::DescriptorSet, DescriptorError> {
        check_frame(frame)?;
        Ok(self.sets[frame])
    }

    /// Write `value` into the uniform buffer behind (`frame`, `binding`).
    ///
    /// The buffer is created on first use and replaced when `value` no longer
    /// fits; either way the slot's descriptor is rewritten to point at it.
    pub fn update_uniform<T: Pod>(&mut self, frame: usize, binding: u32, value: &T) -> Result<()> {
        check_frame(frame)?;
        ensure!(binding < NUM_UNIFORMS, "Binding {} is not a uniform buffer", binding);

        let bytes = bytemuck::bytes_of(value);
        let size = bytes.len() as vk::DeviceSize;
        let stale = self
            .uniforms
            .get(&(frame, binding))
            .map_or(true, |buffer| buffer.size() < size);

        if stale {
            let buffer = Buffer::new(
                self.context.clone(),
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;

            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.raw(),
                offset: 0,
                range: size,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(self.sets[frame])
                .dst_binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info);
            unsafe { self.context.device().update_descriptor_sets(&[write.build()], &[]) };

            self.uniforms.insert((frame, binding), buffer);
        }

        if let Some(buffer) = self.uniforms.get(&(frame, binding)) {
            buffer.write(bytes)?;
        }
        Ok(())
    }

    /// Point the sampler at `binding` in slot `frame` to `texture`.
    pub fn set_texture(&mut self, frame: usize, binding: u32, texture: &Arc<Texture>) -> Result<()> {
        check_frame(frame)?;
        ensure!(
            (NUM_UNIFORMS..NUM_UNIFORMS + NUM_SAMPLERS).contains(&binding),
            "Binding {} is not an image sampler",
            binding
        );

        if let Some(current) = self.textures.get(&(frame, binding)) {
            if Arc::ptr_eq(current, texture) {
                return Ok(());
            }
        }

        let image_info = [vk::DescriptorImageInfo {
            sampler: texture.sampler(),
            image_view: texture.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.sets[frame])
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        unsafe { self.context.device().update_descriptor_sets(&[write.build()], &[]) };

        self.textures.insert((frame, binding), texture.clone());
        Ok(())
    }

    /// Bind slot `frame` at set index 0.
    pub fn bind(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        frame: usize,
    ) -> Result<(), DescriptorError> {
        let set = self.raw(frame)?;
        unsafe {
            self.context.device().cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
        Ok(())
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        if self.sets[0] != vk::DescriptorSet::null() {
            // Any slot may still be referenced by a pending submission
            if let Err(e) = self.context.wait_idle() {
                log::error!("{:?}", e);
            }
            unsafe {
                if let Err(e) = self
                    .context
                    .device()
                    .free_descriptor_sets(self.context.descriptor_pool(), &self.sets)
                {
                    log::error!("Failed to free descriptor sets: {}", e);
                }
            }
        }
        self.context.release_descriptor_object();
    }
}
