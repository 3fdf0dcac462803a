// Buffer utilities for vertex, index, and uniform buffers
//
// Static geometry lives in device-local memory, filled once through a
// host-visible staging buffer. Uniform buffers stay host-visible and are
// rewritten every frame.

use anyhow::{ensure, Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::GraphicsContext;

/// A buffer and the memory bound to it, released together on drop.
pub struct Buffer {
    context: Arc<GraphicsContext>,
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    pub fn new(
        context: Arc<GraphicsContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { context.device().create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let mut buffer = Self {
            context,
            raw,
            memory: vk::DeviceMemory::null(),
            size,
        };

        let device = buffer.context.device();
        let requirements = unsafe { device.get_buffer_memory_requirements(raw) };
        let memory_type_index = buffer
            .context
            .find_memory_type(requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate buffer memory")?;
        unsafe { device.bind_buffer_memory(raw, memory, 0) }
            .context("Failed to bind buffer memory")?;

        buffer.memory = memory;
        Ok(buffer)
    }

    /// Host-visible buffer filled with `data`, used as a transfer source.
    pub fn staging<T: Pod>(context: Arc<GraphicsContext>, data: &[T]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        ensure!(!bytes.is_empty(), "Cannot stage an empty buffer");

        let buffer = Self::new(
            context,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.write(bytes)?;
        Ok(buffer)
    }

    /// Device-local buffer holding `data`, uploaded with a one-time command.
    pub fn device_local_with_data<T: Pod>(
        context: Arc<GraphicsContext>,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let staging = Self::staging(context.clone(), data)?;
        let buffer = Self::new(
            context.clone(),
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        context.submit_single_time(|device, command_buffer| unsafe {
            device.cmd_copy_buffer(command_buffer, staging.raw, buffer.raw, &[region]);
        })?;

        Ok(buffer)
    }

    /// Copy `bytes` to the start of a host-visible buffer.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let size = bytes.len() as vk::DeviceSize;
        if size == 0 {
            return Ok(());
        }
        ensure!(
            size <= self.size,
            "Write of {} bytes overflows buffer of {} bytes",
            size,
            self.size
        );

        let device = self.context.device();
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")? as *mut u8;
            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            device.destroy_buffer(self.raw, None);
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
            }
        }
    }
}
