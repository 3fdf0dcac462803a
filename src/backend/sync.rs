// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// There are exactly MAX_FRAMES_IN_FLIGHT sets, created once and reused for
// the lifetime of the swapchain, independent of how many images it holds.

use anyhow::{Context, Result};
use ash::vk;

use super::MAX_FRAMES_IN_FLIGHT;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signaled by the presentation engine when the acquired image is ready.
    pub image_available: vk::Semaphore,
    /// Signaled by the graphics queue when the frame's commands finish.
    pub render_finished: vk::Semaphore,
    /// Gates CPU reuse of the slot's command buffer and uniform buffers.
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create image-available semaphore")?,
                render_finished: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create render-finished semaphore")?,
                in_flight_fence: device
                    .create_fence(&fence_info, None)
                    .context("Failed to create in-flight fence")?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Rotating frame slot index in `0..MAX_FRAMES_IN_FLIGHT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSlots {
    current: usize,
}

impl FrameSlots {
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, frame: usize) {
        debug_assert!(frame < MAX_FRAMES_IN_FLIGHT);
        self.current = frame % MAX_FRAMES_IN_FLIGHT;
    }

    /// Moves to the next slot and returns it.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_in_order() {
        let mut slots = FrameSlots::default();
        let mut seen = vec![slots.current()];
        for _ in 0..(3 * MAX_FRAMES_IN_FLIGHT - 1) {
            seen.push(slots.advance());
        }

        let expected: Vec<usize> = (0..3 * MAX_FRAMES_IN_FLIGHT)
            .map(|i| i % MAX_FRAMES_IN_FLIGHT)
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn set_current_then_advance_wraps() {
        let mut slots = FrameSlots::default();
        slots.set_current(MAX_FRAMES_IN_FLIGHT - 1);
        assert_eq!(slots.current(), MAX_FRAMES_IN_FLIGHT - 1);
        assert_eq!(slots.advance(), 0);
    }
}
