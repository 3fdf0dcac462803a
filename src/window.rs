// Windowing collaborator
//
// The engine never polls events itself; it only needs native handles to
// create a surface and the framebuffer size to size the swapchain.

use ash::vk;
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};

/// A window the renderer can present to.
pub trait WindowSurface {
    /// Current framebuffer size in physical pixels. Zero when minimized.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    fn raw_display(&self) -> RawDisplayHandle;

    fn raw_window(&self) -> RawWindowHandle;
}

impl WindowSurface for winit::window::Window {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn raw_display(&self) -> RawDisplayHandle {
        self.raw_display_handle()
    }

    fn raw_window(&self) -> RawWindowHandle {
        self.raw_window_handle()
    }
}
