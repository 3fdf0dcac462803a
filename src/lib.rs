// =============================================================================
// VULKAN ENGINE - Minimal real-time renderer on raw Vulkan (ash)
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Renderer (frame loop: acquire → record → submit → present)     │
// │    ├── Swapchain (images, render pass, framebuffers, sync)      │
// │    ├── Pipeline (fixed graphics state)                          │
// │    └── Drawables (Model: mesh + texture + descriptor sets)      │
// │  GraphicsContext (instance, device, queues, pools, layouts)     │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod renderer;
pub mod window;

pub use backend::{GraphicsContext, MAX_FRAMES_IN_FLIGHT, NUM_SAMPLERS, NUM_UNIFORMS};
pub use config::Config;
pub use error::{ContextError, DescriptorError, SuitabilityError};
pub use frame::{AcquireStatus, FrameOutcome, FrameStats, PresentStatus, RebuildOutcome};
pub use renderer::{DrawContext, Drawable, Renderer, RendererSettings};
pub use window::WindowSurface;
