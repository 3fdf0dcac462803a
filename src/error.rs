// Typed error conditions
//
// Setup code propagates `anyhow::Error`; these enums are the conditions a
// caller may want to match on (via `downcast_ref`).

use ash::vk;
use thiserror::Error;

/// Fatal conditions raised while building the GPU context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no Vulkan-capable GPU found")]
    NoDevices,

    #[error("no suitable GPU found ({rejected} rejected)")]
    NoSuitableDevice { rejected: usize },

    #[error("validation layer \"{0}\" is not available")]
    MissingLayer(String),

    #[error("no memory type matches filter {filter:#b} with properties {properties:?}")]
    NoMemoryType {
        filter: u32,
        properties: vk::MemoryPropertyFlags,
    },
}

/// Why a physical device was skipped during selection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SuitabilityError {
    #[error("missing a graphics-capable queue family")]
    NoGraphicsQueue,

    #[error("missing a queue family that can present to the surface")]
    NoPresentQueue,

    #[error("missing device extension {0}")]
    MissingExtension(String),

    #[error("surface reports no formats or no present modes")]
    InadequateSwapchain,

    #[error("anisotropic sampling is not supported")]
    NoAnisotropy,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor pool exhausted: capacity is {capacity} drawable objects")]
    PoolExhausted { capacity: u32 },

    #[error("descriptor pool has not been created")]
    PoolNotCreated,

    #[error("frame slot {frame} is out of range")]
    InvalidFrame { frame: usize },
}
