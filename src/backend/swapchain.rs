// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// together with the render pass, per-image framebuffers, the depth buffer
// and the fixed set of per-frame-slot sync objects.
//
// Rebuild replaces everything tied to the surface size (chain, views, depth,
// framebuffers). The render pass survives unless the surface format changes.
// The sync objects are never recreated.

use anyhow::{ensure, Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::pipeline::{create_framebuffer, create_render_pass};
use super::sync::{FrameSlots, FrameSync};
use super::texture::{create_image_view, GpuImage};
use super::{GraphicsContext, MAX_FRAMES_IN_FLIGHT};
use crate::frame::{AcquireStatus, PresentStatus, RebuildOutcome};

struct SwapchainImage {
    image: vk::Image,
    view: vk::ImageView,
    framebuffer: vk::Framebuffer,
}

/// Parameters negotiated with the surface for one chain.
struct ChainParams {
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    image_count: u32,
    transform: vk::SurfaceTransformFlagsKHR,
}

pub struct Swapchain {
    context: Arc<GraphicsContext>,
    loader: khr::Swapchain,
    raw: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,
    depth: Option<GpuImage>,
    render_pass: vk::RenderPass,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    preferred_present_mode: vk::PresentModeKHR,
    sync: Vec<FrameSync>,
    slots: FrameSlots,
}

impl Swapchain {
    pub fn new(
        context: Arc<GraphicsContext>,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        ensure!(
            window_extent.width > 0 && window_extent.height > 0,
            "Cannot create a swapchain for a zero-sized window"
        );

        let loader = khr::Swapchain::new(context.instance(), context.device());

        // Everything below is torn down by Drop if a later step fails
        let mut swapchain = Self {
            context,
            loader,
            raw: vk::SwapchainKHR::null(),
            images: Vec::new(),
            depth: None,
            render_pass: vk::RenderPass::null(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            preferred_present_mode,
            sync: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            slots: FrameSlots::default(),
        };

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let sync = FrameSync::new(swapchain.context.device())?;
            swapchain.sync.push(sync);
        }

        let params = swapchain.chain_params(window_extent)?;
        swapchain.create_chain(&params)?;
        swapchain.render_pass = create_render_pass(swapchain.context.device(), params.format.format)?;
        swapchain.create_targets()?;

        Ok(swapchain)
    }

    fn chain_params(&self, window_extent: vk::Extent2D) -> Result<ChainParams> {
        let support = self.context.swapchain_support()?;
        let format = support
            .choose_surface_format()
            .context("Surface reports no formats")?;

        Ok(ChainParams {
            format,
            present_mode: support.choose_present_mode(self.preferred_present_mode),
            extent: support.choose_extent(window_extent),
            image_count: support.choose_image_count(),
            transform: support.capabilities.current_transform,
        })
    }

    /// Create the chain handle, retiring the previous one if there is one.
    fn create_chain(&mut self, params: &ChainParams) -> Result<()> {
        let families = self.context.queue_families;
        let family_indices = [families.graphics, families.present];
        let old_swapchain = self.raw;

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.context.surface())
            .min_image_count(params.image_count)
            .image_format(params.format.format)
            .image_color_space(params.format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(params.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let raw = unsafe { self.loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.raw = raw;
        self.format = params.format;
        self.extent = params.extent;

        let images = unsafe { self.loader.get_swapchain_images(raw) }
            .context("Failed to get swapchain images")?;
        self.images = images
            .into_iter()
            .map(|image| SwapchainImage {
                image,
                view: vk::ImageView::null(),
                framebuffer: vk::Framebuffer::null(),
            })
            .collect();

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            params.extent.width,
            params.extent.height,
            self.images.len(),
            params.format.format,
            params.present_mode
        );
        Ok(())
    }

    /// Views, depth buffer and framebuffers for the current chain.
    fn create_targets(&mut self) -> Result<()> {
        let depth = GpuImage::depth(self.context.clone(), self.extent)?;
        let depth_view = depth.view();
        self.depth = Some(depth);

        let device = self.context.device();
        for target in &mut self.images {
            target.view = create_image_view(
                device,
                target.image,
                self.format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            target.framebuffer =
                create_framebuffer(device, self.render_pass, target.view, depth_view, self.extent)?;
        }
        Ok(())
    }

    fn destroy_targets(&mut self) {
        let device = self.context.device();
        for target in self.images.drain(..) {
            unsafe {
                if target.framebuffer != vk::Framebuffer::null() {
                    device.destroy_framebuffer(target.framebuffer, None);
                }
                if target.view != vk::ImageView::null() {
                    device.destroy_image_view(target.view, None);
                }
            }
        }
        self.depth = None;
    }

    /// Recreate the chain against the surface's current capabilities.
    ///
    /// Waits for the device to go idle first. A zero-sized window (minimized)
    /// defers the rebuild without touching anything.
    pub fn rebuild(&mut self, window_extent: vk::Extent2D) -> Result<RebuildOutcome> {
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(RebuildOutcome::Deferred);
        }

        self.context.wait_idle()?;

        let params = self.chain_params(window_extent)?;
        if params.extent.width == 0 || params.extent.height == 0 {
            return Ok(RebuildOutcome::Deferred);
        }

        self.destroy_targets();
        let render_pass_recreated = params.format.format != self.format.format;
        self.create_chain(&params)?;

        if render_pass_recreated {
            log::debug!("Surface format changed, recreating render pass");
            unsafe { self.context.device().destroy_render_pass(self.render_pass, None) };
            self.render_pass = vk::RenderPass::null();
            self.render_pass = create_render_pass(self.context.device(), params.format.format)?;
        }
        self.create_targets()?;

        log::info!("Swapchain rebuilt: {}x{}", self.extent.width, self.extent.height);
        Ok(RebuildOutcome::Rebuilt {
            render_pass_recreated,
        })
    }

    /// Wait until the current slot is free, then acquire the next image.
    ///
    /// The fence is waited on but not reset; reset it only once the frame
    /// is certain to be submitted.
    pub fn acquire_next_image(&self) -> Result<AcquireStatus> {
        let sync = self.frame_sync();

        unsafe {
            self.context
                .device()
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)
                .context("Failed to wait for in-flight fence")?;
        }

        let result = unsafe {
            self.loader
                .acquire_next_image(self.raw, u64::MAX, sync.image_available, vk::Fence::null())
        };

        match result {
            Ok((index, false)) => Ok(AcquireStatus::Acquired(index)),
            Ok((index, true)) => Ok(AcquireStatus::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present `image_index` once the current slot's rendering finishes.
    pub fn present(&self, image_index: u32) -> Result<PresentStatus> {
        let wait_semaphores = [self.frame_sync().render_finished];
        let swapchains = [self.raw];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.loader
                .queue_present(self.context.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentStatus::Presented),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    /// Sync objects of the current frame slot.
    pub fn frame_sync(&self) -> &FrameSync {
        &self.sync[self.slots.current()]
    }

    pub fn current_frame(&self) -> usize {
        self.slots.current()
    }

    pub fn set_current_frame(&mut self, frame: usize) {
        self.slots.set_current(frame);
    }

    pub fn advance_frame(&mut self) -> usize {
        self.slots.advance()
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.images
            .get(image_index as usize)
            .map(|target| target.framebuffer)
            .with_context(|| format!("Swapchain image {} does not exist", image_index))
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("{:?}", e);
        }

        self.destroy_targets();
        let device = self.context.device();
        unsafe {
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
            for sync in self.sync.drain(..) {
                sync.destroy(device);
            }
            if self.raw != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.raw, None);
            }
        }
    }
}
