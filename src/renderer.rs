// Renderer - drives the per-frame protocol
//
// Owns the swapchain, one command buffer per frame slot, and the single
// graphics pipeline. Callers hand in a Drawable each frame; everything it
// records lands between render pass begin and end.

use anyhow::{Context, Result};
use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{
    GraphicsContext, Pipeline, PipelineConfig, PipelineLayout, ShaderModule, Swapchain,
    MAX_FRAMES_IN_FLIGHT,
};
use crate::config::Config;
use crate::frame::{
    AcquireStatus, FrameGpu, FrameLoop, FrameOutcome, FrameStats, PresentStatus, RebuildOutcome,
};
use crate::model::Vertex;
use crate::window::WindowSurface;

/// What a Drawable may record into during `Renderer::draw_frame`.
pub struct DrawContext<'a> {
    pub device: &'a ash::Device,
    pub command_buffer: vk::CommandBuffer,
    pub pipeline_layout: vk::PipelineLayout,
    /// Frame slot being recorded; its fence has already been waited on.
    pub frame: usize,
    pub extent: vk::Extent2D,
}

/// Something the renderer can draw: owns its buffers and descriptor sets.
pub trait Drawable {
    /// Refresh per-frame bindings (uniforms, textures) for `ctx.frame`.
    fn update_descriptors(&mut self, ctx: &DrawContext<'_>) -> Result<()>;

    /// Bind descriptor sets and vertex/index buffers.
    fn bind(&self, ctx: &DrawContext<'_>) -> Result<()>;

    fn draw(&self, ctx: &DrawContext<'_>);
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl RendererSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            present_mode: config.present_mode(),
            clear_color: config.graphics.clear_color,
            vertex_shader: config.shaders.vertex.clone(),
            fragment_shader: config.shaders.fragment.clone(),
        }
    }
}

pub struct Renderer {
    frames: FrameLoop,
    target: RenderTarget,
}

impl Renderer {
    /// The context's descriptor set layouts must already exist.
    pub fn new(
        window: Arc<dyn WindowSurface>,
        context: Arc<GraphicsContext>,
        settings: &RendererSettings,
    ) -> Result<Self> {
        log::info!("Creating renderer...");

        let swapchain = Swapchain::new(
            context.clone(),
            window.framebuffer_extent(),
            settings.present_mode,
        )?;
        let commands = FrameCommands::new(context.clone())?;
        let pipeline_layout = PipelineLayout::new(context.clone())?;
        let vertex_shader = ShaderModule::from_file(context.clone(), &settings.vertex_shader)?;
        let fragment_shader = ShaderModule::from_file(context.clone(), &settings.fragment_shader)?;
        let pipeline = build_pipeline(
            &context,
            swapchain.render_pass(),
            &pipeline_layout,
            &vertex_shader,
            &fragment_shader,
        )?;

        log::info!("Renderer ready");

        Ok(Self {
            frames: FrameLoop::new(),
            target: RenderTarget {
                pipeline,
                vertex_shader,
                fragment_shader,
                pipeline_layout,
                commands,
                swapchain,
                clear_color: settings.clear_color,
                context,
                window,
            },
        })
    }

    /// Acquire, record `drawable`, submit and present one frame.
    ///
    /// Out-of-date and suboptimal surfaces are handled here by rebuilding;
    /// only fatal errors are returned.
    pub fn draw_frame(&mut self, drawable: &mut dyn Drawable) -> Result<FrameOutcome> {
        self.frames
            .draw_frame(&mut self.target, |target, frame, _| target.record(frame, drawable))
    }

    /// Rebuild the swapchain before the next frame (window resized).
    pub fn request_rebuild(&mut self) {
        self.frames.request_rebuild();
    }

    pub fn stats(&self) -> FrameStats {
        self.frames.stats()
    }

    pub fn current_frame(&self) -> usize {
        self.target.swapchain.current_frame()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.target.swapchain.extent()
    }

    pub fn context(&self) -> &Arc<GraphicsContext> {
        &self.target.context
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.target.context.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Destroying renderer...");

        if let Err(e) = self.wait_idle() {
            log::error!("{:?}", e);
        }
    }
}

fn build_pipeline(
    context: &Arc<GraphicsContext>,
    render_pass: vk::RenderPass,
    layout: &PipelineLayout,
    vertex_shader: &ShaderModule,
    fragment_shader: &ShaderModule,
) -> Result<Pipeline> {
    let config = PipelineConfig::new(render_pass, layout.raw()).with_vertex_input(
        vec![Vertex::binding_description()],
        Vertex::attribute_descriptions().to_vec(),
    );
    Pipeline::new(context.clone(), vertex_shader, fragment_shader, &config)
}

/// One primary command buffer per frame slot, freed on drop.
struct FrameCommands {
    context: Arc<GraphicsContext>,
    buffers: [vk::CommandBuffer; MAX_FRAMES_IN_FLIGHT],
}

impl FrameCommands {
    fn new(context: Arc<GraphicsContext>) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(context.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);

        let allocated = unsafe { context.device().allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        let mut buffers = [vk::CommandBuffer::null(); MAX_FRAMES_IN_FLIGHT];
        buffers.copy_from_slice(&allocated);
        Ok(Self { context, buffers })
    }
}

impl Drop for FrameCommands {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device()
                .free_command_buffers(self.context.command_pool(), &self.buffers);
        }
    }
}

/// GPU half of the renderer. Field order is teardown order.
struct RenderTarget {
    pipeline: Pipeline,
    vertex_shader: ShaderModule,
    fragment_shader: ShaderModule,
    pipeline_layout: PipelineLayout,
    commands: FrameCommands,
    swapchain: Swapchain,
    clear_color: [f32; 4],
    context: Arc<GraphicsContext>,
    window: Arc<dyn WindowSurface>,
}

impl RenderTarget {
    fn command_buffer(&self) -> vk::CommandBuffer {
        self.commands.buffers[self.swapchain.current_frame()]
    }

    fn record(&self, frame: usize, drawable: &mut dyn Drawable) -> Result<()> {
        let ctx = DrawContext {
            device: self.context.device(),
            command_buffer: self.commands.buffers[frame],
            pipeline_layout: self.pipeline_layout.raw(),
            frame,
            extent: self.swapchain.extent(),
        };

        drawable.update_descriptors(&ctx)?;
        drawable.bind(&ctx)?;
        drawable.draw(&ctx);
        Ok(())
    }
}

impl FrameGpu for RenderTarget {
    fn current_frame(&self) -> usize {
        self.swapchain.current_frame()
    }

    fn advance_frame(&mut self) -> usize {
        self.swapchain.advance_frame()
    }

    fn acquire(&mut self) -> Result<AcquireStatus> {
        self.swapchain.acquire_next_image()
    }

    fn begin(&mut self, image_index: u32) -> Result<()> {
        let device = self.context.device();
        let command_buffer = self.command_buffer();
        let framebuffer = self.swapchain.framebuffer(image_index)?;
        let extent = self.swapchain.extent();

        // The slot's fence was waited on in acquire, so its buffer is idle.
        // The fence itself stays signaled until submit.
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .context("Failed to begin command buffer")?;
        }

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.raw(),
            );
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }

        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let device = self.context.device();
        let command_buffer = self.command_buffer();
        let sync = self.swapchain.frame_sync();

        unsafe {
            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .context("Failed to end command buffer")?;
        }

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // Reset only once nothing can fail before the submit that signals it,
        // or the next wait on this slot never returns
        unsafe {
            device
                .reset_fences(&[sync.in_flight_fence])
                .context("Failed to reset in-flight fence")?;
            device
                .queue_submit(
                    self.context.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
                .context("Failed to submit draw command buffer")
        }
    }

    fn present(&mut self, image_index: u32) -> Result<PresentStatus> {
        self.swapchain.present(image_index)
    }

    fn rebuild(&mut self) -> Result<RebuildOutcome> {
        let outcome = self.swapchain.rebuild(self.window.framebuffer_extent())?;

        if let RebuildOutcome::Rebuilt {
            render_pass_recreated: true,
        } = outcome
        {
            // Device is idle after the swapchain rebuild
            log::debug!("Rebuilding pipeline for {:?}", self.swapchain.format());
            self.pipeline = build_pipeline(
                &self.context,
                self.swapchain.render_pass(),
                &self.pipeline_layout,
                &self.vertex_shader,
                &self.fragment_shader,
            )?;
        }

        Ok(outcome)
    }
}
