// =============================================================================
// DEMO - Textured spinning cube
// =============================================================================
//
// FRAME FLOW:
// 1. winit asks for a redraw
// 2. Update the cube's uniform (rotation, aspect ratio)
// 3. Renderer::draw_frame: wait fence → acquire → record → submit → present
// 4. Resize events only flag a rebuild; the renderer performs it
//
// =============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use vulkan_engine::backend::Texture;
use vulkan_engine::model::{self, GlobalUniform, Mesh, Model};
use vulkan_engine::{Config, FrameOutcome, GraphicsContext, Renderer, RendererSettings};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

const TEXTURE_SIZE: u32 = 256;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan engine");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .parse_filters(&config.debug.log_level)
        .parse_default_env()
        .init();
}

// =============================================================================
// SCENE
// =============================================================================

/// Everything that talks to the GPU.
///
/// IMPORTANT: Field order matters for Drop! Drawables go first, the context
/// last, so nothing outlives the device it was created from.
struct Scene {
    model: Model,
    renderer: Renderer,
    _texture: Arc<Texture>,
    context: Arc<GraphicsContext>,
    started: Instant,
}

impl Scene {
    fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let mut context = GraphicsContext::new(
            &*window,
            &config.window.title,
            config.validation_enabled(),
        )?;
        context.create_descriptor_layouts()?;
        context.create_descriptor_pool(config.graphics.max_objects)?;
        let context = Arc::new(context);

        let renderer = Renderer::new(
            window,
            context.clone(),
            &RendererSettings::from_config(config),
        )?;

        let pixels = model::checkerboard(TEXTURE_SIZE, 8);
        let texture = Arc::new(Texture::from_rgba8(
            context.clone(),
            TEXTURE_SIZE,
            TEXTURE_SIZE,
            &pixels,
        )?);

        let (vertices, indices) = model::cube();
        let mesh = Mesh::new(context.clone(), &vertices, &indices)?;
        let model = Model::new(context.clone(), mesh, texture.clone())?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            model,
            renderer,
            _texture: texture,
            context,
            started: Instant::now(),
        })
    }

    /// Returns true if a frame reached the screen.
    fn render_frame(&mut self) -> Result<bool> {
        let extent = self.renderer.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let angle = self.started.elapsed().as_secs_f32();
        self.model.set_uniform(GlobalUniform::spinning(angle, aspect));

        let outcome = self.renderer.draw_frame(&mut self.model)?;
        Ok(matches!(outcome, FrameOutcome::Presented { .. }))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    scene: Option<Scene>,
    window: Option<Arc<Window>>,

    // FPS TRACKING
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            scene: None,
            window: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let (Some(window), Some(scene)) = (&self.window, &self.scene) {
                let stats = scene.renderer.stats();
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{} rebuilds]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    stats.rebuilds
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self) {
        if let Some(scene) = self.scene.take() {
            if let Err(e) = scene.context.wait_idle() {
                log::error!("{:?}", e);
            }
            let stats = scene.renderer.stats();
            log::info!(
                "Presented {} frames, skipped {}, {} swapchain rebuilds",
                stats.presented,
                stats.skipped,
                stats.rebuilds
            );
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Scene::new(window.clone(), &self.config) {
            Ok(scene) => self.scene = Some(scene),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(scene) = &mut self.scene {
                    scene.renderer.request_rebuild();
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(scene) = &mut self.scene else {
                    return;
                };
                match scene.render_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("Render error: {:?}", e);
                        self.shutdown();
                        event_loop.exit();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
        log::info!("Cleanup complete");
    }
}
