//! Application entry flow: window creation, backend selection, the runtime
//! context handed to user callbacks, and the event loop.
//!
//! The whole runtime state lives in one [`AppContext`] owned by the loop and
//! threaded by reference into the callbacks; nothing is module-global.

pub mod frame;

pub use frame::{FrameDriver, FRAME_COUNT};

use std::sync::Arc;
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{CursorGrabMode, Fullscreen, Window, WindowId};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use ember_rhi::{
    create_device, Device, DeviceInfo, Format, Queue, QueueInfo, QueueType, RendererApi, RhiError,
    RhiResult, SurfaceHandles, Swapchain, SwapchainInfo,
};

#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub title: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub centered: bool,
    pub fullscreen: bool,
    pub grab_mouse: bool,
    pub renderer_api: RendererApi,
}

impl Default for WindowInfo {
    fn default() -> Self {
        Self {
            title: "ember".to_string(),
            x: 100,
            y: 100,
            width: 1400,
            height: 900,
            resizable: false,
            centered: true,
            fullscreen: false,
            grab_mouse: false,
            renderer_api: RendererApi::Vulkan,
        }
    }
}

/// Runtime state owned by the event loop and handed to every callback.
pub struct AppContext {
    pub device: Arc<dyn Device>,
    pub queue: Arc<dyn Queue>,
    pub swapchain: Box<dyn Swapchain>,
    pub frames: FrameDriver,
    pub window_width: u32,
    pub window_height: u32,
}

impl AppContext {
    /// Drain the queue and rebuild the swapchain in place at the new extent.
    /// The caller rebuilds its render graph afterwards.
    pub fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        self.queue.wait_idle()?;
        self.swapchain.resize(width, height)?;
        let (w, h) = self.swapchain.extent();
        self.window_width = w;
        self.window_height = h;
        Ok(())
    }
}

pub type InitFn = Box<dyn FnMut(&mut AppContext) -> RhiResult<()>>;
pub type UpdateFn = Box<dyn FnMut(&mut AppContext, f32) -> RhiResult<()>>;
pub type ResizeFn = Box<dyn FnMut(&mut AppContext, u32, u32) -> RhiResult<()>>;
pub type ShutdownFn = Box<dyn FnMut(&mut AppContext)>;

pub struct AppConfig {
    pub window_info: WindowInfo,
    pub log_level: log::LevelFilter,
    pub on_init: Option<InitFn>,
    pub on_update: Option<UpdateFn>,
    pub on_resize: Option<ResizeFn>,
    pub on_shutdown: Option<ShutdownFn>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window_info: WindowInfo::default(),
            log_level: log::LevelFilter::Info,
            on_init: None,
            on_update: None,
            on_resize: None,
            on_shutdown: None,
        }
    }
}

struct App {
    config: AppConfig,
    window: Option<Window>,
    ctx: Option<AppContext>,
    last_frame: Instant,
    error: Option<RhiError>,
}

impl App {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> RhiResult<()> {
        let info = &self.config.window_info;
        let mut attributes = Window::default_attributes()
            .with_title(info.title.clone())
            .with_inner_size(PhysicalSize::new(info.width, info.height))
            .with_resizable(info.resizable);
        if info.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        } else if !info.centered {
            attributes = attributes.with_position(PhysicalPosition::new(info.x, info.y));
        }
        let window = event_loop
            .create_window(attributes)
            .map_err(|e| RhiError::Backend(format!("create_window: {e}")))?;
        if info.centered && !info.fullscreen {
            if let Some(monitor) = window.current_monitor() {
                let screen = monitor.size();
                let size = window.outer_size();
                window.set_outer_position(PhysicalPosition::new(
                    (screen.width.saturating_sub(size.width) / 2) as i32,
                    (screen.height.saturating_sub(size.height) / 2) as i32,
                ));
            }
        }
        if info.grab_mouse {
            let _ = window.set_cursor_grab(CursorGrabMode::Confined);
        }

        let surface = SurfaceHandles {
            window: window
                .window_handle()
                .map_err(|e| RhiError::Backend(format!("window_handle: {e}")))?
                .as_raw(),
            display: window
                .display_handle()
                .map_err(|e| RhiError::Backend(format!("display_handle: {e}")))?
                .as_raw(),
        };
        let device = create_device(&DeviceInfo {
            api: info.renderer_api,
            surface: Some(surface),
            enable_validation: cfg!(debug_assertions),
        })?;
        let queue = device.create_queue(&QueueInfo {
            queue_type: QueueType::Graphics,
        })?;
        let size = window.inner_size();
        let swapchain = device.create_swapchain(&SwapchainInfo {
            width: size.width,
            height: size.height,
            format: Format::B8G8R8A8Srgb,
            min_image_count: FRAME_COUNT as u32,
            vsync: true,
            queue: &*queue,
        })?;
        let frames = FrameDriver::new(Arc::clone(&device), Arc::clone(&queue))?;
        let (width, height) = swapchain.extent();
        let mut ctx = AppContext {
            device,
            queue,
            swapchain,
            frames,
            window_width: width,
            window_height: height,
        };
        if let Some(on_init) = self.config.on_init.as_mut() {
            on_init(&mut ctx)?;
        }
        self.window = Some(window);
        self.ctx = Some(ctx);
        self.last_frame = Instant::now();
        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(());
        };
        if width == 0 || height == 0 {
            return Ok(());
        }
        ctx.resize(width, height)?;
        if let Some(on_resize) = self.config.on_resize.as_mut() {
            let (w, h) = ctx.swapchain.extent();
            on_resize(ctx, w, h)?;
        }
        Ok(())
    }

    fn update(&mut self) -> RhiResult<()> {
        let Some(ctx) = self.ctx.as_mut() else {
            return Ok(());
        };
        let now = Instant::now();
        let delta_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        let result = match self.config.on_update.as_mut() {
            Some(on_update) => on_update(ctx, delta_time),
            None => Ok(()),
        };
        match result {
            // Stale swapchain: rebuild at the current window size, skip this
            // frame, retry on the next one.
            Err(RhiError::SwapchainOutOfDate) => {
                let (width, height) = ctx.swapchain.extent();
                log::debug!("swapchain out of date, rebuilding at {width}x{height}");
                self.handle_resize(width, height)
            }
            other => other,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: RhiError) {
        log::error!("fatal: {error}");
        self.error = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.ctx.is_none() {
            if let Err(error) = self.init(event_loop) {
                self.fail(event_loop, error);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Err(error) = self.handle_resize(size.width, size.height) {
                    self.fail(event_loop, error);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(error) = self.update() {
                    self.fail(event_loop, error);
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Run the application: create the window and device chain, call `on_init`,
/// pump frames through `on_update`, and tear down through `on_shutdown`.
/// Returns an error (nonzero exit) only for initialization or fatal device
/// failures.
pub fn run_app(config: AppConfig) -> RhiResult<()> {
    let _ = env_logger::Builder::new()
        .filter_level(config.log_level)
        .try_init();
    let event_loop = EventLoop::new().map_err(|e| RhiError::Backend(format!("event loop: {e}")))?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App {
        config,
        window: None,
        ctx: None,
        last_frame: Instant::now(),
        error: None,
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| RhiError::Backend(format!("event loop: {e}")))?;

    if let Some(mut ctx) = app.ctx.take() {
        let _ = ctx.queue.wait_idle();
        if let Some(on_shutdown) = app.config.on_shutdown.as_mut() {
            on_shutdown(&mut ctx);
        }
        let _ = ctx.device.wait_idle();
    }
    match app.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
