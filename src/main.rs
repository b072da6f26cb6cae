//! silkcam: real-time GPU skin smoothing for camera feeds.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
#[cfg(feature = "camera")]
use silkcam::capture::NokhwaCapture;
use silkcam::capture::{AsyncCapture, SourceKind};
use silkcam::config::{Config, ConfigWatcher, MaskKind};
use silkcam::filter::{FilterGraph, ImageMaskProvider, MaskStrategy};
use silkcam::frame::Frame;
use silkcam::gpu::GpuContext;
use silkcam::ingest::TextureIngestor;
use silkcam::output::{DrawOutcome, DrawTarget, OffscreenTarget, PresentationRenderer, WindowSurface};
use silkcam::pump::{FilterControls, FramePump, FrameSlot};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Edge-aware skin smoothing and whitening for live video.
#[derive(Parser, Debug)]
#[command(name = "silkcam")]
#[command(about = "Apply GPU skin smoothing to webcam video in real-time")]
struct Args {
    /// YAML configuration file (watched for changes)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frame source
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Image for the `image` source (implies `--source image`)
    #[arg(long)]
    image: Option<PathBuf>,

    /// Camera device index
    #[arg(short, long)]
    input: Option<u32>,

    /// Frame width
    #[arg(long)]
    width: Option<u32>,

    /// Frame height
    #[arg(long)]
    height: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Start with the filter switched off
    #[arg(long)]
    no_filter: bool,

    /// Sigma of the image-detail blur
    #[arg(long)]
    blur_sigma: Option<f32>,

    /// Brightening of smooth regions, 0..=1
    #[arg(long)]
    whitening: Option<f32>,

    /// Grayscale blend mask used instead of the edge map
    #[arg(long)]
    mask_image: Option<PathBuf>,

    /// Render offscreen instead of opening a window
    #[arg(long)]
    headless: bool,

    /// Headless: stop after this many presented ticks
    #[arg(long)]
    frames: Option<u64>,

    /// Headless: write the last presented image to this PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// List available cameras and exit
    #[cfg(feature = "camera")]
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    /// File values first, then command-line overrides.
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        let capture = &mut config.capture;
        if let Some(image) = &self.image {
            capture.image = Some(image.clone());
            capture.source = SourceKind::Image;
        }
        if let Some(source) = self.source {
            capture.source = source;
        }
        if let Some(input) = self.input {
            capture.device_index = input;
        }
        if let Some(width) = self.width {
            capture.width = width;
        }
        if let Some(height) = self.height {
            capture.height = height;
        }
        if let Some(fps) = self.fps {
            capture.fps = fps;
        }

        let filter = &mut config.filter;
        if self.no_filter {
            filter.enabled = false;
        }
        if let Some(sigma) = self.blur_sigma {
            filter.params.blur_sigma = sigma;
        }
        if let Some(whitening) = self.whitening {
            filter.params.whitening = whitening;
        }
        if let Some(mask) = &self.mask_image {
            filter.mask = MaskKind::Image;
            filter.mask_image = Some(mask.clone());
        }

        config.validate().context("invalid settings")?;
        Ok(config)
    }
}

/// Opens the frame source and starts the pump on the capture thread.
///
/// The filter graph is built at the source's actual frame size; failing to
/// build it aborts startup.
fn start_capture(
    ctx: Arc<GpuContext>,
    config: &Config,
    controls: Arc<FilterControls>,
    slot: Arc<FrameSlot>,
) -> Result<AsyncCapture> {
    let filter = config.filter.clone();
    info!("Opening {:?} source...", config.capture.source);
    let capture = AsyncCapture::spawn(config.capture.clone(), move |(width, height)| {
        let strategy = match (filter.mask, &filter.mask_image) {
            (MaskKind::Image, Some(path)) => {
                MaskStrategy::External(Box::new(ImageMaskProvider::load(&ctx, path, width, height)?))
            }
            (MaskKind::Image, None) => return Err(anyhow!("mask image path missing")),
            (MaskKind::Edge, _) => MaskStrategy::SelfDerivedEdge,
        };
        let graph = FilterGraph::new(ctx.clone(), width, height, filter.params, strategy)?;
        let mut pump = FramePump::new(TextureIngestor::new(ctx), Some(graph), controls, slot);
        Ok(move |frame: Frame| {
            pump.on_frame(frame);
        })
    })?;
    let (width, height) = capture.frame_size();
    info!("Capture running at {}x{}", width, height);
    Ok(capture)
}

fn watch_config(path: Option<&PathBuf>, config: &Config) -> Option<ConfigWatcher> {
    let path = path?;
    match ConfigWatcher::new(path, config.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Config hot reload unavailable: {:#}", e);
            None
        }
    }
}

/// Application state for the event loop.
struct SilkcamApp {
    config: Config,
    config_path: Option<PathBuf>,
    controls: Arc<FilterControls>,
    slot: Arc<FrameSlot>,
    window: Option<Arc<Window>>,
    surface: Option<WindowSurface>,
    renderer: Option<PresentationRenderer>,
    capture: Option<AsyncCapture>,
    watcher: Option<ConfigWatcher>,
    presented: u32,
    presented_since: Instant,
    fatal: Option<anyhow::Error>,
}

impl SilkcamApp {
    fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        let controls = Arc::new(FilterControls::new(config.filter.enabled));
        Self {
            config,
            config_path,
            controls,
            slot: Arc::new(FrameSlot::new()),
            window: None,
            surface: None,
            renderer: None,
            capture: None,
            watcher: None,
            presented: 0,
            presented_since: Instant::now(),
            fatal: None,
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let (ctx, surface) = GpuContext::with_surface(window.clone())?;
        let ctx = Arc::new(ctx);
        let surface = WindowSurface::new(ctx.clone(), surface, &window)?;
        let renderer = PresentationRenderer::new(ctx.clone(), surface.format(), self.config.display.clear_color)?;
        info!("Presenting to {:?} surface", surface.format());

        self.capture = Some(start_capture(ctx, &self.config, self.controls.clone(), self.slot.clone())?);
        self.watcher = watch_config(self.config_path.as_ref(), &self.config);
        self.surface = Some(surface);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("Initialization error: {:#}", e);
        self.fatal = Some(e);
        event_loop.exit();
    }

    fn redraw(&mut self) {
        let (Some(renderer), Some(surface)) = (&mut self.renderer, &mut self.surface) else {
            return;
        };
        let current = self.slot.load();
        if renderer.draw(surface, current.as_deref()) == DrawOutcome::Presented {
            self.presented += 1;
        }

        let elapsed = self.presented_since.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.presented as f32 / elapsed.as_secs_f32();
            debug!("[Perf] Presenting at {:.2} FPS", fps);
            self.presented = 0;
            self.presented_since = Instant::now();
        }
    }
}

impl ApplicationHandler for SilkcamApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title(self.config.display.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.capture.width, self.config.capture.height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, anyhow!("failed to create window: {}", e)),
        };
        self.window = Some(window.clone());
        if let Err(e) = self.initialize(window) {
            self.fail(event_loop, e);
        } else {
            info!("Window created; Space toggles the filter, Escape quits");
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(surface) = &mut self.surface {
                    surface.resize(size);
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed && !event.repeat => {
                match event.logical_key {
                    Key::Named(NamedKey::Space) => {
                        let enabled = self.controls.toggle();
                        info!("Filter {}", if enabled { "enabled" } else { "disabled" });
                    }
                    Key::Named(NamedKey::Escape) => event_loop.exit(),
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(filter) = self.watcher.as_mut().and_then(ConfigWatcher::check_for_changes) {
            filter.apply(&self.controls);
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    #[cfg(feature = "camera")]
    if args.list_devices {
        println!("Available cameras:");
        match NokhwaCapture::list_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => {
                eprintln!("Failed to list devices: {}", e);
            }
        }
        return Ok(());
    }

    let config = args.resolve_config()?;
    info!("Starting silkcam...");

    if args.headless {
        run_headless(&args, config)
    } else {
        run_window_mode(&args, config)
    }
}

/// Run in window output mode (default).
fn run_window_mode(args: &Args, config: Config) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = SilkcamApp::new(config, args.config.clone());
    event_loop.run_app(&mut app)?;

    // Stop capture before the GPU objects it uses go away.
    app.capture.take();
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Run the full pipeline into an offscreen drawable at a 60 Hz tick.
fn run_headless(args: &Args, config: Config) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let ctx = Arc::new(GpuContext::headless()?);
    let controls = Arc::new(FilterControls::new(config.filter.enabled));
    let slot = Arc::new(FrameSlot::new());
    let capture = start_capture(ctx.clone(), &config, controls.clone(), slot.clone())?;

    let (width, height) = capture.frame_size();
    let mut target = OffscreenTarget::new(&ctx, width, height);
    let mut renderer = PresentationRenderer::new(ctx.clone(), target.format(), config.display.clear_color)?;
    let mut watcher = watch_config(args.config.as_ref(), &config);

    let tick = Duration::from_secs_f64(1.0 / 60.0);
    let mut presented = 0u64;
    info!("Headless run started ({} ticks max)", args.frames.map_or("no".to_string(), |n| n.to_string()));

    while running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        if let Some(filter) = watcher.as_mut().and_then(ConfigWatcher::check_for_changes) {
            filter.apply(&controls);
        }
        let current = slot.load();
        if renderer.draw(&mut target, current.as_deref()) == DrawOutcome::Presented {
            presented += 1;
            if args.frames.is_some_and(|limit| presented >= limit) {
                break;
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick {
            std::thread::sleep(tick - elapsed);
        }
    }
    drop(capture);
    info!("Presented {} ticks", presented);

    if let Some(path) = &args.snapshot {
        let image = target.snapshot(&ctx)?;
        image
            .save(path)
            .with_context(|| format!("failed to write snapshot {:?}", path))?;
        info!("Saved snapshot to {:?}", path);
    }
    Ok(())
}
