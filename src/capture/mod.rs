//! Frame sources and the background capture thread.

#[cfg(feature = "camera")]
mod nokhwa_backend;
mod still;

#[cfg(feature = "camera")]
pub use nokhwa_backend::NokhwaCapture;
pub use still::{StillImageSource, TestPatternSource};

use crate::frame::Frame;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A producer of BGRA frames.
pub trait CaptureBackend {
    /// Opens the source with the specified configuration.
    fn open(config: &CaptureConfig) -> Result<Self>
    where
        Self: Sized;

    /// Returns the next frame, blocking until one is available.
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Dimensions of every frame this source produces.
    fn frame_size(&self) -> (u32, u32);
}

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Which kind of source feeds the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Webcam (requires the `camera` feature)
    Camera,
    /// A still image, repeated at the configured rate
    Image,
    /// Generated moving test pattern
    Pattern,
}

impl Default for SourceKind {
    fn default() -> Self {
        if cfg!(feature = "camera") {
            SourceKind::Camera
        } else {
            SourceKind::Pattern
        }
    }
}

/// Configuration for frame capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Camera device index
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
    /// Image shown by the `image` source
    pub image: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            device_index: 0,
            width: 1920,
            height: 1080,
            fps: 30,
            image: None,
        }
    }
}

/// Opens the source selected by `config.source`.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn CaptureBackend>> {
    Ok(match config.source {
        #[cfg(feature = "camera")]
        SourceKind::Camera => Box::new(NokhwaCapture::open(config)?),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => anyhow::bail!("camera capture needs a build with the `camera` feature"),
        SourceKind::Image => Box::new(StillImageSource::open(config)?),
        SourceKind::Pattern => Box::new(TestPatternSource::open(config)?),
    })
}

/// Runs a backend on its own thread and hands every frame to a handler.
///
/// The backend is opened on the capture thread, since camera handles are not
/// always `Send`. Frames are delivered no faster than the configured rate. The
/// thread stops when the capture is dropped.
pub struct AsyncCapture {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    frame_size: (u32, u32),
}

impl AsyncCapture {
    /// Opens the source selected by `config` and starts capturing.
    ///
    /// `make_handler` runs on the capture thread once the frame size is known.
    /// Errors from opening the source or building the handler are returned here.
    pub fn spawn<M, H>(config: CaptureConfig, make_handler: M) -> Result<Self>
    where
        M: FnOnce((u32, u32)) -> Result<H> + Send + 'static,
        H: FnMut(Frame) + 'static,
    {
        let fps = config.fps;
        Self::spawn_with(move || open_source(&config), fps, make_handler)
    }

    pub fn spawn_with<O, M, H>(open: O, fps: u32, make_handler: M) -> Result<Self>
    where
        O: FnOnce() -> Result<Box<dyn CaptureBackend>> + Send + 'static,
        M: FnOnce((u32, u32)) -> Result<H> + Send + 'static,
        H: FnMut(Frame) + 'static,
    {
        let frame_duration = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(u32, u32)>>(1);

        let thread = std::thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                let setup = open().and_then(|backend| {
                    let frame_size = backend.frame_size();
                    let handler = make_handler(frame_size)?;
                    Ok((backend, handler, frame_size))
                });
                let (mut backend, mut on_frame, frame_size) = match setup {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(frame_size)).is_err() {
                    return;
                }

                info!("Capture thread started at {}x{}, {:?} per frame", frame_size.0, frame_size.1, frame_duration);
                let start_time = Instant::now();
                let mut failures = 0u64;

                while running_clone.load(Ordering::SeqCst) {
                    let frame_start = Instant::now();
                    match backend.capture_frame() {
                        Ok(frame) => {
                            failures = 0;
                            let timestamp_us = start_time.elapsed().as_micros() as u64;
                            on_frame(frame.with_timestamp(timestamp_us));
                        }
                        Err(e) => {
                            failures += 1;
                            if failures == 1 {
                                warn!("Capture failed: {}", e);
                            } else {
                                debug!("Capture failed ({} in a row): {}", failures, e);
                            }
                        }
                    }

                    let elapsed = frame_start.elapsed();
                    if elapsed < frame_duration {
                        std::thread::sleep(frame_duration - elapsed);
                    }
                }
                info!("Capture thread stopped");
            })?;

        let frame_size = match ready_rx.recv() {
            Ok(Ok(frame_size)) => frame_size,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(anyhow::anyhow!("capture thread exited during startup"));
            }
        };

        Ok(Self {
            running,
            thread: Some(thread),
            frame_size,
        })
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

impl Drop for AsyncCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
