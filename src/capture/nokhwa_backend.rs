//! Nokhwa-based webcam capture backend.

use super::{CameraInfo, CaptureBackend, CaptureConfig};
use crate::frame::Frame;
use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use tracing::{debug, info};

/// Webcam capture using the nokhwa library. Frames are decoded to RGB and
/// repacked as BGRA.
pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl NokhwaCapture {
    /// Returns a list of available camera devices.
    pub fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    /// Formats to try, the requested one first.
    ///
    /// Built-in macOS cameras usually only offer NV12/YUYV, USB cameras offer
    /// MJPEG at high resolutions; lower resolutions are the last resort.
    fn seed_formats(config: &CaptureConfig) -> Vec<CameraFormat> {
        let mut resolutions = vec![(config.width, config.height)];
        for fallback in [(1280, 720), (640, 480)] {
            if !resolutions.contains(&fallback) {
                resolutions.push(fallback);
            }
        }
        resolutions
            .into_iter()
            .flat_map(|(w, h)| {
                [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG]
                    .into_iter()
                    .map(move |format| CameraFormat::new(Resolution::new(w, h), format, config.fps))
            })
            .collect()
    }
}

impl CaptureBackend for NokhwaCapture {
    fn open(config: &CaptureConfig) -> Result<Self> {
        let mut camera = None;
        for seed in Self::seed_formats(config) {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(seed));
            let Ok(mut cam) = Camera::new(CameraIndex::Index(config.device_index), requested) else {
                continue;
            };
            // Creating the camera is not enough for some drivers; the stream must open too.
            match cam.open_stream() {
                Ok(()) => {
                    info!("Camera stream opened with {:?}", seed);
                    camera = Some(cam);
                    break;
                }
                Err(e) => debug!("Camera rejected {:?}: {}", seed, e),
            }
        }

        let camera = camera.ok_or_else(|| {
            anyhow!(
                "could not open a stream on camera {} with any standard format",
                config.device_index
            )
        })?;

        let resolution = camera.resolution();
        info!("Camera opened with resolution: {}", resolution);
        if (resolution.width(), resolution.height()) != (config.width, config.height) {
            info!(
                "Camera delivers {}x{} instead of the requested {}x{}",
                resolution.width(),
                resolution.height(),
                config.width,
                config.height
            );
        }

        Ok(Self {
            width: resolution.width(),
            height: resolution.height(),
            camera,
        })
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        let frame = self.camera.frame()?;
        let decoded = frame.decode_image::<RgbFormat>()?;
        Ok(Frame::from_rgb(decoded.width(), decoded.height(), decoded.as_raw()))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
