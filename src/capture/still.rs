//! Sources that need no camera: a still image and a generated pattern.

use super::{CaptureBackend, CaptureConfig};
use crate::frame::{Frame, PixelFormat};
use anyhow::{anyhow, Context, Result};
use tracing::info;

/// Repeats one decoded image forever.
pub struct StillImageSource {
    frame: Frame,
}

impl StillImageSource {
    pub fn from_frame(frame: Frame) -> Self {
        Self { frame }
    }
}

impl CaptureBackend for StillImageSource {
    fn open(config: &CaptureConfig) -> Result<Self> {
        let path = config
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("the image source needs an image path"))?;
        let image = image::open(path)
            .with_context(|| format!("failed to open image {:?}", path))?
            .to_rgba8();
        info!("Loaded still image {:?} ({}x{})", path, image.width(), image.height());
        Ok(Self::from_frame(Frame::from_rgba_image(&image)))
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        // Pixel data is shared, so this is cheap.
        Ok(self.frame.clone())
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.frame.width(), self.frame.height())
    }
}

/// Deterministic moving pattern: a smooth colour gradient crossed by a sharp
/// white bar, so both the smoothing and the edge preservation are visible.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    background: Vec<u8>,
    tick: u64,
}

impl TestPatternSource {
    const BAR_SPEED: u64 = 4;

    pub fn new(width: u32, height: u32) -> Self {
        let mut background = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let b = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                background.extend_from_slice(&[b, g, 160, 255]);
            }
        }
        Self {
            width,
            height,
            background,
            tick: 0,
        }
    }

    fn bar_span(&self) -> (u32, u32) {
        let bar_width = (self.width / 32).max(1);
        let start = ((self.tick * Self::BAR_SPEED) % self.width.max(1) as u64) as u32;
        (start, (start + bar_width).min(self.width))
    }
}

impl CaptureBackend for TestPatternSource {
    fn open(config: &CaptureConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("test pattern needs a non-empty size, got {}x{}", config.width, config.height));
        }
        Ok(Self::new(config.width, config.height))
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        let mut pixels = self.background.clone();
        let (start, end) = self.bar_span();
        let row_bytes = self.width as usize * 4;
        for row in pixels.chunks_exact_mut(row_bytes) {
            row[start as usize * 4..end as usize * 4].fill(255);
        }
        self.tick += 1;
        Ok(Frame::from_data(self.width, self.height, PixelFormat::Bgra8, pixels))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_pattern_is_deterministic() {
        let mut a = TestPatternSource::new(64, 16);
        let mut b = TestPatternSource::new(64, 16);
        for _ in 0..3 {
            assert_eq!(a.capture_frame().unwrap().data(), b.capture_frame().unwrap().data());
        }
    }

    #[test]
    fn test_pattern_bar_moves() {
        let mut source = TestPatternSource::new(64, 4);
        let first = source.capture_frame().unwrap();
        let second = source.capture_frame().unwrap();
        assert_ne!(first.data(), second.data());

        // First frame: bar covers columns 0..2 in every row.
        let row = &first.data()[64 * 4..128 * 4];
        assert_eq!(&row[..8], &[255u8; 8]);
        assert_ne!(&row[8..12], &[255u8; 4]);
    }

    #[test]
    fn test_still_image_is_bgra() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let mut source = StillImageSource::from_frame(Frame::from_rgba_image(&image));
        assert_eq!(source.frame_size(), (3, 2));
        let frame = source.capture_frame().unwrap();
        assert_eq!(&frame.data()[..4], &[30, 20, 10, 255]);
    }
}
