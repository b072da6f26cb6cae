//! Upload of camera frames into sampleable GPU textures.

use crate::frame::{Frame, PixelFormat};
use crate::gpu::{GpuContext, GpuTexture};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why a frame could not be turned into a texture. The frame is skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("frame format {actual:?} does not match the configured {expected:?}")]
    FormatMismatch { expected: PixelFormat, actual: PixelFormat },
    #[error("frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("frame buffer holds {actual} bytes, {expected} needed")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("row stride {bytes_per_row} is smaller than one row of pixels")]
    BadStride { bytes_per_row: u32 },
    #[error("{width}x{height} frame exceeds the device texture limit of {limit}")]
    TooLarge { width: u32, height: u32, limit: u32 },
}

/// Recently used source textures, reused once nobody else holds them.
pub struct TextureCache {
    entries: Vec<Arc<GpuTexture>>,
    capacity: usize,
    allocations: u64,
}

impl TextureCache {
    pub const DEFAULT_CAPACITY: usize = 3;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            allocations: 0,
        }
    }

    /// Returns an idle texture of the requested geometry, allocating (and
    /// evicting the oldest entry) when none is free.
    fn acquire(&mut self, device: &wgpu::Device, width: u32, height: u32, format: wgpu::TextureFormat) -> Arc<GpuTexture> {
        let idle = self.entries.iter().position(|entry| {
            Arc::strong_count(entry) == 1 && entry.size() == (width, height) && entry.format() == format
        });
        if let Some(index) = idle {
            // Move to the back so eviction stays oldest-first.
            let entry = self.entries.remove(index);
            self.entries.push(entry.clone());
            return entry;
        }

        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
        }
        self.allocations += 1;
        debug!("Allocating source texture #{} ({}x{})", self.allocations, width, height);
        let texture = Arc::new(GpuTexture::new(
            device,
            "Camera Frame",
            width,
            height,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
        ));
        self.entries.push(texture.clone());
        texture
    }

    /// Forgets every cached texture, e.g. after the device was recreated.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of textures allocated over the cache's lifetime.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

/// Wraps incoming frames as GPU textures.
pub struct TextureIngestor {
    ctx: Arc<GpuContext>,
    format: PixelFormat,
    texture_format: wgpu::TextureFormat,
    cache: TextureCache,
}

impl TextureIngestor {
    /// Creates an ingestor accepting BGRA-8 frames only.
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self {
            ctx,
            format: PixelFormat::Bgra8,
            texture_format: wgpu::TextureFormat::Bgra8Unorm,
            cache: TextureCache::new(TextureCache::DEFAULT_CAPACITY),
        }
    }

    /// Uploads `frame` into a cached texture. No format conversion happens:
    /// a frame in any other format is rejected.
    pub fn ingest(&mut self, frame: &Frame) -> Result<Arc<GpuTexture>, IngestError> {
        if frame.format() != self.format {
            return Err(IngestError::FormatMismatch {
                expected: self.format,
                actual: frame.format(),
            });
        }
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(IngestError::EmptyFrame { width, height });
        }
        let row_bytes = width as usize * self.format.bytes_per_pixel();
        if (frame.bytes_per_row() as usize) < row_bytes {
            return Err(IngestError::BadStride {
                bytes_per_row: frame.bytes_per_row(),
            });
        }
        if frame.data().len() < frame.required_len() {
            return Err(IngestError::ShortBuffer {
                expected: frame.required_len(),
                actual: frame.data().len(),
            });
        }
        let limit = self.ctx.max_texture_dimension();
        if width > limit || height > limit {
            return Err(IngestError::TooLarge { width, height, limit });
        }

        let texture = self.cache.acquire(&self.ctx.device, width, height, self.texture_format);
        self.ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data()[..frame.required_len()],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.bytes_per_row()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(texture)
    }

    /// Drops all cached textures.
    pub fn reset(&mut self) {
        self.cache.reset();
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_context;

    #[test]
    fn test_mismatched_format_is_rejected() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut ingestor = TextureIngestor::new(ctx);
        let frame = Frame::from_data(4, 4, PixelFormat::Rgba8, vec![0u8; 64]);
        assert_eq!(
            ingestor.ingest(&frame).unwrap_err(),
            IngestError::FormatMismatch {
                expected: PixelFormat::Bgra8,
                actual: PixelFormat::Rgba8
            }
        );
        assert!(ingestor.cache().is_empty());
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut ingestor = TextureIngestor::new(ctx);

        let empty = Frame::from_data(0, 4, PixelFormat::Bgra8, Vec::new());
        assert!(matches!(ingestor.ingest(&empty), Err(IngestError::EmptyFrame { .. })));

        let short = Frame::from_data(4, 4, PixelFormat::Bgra8, vec![0u8; 60]);
        assert!(matches!(ingestor.ingest(&short), Err(IngestError::ShortBuffer { expected: 64, actual: 60 })));

        let narrow = Frame::with_stride(4, 4, 8, PixelFormat::Bgra8, vec![0u8; 64]);
        assert!(matches!(ingestor.ingest(&narrow), Err(IngestError::BadStride { bytes_per_row: 8 })));
    }

    #[test]
    fn test_padded_rows_upload_visible_pixels_only() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut ingestor = TextureIngestor::new(ctx.clone());
        // 2x2 frame, 12-byte rows: 8 bytes of pixels + 4 bytes of padding.
        let data = vec![
            1, 2, 3, 4, 5, 6, 7, 8, 99, 99, 99, 99, //
            9, 10, 11, 12, 13, 14, 15, 16, 99, 99, 99, 99,
        ];
        let frame = Frame::with_stride(2, 2, 12, PixelFormat::Bgra8, data);
        let texture = ingestor.ingest(&frame).unwrap();
        assert_eq!(ctx.read_texture(&texture).unwrap(), (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn test_cache_reuses_idle_textures_only() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut ingestor = TextureIngestor::new(ctx);
        let frame = Frame::solid(8, 8, [10, 20, 30, 255]);

        let first = ingestor.ingest(&frame).unwrap();
        let first_ptr = Arc::as_ptr(&first);
        // Still held by the caller, so a second texture is needed.
        let second = ingestor.ingest(&frame).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(ingestor.cache().allocations(), 2);

        drop(first);
        drop(second);
        let third = ingestor.ingest(&frame).unwrap();
        assert_eq!(ingestor.cache().allocations(), 2);
        assert_eq!(Arc::as_ptr(&third), first_ptr);

        ingestor.reset();
        assert!(ingestor.cache().is_empty());
    }

    #[test]
    fn test_cache_evicts_oldest_when_full() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut ingestor = TextureIngestor::new(ctx);
        let frame = Frame::solid(4, 4, [0, 0, 0, 255]);
        let held: Vec<_> = (0..TextureCache::DEFAULT_CAPACITY + 2)
            .map(|_| ingestor.ingest(&frame).unwrap())
            .collect();
        assert_eq!(ingestor.cache().len(), TextureCache::DEFAULT_CAPACITY);
        assert_eq!(ingestor.cache().allocations(), held.len() as u64);
    }
}
