//! Blend-mask sources for the composite pass.

use crate::gpu::{GpuContext, GpuTexture};
use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::GrayImage;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Produces a single-channel mask aligned to the source frame.
///
/// Mask value 1.0 keeps the source pixel, 0.0 takes the blurred one.
pub trait MaskProvider: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Mask for `source`, or `None` when nothing is available for this frame.
    fn mask_for(&mut self, source: &GpuTexture) -> Option<Arc<GpuTexture>>;
}

/// Where the composite pass gets its blend weights from.
pub enum MaskStrategy {
    /// Sobel edge map of the source, blurred (four-stage graph)
    SelfDerivedEdge,
    /// Externally supplied mask, e.g. a segmentation model (two-stage graph)
    External(Box<dyn MaskProvider>),
}

impl MaskStrategy {
    pub fn describe(&self) -> String {
        match self {
            MaskStrategy::SelfDerivedEdge => "self-derived edge".to_string(),
            MaskStrategy::External(provider) => format!("external ({})", provider.name()),
        }
    }
}

/// A fixed mask loaded once from a grayscale image.
pub struct ImageMaskProvider {
    name: String,
    texture: Arc<GpuTexture>,
}

impl ImageMaskProvider {
    /// Loads `path` and resizes it to the capture resolution.
    pub fn load(ctx: &GpuContext, path: &Path, width: u32, height: u32) -> Result<Self> {
        info!("Loading blend mask from {:?}", path);
        let luma = image::open(path)
            .with_context(|| format!("failed to open mask image {:?}", path))?
            .to_luma8();
        let resized = if luma.dimensions() == (width, height) {
            luma
        } else {
            image::imageops::resize(&luma, width, height, FilterType::Triangle)
        };
        Ok(Self::from_luma(ctx, path.display().to_string(), &resized))
    }

    /// Uploads an in-memory mask.
    pub fn from_luma(ctx: &GpuContext, name: impl Into<String>, mask: &GrayImage) -> Self {
        let (width, height) = mask.dimensions();
        let texture = GpuTexture::new(
            &ctx.device,
            "External Mask",
            width,
            height,
            wgpu::TextureFormat::R8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            mask.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Self {
            name: name.into(),
            texture: Arc::new(texture),
        }
    }
}

impl MaskProvider for ImageMaskProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn mask_for(&mut self, _source: &GpuTexture) -> Option<Arc<GpuTexture>> {
        Some(self.texture.clone())
    }
}
