//! Texture-backed draw target for headless runs.

use super::{DrawTarget, Drawable};
use crate::gpu::{GpuContext, GpuError, GpuTexture};
use image::RgbaImage;

/// A drawable that never goes to a display; its pixels can be read back.
pub struct OffscreenTarget {
    texture: GpuTexture,
}

impl OffscreenTarget {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let texture = GpuTexture::new(
            &ctx.device,
            "Offscreen Drawable",
            width,
            height,
            Self::FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        Self { texture }
    }

    pub fn texture(&self) -> &GpuTexture {
        &self.texture
    }

    /// Reads the last drawn image back as RGBA. Blocks until the GPU is done.
    pub fn snapshot(&self, ctx: &GpuContext) -> Result<RgbaImage, GpuError> {
        let mut pixels = ctx.read_texture(&self.texture)?;
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        let (width, height) = self.texture.size();
        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| GpuError::Readback(format!("readback does not hold {}x{} pixels", width, height)))
    }
}

impl DrawTarget for OffscreenTarget {
    fn format(&self) -> wgpu::TextureFormat {
        Self::FORMAT
    }

    fn current_drawable(&mut self) -> Option<Drawable> {
        let view = self
            .texture
            .texture()
            .create_view(&wgpu::TextureViewDescriptor::default());
        Some(Drawable::from_view(view, self.texture.width(), self.texture.height()))
    }
}
