//! GPU context, textures and shader sources.

mod bind_cache;
mod context;
pub mod shaders;

pub use bind_cache::BindGroupCache;
pub use context::{GpuContext, PipelineSpec};

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Errors raised while acquiring or using GPU resources.
///
/// Everything except `Readback` is a construction-time failure: the pipeline
/// cannot run on this platform at all.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to open GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("failed to create presentation surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("presentation surface is not supported by the adapter")]
    UnsupportedSurface,
    #[error("shader `{label}` failed to compile:\n{message}")]
    ShaderCompilation { label: String, message: String },
    #[error("{width}x{height} texture exceeds the device limit of {limit}")]
    TextureTooLarge { width: u32, height: u32, limit: u32 },
    #[error("texture format {0:?} cannot be read back")]
    UnreadableFormat(wgpu::TextureFormat),
    #[error("GPU readback failed: {0}")]
    Readback(String),
}

/// A 2D GPU texture together with its default view.
#[derive(Debug)]
pub struct GpuTexture {
    id: u64,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

impl GpuTexture {
    /// Allocates a single-mip 2D texture.
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            texture,
            view,
            width,
            height,
            format,
        }
    }

    /// Process-unique identity, never reused after the texture is dropped.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

/// Headless context for GPU tests; `None` when the machine has no usable adapter.
#[cfg(test)]
pub(crate) fn test_context() -> Option<std::sync::Arc<GpuContext>> {
    match GpuContext::headless() {
        Ok(ctx) => Some(std::sync::Arc::new(ctx)),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}
