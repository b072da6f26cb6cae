//! Fixed-size render targets reused by every frame of the filter graph.

use crate::gpu::GpuTexture;
use std::sync::Arc;

/// Role of a transient texture in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureRole {
    /// Horizontal-pass output shared by both separable blurs
    Scratch,
    /// Gaussian blur of the source
    Blurred,
    /// Sobel magnitude of the source luma
    EdgeMap,
    /// Gaussian blur of the edge map, the blend mask
    BlurredEdge,
    /// Composite result
    Output,
}

impl TextureRole {
    pub const ALL: [TextureRole; 5] = [
        TextureRole::Scratch,
        TextureRole::Blurred,
        TextureRole::EdgeMap,
        TextureRole::BlurredEdge,
        TextureRole::Output,
    ];

    fn label(&self) -> &'static str {
        match self {
            TextureRole::Scratch => "Blur Scratch",
            TextureRole::Blurred => "Blurred",
            TextureRole::EdgeMap => "Edge Map",
            TextureRole::BlurredEdge => "Blurred Edge",
            TextureRole::Output => "Composite Output",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Owned set of render targets, allocated once and never resized.
pub struct TransientPool {
    width: u32,
    height: u32,
    textures: Vec<Arc<GpuTexture>>,
}

impl TransientPool {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let textures = TextureRole::ALL
            .iter()
            .map(|role| {
                Arc::new(GpuTexture::new(
                    device,
                    role.label(),
                    width,
                    height,
                    Self::FORMAT,
                    wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                ))
            })
            .collect();
        Self {
            width,
            height,
            textures,
        }
    }

    pub fn get(&self, role: TextureRole) -> &Arc<GpuTexture> {
        &self.textures[role.index()]
    }

    /// Returns `(width, height)` shared by every texture in the pool.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
