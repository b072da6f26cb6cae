//! Presentation: drawing the current texture into a display-sized drawable.

mod offscreen;
pub mod window_output;

pub use offscreen::OffscreenTarget;
pub use window_output::{PresentationRenderer, WindowSurface};

/// One display frame slot handed out by a [`DrawTarget`].
pub struct Drawable {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    surface_texture: Option<wgpu::SurfaceTexture>,
}

impl Drawable {
    /// A drawable backed by a plain texture view.
    pub fn from_view(view: wgpu::TextureView, width: u32, height: u32) -> Self {
        Self {
            view,
            width,
            height,
            surface_texture: None,
        }
    }

    /// A drawable backed by a swapchain image.
    pub fn from_surface(surface_texture: wgpu::SurfaceTexture) -> Self {
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let (width, height) = (surface_texture.texture.width(), surface_texture.texture.height());
        Self {
            view,
            width,
            height,
            surface_texture: Some(surface_texture),
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Returns `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Hands the drawable back to the display, if it came from one.
    pub fn present(self) {
        if let Some(surface_texture) = self.surface_texture {
            surface_texture.present();
        }
    }
}

/// A display-capable mount point for the renderer.
pub trait DrawTarget {
    /// Colour format of the drawables this target hands out.
    fn format(&self) -> wgpu::TextureFormat;

    /// The drawable for this refresh tick, or `None` when none is available.
    fn current_drawable(&mut self) -> Option<Drawable>;
}

/// Result of one draw tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Presented,
    /// Nothing has been produced yet
    NoTexture,
    /// The display had no drawable this tick
    NoDrawable,
}
