//! Window surface and the aspect-fitting presentation renderer.

use super::{DrawOutcome, DrawTarget, Drawable};
use crate::frame::{AspectFit, QuadVertex};
use crate::gpu::{shaders, BindGroupCache, GpuContext, GpuError, GpuTexture, PipelineSpec};
use std::sync::Arc;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Swapchain of a winit window.
pub struct WindowSurface {
    ctx: Arc<GpuContext>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl WindowSurface {
    /// Configures `surface` for `window`.
    ///
    /// A non-sRGB format is preferred: frame bytes are already display-encoded
    /// and are shown as-is.
    pub fn new(ctx: Arc<GpuContext>, surface: wgpu::Surface<'static>, window: &Window) -> Result<Self, GpuError> {
        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&ctx.adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(GpuError::UnsupportedSurface)?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .ok_or(GpuError::UnsupportedSurface)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&ctx.device, &config);

        Ok(Self { ctx, surface, config })
    }

    /// Resizes the surface.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.ctx.device, &self.config);
        }
    }
}

impl DrawTarget for WindowSurface {
    fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn current_drawable(&mut self) -> Option<Drawable> {
        match self.surface.get_current_texture() {
            Ok(surface_texture) => Some(Drawable::from_surface(surface_texture)),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("Surface lost or outdated, reconfiguring");
                self.surface.configure(&self.ctx.device, &self.config);
                None
            }
            Err(e) => {
                warn!("No drawable this tick: {}", e);
                None
            }
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct PresentUniforms {
    clear_color: [f32; 4],
}

/// Ingested textures plus the filter output.
const PRESENTED_TEXTURES: usize = 4;

/// Draws the current texture into a drawable, letterboxed or pillarboxed.
pub struct PresentationRenderer {
    ctx: Arc<GpuContext>,
    render_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    clear_color: [f32; 4],
    /// Keyed on `GpuTexture::id`
    bind_groups: BindGroupCache<u64, wgpu::BindGroup>,
    /// `(drawable size, source size)` the quad was last fitted for
    fitted_for: Option<((u32, u32), (u32, u32))>,
}

impl PresentationRenderer {
    /// Builds the presentation pipeline for drawables of `format`.
    pub fn new(ctx: Arc<GpuContext>, format: wgpu::TextureFormat, clear_color: [f32; 4]) -> Result<Self, GpuError> {
        let device = &ctx.device;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Present Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let render_pipeline = ctx.create_pipeline(&PipelineSpec {
            label: "Present",
            vertex_wgsl: shaders::QUAD_VERTEX,
            fragment_wgsl: shaders::PRESENT_FRAGMENT,
            color_format: format,
            bind_group_layouts: &[&bind_group_layout],
            vertex_buffers: &[QuadVertex::layout()],
        })?;

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Present Quad Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Present Uniforms"),
            contents: bytemuck::bytes_of(&PresentUniforms { clear_color }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let sampler = ctx.create_sampler(wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Linear);

        Ok(Self {
            ctx,
            render_pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            uniform_buffer,
            clear_color,
            bind_groups: BindGroupCache::new(PRESENTED_TEXTURES),
            fitted_for: None,
        })
    }

    fn create_bind_group(&self, texture: &GpuTexture) -> wgpu::BindGroup {
        self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        })
    }

    /// Draws `texture` into the target's current drawable and presents it.
    ///
    /// Returns without touching the GPU when there is no texture or no
    /// drawable. Does not wait for the GPU.
    pub fn draw(&mut self, target: &mut dyn DrawTarget, texture: Option<&GpuTexture>) -> DrawOutcome {
        let Some(texture) = texture else {
            return DrawOutcome::NoTexture;
        };
        let Some(drawable) = target.current_drawable() else {
            return DrawOutcome::NoDrawable;
        };

        self.update_fit(drawable.size(), texture.size());

        let bind_group = match self.bind_groups.get(&texture.id()) {
            Some(bind_group) => bind_group,
            None => {
                let bind_group = self.create_bind_group(texture);
                self.bind_groups.insert(texture.id(), bind_group)
            }
        };

        let [r, g, b, a] = self.clear_color;
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Present Encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Present Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: drawable.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, bind_group.as_ref(), &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.draw(0..4, 0..1);
        }

        self.ctx.submit(std::iter::once(encoder.finish()));
        drawable.present();
        DrawOutcome::Presented
    }

    /// Rewrites the quad's sample coordinates when either size changed.
    fn update_fit(&mut self, drawable: (u32, u32), source: (u32, u32)) {
        if self.fitted_for == Some((drawable, source)) {
            return;
        }
        let fit = AspectFit::compute(drawable, source);
        debug!(
            "Fitting {}x{} into {}x{} (shift {:.4}, {:.4})",
            source.0, source.1, drawable.0, drawable.1, fit.shift_x, fit.shift_y
        );
        self.ctx
            .queue
            .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&QuadVertex::fitted(fit)));
        self.fitted_for = Some((drawable, source));
    }
}
