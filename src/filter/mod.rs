//! Whitening / smoothing filter graph.
//!
//! A fixed chain of full-screen render passes, all encoded into one command
//! buffer per frame so the composite pass always observes finished blur and
//! edge results:
//!
//! 1. separable Gaussian blur of the source (`Blurred`)
//! 2. Sobel magnitude of the source luma (`EdgeMap`)
//! 3. small Gaussian blur of the edge map (`BlurredEdge`)
//! 4. composite of source, blurred image and mask (`Output`)
//!
//! With an external mask, steps 2 and 3 are skipped and the provider's mask
//! feeds the composite directly.

mod kernel;
mod mask;
mod pool;

pub use kernel::{BlurUniforms, CompositeUniforms, EdgeUniforms, GaussianKernel, MAX_SIGMA};
pub use mask::{ImageMaskProvider, MaskProvider, MaskStrategy};
pub use pool::{TextureRole, TransientPool};

use crate::frame::QuadVertex;
use crate::gpu::{shaders, BindGroupCache, GpuContext, GpuError, GpuTexture, PipelineSpec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

/// Perceptual luma weights (R, G, B) used by the edge pass.
pub const LUMA_WEIGHTS: [f32; 3] = [0.22, 0.72, 0.072];

/// Errors from building or running the filter graph.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("source is {actual:?} but the graph was built for {expected:?}")]
    ResolutionMismatch { expected: (u32, u32), actual: (u32, u32) },
    #[error("mask provider `{0}` has no mask for this frame")]
    MaskUnavailable(String),
}

/// Tunable parameters of the effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Sigma of the image-detail blur
    pub blur_sigma: f32,
    /// Sigma of the edge-map blur
    pub edge_sigma: f32,
    /// Multiplier applied to the mask before clamping to [0, 1]
    pub edge_gain: f32,
    /// Brightening of smooth regions, 0 disables
    pub whitening: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            blur_sigma: 5.0,
            edge_sigma: 1.0,
            edge_gain: 2.0,
            whitening: 0.0,
        }
    }
}

impl FilterParams {
    pub fn validate(&self) -> Result<(), FilterError> {
        GaussianKernel::new(self.blur_sigma)?;
        GaussianKernel::new(self.edge_sigma)?;
        if !(self.edge_gain > 0.0 && self.edge_gain.is_finite()) {
            return Err(FilterError::InvalidParams(format!(
                "edge gain must be positive, got {}",
                self.edge_gain
            )));
        }
        if !(0.0..=1.0).contains(&self.whitening) {
            return Err(FilterError::InvalidParams(format!(
                "whitening must be in [0, 1], got {}",
                self.whitening
            )));
        }
        Ok(())
    }
}

/// Uniform buffers for every pass, rewritten only when parameters change.
struct PassUniforms {
    image_h: wgpu::Buffer,
    image_v: wgpu::Buffer,
    edge_h: wgpu::Buffer,
    edge_v: wgpu::Buffer,
    edge: wgpu::Buffer,
    composite: wgpu::Buffer,
}

/// Bind groups that read the per-frame source (and the mask).
struct SourceBindings {
    image_h: wgpu::BindGroup,
    edge: Option<wgpu::BindGroup>,
    composite: wgpu::BindGroup,
}

/// Sources the ingest cache rotates through, plus one.
const SOURCE_BINDINGS: usize = 4;

/// The effect: owns its pipelines and a pool of fixed-size render targets.
pub struct FilterGraph {
    ctx: Arc<GpuContext>,
    pool: TransientPool,
    strategy: MaskStrategy,
    params: FilterParams,
    blur_pipeline: wgpu::RenderPipeline,
    edge_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    single_input_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    uniforms: PassUniforms,
    // Bind groups that never see the per-frame source
    image_v_group: wgpu::BindGroup,
    edge_h_group: wgpu::BindGroup,
    edge_v_group: wgpu::BindGroup,
    // Keyed on (source id, mask id)
    source_bindings: BindGroupCache<(u64, u64), SourceBindings>,
    frame_count: u64,
}

impl FilterGraph {
    /// Builds every pipeline and allocates the transient pool at `width` x `height`.
    ///
    /// Any failure here means the effect cannot run at all.
    pub fn new(
        ctx: Arc<GpuContext>,
        width: u32,
        height: u32,
        params: FilterParams,
        strategy: MaskStrategy,
    ) -> Result<Self, FilterError> {
        params.validate()?;
        let limit = ctx.max_texture_dimension();
        if width == 0 || height == 0 || width > limit || height > limit {
            return Err(GpuError::TextureTooLarge { width, height, limit }.into());
        }

        let device = &ctx.device;
        let single_input_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Filter Single Input Layout"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2)],
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Filter Composite Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                sampler_entry(3),
                uniform_entry(4),
            ],
        });

        let vertex_layouts = [QuadVertex::layout()];
        let edge_wgsl = shaders::edge_fragment();
        let blur_pipeline = ctx.create_pipeline(&PipelineSpec {
            label: "Gaussian Blur",
            vertex_wgsl: shaders::QUAD_VERTEX,
            fragment_wgsl: shaders::BLUR_FRAGMENT,
            color_format: TransientPool::FORMAT,
            bind_group_layouts: &[&single_input_layout],
            vertex_buffers: &vertex_layouts,
        })?;
        let edge_pipeline = ctx.create_pipeline(&PipelineSpec {
            label: "Sobel Edge",
            vertex_wgsl: shaders::QUAD_VERTEX,
            fragment_wgsl: &edge_wgsl,
            color_format: TransientPool::FORMAT,
            bind_group_layouts: &[&single_input_layout],
            vertex_buffers: &vertex_layouts,
        })?;
        let composite_pipeline = ctx.create_pipeline(&PipelineSpec {
            label: "Whitening Composite",
            vertex_wgsl: shaders::QUAD_VERTEX,
            fragment_wgsl: shaders::COMPOSITE_FRAGMENT,
            color_format: TransientPool::FORMAT,
            bind_group_layouts: &[&composite_layout],
            vertex_buffers: &vertex_layouts,
        })?;

        let sampler = ctx.create_sampler(wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Linear);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Filter Quad Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniforms = PassUniforms {
            image_h: uniform_buffer(device, "Image Blur H Uniforms", std::mem::size_of::<BlurUniforms>()),
            image_v: uniform_buffer(device, "Image Blur V Uniforms", std::mem::size_of::<BlurUniforms>()),
            edge_h: uniform_buffer(device, "Edge Blur H Uniforms", std::mem::size_of::<BlurUniforms>()),
            edge_v: uniform_buffer(device, "Edge Blur V Uniforms", std::mem::size_of::<BlurUniforms>()),
            edge: uniform_buffer(device, "Edge Uniforms", std::mem::size_of::<EdgeUniforms>()),
            composite: uniform_buffer(device, "Composite Uniforms", std::mem::size_of::<CompositeUniforms>()),
        };

        let pool = TransientPool::new(device, width, height);
        let image_v_group = single_input_group(
            device,
            &single_input_layout,
            "Image Blur V Group",
            pool.get(TextureRole::Scratch),
            &sampler,
            &uniforms.image_v,
        );
        let edge_h_group = single_input_group(
            device,
            &single_input_layout,
            "Edge Blur H Group",
            pool.get(TextureRole::EdgeMap),
            &sampler,
            &uniforms.edge_h,
        );
        let edge_v_group = single_input_group(
            device,
            &single_input_layout,
            "Edge Blur V Group",
            pool.get(TextureRole::Scratch),
            &sampler,
            &uniforms.edge_v,
        );

        info!(
            "Filter graph ready at {}x{} (mask: {}, blur sigma {}, edge sigma {})",
            width,
            height,
            strategy.describe(),
            params.blur_sigma,
            params.edge_sigma
        );

        let mut graph = Self {
            ctx,
            pool,
            strategy,
            params,
            blur_pipeline,
            edge_pipeline,
            composite_pipeline,
            single_input_layout,
            composite_layout,
            sampler,
            vertex_buffer,
            uniforms,
            image_v_group,
            edge_h_group,
            edge_v_group,
            source_bindings: BindGroupCache::new(SOURCE_BINDINGS),
            frame_count: 0,
        };
        graph.set_params(params)?;
        Ok(graph)
    }

    pub fn params(&self) -> FilterParams {
        self.params
    }

    /// Resolution the transient pool was built for.
    pub fn size(&self) -> (u32, u32) {
        self.pool.size()
    }

    /// Read access to an intermediate or the output texture.
    pub fn transient(&self, role: TextureRole) -> &Arc<GpuTexture> {
        self.pool.get(role)
    }

    /// Rewrites the pass uniforms. Textures are untouched.
    pub fn set_params(&mut self, params: FilterParams) -> Result<(), FilterError> {
        params.validate()?;
        let image_kernel = GaussianKernel::new(params.blur_sigma)?;
        let edge_kernel = GaussianKernel::new(params.edge_sigma)?;
        let (width, height) = self.pool.size();
        let texel = [1.0 / width as f32, 1.0 / height as f32];
        let horizontal = [texel[0], 0.0];
        let vertical = [0.0, texel[1]];

        let queue = &self.ctx.queue;
        queue.write_buffer(&self.uniforms.image_h, 0, bytemuck::bytes_of(&image_kernel.uniforms(horizontal)));
        queue.write_buffer(&self.uniforms.image_v, 0, bytemuck::bytes_of(&image_kernel.uniforms(vertical)));
        queue.write_buffer(&self.uniforms.edge_h, 0, bytemuck::bytes_of(&edge_kernel.uniforms(horizontal)));
        queue.write_buffer(&self.uniforms.edge_v, 0, bytemuck::bytes_of(&edge_kernel.uniforms(vertical)));
        queue.write_buffer(
            &self.uniforms.edge,
            0,
            bytemuck::bytes_of(&EdgeUniforms { texel, _pad: [0.0; 2] }),
        );
        queue.write_buffer(
            &self.uniforms.composite,
            0,
            bytemuck::bytes_of(&CompositeUniforms {
                edge_gain: params.edge_gain,
                whitening: params.whitening,
                _pad: [0.0; 2],
            }),
        );

        if params != self.params {
            info!("Filter parameters updated: {:?}", params);
        }
        self.params = params;
        Ok(())
    }

    /// Runs the graph on `source` and returns the output texture.
    ///
    /// The output is a transient texture: the next call overwrites it. GPU work
    /// is submitted but not awaited.
    pub fn process(&mut self, source: &GpuTexture) -> Result<Arc<GpuTexture>, FilterError> {
        let start = std::time::Instant::now();
        if source.size() != self.pool.size() {
            return Err(FilterError::ResolutionMismatch {
                expected: self.pool.size(),
                actual: source.size(),
            });
        }

        let external_mask = match &mut self.strategy {
            MaskStrategy::SelfDerivedEdge => None,
            MaskStrategy::External(provider) => Some(
                provider
                    .mask_for(source)
                    .ok_or_else(|| FilterError::MaskUnavailable(provider.name().to_string()))?,
            ),
        };

        let derive_edges = external_mask.is_none();
        let mask = external_mask.unwrap_or_else(|| self.pool.get(TextureRole::BlurredEdge).clone());
        let key = (source.id(), mask.id());
        let bindings = match self.source_bindings.get(&key) {
            Some(bindings) => bindings,
            None => {
                debug!("Building filter bind groups for source #{}", source.id());
                let bindings = self.build_source_bindings(source, &mask, derive_edges);
                self.source_bindings.insert(key, bindings)
            }
        };

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Filter Graph Encoder"),
        });

        self.draw_pass(&mut encoder, "Image Blur H", &self.blur_pipeline, &bindings.image_h, TextureRole::Scratch);
        self.draw_pass(&mut encoder, "Image Blur V", &self.blur_pipeline, &self.image_v_group, TextureRole::Blurred);
        if let Some(edge_group) = &bindings.edge {
            self.draw_pass(&mut encoder, "Sobel Edge", &self.edge_pipeline, edge_group, TextureRole::EdgeMap);
            self.draw_pass(&mut encoder, "Edge Blur H", &self.blur_pipeline, &self.edge_h_group, TextureRole::Scratch);
            self.draw_pass(&mut encoder, "Edge Blur V", &self.blur_pipeline, &self.edge_v_group, TextureRole::BlurredEdge);
        }
        self.draw_pass(&mut encoder, "Composite", &self.composite_pipeline, &bindings.composite, TextureRole::Output);

        self.ctx.submit(std::iter::once(encoder.finish()));
        self.frame_count += 1;
        debug!("  [Perf] Filter encode #{}: {:?}", self.frame_count, start.elapsed());

        Ok(self.pool.get(TextureRole::Output).clone())
    }

    fn build_source_bindings(&self, source: &GpuTexture, mask: &GpuTexture, derive_edges: bool) -> SourceBindings {
        let device = &self.ctx.device;
        let image_h = single_input_group(
            device,
            &self.single_input_layout,
            "Image Blur H Group",
            source,
            &self.sampler,
            &self.uniforms.image_h,
        );
        let edge = derive_edges.then(|| {
            single_input_group(
                device,
                &self.single_input_layout,
                "Edge Group",
                source,
                &self.sampler,
                &self.uniforms.edge,
            )
        });
        let composite = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Group"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(source.view()) },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(self.pool.get(TextureRole::Blurred).view()),
                },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(mask.view()) },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 4, resource: self.uniforms.composite.as_entire_binding() },
            ],
        });
        SourceBindings { image_h, edge, composite }
    }

    fn draw_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        target: TextureRole,
    ) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.pool.get(target).view(),
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.draw(0..4, 0..1);
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_buffer(device: &wgpu::Device, label: &str, size: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn single_input_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    label: &str,
    input: &GpuTexture,
    sampler: &wgpu::Sampler,
    uniforms: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(input.view()) },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
            wgpu::BindGroupEntry { binding: 2, resource: uniforms.as_entire_binding() },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_context;
    use image::{GrayImage, Luma};

    const TRANSIENT_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
        .union(wgpu::TextureUsages::COPY_DST)
        .union(wgpu::TextureUsages::COPY_SRC);

    /// Uploads tightly packed BGRA pixels as a sampleable texture.
    fn upload(ctx: &GpuContext, width: u32, height: u32, bgra: &[u8]) -> GpuTexture {
        let texture = GpuTexture::new(
            &ctx.device,
            "Test Source",
            width,
            height,
            wgpu::TextureFormat::Bgra8Unorm,
            TRANSIENT_USAGE,
        );
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bgra,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        texture
    }

    /// Left half black, right half white.
    fn step_edge(width: u32, height: u32) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..height {
            for x in 0..width {
                let v = if x < width / 2 { 0 } else { 255 };
                pixels.extend_from_slice(&[v, v, v, 255]);
            }
        }
        pixels
    }

    /// Columns of the middle row whose red channel is above `threshold`.
    fn lit_columns(pixels: &[u8], width: u32, height: u32, threshold: u8) -> usize {
        let row = (height / 2) as usize * width as usize * 4;
        (0..width as usize).filter(|x| pixels[row + x * 4 + 2] > threshold).count()
    }

    fn max_channel_diff(a: &[u8], b: &[u8]) -> u8 {
        a.iter().zip(b).map(|(x, y)| x.abs_diff(*y)).max().unwrap_or(0)
    }

    fn constant_mask(ctx: &GpuContext, width: u32, height: u32, value: u8) -> MaskStrategy {
        let mask = GrayImage::from_pixel(width, height, Luma([value]));
        MaskStrategy::External(Box::new(ImageMaskProvider::from_luma(ctx, "constant", &mask)))
    }

    #[test]
    fn test_params_validation() {
        assert!(FilterParams::default().validate().is_ok());
        let bad_gain = FilterParams { edge_gain: 0.0, ..Default::default() };
        assert!(matches!(bad_gain.validate(), Err(FilterError::InvalidParams(_))));
        let bad_whitening = FilterParams { whitening: 1.5, ..Default::default() };
        assert!(bad_whitening.validate().is_err());
        let bad_sigma = FilterParams { blur_sigma: 0.0, ..Default::default() };
        assert!(bad_sigma.validate().is_err());
    }

    #[test]
    fn test_uniform_gray_passes_through() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (1920, 1080);
        let gray = [128u8, 128, 128, 255].repeat((width * height) as usize);
        let source = upload(&ctx, width, height, &gray);

        let mut graph =
            FilterGraph::new(ctx.clone(), width, height, FilterParams::default(), MaskStrategy::SelfDerivedEdge)
                .unwrap();
        let output = graph.process(&source).unwrap();
        assert_eq!(output.size(), (width, height));

        let pixels = ctx.read_texture(&output).unwrap();
        assert!(max_channel_diff(&pixels, &gray) <= 1);
    }

    #[test]
    fn test_flat_source_has_no_edges() {
        let Some(ctx) = test_context() else {
            return;
        };
        let source = upload(&ctx, 32, 32, &[40u8, 90, 200, 255].repeat(32 * 32));
        let mut graph =
            FilterGraph::new(ctx.clone(), 32, 32, FilterParams::default(), MaskStrategy::SelfDerivedEdge).unwrap();
        graph.process(&source).unwrap();

        let edges = ctx.read_texture(graph.transient(TextureRole::EdgeMap)).unwrap();
        assert!(edges.chunks_exact(4).all(|px| px[0] <= 1 && px[1] <= 1 && px[2] <= 1));
    }

    #[test]
    fn test_edge_blur_widens_mask() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (64, 16);
        let source = upload(&ctx, width, height, &step_edge(width, height));
        let mut graph =
            FilterGraph::new(ctx.clone(), width, height, FilterParams::default(), MaskStrategy::SelfDerivedEdge)
                .unwrap();
        graph.process(&source).unwrap();

        let edges = ctx.read_texture(graph.transient(TextureRole::EdgeMap)).unwrap();
        let blurred_edges = ctx.read_texture(graph.transient(TextureRole::BlurredEdge)).unwrap();
        let edge_width = lit_columns(&edges, width, height, 0);
        let mask_width = lit_columns(&blurred_edges, width, height, 0);
        assert!(edge_width > 0);
        assert!(mask_width > edge_width, "mask {mask_width} vs edge {edge_width}");
        // Far from the step both stay dark.
        assert_eq!(edges[(height / 2 * width * 4) as usize + 2], 0);
    }

    #[test]
    fn test_saturated_mask_returns_source() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (64, 16);
        let pixels = step_edge(width, height);
        let source = upload(&ctx, width, height, &pixels);
        let strategy = constant_mask(&ctx, width, height, 255);
        let mut graph = FilterGraph::new(ctx.clone(), width, height, FilterParams::default(), strategy).unwrap();

        let output = ctx.read_texture(&graph.process(&source).unwrap()).unwrap();
        assert!(max_channel_diff(&output, &pixels) <= 1);
    }

    #[test]
    fn test_empty_mask_returns_blurred() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (64, 16);
        let source = upload(&ctx, width, height, &step_edge(width, height));
        let strategy = constant_mask(&ctx, width, height, 0);
        let mut graph = FilterGraph::new(ctx.clone(), width, height, FilterParams::default(), strategy).unwrap();

        let output = ctx.read_texture(&graph.process(&source).unwrap()).unwrap();
        let blurred = ctx.read_texture(graph.transient(TextureRole::Blurred)).unwrap();
        assert!(max_channel_diff(&output, &blurred) <= 1);
        // The blur actually spread the step.
        assert!(lit_columns(&blurred, width, height, 0) > (width / 2) as usize);
    }

    #[test]
    fn test_processing_is_deterministic() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (48, 40);
        let mut pixels = step_edge(width, height);
        for (i, byte) in pixels.iter_mut().enumerate() {
            if i % 4 == 1 {
                *byte = (i * 7 % 251) as u8;
            }
        }
        let source = upload(&ctx, width, height, &pixels);

        let run = || {
            let mut graph =
                FilterGraph::new(ctx.clone(), width, height, FilterParams::default(), MaskStrategy::SelfDerivedEdge)
                    .unwrap();
            let output = graph.process(&source).unwrap();
            ctx.read_texture(&output).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_resolution_mismatch_is_per_frame_error() {
        let Some(ctx) = test_context() else {
            return;
        };
        let source = upload(&ctx, 8, 8, &[0u8; 8 * 8 * 4]);
        let mut graph =
            FilterGraph::new(ctx.clone(), 16, 16, FilterParams::default(), MaskStrategy::SelfDerivedEdge).unwrap();
        match graph.process(&source) {
            Err(FilterError::ResolutionMismatch { expected, actual }) => {
                assert_eq!(expected, (16, 16));
                assert_eq!(actual, (8, 8));
            }
            other => panic!("unexpected result: {:?}", other.map(|t| t.size())),
        }
    }

    #[test]
    fn test_oversized_graph_is_rejected_at_construction() {
        let Some(ctx) = test_context() else {
            return;
        };
        let too_big = ctx.max_texture_dimension() + 1;
        let result = FilterGraph::new(ctx, too_big, 16, FilterParams::default(), MaskStrategy::SelfDerivedEdge);
        assert!(matches!(result, Err(FilterError::Gpu(GpuError::TextureTooLarge { .. }))));
    }

    #[test]
    fn test_graph_accepts_sizes_above_baseline_limits() {
        let Some(ctx) = test_context() else {
            return;
        };
        if ctx.adapter.limits().max_texture_dimension_2d < 2560 {
            return;
        }
        let graph = FilterGraph::new(ctx, 2560, 1440, FilterParams::default(), MaskStrategy::SelfDerivedEdge).unwrap();
        assert_eq!(graph.size(), (2560, 1440));
    }

    /// Log-curve brightening for a channel value in [0, 1].
    fn whitened(v: f32, whitening: f32) -> f32 {
        let beta = 1.0 + 9.0 * whitening;
        (1.0 + v * (beta - 1.0)).ln() / beta.ln()
    }

    #[test]
    fn test_whitening_brightens_smooth_regions() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (32, 32);
        let source = upload(&ctx, width, height, &[128u8, 128, 128, 255].repeat((width * height) as usize));
        let params = FilterParams { whitening: 0.5, ..Default::default() };
        let mut graph = FilterGraph::new(ctx.clone(), width, height, params, MaskStrategy::SelfDerivedEdge).unwrap();

        let output = ctx.read_texture(&graph.process(&source).unwrap()).unwrap();
        let expected = (whitened(128.0 / 255.0, 0.5) * 255.0).round() as u8;
        assert_eq!(expected, 177);
        for px in output.chunks_exact(4) {
            assert!(px[..3].iter().all(|c| c.abs_diff(expected) <= 1), "got {:?}", px);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_whitening_spares_masked_regions() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (64, 16);
        let pixels = step_edge(width, height);
        let source = upload(&ctx, width, height, &pixels);
        let strategy = constant_mask(&ctx, width, height, 255);
        let params = FilterParams { whitening: 0.8, ..Default::default() };
        let mut graph = FilterGraph::new(ctx.clone(), width, height, params, strategy).unwrap();

        let output = ctx.read_texture(&graph.process(&source).unwrap()).unwrap();
        assert!(max_channel_diff(&output, &pixels) <= 1);
    }

    #[test]
    fn test_set_params_keeps_transient_textures() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut graph =
            FilterGraph::new(ctx, 16, 16, FilterParams::default(), MaskStrategy::SelfDerivedEdge).unwrap();
        let before: Vec<_> = TextureRole::ALL.iter().map(|role| Arc::as_ptr(graph.transient(*role))).collect();

        let params = FilterParams { blur_sigma: 9.0, edge_sigma: 2.0, edge_gain: 4.0, whitening: 0.3 };
        graph.set_params(params).unwrap();

        let after: Vec<_> = TextureRole::ALL.iter().map(|role| Arc::as_ptr(graph.transient(*role))).collect();
        assert_eq!(before, after);
        assert_eq!(graph.params(), params);
    }

    #[test]
    fn test_bind_groups_are_built_once_per_source() {
        let Some(ctx) = test_context() else {
            return;
        };
        let (width, height) = (16, 16);
        let first = upload(&ctx, width, height, &step_edge(width, height));
        let second = upload(&ctx, width, height, &step_edge(width, height));
        let mut graph =
            FilterGraph::new(ctx, width, height, FilterParams::default(), MaskStrategy::SelfDerivedEdge).unwrap();
        for _ in 0..3 {
            graph.process(&first).unwrap();
            graph.process(&second).unwrap();
        }
        assert_eq!(graph.source_bindings.len(), 2);
    }
}
