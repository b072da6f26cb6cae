//! Shared GPU context: device, queue, pipelines and samplers.

use super::{GpuError, GpuTexture};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::info;
use winit::window::Window;

/// Everything needed to build one full-screen-quad render pipeline.
pub struct PipelineSpec<'a> {
    pub label: &'a str,
    /// WGSL module exposing `vs_main`.
    pub vertex_wgsl: &'a str,
    /// WGSL module exposing `fs_main`.
    pub fragment_wgsl: &'a str,
    pub color_format: wgpu::TextureFormat,
    pub bind_group_layouts: &'a [&'a wgpu::BindGroupLayout],
    pub vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],
}

/// Owns the device and submission queue shared by ingestion, the filter graph
/// and the presentation renderer.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Initializes a context for offscreen use.
    pub fn headless() -> Result<Self, GpuError> {
        let instance = Self::create_instance();
        Self::from_instance(instance, None)
    }

    /// Initializes a context whose adapter can present to `window`, returning
    /// the surface alongside it.
    pub fn with_surface(window: Arc<Window>) -> Result<(Self, wgpu::Surface<'static>), GpuError> {
        let instance = Self::create_instance();
        let surface = instance.create_surface(window)?;
        let ctx = Self::from_instance(instance, Some(&surface))?;
        Ok((ctx, surface))
    }

    fn create_instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    fn from_instance(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self, GpuError> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Silkcam Device"),
            required_features: wgpu::Features::empty(),
            required_limits: Self::required_limits(&adapter, surface.is_some()),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        let adapter_info = adapter.get_info();
        info!("Using GPU adapter {} ({:?})", adapter_info.name, adapter_info.backend);

        Ok(Self {
            device,
            queue,
            instance,
            adapter,
        })
    }

    /// Baseline limits with the texture resolution raised to what the adapter supports.
    fn required_limits(adapter: &wgpu::Adapter, presenting: bool) -> wgpu::Limits {
        let base = if presenting {
            wgpu::Limits::default()
        } else {
            wgpu::Limits::downlevel_defaults()
        };
        base.using_resolution(adapter.limits())
    }

    /// Largest width or height a 2D texture may have on this device.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Compiles a vertex/fragment pair into a triangle-strip render pipeline.
    ///
    /// Both stages are validated with naga first so a broken shader surfaces as
    /// a `ShaderCompilation` error rather than a device panic.
    pub fn create_pipeline(&self, spec: &PipelineSpec<'_>) -> Result<wgpu::RenderPipeline, GpuError> {
        validate_wgsl(&format!("{} (vertex)", spec.label), spec.vertex_wgsl)?;
        validate_wgsl(&format!("{} (fragment)", spec.label), spec.fragment_wgsl)?;

        let vertex_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} Vertex Shader", spec.label)),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(spec.vertex_wgsl)),
        });
        let fragment_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} Fragment Shader", spec.label)),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(spec.fragment_wgsl)),
        });

        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", spec.label)),
            bind_group_layouts: spec.bind_group_layouts,
            immediate_size: 0,
        });

        Ok(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(spec.label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("vs_main"),
                buffers: spec.vertex_buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: spec.color_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        }))
    }

    /// Creates a sampler using the same address mode on every axis.
    pub fn create_sampler(&self, address_mode: wgpu::AddressMode, filter_mode: wgpu::FilterMode) -> wgpu::Sampler {
        self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Silkcam Sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter_mode,
            min_filter: filter_mode,
            ..Default::default()
        })
    }

    /// Enqueues command buffers. Returns immediately; completion is not awaited.
    pub fn submit<I>(&self, commands: I) -> wgpu::SubmissionIndex
    where
        I: IntoIterator<Item = wgpu::CommandBuffer>,
    {
        self.queue.submit(commands)
    }

    /// Copies a texture back to CPU memory, tightly packed, blocking until the
    /// GPU has finished all work touching it.
    pub fn read_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>, GpuError> {
        let bytes_per_pixel = texture
            .format()
            .block_copy_size(None)
            .ok_or(GpuError::UnreadableFormat(texture.format()))?;
        let (width, height) = texture.size();
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let submission_index = self.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission_index),
                timeout: None,
            })
            .map_err(|e| GpuError::Readback(format!("{e:?}")))?;
        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(format!("{e:?}")))?;

        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in data.chunks(padded_bytes_per_row as usize).take(height as usize) {
            pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        drop(data);
        staging.unmap();

        Ok(pixels)
    }
}

/// Parses and validates a WGSL module with naga.
fn validate_wgsl(label: &str, source: &str) -> Result<(), GpuError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| GpuError::ShaderCompilation {
        label: label.to_string(),
        message: e.emit_to_string(source),
    })?;
    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator.validate(&module).map_err(|e| GpuError::ShaderCompilation {
        label: label.to_string(),
        message: e.emit_to_string(source),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::shaders;

    #[test]
    fn test_builtin_shaders_validate() {
        validate_wgsl("quad", shaders::QUAD_VERTEX).unwrap();
        validate_wgsl("present", shaders::PRESENT_FRAGMENT).unwrap();
        validate_wgsl("blur", shaders::BLUR_FRAGMENT).unwrap();
        validate_wgsl("edge", &shaders::edge_fragment()).unwrap();
        validate_wgsl("composite", shaders::COMPOSITE_FRAGMENT).unwrap();
    }

    #[test]
    fn test_broken_shader_is_reported() {
        let err = validate_wgsl("broken", "@fragment fn fs_main() -> @location(0) vec4<f32> { return 1.0; }")
            .unwrap_err();
        match err {
            GpuError::ShaderCompilation { label, message } => {
                assert_eq!(label, "broken");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_texture_limit_follows_adapter() {
        let Some(ctx) = crate::gpu::test_context() else {
            return;
        };
        let adapter_limit = ctx.adapter.limits().max_texture_dimension_2d;
        assert_eq!(ctx.max_texture_dimension(), adapter_limit);
        assert!(ctx.max_texture_dimension() >= wgpu::Limits::downlevel_defaults().max_texture_dimension_2d);
    }

    #[test]
    fn test_read_texture_round_trips_pixels() {
        let Some(ctx) = crate::gpu::test_context() else {
            return;
        };
        let texture = GpuTexture::new(
            &ctx.device,
            "Readback Test",
            3,
            2,
            wgpu::TextureFormat::Bgra8Unorm,
            wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC,
        );
        let pixels: Vec<u8> = (0..24).collect();
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(12),
                rows_per_image: Some(2),
            },
            wgpu::Extent3d {
                width: 3,
                height: 2,
                depth_or_array_layers: 1,
            },
        );
        assert_eq!(ctx.read_texture(&texture).unwrap(), pixels);
    }
}
