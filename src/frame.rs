//! Video frame types, pixel formats and full-screen quad geometry.

use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// Supported pixel formats for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// BGRA with 8 bits per channel, the capture format
    Bgra8,
    /// RGBA with 8 bits per channel
    Rgba8,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
        }
    }
}

/// An immutable video frame.
///
/// The pixel data is reference counted, so cloning a frame never copies pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    bytes_per_row: u32,
    format: PixelFormat,
    timestamp_us: Option<u64>,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wraps tightly packed pixel data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: impl Into<Arc<[u8]>>) -> Self {
        let bytes_per_row = width * format.bytes_per_pixel() as u32;
        Self::with_stride(width, height, bytes_per_row, format, data)
    }

    /// Wraps pixel data whose rows are `bytes_per_row` apart (rows may be padded).
    pub fn with_stride(
        width: u32,
        height: u32,
        bytes_per_row: u32,
        format: PixelFormat,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            width,
            height,
            bytes_per_row,
            format,
            timestamp_us: None,
            data: data.into(),
        }
    }

    /// A BGRA frame filled with one colour, given as `[b, g, r, a]`.
    pub fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let data: Vec<u8> = bgra
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::from_data(width, height, PixelFormat::Bgra8, data)
    }

    /// Converts tightly packed RGB data to a BGRA frame with opaque alpha.
    pub fn from_rgb(width: u32, height: u32, rgb: &[u8]) -> Self {
        let mut bgra = Vec::with_capacity(width as usize * height as usize * 4);
        for px in rgb.chunks_exact(3) {
            bgra.extend_from_slice(&[px[2], px[1], px[0], 255]);
        }
        Self::from_data(width, height, PixelFormat::Bgra8, bgra)
    }

    /// Converts an RGBA image to a BGRA frame.
    pub fn from_rgba_image(image: &image::RgbaImage) -> Self {
        let mut bgra = Vec::with_capacity(image.as_raw().len());
        for px in image.as_raw().chunks_exact(4) {
            bgra.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
        Self::from_data(image.width(), image.height(), PixelFormat::Bgra8, bgra)
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = Some(timestamp_us);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.bytes_per_row
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Capture timestamp in microseconds (if available).
    pub fn timestamp_us(&self) -> Option<u64> {
        self.timestamp_us
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes the pixel buffer must hold for the declared geometry.
    pub fn required_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        let row = self.width as usize * self.format.bytes_per_pixel();
        (self.height as usize - 1) * self.bytes_per_row as usize + row
    }
}

/// Vertex for rendering a full-screen quad as a triangle strip.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
}

impl QuadVertex {
    /// Vertices for a full-screen quad sampling the whole texture.
    pub const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
        QuadVertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
        QuadVertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
        QuadVertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
    ];

    /// Full-screen strip whose sample coordinates are inset by `fit`'s shifts.
    pub fn fitted(fit: AspectFit) -> [QuadVertex; 4] {
        let (sx, sy) = (fit.shift_x, fit.shift_y);
        [
            QuadVertex { position: [-1.0, -1.0], tex_coords: [sx, 1.0 - sy] },
            QuadVertex { position: [1.0, -1.0], tex_coords: [1.0 - sx, 1.0 - sy] },
            QuadVertex { position: [-1.0, 1.0], tex_coords: [sx, sy] },
            QuadVertex { position: [1.0, 1.0], tex_coords: [1.0 - sx, sy] },
        ]
    }

    /// Returns the vertex buffer layout.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Uniform scale-to-fit of a source image inside drawable bounds.
///
/// Shifts are fractions of the source size added to (and subtracted from) the
/// sample-coordinate range. A shift of 0 means the axis is filled; a negative
/// shift widens the sampled range past the texture, leaving centred bars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectFit {
    pub scale: f32,
    pub shift_x: f32,
    pub shift_y: f32,
}

impl AspectFit {
    /// Fits a `source` of `(width, height)` into `bounds`. All sizes must be non-zero.
    pub fn compute(bounds: (u32, u32), source: (u32, u32)) -> Self {
        let ratio_w = bounds.0 as f32 / source.0 as f32;
        let ratio_h = bounds.1 as f32 / source.1 as f32;
        let scale = ratio_w.min(ratio_h);

        // Fraction of each drawable axis the scaled image covers.
        let fill_x = scale / ratio_w;
        let fill_y = scale / ratio_h;

        Self {
            scale,
            shift_x: (fill_x - 1.0) / (2.0 * fill_x),
            shift_y: (fill_y - 1.0) / (2.0 * fill_y),
        }
    }

    /// Drawable-space size the source occupies after fitting.
    pub fn displayed_size(&self, source: (u32, u32)) -> (f32, f32) {
        (source.0 as f32 * self.scale, source.1 as f32 * self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_bgra_conversion() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = Frame::from_rgb(2, 2, &rgb_data);

        assert_eq!(frame.format(), PixelFormat::Bgra8);
        assert_eq!(frame.data().len(), 16);
        // Red lands in the third byte
        assert_eq!(&frame.data()[0..4], &[0, 0, 255, 255]);
        assert_eq!(&frame.data()[4..8], &[0, 255, 0, 255]);
        assert_eq!(&frame.data()[8..12], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_required_len_honours_row_padding() {
        let frame = Frame::with_stride(3, 2, 16, PixelFormat::Bgra8, vec![0u8; 28]);
        assert_eq!(frame.required_len(), 16 + 12);
        assert_eq!(Frame::solid(4, 4, [1, 2, 3, 4]).required_len(), 64);
    }

    #[test]
    fn test_fit_fills_one_axis_and_centres_the_other() {
        let sizes = [1u32, 3, 480, 720, 1080, 1920, 2560];
        for &bw in &sizes {
            for &bh in &sizes {
                for &sw in &sizes {
                    for &sh in &sizes {
                        let fit = AspectFit::compute((bw, bh), (sw, sh));
                        let filled = fit.shift_x.abs() < 1e-6 || fit.shift_y.abs() < 1e-6;
                        assert!(filled, "no axis filled for {bw}x{bh} <- {sw}x{sh}: {fit:?}");
                        // Never cropping: shifts only ever widen the sampled range.
                        assert!(fit.shift_x <= 1e-6 && fit.shift_y <= 1e-6);

                        let (dw, dh) = fit.displayed_size((sw, sh));
                        assert!(dw <= bw as f32 * 1.0001 && dh <= bh as f32 * 1.0001);
                        // Sampled span covers the drawable at the same scale on both axes.
                        let span_x = 1.0 - 2.0 * fit.shift_x;
                        let span_y = 1.0 - 2.0 * fit.shift_y;
                        let scale_x = bw as f32 / (span_x * sw as f32);
                        let scale_y = bh as f32 / (span_y * sh as f32);
                        assert!((scale_x - scale_y).abs() <= 1e-3 * scale_x.max(1.0));
                    }
                }
            }
        }
    }

    #[test]
    fn test_fit_pillarbox_for_wide_drawable() {
        let fit = AspectFit::compute((1920, 1080), (1080, 1920));
        assert_eq!(fit.shift_y, 0.0);
        assert!(fit.shift_x < 0.0);

        let quad = QuadVertex::fitted(fit);
        // Symmetric about the centre on both axes.
        assert!((quad[0].tex_coords[0] + quad[1].tex_coords[0] - 1.0).abs() < 1e-6);
        assert!((quad[0].tex_coords[1] + quad[2].tex_coords[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fit_identity_for_matching_aspect() {
        let fit = AspectFit::compute((1280, 720), (1920, 1080));
        assert!(fit.shift_x.abs() < 1e-6 && fit.shift_y.abs() < 1e-6);
        assert_eq!(QuadVertex::fitted(fit).to_vec(), QuadVertex::VERTICES.to_vec());
    }
}
