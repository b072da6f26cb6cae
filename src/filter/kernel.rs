//! Gaussian kernel weights and the uniform blocks uploaded for each pass.

use super::FilterError;
use bytemuck::{Pod, Zeroable};

/// Taps per side the blur uniform can hold (centre tap included).
pub const MAX_TAPS: usize = 64;

/// Largest sigma whose 3-sigma radius still fits in `MAX_TAPS`.
pub const MAX_SIGMA: f32 = 21.0;

/// One side of a normalized, symmetric Gaussian kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    /// `weights[0]` is the centre tap; `weights[i]` applies at offsets `+i` and `-i`.
    weights: Vec<f32>,
}

impl GaussianKernel {
    pub fn new(sigma: f32) -> Result<Self, FilterError> {
        if !(sigma > 0.0 && sigma <= MAX_SIGMA) {
            return Err(FilterError::InvalidParams(format!(
                "blur sigma must be in (0, {MAX_SIGMA}], got {sigma}"
            )));
        }

        let radius = (3.0 * sigma).ceil() as usize;
        let mut weights: Vec<f32> = (0..=radius)
            .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
            .collect();
        let total = weights[0] + 2.0 * weights[1..].iter().sum::<f32>();
        for w in &mut weights {
            *w /= total;
        }

        Ok(Self { weights })
    }

    /// Number of taps on each side of the centre.
    pub fn radius(&self) -> u32 {
        (self.weights.len() - 1) as u32
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Uniform block for one blur direction; `step` is the texel offset in UV space.
    pub fn uniforms(&self, step: [f32; 2]) -> BlurUniforms {
        let mut packed = [[0.0f32; 4]; MAX_TAPS / 4];
        for (i, w) in self.weights.iter().enumerate() {
            packed[i / 4][i % 4] = *w;
        }
        BlurUniforms {
            step,
            radius: self.radius(),
            _pad: 0,
            weights: packed,
        }
    }
}

/// Uniforms for `BLUR_FRAGMENT`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct BlurUniforms {
    pub step: [f32; 2],
    pub radius: u32,
    pub _pad: u32,
    pub weights: [[f32; 4]; MAX_TAPS / 4],
}

/// Uniforms for the Sobel edge pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct EdgeUniforms {
    pub texel: [f32; 2],
    pub _pad: [f32; 2],
}

/// Uniforms for `COMPOSITE_FRAGMENT`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CompositeUniforms {
    pub edge_gain: f32,
    pub whitening: f32,
    pub _pad: [f32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalized_and_decreasing() {
        for sigma in [0.5, 1.0, 3.0, 5.0, MAX_SIGMA] {
            let kernel = GaussianKernel::new(sigma).unwrap();
            let w = kernel.weights();
            let total = w[0] + 2.0 * w[1..].iter().sum::<f32>();
            assert!((total - 1.0).abs() < 1e-5, "sigma {sigma} sums to {total}");
            assert!(w.windows(2).all(|pair| pair[0] > pair[1]));
            assert!(kernel.radius() as usize <= MAX_TAPS - 1);
        }
    }

    #[test]
    fn test_radius_covers_three_sigma() {
        assert_eq!(GaussianKernel::new(5.0).unwrap().radius(), 15);
        assert_eq!(GaussianKernel::new(1.0).unwrap().radius(), 3);
    }

    #[test]
    fn test_invalid_sigma_rejected() {
        assert!(GaussianKernel::new(0.0).is_err());
        assert!(GaussianKernel::new(-1.0).is_err());
        assert!(GaussianKernel::new(f32::NAN).is_err());
        assert!(GaussianKernel::new(MAX_SIGMA + 1.0).is_err());
    }

    #[test]
    fn test_uniform_packing() {
        let kernel = GaussianKernel::new(1.0).unwrap();
        let uniforms = kernel.uniforms([0.5, 0.0]);
        assert_eq!(std::mem::size_of::<BlurUniforms>(), 272);
        assert_eq!(uniforms.radius, 3);
        assert_eq!(uniforms.weights[0], [kernel.weights()[0], kernel.weights()[1], kernel.weights()[2], kernel.weights()[3]]);
        assert_eq!(uniforms.weights[1], [0.0; 4]);
    }
}
