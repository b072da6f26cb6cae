//! WGSL sources for the filter graph and the presentation renderer.
//!
//! Every pass draws the same 4-vertex triangle strip, so all fragment stages
//! share `QUAD_VERTEX` and receive normalized sample coordinates at
//! `@location(0)`.

use crate::filter::LUMA_WEIGHTS;

/// Full-screen quad vertex stage.
pub const QUAD_VERTEX: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coords = in.tex_coords;
    return out;
}
"#;

/// Samples the current texture; coordinates outside [0, 1] are letterbox bars.
pub const PRESENT_FRAGMENT: &str = r#"
struct PresentUniforms {
    clear_color: vec4<f32>,
}

@group(0) @binding(0) var t_texture: texture_2d<f32>;
@group(0) @binding(1) var s_sampler: sampler;
@group(0) @binding(2) var<uniform> u: PresentUniforms;

@fragment
fn fs_main(@location(0) tex_coords: vec2<f32>) -> @location(0) vec4<f32> {
    let inside = all(tex_coords >= vec2<f32>(0.0)) && all(tex_coords <= vec2<f32>(1.0));
    let color = textureSampleLevel(t_texture, s_sampler, tex_coords, 0.0);
    return select(u.clear_color, color, inside);
}
"#;

/// One direction of a separable Gaussian blur. `weights` holds the centre tap
/// followed by one side of the symmetric kernel, four taps per vector.
pub const BLUR_FRAGMENT: &str = r#"
struct BlurUniforms {
    step: vec2<f32>,
    radius: u32,
    _pad: u32,
    weights: array<vec4<f32>, 16>,
}

@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_sampler: sampler;
@group(0) @binding(2) var<uniform> u: BlurUniforms;

fn weight(i: u32) -> f32 {
    return u.weights[i / 4u][i % 4u];
}

@fragment
fn fs_main(@location(0) tex_coords: vec2<f32>) -> @location(0) vec4<f32> {
    var acc = textureSampleLevel(t_input, s_sampler, tex_coords, 0.0) * weight(0u);
    for (var i = 1u; i <= u.radius; i = i + 1u) {
        let offset = u.step * f32(i);
        let pair = textureSampleLevel(t_input, s_sampler, tex_coords + offset, 0.0)
            + textureSampleLevel(t_input, s_sampler, tex_coords - offset, 0.0);
        acc = acc + pair * weight(i);
    }
    return acc;
}
"#;

/// Sobel edge magnitude of the luma channel, written to every colour channel.
pub fn edge_fragment() -> String {
    let [r, g, b] = LUMA_WEIGHTS;
    format!(
        r#"
const LUMA: vec3<f32> = vec3<f32>({r:?}, {g:?}, {b:?});

struct EdgeUniforms {{
    texel: vec2<f32>,
    _pad: vec2<f32>,
}}

@group(0) @binding(0) var t_input: texture_2d<f32>;
@group(0) @binding(1) var s_sampler: sampler;
@group(0) @binding(2) var<uniform> u: EdgeUniforms;

fn luma_at(uv: vec2<f32>, dx: f32, dy: f32) -> f32 {{
    let rgb = textureSampleLevel(t_input, s_sampler, uv + vec2<f32>(dx, dy) * u.texel, 0.0).rgb;
    return dot(rgb, LUMA);
}}

@fragment
fn fs_main(@location(0) tex_coords: vec2<f32>) -> @location(0) vec4<f32> {{
    let tl = luma_at(tex_coords, -1.0, -1.0);
    let t = luma_at(tex_coords, 0.0, -1.0);
    let tr = luma_at(tex_coords, 1.0, -1.0);
    let l = luma_at(tex_coords, -1.0, 0.0);
    let r = luma_at(tex_coords, 1.0, 0.0);
    let bl = luma_at(tex_coords, -1.0, 1.0);
    let b = luma_at(tex_coords, 0.0, 1.0);
    let br = luma_at(tex_coords, 1.0, 1.0);

    let gx = (tr + 2.0 * r + br) - (tl + 2.0 * l + bl);
    let gy = (bl + 2.0 * b + br) - (tl + 2.0 * t + tr);
    let magnitude = clamp(sqrt(gx * gx + gy * gy), 0.0, 1.0);
    return vec4<f32>(vec3<f32>(magnitude), 1.0);
}}
"#
    )
}

/// Edge-aware blend of source and blurred image, weighted by the mask's red channel.
pub const COMPOSITE_FRAGMENT: &str = r#"
struct CompositeUniforms {
    edge_gain: f32,
    whitening: f32,
    _pad: vec2<f32>,
}

@group(0) @binding(0) var t_source: texture_2d<f32>;
@group(0) @binding(1) var t_blurred: texture_2d<f32>;
@group(0) @binding(2) var t_mask: texture_2d<f32>;
@group(0) @binding(3) var s_sampler: sampler;
@group(0) @binding(4) var<uniform> u: CompositeUniforms;

fn brighten(rgb: vec3<f32>) -> vec3<f32> {
    let beta = 1.0 + 9.0 * u.whitening;
    return log(rgb * (beta - 1.0) + vec3<f32>(1.0)) / log(beta);
}

@fragment
fn fs_main(@location(0) tex_coords: vec2<f32>) -> @location(0) vec4<f32> {
    let source = textureSampleLevel(t_source, s_sampler, tex_coords, 0.0);
    let blurred = textureSampleLevel(t_blurred, s_sampler, tex_coords, 0.0);
    let mask = textureSampleLevel(t_mask, s_sampler, tex_coords, 0.0).r;

    let w = clamp(mask * u.edge_gain, 0.0, 1.0);
    var rgb = mix(blurred.rgb, source.rgb, w);
    if (u.whitening > 0.0) {
        rgb = mix(rgb, brighten(rgb), 1.0 - w);
    }
    return vec4<f32>(rgb, source.a);
}
"#;
