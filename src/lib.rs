//! silkcam: edge-aware skin smoothing and whitening for live video on the GPU.
//!
//! Frames from a camera (or a still image / test pattern) are uploaded as
//! textures, run through a blur + edge + composite filter graph and presented
//! aspect-correct in a window or an offscreen target.

pub mod capture;
pub mod config;
pub mod filter;
pub mod frame;
pub mod gpu;
pub mod ingest;
pub mod output;
pub mod pump;
pub mod stats;
