//! Depth preprocessing
//!
//! - Linearization of depth-buffer samples to metric depth
//! - Intrinsics from per-frame field-of-view tangents
//! - Range and confidence filtering

pub mod filter;
pub mod linearizer;

pub use filter::{DepthFilter, DepthFilterStats};
pub use linearizer::DepthLinearizer;
