//! Graphics backend abstraction layer

pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
