//! Meshes and materials

pub mod material;
pub mod mesh;

pub use material::{Material, MaterialUniformData};
pub use mesh::{GpuMesh, Mesh};

use thiserror::Error;

/// Asset loading errors
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to decode image '{path}': {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },
}
