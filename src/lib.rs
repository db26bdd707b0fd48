//! Lumen - a render graph-based deferred renderer
//!
//! Geometry lands in a G-buffer (depth, octahedral normals, albedo,
//! specular tint and roughness), then screen-space ambient occlusion,
//! cascaded shadow maps and one of two lighting strategies resolve it
//! into an HDR target that a tonemapping composite puts on screen.
//! Ambient light comes from a precomputed image-based lighting set:
//! an irradiance cube, a GGX-prefiltered mip chain and the split-sum
//! BRDF lookup table.
//!
//! # Features
//! - Render graph system for declarative render pass management
//! - Deferred shading with a choice of fullscreen light loop or
//!   additively blended per-light volumes
//! - Four practical-split shadow cascades with PCF filtering
//! - Hemisphere-kernel SSAO with a noise-tile blur
//! - Debug views of every intermediate target

pub mod backend;
pub mod ibl;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod window;

pub use ibl::EnvironmentMap;
pub use pipeline::{DisplayMode, LightingStrategy, PipelineConfig, SsaoConfig};
pub use renderer::{RenderError, Renderer, RendererConfig};
pub use resources::{Material, Mesh};
pub use scene::{Camera, MoveDirection, RenderObject, Scene, Transform};
pub use window::Window;

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;

/// Initialize env_logger with sensible defaults for the demos
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
