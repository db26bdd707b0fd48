//! Deferred rendering pipeline passes

pub mod composite_pass;
pub mod gbuffer_pass;
pub mod light_volumes;
pub mod lighting_pass;
pub mod shadow_pass;
pub mod ssao;

pub use composite_pass::CompositePass;
pub use gbuffer_pass::GBufferPass;
pub use light_volumes::LightVolumesPass;
pub use lighting_pass::LightingPass;
pub use shadow_pass::ShadowPass;
pub use ssao::{SsaoBlurPass, SsaoConfig, SsaoPass};

use crate::backend::traits::{BindGroupHandle, BufferHandle};

/// Number of shadow cascades
pub const CASCADE_COUNT: u32 = 4;

/// Light capacity of the single-pass accumulation uniform array
pub const MAX_LIGHTS: usize = 32;

/// Upper bound on the occlusion sample kernel
pub const MAX_SSAO_SAMPLES: usize = 64;

/// Side length of the tiled occlusion rotation noise texture
pub const SSAO_NOISE_SIZE: u32 = 4;

/// How the lighting accumulation target is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightingStrategy {
    /// One fullscreen pass looping a bounded light array
    #[default]
    SinglePass,
    /// One additively blended icosphere volume per point light
    LightVolumes,
}

/// Which intermediate target the composite pass shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Final,
    Position,
    Normal,
    Albedo,
    Specular,
    Occlusion,
    /// Visualize one shadow cascade's depth
    ShadowCascade(u32),
}

impl DisplayMode {
    /// All modes, used to cycle with a debug key
    pub fn all() -> Vec<DisplayMode> {
        let mut modes = vec![
            DisplayMode::Final,
            DisplayMode::Position,
            DisplayMode::Normal,
            DisplayMode::Albedo,
            DisplayMode::Specular,
            DisplayMode::Occlusion,
        ];
        for cascade in 0..CASCADE_COUNT {
            modes.push(DisplayMode::ShadowCascade(cascade));
        }
        modes
    }

    /// Index written into the composite uniform
    pub fn shader_index(&self) -> u32 {
        match self {
            DisplayMode::Final => 0,
            DisplayMode::Position => 1,
            DisplayMode::Normal => 2,
            DisplayMode::Albedo => 3,
            DisplayMode::Specular => 4,
            DisplayMode::Occlusion => 5,
            DisplayMode::ShadowCascade(i) => 6 + i,
        }
    }
}

/// Pipeline-wide settings fixed at renderer construction
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub shadow_map_size: u32,
    pub lighting: LightingStrategy,
    pub ssao: SsaoConfig,
    /// Intensity threshold bounding each point light's effective range
    pub min_light_intensity: f32,
    /// Exposure applied by the tonemapping composite
    pub exposure: f32,
    /// Blend shadows across cascade boundaries
    pub cascade_blend: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shadow_map_size: 2048,
            lighting: LightingStrategy::SinglePass,
            ssao: SsaoConfig::default(),
            min_light_intensity: 0.05,
            exposure: 1.0,
            cascade_blend: true,
        }
    }
}

/// One buffered draw for the current frame
///
/// Each object gets its own small uniform buffer and bind group; the
/// buffers are written in `update` and consumed when the graph executes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DrawRecord {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub object_bind_group: BindGroupHandle,
}

/// WGSL camera uniform matching [`crate::scene::CameraUniformData`]
pub(crate) const SHADER_CAMERA: &str = r#"
struct Camera {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    inv_view_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
};
"#;

/// Octahedral normal codec plus depth-based position reconstruction
pub(crate) const SHADER_GBUFFER_CODEC: &str = r#"
fn sign_not_zero(v: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(select(-1.0, 1.0, v.x >= 0.0), select(-1.0, 1.0, v.y >= 0.0));
}

fn encode_normal(n: vec3<f32>) -> vec2<f32> {
    let p = n.xy / (abs(n.x) + abs(n.y) + abs(n.z));
    if (n.z < 0.0) {
        return (1.0 - abs(p.yx)) * sign_not_zero(p);
    }
    return p;
}

fn decode_normal(e: vec2<f32>) -> vec3<f32> {
    var n = vec3<f32>(e.x, e.y, 1.0 - abs(e.x) - abs(e.y));
    if (n.z < 0.0) {
        let xy = (1.0 - abs(n.yx)) * sign_not_zero(n.xy);
        n = vec3<f32>(xy.x, xy.y, n.z);
    }
    return normalize(n);
}

fn reconstruct_world_position(uv: vec2<f32>, depth: f32, inv_view_proj: mat4x4<f32>) -> vec3<f32> {
    let ndc = vec3<f32>(uv.x * 2.0 - 1.0, (1.0 - uv.y) * 2.0 - 1.0, depth);
    let world = inv_view_proj * vec4<f32>(ndc, 1.0);
    return world.xyz / world.w;
}
"#;

/// Single-triangle fullscreen vertex stage
pub(crate) const SHADER_FULLSCREEN_VERTEX: &str = r#"
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> FullscreenOutput {
    var out: FullscreenOutput;
    let corner = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));
    out.position = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}
"#;

/// WGSL constants shared by the lighting and occlusion shaders
pub(crate) fn shader_constants() -> String {
    format!(
        "const MAX_LIGHTS: u32 = {}u;\nconst CASCADE_COUNT: u32 = {}u;\nconst MAX_SSAO_SAMPLES: u32 = {}u;\n",
        MAX_LIGHTS, CASCADE_COUNT, MAX_SSAO_SAMPLES
    )
}
