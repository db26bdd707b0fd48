//! Renderer tying the backend, frame graph and scene together
//!
//! Owns the graphics backend and a compiled frame graph built from the
//! deferred pipeline passes. The frame graph is rebuilt on resize since
//! every intermediate target is sized relative to the surface.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::ibl::{EnvironmentMap, IblTextures};
use crate::pipeline::{
    CompositePass, DisplayMode, GBufferPass, LightVolumesPass, LightingPass, PipelineConfig,
    LightingStrategy, ShadowPass, SsaoBlurPass, SsaoPass, CASCADE_COUNT,
};
use crate::pipeline::lighting_pass::{GBufferInputs, GBufferViews};
use crate::render_graph::{
    CompiledGraph, GraphError, PassId, PassType, RenderGraph, RenderGraphExecutor, RenderPass,
    ResourceId,
};
use crate::resources::{AssetError, GpuMesh, Material, Mesh};
use crate::scene::{Cascade, CascadeFitter, CascadeSplits, Scene};
use glam::Vec3;
use std::path::PathBuf;
use std::sync::Arc;

/// Renderer construction failure
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("renderer internal error: {0}")]
    Internal(&'static str),
}

/// Settings fixed when the renderer is created
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub vsync: bool,
    pub pipeline: PipelineConfig,
    /// Equirectangular `.hdr` environment; a constant grey sky when absent
    pub environment: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            pipeline: PipelineConfig::default(),
            environment: None,
        }
    }
}

/// Which lighting pass the graph carries
enum LightingPassId {
    SinglePass(PassId),
    Volumes(PassId),
}

struct PassIds {
    gbuffer: PassId,
    shadow: PassId,
    ssao: PassId,
    lighting: LightingPassId,
    composite: PassId,
}

/// One built and compiled frame graph with its allocated resources
struct FrameGraph {
    graph: RenderGraph,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,
    passes: PassIds,
    backbuffer: ResourceId,
}

pub struct Renderer {
    backend: WgpuBackend,
    frame: FrameGraph,

    pub scene: Scene,

    config: PipelineConfig,
    meshes: Vec<GpuMesh>,
    materials: Vec<Material>,
    splits: CascadeSplits,
    fitter: CascadeFitter,
    ibl: IblTextures,

    width: u32,
    height: u32,
}

impl Renderer {
    pub fn new(
        window: Arc<winit::window::Window>,
        config: RendererConfig,
    ) -> Result<Self, RenderError> {
        let mut backend = WgpuBackend::new(window, config.vsync)?;
        let (width, height) = backend.surface_size();

        let environment = match &config.environment {
            Some(path) => EnvironmentMap::load(path)?,
            None => EnvironmentMap::from_color(Vec3::new(0.4, 0.45, 0.55)),
        };
        let ibl = environment.precompute_and_upload(&mut backend)?;

        let frame = build_frame_graph(
            &mut backend,
            &config.pipeline,
            &ibl,
            DisplayMode::Final,
            width,
            height,
        )?;

        Ok(Self {
            backend,
            frame,
            scene: Scene::new(),
            config: config.pipeline,
            meshes: Vec::new(),
            materials: Vec::new(),
            splits: CascadeSplits::practical(CASCADE_COUNT as usize),
            fitter: CascadeFitter::default(),
            ibl,
            width,
            height,
        })
    }

    /// Upload a mesh, returning the id render objects refer to
    pub fn add_mesh(&mut self, mesh: &Mesh) -> Result<usize, RenderError> {
        let gpu = GpuMesh::upload(&mut self.backend, mesh)?;
        self.meshes.push(gpu);
        Ok(self.meshes.len() - 1)
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        if let Ok(pass) =
            pass_mut::<CompositePass>(&mut self.frame.graph, self.frame.passes.composite)
        {
            pass.set_display_mode(mode);
        }
    }

    pub fn display_mode(&self) -> DisplayMode {
        pass_ref::<CompositePass>(&self.frame.graph, self.frame.passes.composite)
            .map(|p| p.display_mode())
            .unwrap_or_default()
    }

    /// Whether the presented image goes through the HDR exposure tonemap
    ///
    /// Debug views show raw target contents and bypass it.
    pub fn is_hdr(&self) -> bool {
        self.display_mode() == DisplayMode::Final
    }

    /// Step to the next debug display mode
    pub fn cycle_display_mode(&mut self) {
        let modes = DisplayMode::all();
        let current = self.display_mode();
        let index = modes.iter().position(|m| *m == current).unwrap_or(0);
        self.set_display_mode(modes[(index + 1) % modes.len()]);
    }

    /// Render one frame of the current scene
    pub fn draw(&mut self) -> Result<(), RenderError> {
        let aspect = self.aspect();
        let cascades = self.fit_cascades(aspect);

        let frame = &mut self.frame;
        pass_mut::<GBufferPass>(&mut frame.graph, frame.passes.gbuffer)?.update(
            &mut self.backend,
            &self.scene,
            &self.meshes,
            &self.materials,
            aspect,
        )?;
        pass_mut::<ShadowPass>(&mut frame.graph, frame.passes.shadow)?.update(
            &mut self.backend,
            &self.scene,
            &self.meshes,
            &cascades,
        )?;
        pass_mut::<SsaoPass>(&mut frame.graph, frame.passes.ssao)?.update(
            &mut self.backend,
            &self.scene,
            aspect,
        );
        match frame.passes.lighting {
            LightingPassId::SinglePass(id) => {
                pass_mut::<LightingPass>(&mut frame.graph, id)?.update(
                    &mut self.backend,
                    &self.scene,
                    &cascades,
                    aspect,
                );
            }
            LightingPassId::Volumes(id) => {
                pass_mut::<LightVolumesPass>(&mut frame.graph, id)?.update(
                    &mut self.backend,
                    &self.scene,
                    &cascades,
                    aspect,
                )?;
            }
        }
        pass_mut::<CompositePass>(&mut frame.graph, frame.passes.composite)?.update(
            &mut self.backend,
            &self.scene,
            aspect,
        );

        let frame_ctx = match self.backend.begin_frame() {
            Ok(ctx) => ctx,
            Err(BackendError::SurfaceLost) => {
                self.backend.resize(self.width, self.height);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        frame
            .executor
            .set_external_view(frame.backbuffer, frame_ctx.swapchain_view);
        frame.executor.execute(
            &frame.graph,
            &frame.compiled,
            &mut self.backend,
            &self.scene,
            frame_ctx.width,
            frame_ctx.height,
        );
        self.backend.end_frame()?;
        Ok(())
    }

    /// Rebuild the frame graph for a new surface size
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height);
        let (width, height) = self.backend.surface_size();
        self.width = width;
        self.height = height;

        let mode = self.display_mode();
        if let Ok(pass) = pass_mut::<ShadowPass>(&mut self.frame.graph, self.frame.passes.shadow) {
            pass.destroy(&mut self.backend);
        }
        self.frame.executor.cleanup(&mut self.backend);
        self.frame =
            build_frame_graph(&mut self.backend, &self.config, &self.ibl, mode, width, height)?;
        Ok(())
    }

    fn fit_cascades(&self, aspect: f32) -> Vec<Cascade> {
        match &self.scene.directional_light {
            Some(light) => self.fitter.fit(&self.scene.camera, aspect, light, &self.splits),
            None => Vec::new(),
        }
    }
}

fn pass_ref<P: RenderPass + 'static>(graph: &RenderGraph, id: PassId) -> Result<&P, RenderError> {
    graph
        .get_pass(id)
        .and_then(|p| p.as_any().downcast_ref::<P>())
        .ok_or(RenderError::Internal("render pass missing from graph"))
}

fn pass_mut<P: RenderPass + 'static>(
    graph: &mut RenderGraph,
    id: PassId,
) -> Result<&mut P, RenderError> {
    graph
        .get_pass_mut(id)
        .and_then(|p| p.as_any_mut().downcast_mut::<P>())
        .ok_or(RenderError::Internal("render pass missing from graph"))
}

fn resource(id: Option<ResourceId>) -> Result<ResourceId, RenderError> {
    id.ok_or(RenderError::Internal("pass resource not declared"))
}

/// Build, compile, initialize and wire the whole deferred graph
fn build_frame_graph(
    backend: &mut WgpuBackend,
    config: &PipelineConfig,
    ibl: &IblTextures,
    display_mode: DisplayMode,
    width: u32,
    height: u32,
) -> Result<FrameGraph, RenderError> {
    let mut graph = RenderGraph::new();
    let shadow_map = graph.register_external("shadow_map");
    let backbuffer = graph.register_external("backbuffer");

    let gbuffer_id = graph.add_pass(GBufferPass::new(), PassType::Graphics, width, height);
    let (depth, normal, albedo, specular) = {
        let pass = pass_ref::<GBufferPass>(&graph, gbuffer_id)?;
        (
            resource(pass.depth)?,
            resource(pass.normal)?,
            resource(pass.albedo)?,
            resource(pass.specular)?,
        )
    };

    let shadow_id = graph.add_pass(
        ShadowPass::new(shadow_map, config.shadow_map_size),
        PassType::Graphics,
        width,
        height,
    );

    let ssao_id = graph.add_pass(
        SsaoPass::new(depth, normal, config.ssao.clone()),
        PassType::Compute,
        width,
        height,
    );
    let raw_occlusion = resource(pass_ref::<SsaoPass>(&graph, ssao_id)?.occlusion)?;
    let blur_id = graph.add_pass(SsaoBlurPass::new(raw_occlusion), PassType::Compute, width, height);
    let occlusion = resource(pass_ref::<SsaoBlurPass>(&graph, blur_id)?.blurred)?;

    let inputs = GBufferInputs {
        depth,
        normal,
        albedo,
        specular,
        occlusion,
        shadow_map,
    };
    let (lighting_id, hdr) = match config.lighting {
        LightingStrategy::SinglePass => {
            let id = graph.add_pass(
                LightingPass::new(
                    inputs,
                    config.shadow_map_size,
                    config.cascade_blend,
                    config.min_light_intensity,
                ),
                PassType::Graphics,
                width,
                height,
            );
            let hdr = resource(pass_ref::<LightingPass>(&graph, id)?.hdr)?;
            (LightingPassId::SinglePass(id), hdr)
        }
        LightingStrategy::LightVolumes => {
            let id = graph.add_pass(
                LightVolumesPass::new(
                    inputs,
                    config.shadow_map_size,
                    config.cascade_blend,
                    config.min_light_intensity,
                ),
                PassType::Graphics,
                width,
                height,
            );
            let hdr = resource(pass_ref::<LightVolumesPass>(&graph, id)?.hdr)?;
            (LightingPassId::Volumes(id), hdr)
        }
    };

    let composite_id = graph.add_pass(
        CompositePass::new(hdr, inputs, backbuffer, config.exposure),
        PassType::Graphics,
        width,
        height,
    );

    let compiled = graph.compile()?;
    compiled.validate()?;

    let surface_format = backend.swapchain_format();
    pass_mut::<GBufferPass>(&mut graph, gbuffer_id)?.initialize(backend)?;
    pass_mut::<ShadowPass>(&mut graph, shadow_id)?.initialize(backend)?;
    pass_mut::<SsaoPass>(&mut graph, ssao_id)?.initialize(backend, &mut rand::thread_rng())?;
    pass_mut::<SsaoBlurPass>(&mut graph, blur_id)?.initialize(backend)?;
    match lighting_id {
        LightingPassId::SinglePass(id) => {
            pass_mut::<LightingPass>(&mut graph, id)?.initialize(backend)?;
        }
        LightingPassId::Volumes(id) => {
            pass_mut::<LightVolumesPass>(&mut graph, id)?.initialize(backend)?;
        }
    }
    {
        let pass = pass_mut::<CompositePass>(&mut graph, composite_id)?;
        pass.initialize(backend, surface_format)?;
        pass.set_display_mode(display_mode);
    }

    let mut executor = RenderGraphExecutor::new();
    executor.allocate_resources(&graph, backend)?;

    let shadow_view = pass_ref::<ShadowPass>(&graph, shadow_id)?
        .array_view()
        .ok_or(RenderError::Internal("shadow map not initialized"))?;
    executor.set_external_view(shadow_map, shadow_view);

    let view = |id: ResourceId| {
        executor
            .texture_view(id)
            .ok_or(RenderError::Internal("graph texture not allocated"))
    };
    let views = GBufferViews {
        depth: view(depth)?,
        normal: view(normal)?,
        albedo: view(albedo)?,
        specular: view(specular)?,
        occlusion: view(occlusion)?,
        shadow_map: shadow_view,
    };
    let hdr_view = view(hdr)?;
    let raw_view = view(raw_occlusion)?;

    pass_mut::<SsaoPass>(&mut graph, ssao_id)?.create_bind_group(
        backend,
        views.depth,
        views.normal,
        raw_view,
    )?;
    pass_mut::<SsaoBlurPass>(&mut graph, blur_id)?.create_bind_group(
        backend,
        raw_view,
        views.occlusion,
    )?;
    match lighting_id {
        LightingPassId::SinglePass(id) => {
            pass_mut::<LightingPass>(&mut graph, id)?.create_bind_groups(backend, &views, ibl)?;
        }
        LightingPassId::Volumes(id) => {
            pass_mut::<LightVolumesPass>(&mut graph, id)?
                .create_bind_groups(backend, &views, ibl)?;
        }
    }
    pass_mut::<CompositePass>(&mut graph, composite_id)?.create_bind_group(
        backend,
        hdr_view,
        views.depth,
        views.normal,
        views.albedo,
        views.specular,
        views.occlusion,
        shadow_view,
    )?;

    Ok(FrameGraph {
        graph,
        compiled,
        executor,
        passes: PassIds {
            gbuffer: gbuffer_id,
            shadow: shadow_id,
            ssao: ssao_id,
            lighting: lighting_id,
            composite: composite_id,
        },
        backbuffer,
    })
}
