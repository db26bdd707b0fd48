//! Image-based lighting precompute
//!
//! Loads an equirectangular HDR environment, convolves it into a
//! diffuse irradiance cube and a GGX-prefiltered specular mip chain,
//! and integrates the split-sum BRDF lookup table. Everything runs on
//! the CPU once at startup and uploads the results.

pub mod brdf_lut;
pub mod cubemap;
pub mod irradiance;
pub mod prefilter;

pub use brdf_lut::{brdf_lut_rg16f, integrate_brdf, BRDF_LUT_SIZE};
pub use cubemap::{CubemapData, EquirectImage};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::AssetError;
use glam::Vec3;
use std::path::Path;

/// Side length of the projected environment cube
pub const ENVIRONMENT_SIZE: u32 = 64;
/// Side length of the irradiance cube
pub const IRRADIANCE_SIZE: u32 = 16;
/// Base side length of the prefiltered chain
pub const PREFILTER_SIZE: u32 = 64;
/// Mip count of the prefiltered chain; keep in sync with the shaders
pub const PREFILTER_MIPS: u32 = 5;

/// GPU handles the lighting passes bind
#[derive(Debug, Clone, Copy)]
pub struct IblTextures {
    pub irradiance: TextureViewHandle,
    pub prefiltered: TextureViewHandle,
    pub brdf_lut: TextureViewHandle,
    pub sampler: SamplerHandle,
}

/// Environment held as CPU cubemap data until upload
pub struct EnvironmentMap {
    environment: CubemapData,
}

impl EnvironmentMap {
    /// Load an equirectangular `.hdr` file
    ///
    /// A missing or undecodable environment is fatal to renderer
    /// construction; there is no silent fallback.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let image = EquirectImage::load(path)?;
        Ok(Self {
            environment: CubemapData::from_equirect(&image, ENVIRONMENT_SIZE),
        })
    }

    /// Constant-color environment for scenes without an HDR asset
    pub fn from_color(color: Vec3) -> Self {
        Self {
            environment: CubemapData::solid(ENVIRONMENT_SIZE, color),
        }
    }

    /// Run the convolutions and upload all three textures
    pub fn precompute_and_upload<B: GraphicsBackend>(
        &self,
        backend: &mut B,
    ) -> BackendResult<IblTextures> {
        let start = std::time::Instant::now();

        let irradiance_data = irradiance::convolve(&self.environment, IRRADIANCE_SIZE);
        let prefiltered_data = prefilter::prefilter(&self.environment, PREFILTER_SIZE, PREFILTER_MIPS);
        let lut_data = brdf_lut_rg16f();
        log::info!(
            "environment precompute finished in {:.1?}",
            start.elapsed()
        );

        let irradiance_texture = backend.create_texture(&TextureDescriptor {
            label: Some("ibl_irradiance".to_string()),
            width: IRRADIANCE_SIZE,
            height: IRRADIANCE_SIZE,
            layers: 6,
            mip_levels: 1,
            dimension: TextureDimension::Cube,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        for face in 0..cubemap::FACE_COUNT {
            backend.write_texture(
                irradiance_texture,
                0,
                face as u32,
                &irradiance_data.face_rgba16f(face),
                IRRADIANCE_SIZE,
                IRRADIANCE_SIZE,
            );
        }

        let prefiltered_texture = backend.create_texture(&TextureDescriptor {
            label: Some("ibl_prefiltered".to_string()),
            width: PREFILTER_SIZE,
            height: PREFILTER_SIZE,
            layers: 6,
            mip_levels: PREFILTER_MIPS,
            dimension: TextureDimension::Cube,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        for (mip, level) in prefiltered_data.iter().enumerate() {
            for face in 0..cubemap::FACE_COUNT {
                backend.write_texture(
                    prefiltered_texture,
                    mip as u32,
                    face as u32,
                    &level.face_rgba16f(face),
                    level.size(),
                    level.size(),
                );
            }
        }

        let lut_texture = backend.create_texture(&TextureDescriptor {
            label: Some("ibl_brdf_lut".to_string()),
            width: BRDF_LUT_SIZE,
            height: BRDF_LUT_SIZE,
            format: TextureFormat::Rg16Float,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;
        backend.write_texture(lut_texture, 0, 0, &lut_data, BRDF_LUT_SIZE, BRDF_LUT_SIZE);

        let irradiance = backend.create_texture_view(irradiance_texture, &TextureViewDescriptor::cube())?;
        let prefiltered = backend.create_texture_view(prefiltered_texture, &TextureViewDescriptor::cube())?;
        let brdf_lut = backend.create_texture_view(lut_texture, &TextureViewDescriptor::default())?;
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("ibl_sampler".to_string()),
            ..Default::default()
        })?;

        Ok(IblTextures {
            irradiance,
            prefiltered,
            brdf_lut,
            sampler,
        })
    }
}
