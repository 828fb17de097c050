//! Shader Loading Utilities
//!
//! Loads and composes the GI compute shaders. Every pass source is prefixed
//! with `gi_common.wgsl`; the two tracing passes also get `gi_volume.wgsl`.
//! Composed sources are validated with naga before a module is created, so a
//! malformed shader surfaces as [`GiError::ShaderCompile`] with the full
//! diagnostic instead of a device-lost callback.

use std::path::Path;

use crate::error::{GiError, GiResult};

/// Shader source that can be either embedded at compile time or loaded at runtime.
#[derive(Clone, Debug)]
pub enum ShaderSource {
    /// Embedded shader source (no file I/O at runtime)
    Embedded(&'static str),
    /// Runtime-loaded shader source
    Runtime(String),
}

impl ShaderSource {
    /// Get the shader source as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            ShaderSource::Embedded(s) => s,
            ShaderSource::Runtime(s) => s.as_str(),
        }
    }
}

/// Load a shader from the filesystem at runtime.
pub fn load_shader_file(path: impl AsRef<Path>) -> GiResult<ShaderSource> {
    let source = std::fs::read_to_string(path)?;
    Ok(ShaderSource::Runtime(source))
}

/// One compute pass of the GI frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GiPass {
    Anchor,
    Downsample,
    SceneCapture,
    VoxelRelight,
    ProbeTrace,
    TemporalFilter,
    SpatialFilter,
    Sh9Project,
    Gather,
    Upsample,
    Combine,
}

impl GiPass {
    /// All passes in recording order.
    pub const ALL: [GiPass; 11] = [
        GiPass::Anchor,
        GiPass::Downsample,
        GiPass::SceneCapture,
        GiPass::VoxelRelight,
        GiPass::ProbeTrace,
        GiPass::TemporalFilter,
        GiPass::SpatialFilter,
        GiPass::Sh9Project,
        GiPass::Gather,
        GiPass::Upsample,
        GiPass::Combine,
    ];

    pub fn label(self) -> &'static str {
        match self {
            GiPass::Anchor => "gi_probe_anchor",
            GiPass::Downsample => "gi_downsample",
            GiPass::SceneCapture => "gi_scene_capture",
            GiPass::VoxelRelight => "gi_voxel_relight",
            GiPass::ProbeTrace => "gi_probe_trace",
            GiPass::TemporalFilter => "gi_temporal_filter",
            GiPass::SpatialFilter => "gi_spatial_filter",
            GiPass::Sh9Project => "gi_sh9_project",
            GiPass::Gather => "gi_gather",
            GiPass::Upsample => "gi_upsample",
            GiPass::Combine => "gi_combine",
        }
    }

    /// Shader file name under `engine/shaders/`.
    pub fn file_name(self) -> &'static str {
        match self {
            GiPass::Anchor => "probe_anchor.wgsl",
            GiPass::Downsample => "downsample.wgsl",
            GiPass::SceneCapture => "scene_capture.wgsl",
            GiPass::VoxelRelight => "voxel_relight.wgsl",
            GiPass::ProbeTrace => "probe_trace.wgsl",
            GiPass::TemporalFilter => "temporal_filter.wgsl",
            GiPass::SpatialFilter => "spatial_filter.wgsl",
            GiPass::Sh9Project => "sh9_project.wgsl",
            GiPass::Gather => "gather.wgsl",
            GiPass::Upsample => "upsample.wgsl",
            GiPass::Combine => "combine.wgsl",
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            GiPass::Anchor => embedded::PROBE_ANCHOR,
            GiPass::Downsample => embedded::DOWNSAMPLE,
            GiPass::SceneCapture => embedded::SCENE_CAPTURE,
            GiPass::VoxelRelight => embedded::VOXEL_RELIGHT,
            GiPass::ProbeTrace => embedded::PROBE_TRACE,
            GiPass::TemporalFilter => embedded::TEMPORAL_FILTER,
            GiPass::SpatialFilter => embedded::SPATIAL_FILTER,
            GiPass::Sh9Project => embedded::SH9_PROJECT,
            GiPass::Gather => embedded::GATHER,
            GiPass::Upsample => embedded::UPSAMPLE,
            GiPass::Combine => embedded::COMBINE,
        }
    }

    /// Passes that march the occupancy volume and need `gi_volume.wgsl`.
    pub fn uses_volume(self) -> bool {
        matches!(self, GiPass::VoxelRelight | GiPass::ProbeTrace)
    }

    /// Whether the pass reads the world-probe block at binding 13.
    pub fn uses_world_uniforms(self) -> bool {
        !matches!(self, GiPass::Downsample | GiPass::Upsample | GiPass::Combine)
    }
}

impl std::fmt::Display for GiPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The full set of GI shader sources, embedded or loaded from a directory.
#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    common: ShaderSource,
    volume: ShaderSource,
    passes: Vec<(GiPass, ShaderSource)>,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::embedded()
    }
}

impl ShaderLibrary {
    /// Sources compiled into the binary.
    pub fn embedded() -> Self {
        Self {
            common: ShaderSource::Embedded(embedded::GI_COMMON),
            volume: ShaderSource::Embedded(embedded::GI_VOLUME),
            passes: GiPass::ALL.iter().map(|&p| (p, ShaderSource::Embedded(p.embedded()))).collect(),
        }
    }

    /// Load every GI shader from `dir` (for shader iteration without rebuilding).
    pub fn load_dir(dir: impl AsRef<Path>) -> GiResult<Self> {
        let dir = dir.as_ref();
        let mut passes = Vec::with_capacity(GiPass::ALL.len());
        for pass in GiPass::ALL {
            passes.push((pass, load_shader_file(dir.join(pass.file_name()))?));
        }
        log::info!("[ShaderLibrary] Loaded {} GI shaders from {}", passes.len(), dir.display());
        Ok(Self {
            common: load_shader_file(dir.join(paths::GI_COMMON_FILE))?,
            volume: load_shader_file(dir.join(paths::GI_VOLUME_FILE))?,
            passes,
        })
    }

    fn pass_source(&self, pass: GiPass) -> &str {
        self.passes
            .iter()
            .find(|(p, _)| *p == pass)
            .map(|(_, s)| s.as_str())
            .unwrap_or_else(|| pass.embedded())
    }

    /// Concatenate the shared prelude(s) and the pass body.
    pub fn compose(&self, pass: GiPass) -> String {
        let mut parts = vec![self.common.as_str()];
        if pass.uses_volume() {
            parts.push(self.volume.as_str());
        }
        parts.push(self.pass_source(pass));
        parts.join("\n")
    }
}

/// Compose a pass from the embedded sources.
pub fn compose(pass: GiPass) -> String {
    ShaderLibrary::embedded().compose(pass)
}

/// Validator capabilities. The f16 radiance packing in `gi_common.wgsl`
/// needs `pack2x16float`, which wgpu exposes through the
/// `SHADER_F16_IN_F32` downlevel flag.
pub fn shader_capabilities() -> naga::valid::Capabilities {
    naga::valid::Capabilities::default() | naga::valid::Capabilities::SHADER_FLOAT16_IN_FLOAT32
}

/// Parse and validate WGSL with naga.
///
/// Both failure kinds come back as [`GiError::ShaderCompile`] carrying the
/// span-annotated diagnostic.
pub fn validate_wgsl(label: &str, source: &str) -> GiResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| GiError::ShaderCompile {
        label: label.to_string(),
        diagnostic: e.emit_to_string(source),
    })?;
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        shader_capabilities(),
    );
    validator.validate(&module).map_err(|e| GiError::ShaderCompile {
        label: label.to_string(),
        diagnostic: e.emit_to_string(source),
    })?;
    Ok(module)
}

/// Create a wgpu shader module after naga validation.
///
/// The validated naga module is returned alongside for binding reflection.
pub fn create_shader_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> GiResult<(wgpu::ShaderModule, naga::Module)> {
    let naga_module = validate_wgsl(label, source)?;
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    Ok((module, naga_module))
}

/// Shader paths relative to the repository root.
pub mod paths {
    /// Directory holding every GI shader
    pub const GI_SHADER_DIR: &str = "engine/shaders";

    /// Shared structs, encodings and hashing
    pub const GI_COMMON_FILE: &str = "gi_common.wgsl";

    /// Occupancy volume access and the DDA marcher
    pub const GI_VOLUME_FILE: &str = "gi_volume.wgsl";
}

/// Embedded shaders that are compiled into the binary.
pub mod embedded {
    pub const GI_COMMON: &str = include_str!("../../shaders/gi_common.wgsl");
    pub const GI_VOLUME: &str = include_str!("../../shaders/gi_volume.wgsl");

    pub const PROBE_ANCHOR: &str = include_str!("../../shaders/probe_anchor.wgsl");
    pub const DOWNSAMPLE: &str = include_str!("../../shaders/downsample.wgsl");
    pub const SCENE_CAPTURE: &str = include_str!("../../shaders/scene_capture.wgsl");
    pub const VOXEL_RELIGHT: &str = include_str!("../../shaders/voxel_relight.wgsl");
    pub const PROBE_TRACE: &str = include_str!("../../shaders/probe_trace.wgsl");
    pub const TEMPORAL_FILTER: &str = include_str!("../../shaders/temporal_filter.wgsl");
    pub const SPATIAL_FILTER: &str = include_str!("../../shaders/spatial_filter.wgsl");
    pub const SH9_PROJECT: &str = include_str!("../../shaders/sh9_project.wgsl");
    pub const GATHER: &str = include_str!("../../shaders/gather.wgsl");
    pub const UPSAMPLE: &str = include_str!("../../shaders/upsample.wgsl");
    pub const COMBINE: &str = include_str!("../../shaders/combine.wgsl");
}
