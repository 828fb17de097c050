//! Shader Binding Validator
//!
//! The per-pass binding tables below are the canonical source of truth for
//! every GI compute pipeline. Bind group layouts are built from them, and two
//! checks keep them honest:
//!
//! - [`validate_bind_group`] compares a table with the wgpu layout entries
//!   actually used for pipeline creation;
//! - [`validate_shader_bindings`] reflects the naga module of the composed
//!   shader and compares its resource globals with the table.
//!
//! Mismatches are logged and counted, never fatal on their own: wgpu's own
//! validation still rejects a truly incompatible layout.

use std::fmt;

use super::shader_loader::GiPass;

/// Describes a single expected binding in a bind group layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedBinding {
    pub binding: u32,
    pub binding_type: ExpectedBindingType,
    pub label: &'static str,
}

/// The type of a binding, matching the wgpu::BindingType variants the GI passes use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedBindingType {
    UniformBuffer,
    StorageBufferReadOnly,
    StorageBufferReadWrite,
    /// Sampled, non-filterable float `texture_2d_array`
    Texture2dArray,
    /// Write-only `texture_storage_2d_array<rgba16float>`
    StorageTexture2dArray,
    Sampler,
    Unsupported,
}

impl fmt::Display for ExpectedBindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniformBuffer => write!(f, "uniform buffer"),
            Self::StorageBufferReadOnly => write!(f, "storage buffer (read-only)"),
            Self::StorageBufferReadWrite => write!(f, "storage buffer (read-write)"),
            Self::Texture2dArray => write!(f, "texture 2d array"),
            Self::StorageTexture2dArray => write!(f, "storage texture 2d array"),
            Self::Sampler => write!(f, "sampler"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

impl ExpectedBindingType {
    /// wgpu layout type for this binding.
    pub fn to_wgpu(self) -> wgpu::BindingType {
        match self {
            Self::UniformBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Self::StorageBufferReadOnly => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Self::StorageBufferReadWrite | Self::Unsupported => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Self::Texture2dArray => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2Array,
                multisampled: false,
            },
            Self::StorageTexture2dArray => wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba16Float,
                view_dimension: wgpu::TextureViewDimension::D2Array,
            },
            Self::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
        }
    }
}

/// Describes the expected layout for one bind group of a pipeline.
#[derive(Debug, Clone)]
pub struct ExpectedBindGroup {
    pub pipeline_name: &'static str,
    pub group_index: u32,
    pub bindings: &'static [ExpectedBinding],
}

impl ExpectedBindGroup {
    /// Layout entries for `create_bind_group_layout`, all compute-visible.
    pub fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        self.bindings
            .iter()
            .map(|b| wgpu::BindGroupLayoutEntry {
                binding: b.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: b.binding_type.to_wgpu(),
                count: None,
            })
            .collect()
    }
}

const fn bind(binding: u32, binding_type: ExpectedBindingType, label: &'static str) -> ExpectedBinding {
    ExpectedBinding { binding, binding_type, label }
}

use ExpectedBindingType::{
    StorageBufferReadOnly as Ro, StorageBufferReadWrite as Rw, StorageTexture2dArray as StorageTex,
    Texture2dArray as Tex, UniformBuffer as Uniform,
};

const ANCHOR: &[ExpectedBinding] = &[
    bind(0, Ro, "DepthBuffer"),
    bind(1, Ro, "NormalBuffer"),
    bind(2, Rw, "ProbeAnchors"),
    bind(12, Uniform, "FrameUniforms"),
    bind(13, Uniform, "WorldProbeUniforms"),
];

const DOWNSAMPLE: &[ExpectedBinding] = &[
    bind(0, Ro, "DepthBuffer"),
    bind(1, Ro, "NormalBuffer"),
    bind(2, Rw, "HalfDepth"),
    bind(3, Rw, "HalfNormals"),
    bind(12, Uniform, "FrameUniforms"),
];

const SCENE_CAPTURE: &[ExpectedBinding] = &[
    bind(0, Ro, "CaptureWorkItems"),
    bind(1, Ro, "CardMeta"),
    bind(2, Ro, "Triangles"),
    bind(3, Rw, "CardDepth"),
    bind(4, Rw, "CardMaterial"),
    bind(5, Rw, "CardRadiance"),
    bind(13, Uniform, "WorldProbeUniforms"),
];

const VOXEL_RELIGHT: &[ExpectedBinding] = &[
    bind(0, Ro, "RelightWorkItems"),
    bind(1, Ro, "CardMeta"),
    bind(2, Ro, "CardDepth"),
    bind(3, Ro, "CardMaterial"),
    bind(4, Rw, "CardRadiance"),
    bind(5, Ro, "Occupancy"),
    bind(6, Rw, "DebugCounters"),
    bind(12, Uniform, "FrameUniforms"),
    bind(13, Uniform, "WorldProbeUniforms"),
    bind(14, Uniform, "LightLuts"),
];

const PROBE_TRACE: &[ExpectedBinding] = &[
    bind(0, Ro, "ProbeAnchors"),
    bind(1, Ro, "Occupancy"),
    bind(2, Ro, "PageDirectory"),
    bind(3, Ro, "CardMeta"),
    bind(4, Ro, "CardRadiance"),
    bind(5, Rw, "TraceAtlas"),
    bind(6, Rw, "MetaAtlas"),
    bind(7, Rw, "DebugCounters"),
    bind(12, Uniform, "FrameUniforms"),
    bind(13, Uniform, "WorldProbeUniforms"),
    bind(14, Uniform, "LightLuts"),
];

const TEMPORAL_FILTER: &[ExpectedBinding] = &[
    bind(0, Ro, "ProbeAnchors"),
    bind(1, Ro, "TraceAtlas"),
    bind(2, Ro, "HistoryAtlas"),
    bind(3, Rw, "FilteredAtlas"),
    bind(12, Uniform, "FrameUniforms"),
    bind(13, Uniform, "WorldProbeUniforms"),
];

const SPATIAL_FILTER: &[ExpectedBinding] = &[
    bind(0, Ro, "ProbeAnchors"),
    bind(1, Ro, "FilteredAtlas"),
    bind(2, Ro, "MetaAtlas"),
    bind(3, Rw, "SpatialAtlas"),
    bind(13, Uniform, "WorldProbeUniforms"),
];

const SH9_PROJECT: &[ExpectedBinding] = &[
    bind(0, Ro, "SpatialAtlas"),
    bind(1, Ro, "MetaAtlas"),
    bind(2, Ro, "ProbeAnchors"),
    bind(3, Ro, "Sh9ProjectionTable"),
    bind(8, StorageTex, "ShProbes"),
    bind(13, Uniform, "WorldProbeUniforms"),
];

const GATHER: &[ExpectedBinding] = &[
    bind(0, Ro, "HalfDepth"),
    bind(1, Ro, "HalfNormals"),
    bind(2, Ro, "ProbeAnchors"),
    bind(3, Ro, "SpatialAtlas"),
    bind(4, Rw, "HalfIndirect"),
    bind(8, Tex, "ShProbes"),
    bind(12, Uniform, "FrameUniforms"),
    bind(13, Uniform, "WorldProbeUniforms"),
];

const UPSAMPLE: &[ExpectedBinding] = &[
    bind(0, Ro, "HalfIndirect"),
    bind(1, Ro, "HalfDepth"),
    bind(2, Ro, "HalfNormals"),
    bind(3, Ro, "DepthBuffer"),
    bind(4, Ro, "NormalBuffer"),
    bind(5, Rw, "Indirect"),
    bind(12, Uniform, "FrameUniforms"),
];

const COMBINE: &[ExpectedBinding] = &[
    bind(0, Ro, "DirectLighting"),
    bind(1, Ro, "Indirect"),
    bind(2, Ro, "AlbedoMetallic"),
    bind(3, Ro, "DepthBuffer"),
    bind(4, Rw, "Combined"),
    bind(12, Uniform, "FrameUniforms"),
];

/// Group 0 layout of a pass.
pub fn expected_bind_group(pass: GiPass) -> ExpectedBindGroup {
    let bindings = match pass {
        GiPass::Anchor => ANCHOR,
        GiPass::Downsample => DOWNSAMPLE,
        GiPass::SceneCapture => SCENE_CAPTURE,
        GiPass::VoxelRelight => VOXEL_RELIGHT,
        GiPass::ProbeTrace => PROBE_TRACE,
        GiPass::TemporalFilter => TEMPORAL_FILTER,
        GiPass::SpatialFilter => SPATIAL_FILTER,
        GiPass::Sh9Project => SH9_PROJECT,
        GiPass::Gather => GATHER,
        GiPass::Upsample => UPSAMPLE,
        GiPass::Combine => COMBINE,
    };
    ExpectedBindGroup { pipeline_name: pass.label(), group_index: 0, bindings }
}

/// Classifies a wgpu::BindGroupLayoutEntry into our ExpectedBindingType.
pub fn classify_entry(entry: &wgpu::BindGroupLayoutEntry) -> ExpectedBindingType {
    match &entry.ty {
        wgpu::BindingType::Buffer { ty, .. } => match ty {
            wgpu::BufferBindingType::Uniform => ExpectedBindingType::UniformBuffer,
            wgpu::BufferBindingType::Storage { read_only: true } => ExpectedBindingType::StorageBufferReadOnly,
            wgpu::BufferBindingType::Storage { read_only: false } => ExpectedBindingType::StorageBufferReadWrite,
        },
        wgpu::BindingType::Texture { view_dimension: wgpu::TextureViewDimension::D2Array, .. } => {
            ExpectedBindingType::Texture2dArray
        }
        wgpu::BindingType::StorageTexture { view_dimension: wgpu::TextureViewDimension::D2Array, .. } => {
            ExpectedBindingType::StorageTexture2dArray
        }
        wgpu::BindingType::Sampler(_) => ExpectedBindingType::Sampler,
        _ => ExpectedBindingType::Unsupported,
    }
}

/// One resource global found in a naga module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    pub group: u32,
    pub binding: u32,
    pub binding_type: ExpectedBindingType,
    pub name: String,
}

/// Resource bindings declared by a validated shader module, sorted by slot.
pub fn reflect_bindings(module: &naga::Module) -> Vec<ReflectedBinding> {
    let mut out: Vec<ReflectedBinding> = module
        .global_variables
        .iter()
        .filter_map(|(_, var)| {
            let slot = var.binding.as_ref()?;
            let binding_type = match var.space {
                naga::AddressSpace::Uniform => ExpectedBindingType::UniformBuffer,
                naga::AddressSpace::Storage { access } => {
                    if access.contains(naga::StorageAccess::STORE) {
                        ExpectedBindingType::StorageBufferReadWrite
                    } else {
                        ExpectedBindingType::StorageBufferReadOnly
                    }
                }
                naga::AddressSpace::Handle => match &module.types[var.ty].inner {
                    naga::TypeInner::Image { dim: naga::ImageDimension::D2, arrayed: true, class } => match class {
                        naga::ImageClass::Storage { .. } => ExpectedBindingType::StorageTexture2dArray,
                        naga::ImageClass::Sampled { .. } => ExpectedBindingType::Texture2dArray,
                        _ => ExpectedBindingType::Unsupported,
                    },
                    naga::TypeInner::Sampler { .. } => ExpectedBindingType::Sampler,
                    _ => ExpectedBindingType::Unsupported,
                },
                _ => ExpectedBindingType::Unsupported,
            };
            Some(ReflectedBinding {
                group: slot.group,
                binding: slot.binding,
                binding_type,
                name: var.name.clone().unwrap_or_default(),
            })
        })
        .collect();
    out.sort_by_key(|b| (b.group, b.binding));
    out
}

/// Validates actual bind group layout entries against expected bindings.
/// Returns the number of mismatches found.
pub fn validate_bind_group(expected: &ExpectedBindGroup, actual_entries: &[wgpu::BindGroupLayoutEntry]) -> u32 {
    let actual: Vec<(u32, ExpectedBindingType)> =
        actual_entries.iter().map(|e| (e.binding, classify_entry(e))).collect();
    compare(expected, &actual, "layout")
}

/// Validates the resource globals of a shader module against a table.
/// Returns the number of mismatches found.
pub fn validate_shader_bindings(expected: &ExpectedBindGroup, module: &naga::Module) -> u32 {
    let reflected = reflect_bindings(module);
    let mut mismatches = 0u32;
    for b in reflected.iter().filter(|b| b.group != expected.group_index) {
        log::warn!(
            "[BindingValidator] '{}' declares '{}' in unexpected group {}",
            expected.pipeline_name, b.name, b.group
        );
        mismatches += 1;
    }
    let actual: Vec<(u32, ExpectedBindingType)> = reflected
        .iter()
        .filter(|b| b.group == expected.group_index)
        .map(|b| (b.binding, b.binding_type))
        .collect();
    mismatches + compare(expected, &actual, "shader")
}

fn compare(expected: &ExpectedBindGroup, actual: &[(u32, ExpectedBindingType)], source: &str) -> u32 {
    let mut mismatches = 0u32;

    for exp in expected.bindings {
        match actual.iter().find(|(binding, _)| *binding == exp.binding) {
            None => {
                log::warn!(
                    "[BindingValidator] MISMATCH in '{}' group {} binding {}: expected {} ({}), {}: MISSING",
                    expected.pipeline_name, expected.group_index, exp.binding, exp.binding_type, exp.label, source
                );
                mismatches += 1;
            }
            Some((_, actual_type)) if *actual_type != exp.binding_type => {
                log::warn!(
                    "[BindingValidator] MISMATCH in '{}' group {} binding {}: expected {} ({}), {}: {}",
                    expected.pipeline_name, expected.group_index, exp.binding,
                    exp.binding_type, exp.label, source, actual_type
                );
                mismatches += 1;
            }
            Some(_) => {}
        }
    }

    for (binding, actual_type) in actual {
        if !expected.bindings.iter().any(|e| e.binding == *binding) {
            log::warn!(
                "[BindingValidator] EXTRA binding in '{}' group {} binding {}: {} type {} not in table",
                expected.pipeline_name, expected.group_index, binding, source, actual_type
            );
            mismatches += 1;
        }
    }

    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_have_unique_slots() {
        for pass in GiPass::ALL {
            let group = expected_bind_group(pass);
            let mut slots: Vec<u32> = group.bindings.iter().map(|b| b.binding).collect();
            slots.sort_unstable();
            slots.dedup();
            assert_eq!(slots.len(), group.bindings.len(), "{pass}");
        }
    }

    #[test]
    fn test_storage_buffers_fit_default_limits() {
        for pass in GiPass::ALL {
            let storage = expected_bind_group(pass)
                .bindings
                .iter()
                .filter(|b| matches!(b.binding_type, Ro | Rw))
                .count();
            assert!(storage <= 8, "{pass} binds {storage} storage buffers");
        }
    }

    #[test]
    fn test_world_block_declared_only_where_used() {
        for pass in GiPass::ALL {
            let has = expected_bind_group(pass).bindings.iter().any(|b| b.binding == 13);
            assert_eq!(has, pass.uses_world_uniforms(), "{pass}");
        }
    }

    #[test]
    fn test_layout_entries_round_trip_through_classifier() {
        for pass in GiPass::ALL {
            let group = expected_bind_group(pass);
            assert_eq!(validate_bind_group(&group, &group.layout_entries()), 0, "{pass}");
        }
    }

    #[test]
    fn test_missing_and_extra_bindings_are_counted() {
        let group = expected_bind_group(GiPass::Combine);
        let mut entries = group.layout_entries();
        entries.retain(|e| e.binding != 4);
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 9,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: Uniform.to_wgpu(),
            count: None,
        });
        assert_eq!(validate_bind_group(&group, &entries), 2);
    }

    #[test]
    fn test_type_mismatch_is_counted() {
        let group = expected_bind_group(GiPass::Downsample);
        let mut entries = group.layout_entries();
        entries[2].ty = Ro.to_wgpu();
        assert_eq!(validate_bind_group(&group, &entries), 1);
    }
}
