//! Compute Pipeline Infrastructure
//!
//! Creates and holds the eleven GI compute pipelines, one bind group layout
//! each (group 0 only). Layouts come from the binding tables in
//! [`super::binding_validator`]; each composed shader is naga-validated and
//! its reflected bindings are checked against the same table before the
//! pipeline is created.

use super::binding_validator::{expected_bind_group, validate_bind_group, validate_shader_bindings};
use super::shader_loader::{GiPass, ShaderLibrary, create_shader_module};
use crate::error::GiResult;

/// Pipeline and bind group layout for one pass.
pub struct GiComputePipeline {
    pub pass: GiPass,
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

/// Holds all GI compute pipelines, indexed by [`GiPass`].
pub struct GiComputePipelines {
    pipelines: Vec<GiComputePipeline>,
    /// Total binding mismatches found while building (0 when consistent)
    pub binding_mismatches: u32,
}

impl GiComputePipelines {
    /// Create every pipeline from the embedded shaders.
    pub fn new(device: &wgpu::Device) -> GiResult<Self> {
        Self::from_library(device, &ShaderLibrary::embedded())
    }

    /// Create every pipeline from `library`.
    ///
    /// Fails fast with [`crate::error::GiError::ShaderCompile`] on the first
    /// shader that does not parse or validate.
    pub fn from_library(device: &wgpu::Device, library: &ShaderLibrary) -> GiResult<Self> {
        let mut pipelines = Vec::with_capacity(GiPass::ALL.len());
        let mut binding_mismatches = 0u32;

        for pass in GiPass::ALL {
            let label = pass.label();
            let source = library.compose(pass);
            let (module, naga_module) = create_shader_module(device, label, &source)?;

            let expected = expected_bind_group(pass);
            let entries = expected.layout_entries();
            binding_mismatches += validate_shader_bindings(&expected, &naga_module);
            binding_mismatches += validate_bind_group(&expected, &entries);

            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label}_bind_group_layout")),
                entries: &entries,
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{label}_pipeline_layout")),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{label}_pipeline")),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

            pipelines.push(GiComputePipeline { pass, pipeline, bind_group_layout });
        }

        if binding_mismatches > 0 {
            log::warn!("[GiComputePipelines] {} binding mismatch(es) detected!", binding_mismatches);
        } else {
            log::info!("[GiComputePipelines] Created {} compute pipelines, bindings validated OK", pipelines.len());
        }

        Ok(Self { pipelines, binding_mismatches })
    }

    pub fn get(&self, pass: GiPass) -> &GiComputePipeline {
        // `GiPass::ALL` follows declaration order
        &self.pipelines[pass as usize]
    }

    pub fn pipeline(&self, pass: GiPass) -> &wgpu::ComputePipeline {
        &self.get(pass).pipeline
    }

    pub fn layout(&self, pass: GiPass) -> &wgpu::BindGroupLayout {
        &self.get(pass).bind_group_layout
    }
}
