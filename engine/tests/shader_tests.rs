//! Shader Tests - WGSL composition, validation and binding reflection
//!
//! Every composed pass must parse and validate with naga, and its reflected
//! resource bindings must match the table the bind group layout is built from.

use voxel_gi_engine::render::binding_validator::{
    ExpectedBindingType, expected_bind_group, reflect_bindings, validate_shader_bindings,
};
use voxel_gi_engine::render::frame_graph::FrameGraph;
use voxel_gi_engine::render::shader_loader::{GiPass, compose, validate_wgsl};
use voxel_gi_engine::render::uniforms::{
    FRAME_UNIFORMS_SIZE, FrameUniforms, GPU_PROBE_ANCHOR_SIZE, GpuProbeAnchor, LIGHT_LUTS_UNIFORM_SIZE,
    LightLutsUniform, WORLD_PROBE_UNIFORMS_SIZE, WorldProbeUniforms,
};

#[test]
fn test_every_pass_validates() {
    for pass in GiPass::ALL {
        let source = compose(pass);
        if let Err(e) = validate_wgsl(pass.label(), &source) {
            panic!("{pass}: {e}");
        }
    }
}

#[test]
fn test_reflected_bindings_match_tables() {
    for pass in GiPass::ALL {
        let module = validate_wgsl(pass.label(), &compose(pass)).unwrap();
        let expected = expected_bind_group(pass);
        assert_eq!(validate_shader_bindings(&expected, &module), 0, "{pass}");
        assert_eq!(reflect_bindings(&module).len(), expected.bindings.len(), "{pass}");
    }
}

#[test]
fn test_world_uniforms_declared_where_tabled() {
    for pass in GiPass::ALL {
        let module = validate_wgsl(pass.label(), &compose(pass)).unwrap();
        let declares = reflect_bindings(&module).iter().any(|b| b.binding == 13);
        assert_eq!(declares, pass.uses_world_uniforms(), "{pass}");
    }
}

#[test]
fn test_sh_texture_is_storage_then_sampled() {
    let sh9 = expected_bind_group(GiPass::Sh9Project);
    let gather = expected_bind_group(GiPass::Gather);
    let ty = |g: &voxel_gi_engine::render::ExpectedBindGroup| {
        g.bindings.iter().find(|b| b.binding == 8).map(|b| b.binding_type)
    };
    assert_eq!(ty(&sh9), Some(ExpectedBindingType::StorageTexture2dArray));
    assert_eq!(ty(&gather), Some(ExpectedBindingType::Texture2dArray));
}

#[test]
fn test_frame_graph_is_hazard_free() {
    FrameGraph::gi_frame().validate().unwrap();
}

#[test]
fn test_uniform_layout_sizes() {
    assert_eq!(std::mem::size_of::<FrameUniforms>(), FRAME_UNIFORMS_SIZE);
    assert_eq!(std::mem::size_of::<WorldProbeUniforms>(), WORLD_PROBE_UNIFORMS_SIZE);
    assert_eq!(std::mem::size_of::<LightLutsUniform>(), LIGHT_LUTS_UNIFORM_SIZE);
    assert_eq!(std::mem::size_of::<GpuProbeAnchor>(), GPU_PROBE_ANCHOR_SIZE);
    for size in [FRAME_UNIFORMS_SIZE, WORLD_PROBE_UNIFORMS_SIZE, LIGHT_LUTS_UNIFORM_SIZE] {
        assert_eq!(size % 16, 0);
    }
}
