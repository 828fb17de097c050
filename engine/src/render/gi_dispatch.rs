//! GI compute dispatch
//!
//! Records the GI passes into a command encoder. Each pass gets its own bind
//! group (built against the layout from its binding table) and its own
//! compute pass, in frame graph order:
//!
//! ```text
//! anchor → downsample → capture → relight → probe trace → temporal
//!        → spatial → SH9 → gather → upsample → combine
//! ```
//!
//! Workgroup counts:
//! - screen passes use 8×8 tiles over their target resolution;
//! - anchor uses 8×8 tiles over the probe grid;
//! - capture/relight/probe trace run one 64-wide workgroup per item or probe;
//! - temporal/spatial run one thread per atlas texel;
//! - SH9 runs one thread per probe.
//!
//! Counts above 65535 per dimension are folded into a 2D grid; the shaders
//! linearize `workgroup_id` and discard the overhang.

use super::compute_pipelines::GiComputePipelines;
use super::gi_resources::GiResources;
use super::shader_loader::GiPass;

/// Screen and probe tiles.
pub const TILE_WORKGROUP: u32 = 8;
/// Threads per workgroup of the 1D passes.
pub const LINEAR_WORKGROUP: u32 = 64;
/// Per-dimension dispatch limit of `wgpu::Limits::default()`.
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

/// Problem sizes the workgroup counts depend on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSizes {
    pub full: (u32, u32),
    pub half: (u32, u32),
    pub grid: (u32, u32),
    pub probe_count: u32,
    pub atlas_texels: u32,
    pub capture_items: u32,
    pub relight_items: u32,
}

impl DispatchSizes {
    pub fn from_resources(res: &GiResources) -> Self {
        let layout = &res.layout;
        Self {
            full: (layout.width, layout.height),
            half: layout.half_resolution(),
            grid: (layout.grid_x, layout.grid_y),
            probe_count: layout.probe_count(),
            atlas_texels: layout.atlas_texels() as u32,
            capture_items: res.capture_count(),
            relight_items: res.relight_count(),
        }
    }
}

/// `(x, y, 1)` covering `groups` workgroups within the per-dimension limit.
pub fn folded_workgroups(groups: u32) -> [u32; 3] {
    if groups == 0 {
        return [0, 1, 1];
    }
    let x = groups.min(MAX_WORKGROUPS_PER_DIMENSION);
    [x, groups.div_ceil(x), 1]
}

fn tiles(size: (u32, u32)) -> [u32; 3] {
    [size.0.div_ceil(TILE_WORKGROUP), size.1.div_ceil(TILE_WORKGROUP), 1]
}

/// Workgroup count of `pass`. A zero in any dimension means "skip".
pub fn workgroups_for(pass: GiPass, sizes: &DispatchSizes) -> [u32; 3] {
    match pass {
        GiPass::Anchor => tiles(sizes.grid),
        GiPass::Downsample | GiPass::Gather => tiles(sizes.half),
        GiPass::Upsample | GiPass::Combine => tiles(sizes.full),
        GiPass::SceneCapture => folded_workgroups(sizes.capture_items),
        GiPass::VoxelRelight => folded_workgroups(sizes.relight_items),
        GiPass::ProbeTrace => folded_workgroups(sizes.probe_count),
        GiPass::TemporalFilter | GiPass::SpatialFilter => {
            folded_workgroups(sizes.atlas_texels.div_ceil(LINEAR_WORKGROUP))
        }
        GiPass::Sh9Project => [sizes.probe_count.div_ceil(LINEAR_WORKGROUP), 1, 1],
    }
}

/// Passes recorded for a frame: everything when enabled, combine only when not.
pub fn frame_passes(enabled: bool) -> &'static [GiPass] {
    if enabled { &GiPass::ALL } else { &[GiPass::Combine] }
}

/// Bind group of `pass` over the current resources.
pub fn create_bind_group(
    device: &wgpu::Device,
    pipelines: &GiComputePipelines,
    res: &GiResources,
    pass: GiPass,
) -> wgpu::BindGroup {
    let s = &res.screen;
    let p = &res.probes;
    let c = &res.surface;
    let u = &res.uniforms;

    let buffers: Vec<(u32, &wgpu::Buffer)> = match pass {
        // probe_anchor.wgsl
        GiPass::Anchor => vec![(0, &s.depth), (1, &s.normals), (2, &p.anchors), (12, &u.frame), (13, &u.world)],
        // downsample.wgsl
        GiPass::Downsample => {
            vec![(0, &s.depth), (1, &s.normals), (2, &s.half_depth), (3, &s.half_normals), (12, &u.frame)]
        }
        // scene_capture.wgsl
        GiPass::SceneCapture => vec![
            (0, &c.capture_items),
            (1, &c.card_meta),
            (2, &c.triangles),
            (3, &c.card_depth),
            (4, &c.card_material),
            (5, &c.card_radiance),
            (13, &u.world),
        ],
        // voxel_relight.wgsl
        GiPass::VoxelRelight => vec![
            (0, &c.relight_items),
            (1, &c.card_meta),
            (2, &c.card_depth),
            (3, &c.card_material),
            (4, &c.card_radiance),
            (5, &c.occupancy),
            (6, &c.counters),
            (12, &u.frame),
            (13, &u.world),
            (14, &u.luts),
        ],
        // probe_trace.wgsl
        GiPass::ProbeTrace => vec![
            (0, &p.anchors),
            (1, &c.occupancy),
            (2, &c.page_directory),
            (3, &c.card_meta),
            (4, &c.card_radiance),
            (5, &p.trace_atlas),
            (6, &p.meta_atlas),
            (7, &c.counters),
            (12, &u.frame),
            (13, &u.world),
            (14, &u.luts),
        ],
        // temporal_filter.wgsl
        GiPass::TemporalFilter => vec![
            (0, &p.anchors),
            (1, &p.trace_atlas),
            (2, res.history_atlas()),
            (3, res.filtered_atlas()),
            (12, &u.frame),
            (13, &u.world),
        ],
        // spatial_filter.wgsl
        GiPass::SpatialFilter => vec![
            (0, &p.anchors),
            (1, res.filtered_atlas()),
            (2, &p.meta_atlas),
            (3, &p.spatial_atlas),
            (13, &u.world),
        ],
        // sh9_project.wgsl, plus the storage view at 8
        GiPass::Sh9Project => {
            vec![(0, &p.spatial_atlas), (1, &p.meta_atlas), (2, &p.anchors), (3, &p.sh_table), (13, &u.world)]
        }
        // gather.wgsl, plus the sampled view at 8
        GiPass::Gather => vec![
            (0, &s.half_depth),
            (1, &s.half_normals),
            (2, &p.anchors),
            (3, &p.spatial_atlas),
            (4, &s.half_indirect),
            (12, &u.frame),
            (13, &u.world),
        ],
        // upsample.wgsl
        GiPass::Upsample => vec![
            (0, &s.half_indirect),
            (1, &s.half_depth),
            (2, &s.half_normals),
            (3, &s.depth),
            (4, &s.normals),
            (5, &s.indirect),
            (12, &u.frame),
        ],
        // combine.wgsl
        GiPass::Combine => vec![
            (0, &s.direct),
            (1, &s.indirect),
            (2, &s.albedo_metallic),
            (3, &s.depth),
            (4, &s.combined),
            (12, &u.frame),
        ],
    };

    let mut entries: Vec<wgpu::BindGroupEntry> = buffers
        .into_iter()
        .map(|(binding, buffer)| wgpu::BindGroupEntry { binding, resource: buffer.as_entire_binding() })
        .collect();
    match pass {
        GiPass::Sh9Project => entries.push(wgpu::BindGroupEntry {
            binding: 8,
            resource: wgpu::BindingResource::TextureView(&p.sh_storage_view),
        }),
        GiPass::Gather => entries.push(wgpu::BindGroupEntry {
            binding: 8,
            resource: wgpu::BindingResource::TextureView(&p.sh_sampled_view),
        }),
        _ => {}
    }

    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{}_bind_group", pass.label())),
        layout: pipelines.layout(pass),
        entries: &entries,
    })
}

/// Record one pass. Returns false when its workgroup count is zero.
pub fn dispatch_pass(
    encoder: &mut wgpu::CommandEncoder,
    device: &wgpu::Device,
    pipelines: &GiComputePipelines,
    res: &GiResources,
    pass: GiPass,
) -> bool {
    let [x, y, z] = workgroups_for(pass, &DispatchSizes::from_resources(res));
    if x == 0 || y == 0 || z == 0 {
        return false;
    }
    let bind_group = create_bind_group(device, pipelines, res, pass);
    let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(pass.label()),
        timestamp_writes: None,
    });
    compute.set_pipeline(pipelines.pipeline(pass));
    compute.set_bind_group(0, &bind_group, &[]);
    compute.dispatch_workgroups(x, y, z);
    true
}

/// Record a whole frame. Returns the number of passes dispatched.
pub fn record_frame(
    encoder: &mut wgpu::CommandEncoder,
    device: &wgpu::Device,
    pipelines: &GiComputePipelines,
    res: &GiResources,
    enabled: bool,
) -> u32 {
    let mut recorded = 0;
    for &pass in frame_passes(enabled) {
        if dispatch_pass(encoder, device, pipelines, res, pass) {
            recorded += 1;
        } else {
            log::trace!("[GiDispatch] Skipped '{}' (no work)", pass);
        }
    }
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes_1080p() -> DispatchSizes {
        DispatchSizes {
            full: (1920, 1080),
            half: (960, 540),
            grid: (240, 135),
            probe_count: 240 * 135,
            atlas_texels: 240 * 135 * 64,
            capture_items: 3,
            relight_items: 70_000,
        }
    }

    #[test]
    fn test_screen_tiles_round_up() {
        let s = sizes_1080p();
        assert_eq!(workgroups_for(GiPass::Combine, &s), [240, 135, 1]);
        assert_eq!(workgroups_for(GiPass::Gather, &s), [120, 68, 1]);
        assert_eq!(workgroups_for(GiPass::Anchor, &s), [30, 17, 1]);
    }

    #[test]
    fn test_item_passes_one_group_per_item() {
        let s = sizes_1080p();
        assert_eq!(workgroups_for(GiPass::SceneCapture, &s), [3, 1, 1]);
        assert_eq!(workgroups_for(GiPass::ProbeTrace, &s), [32_400, 1, 1]);
    }

    #[test]
    fn test_large_dispatch_is_folded() {
        let s = sizes_1080p();
        let [x, y, z] = workgroups_for(GiPass::VoxelRelight, &s);
        assert_eq!((x, y, z), (MAX_WORKGROUPS_PER_DIMENSION, 2, 1));
        assert!(x * y >= 70_000);
        let [tx, ty, _] = workgroups_for(GiPass::TemporalFilter, &s);
        assert!(tx as u64 * ty as u64 * LINEAR_WORKGROUP as u64 >= s.atlas_texels as u64);
    }

    #[test]
    fn test_empty_work_is_skipped() {
        let s = DispatchSizes { capture_items: 0, ..sizes_1080p() };
        assert_eq!(workgroups_for(GiPass::SceneCapture, &s)[0], 0);
    }

    #[test]
    fn test_disabled_frame_only_combines() {
        assert_eq!(frame_passes(false), &[GiPass::Combine]);
        assert_eq!(frame_passes(true).len(), GiPass::ALL.len());
    }
}
