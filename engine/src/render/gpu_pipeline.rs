//! GPU GI pipeline
//!
//! Drives the compute passes for one frame. Host-side bookkeeping (mesh
//! cards, the page table, work item lists) is shared with the CPU reference;
//! everything per-pixel and per-probe runs on the device.
//!
//! Frame sequence:
//! 1. drain deferred disposals;
//! 2. upload G-buffer, occupancy, work items and uniforms;
//! 3. record and submit every pass in frame graph order;
//! 4. swap the temporal history slot and evict idle pages.

use super::compute_pipelines::GiComputePipelines;
use super::frame_graph::FrameGraph;
use super::gi_dispatch::record_frame;
use super::gi_resources::GiResources;
use super::gpu_context::GpuContext;
use super::resource_registry::{DisposeSender, DrainReport, ResourceRegistry, WgpuBackend};
use super::uniforms::{FrameUniforms, LightLutsUniform, WorldProbeUniforms};
use crate::error::GiResult;
use crate::gi::card_builder::{FACES_PER_CHUNK, MeshCard, build_cards};
use crate::gi::config::GiConfig;
use crate::gi::occupancy::{LightLuts, OccupancyVolume};
use crate::gi::page_table::{PageTable, apply_card_rebuild, build_work_items};
use crate::gi::pipeline::{FrameInputs, FrameStats};
use crate::gi::probe_grid::ProbeGridLayout;

/// Hardware implementation of the GI frame.
pub struct GpuGiPipeline {
    ctx: GpuContext,
    config: GiConfig,
    pipelines: GiComputePipelines,
    resources: GiResources,
    registry: ResourceRegistry<WgpuBackend>,
    luts: LightLuts,
    cards: Vec<MeshCard>,
    cards_built: bool,
    page_table: PageTable,
    frame_index: u32,
    last_drain: DrainReport,
}

impl GpuGiPipeline {
    /// Build pipelines and resources. Fails on the first shader that does
    /// not compile, or if the pass order has a hazard.
    pub fn new(ctx: GpuContext, config: GiConfig, width: u32, height: u32) -> GiResult<Self> {
        config.validate()?;
        FrameGraph::gi_frame().validate()?;

        let pipelines = GiComputePipelines::new(&ctx.device)?;
        if pipelines.binding_mismatches > 0 {
            log::warn!(
                "[GpuGiPipeline] {} binding mismatches between shaders and layouts",
                pipelines.binding_mismatches
            );
        }
        let resources = GiResources::new(&ctx, &config, width, height)?;

        Ok(Self {
            luts: LightLuts::default().with_sun_color(config.sun_color),
            page_table: PageTable::new(0, config.max_physical_pages, config.page_size),
            registry: ResourceRegistry::new(WgpuBackend),
            cards: Vec::new(),
            cards_built: false,
            frame_index: 0,
            last_drain: DrainReport::default(),
            ctx,
            config,
            pipelines,
            resources,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn config(&self) -> &GiConfig {
        &self.config
    }

    pub fn layout(&self) -> &ProbeGridLayout {
        &self.resources.layout
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn resources(&self) -> &GiResources {
        &self.resources
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn luts_mut(&mut self) -> &mut LightLuts {
        &mut self.luts
    }

    /// Queue end for GPU objects released from other threads.
    pub fn dispose_sender(&self) -> DisposeSender {
        self.registry.dispose_sender()
    }

    /// Result of the drain at the start of the last frame.
    pub fn last_drain(&self) -> DrainReport {
        self.last_drain
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Reallocate screen and probe buffers. The old ones are destroyed at the
    /// start of the next frame.
    pub fn resize(&mut self, width: u32, height: u32) -> GiResult<()> {
        let retired = self.resources.resize(&self.ctx, &self.config, width, height)?;
        let sender = self.registry.dispose_sender();
        for resource in retired {
            let handle = self.registry.insert(resource);
            sender.dispose(handle);
        }
        Ok(())
    }

    /// Rebuild mesh cards after the occupancy volume changed.
    pub fn rebuild_cards(&mut self, volume: &OccupancyVolume) {
        let virtual_pages = volume.window().chunk_count() * FACES_PER_CHUNK;
        if virtual_pages != self.page_table.virtual_pages() {
            self.page_table.resize_virtual(virtual_pages);
        }
        let cards = build_cards(volume);
        let rebuild = apply_card_rebuild(&mut self.page_table, &self.cards, &cards);
        self.cards = cards;
        self.cards_built = true;
        log::info!(
            "[GpuGiPipeline] {} mesh cards over {} virtual pages ({} recaptured, {} unmapped)",
            self.cards.len(),
            virtual_pages,
            rebuild.dirtied,
            rebuild.unmapped
        );
    }

    /// Upload, record and submit one frame. Counters are read back only when
    /// debug counters are on.
    pub fn render_frame(&mut self, inputs: &FrameInputs, volume: &OccupancyVolume) -> GiResult<FrameStats> {
        self.last_drain = self.registry.drain();

        let frame = self.frame_index;
        let mut stats = FrameStats { frame_index: frame, ..Default::default() };
        let layout = self.resources.layout;

        self.resources.upload_gbuffer(&self.ctx, inputs)?;
        if self.config.enabled {
            if !self.cards_built {
                self.rebuild_cards(volume);
            }
            self.page_table.begin_frame(frame as u64);
            let work = build_work_items(&mut self.page_table, &self.cards);
            let card_meta = self.page_table.gpu_card_meta(&self.cards);
            let directory = self.page_table.gpu_table();

            self.resources.upload_volume(&self.ctx, volume);
            self.resources.upload_surface_work(&self.ctx, &work, &card_meta, &directory);
            stats.captured_pages = work.capture.len() as u32;
        }

        let frame_uniforms = FrameUniforms::new(&inputs.camera, &layout, frame, &self.config);
        let world_uniforms = WorldProbeUniforms::new(
            &self.config,
            &layout,
            volume.window(),
            self.resources.capture_count(),
            self.resources.relight_count(),
        );
        self.resources.upload_uniforms(&self.ctx, &frame_uniforms, &world_uniforms, &LightLutsUniform::from(&self.luts));

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("gi_frame_encoder"),
        });
        let recorded = record_frame(&mut encoder, &self.ctx.device, &self.pipelines, &self.resources, self.config.enabled);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        if self.config.enabled {
            self.resources.swap_history();
            self.page_table.evict_stale(self.config.max_idle_frames);
            stats.pages = self.page_table.stats();
            if self.config.debug_counters {
                stats.counters = self.resources.read_counters(&self.ctx)?;
            }
        }
        self.frame_index = frame.wrapping_add(1);

        log::debug!("[GpuGiPipeline] Frame {}: {} passes, {} pages captured", frame, recorded, stats.captured_pages);
        Ok(stats)
    }
}
