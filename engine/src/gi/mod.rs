//! GI Module
//!
//! CPU reference implementation of the probe GI pipeline, plus the data
//! types shared with the GPU path (work items, atlas texels, configuration).
//! Every pass here has a WGSL twin under `engine/shaders/` with identical
//! semantics; the GPU dispatchers live in [`crate::render`].

pub mod anchor;
pub mod atlas;
pub mod capture;
pub mod card_atlas;
pub mod card_builder;
pub mod combine;
pub mod config;
pub mod dda;
pub mod downsample;
pub mod gather;
pub mod image;
pub mod math;
pub mod occupancy;
pub mod page_table;
pub mod pipeline;
pub mod probe_grid;
pub mod probe_trace;
pub mod relight;
pub mod schedule;
pub mod sh9;
pub mod spatial;
pub mod temporal;
pub mod work_items;

pub use atlas::{AtlasPingPong, MetaAtlas, MetaTexel, ProbeAtlas, RadianceTexel};
pub use card_atlas::{CardAtlas, MaterialTexel};
pub use card_builder::{MeshCard, build_cards, virtual_page_index};
pub use config::{GatherSource, GiConfig};
pub use dda::{CounterSnapshot, DebugCounters, TraceOutcome, trace_ray};
pub use image::{CameraMatrices, ImagePlane};
pub use occupancy::{LightLuts, OccupancyCell, OccupancyVolume, VolumeWindow};
pub use page_table::{CardRebuild, PAGE_UNMAPPED, PageTable, SurfaceCacheWork, apply_card_rebuild, build_work_items};
pub use pipeline::{CpuGiPipeline, FrameInputs, FrameStats};
pub use probe_grid::{ProbeAnchor, ProbeAnchors, ProbeGridLayout};
pub use sh9::Sh9;
pub use work_items::{CaptureWorkItem, CardMeta, RelightWorkItem};
