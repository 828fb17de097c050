//! Voxel GI Engine Library
//!
//! Screen-space probe global illumination over a voxel occupancy volume,
//! with a paged surface cache of mesh cards for secondary bounces.
//!
//! # Modules
//!
//! - [`gi`] - CPU reference passes, shared data types and configuration
//! - [`render`] - wgpu compute pipelines, resources and the GPU frame driver
//! - [`error`] - Error type shared by both paths
//!
//! # Example
//!
//! ```ignore
//! use voxel_gi_engine::{CpuGiPipeline, GiConfig};
//!
//! let mut gi = CpuGiPipeline::new(GiConfig::default(), 320, 180)?;
//! gi.rebuild_cards(&volume);
//! let stats = gi.render_frame(&inputs, &volume)?;
//! log::info!("{} valid probes", stats.valid_probes);
//! ```

pub mod error;
pub mod gi;
pub mod render;

pub use error::{GiError, GiResult};
pub use gi::{CpuGiPipeline, FrameInputs, FrameStats, GiConfig};
pub use render::{GpuContext, GpuContextConfig, GpuGiPipeline};
