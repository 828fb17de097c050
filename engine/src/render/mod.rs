//! GPU side of the GI pipeline
//!
//! Shader composition and validation, binding tables, compute pipelines,
//! buffers, dispatch recording and the frame driver.

pub mod binding_validator;
pub mod compute_pipelines;
pub mod frame_graph;
pub mod gi_dispatch;
pub mod gi_resources;
pub mod gpu_context;
pub mod gpu_pipeline;
pub mod resource_registry;
pub mod shader_loader;
pub mod uniforms;

pub use binding_validator::{ExpectedBindGroup, ExpectedBinding, ExpectedBindingType, expected_bind_group};
pub use compute_pipelines::{GiComputePipeline, GiComputePipelines};
pub use frame_graph::{FrameGraph, PassNode, ResourceClass};
pub use gi_dispatch::{DispatchSizes, record_frame, workgroups_for};
pub use gi_resources::GiResources;
pub use gpu_context::{GpuContext, GpuContextConfig};
pub use gpu_pipeline::GpuGiPipeline;
pub use resource_registry::{DisposeSender, DrainReport, GpuHandle, GpuResource, ResourceBackend, ResourceRegistry};
pub use shader_loader::{GiPass, ShaderLibrary, ShaderSource, create_shader_module, load_shader_file, validate_wgsl};
pub use uniforms::{FrameUniforms, GpuProbeAnchor, LightLutsUniform, WorldProbeUniforms};
