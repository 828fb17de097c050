//! Frame graph of the GI passes
//!
//! Derives per-pass read/write sets from the binding tables and checks that a
//! recording order is hazard-free before any command is encoded:
//!
//! - a resource uploaded by the host is never written by a pass;
//! - a transient resource has exactly one producer per frame, and every pass
//!   that reads it runs after that producer.
//!
//! Persistent resources (surface cache pages, the trace and meta atlases,
//! temporal history, debug counters) carry data between frames and may be
//! read before they are written in a given frame. Each pass is recorded as its
//! own compute pass, so wgpu inserts the memory barriers between them.

use std::collections::HashMap;

use super::binding_validator::{ExpectedBindingType, expected_bind_group};
use super::shader_loader::GiPass;
use crate::error::{GiError, GiResult};

/// Lifetime class of a bound resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceClass {
    /// Written by the host before the frame is recorded
    Upload,
    /// Keeps its contents across frames
    Persistent,
    /// Produced and consumed within one frame
    Transient,
}

/// Classify a resource by its binding label.
pub fn resource_class(name: &str) -> ResourceClass {
    match name {
        "DepthBuffer" | "NormalBuffer" | "AlbedoMetallic" | "DirectLighting" | "CaptureWorkItems"
        | "RelightWorkItems" | "Triangles" | "CardMeta" | "PageDirectory" | "Occupancy"
        | "Sh9ProjectionTable" | "FrameUniforms" | "WorldProbeUniforms" | "LightLuts" => ResourceClass::Upload,
        "CardDepth" | "CardMaterial" | "CardRadiance" | "TraceAtlas" | "MetaAtlas" | "HistoryAtlas"
        | "DebugCounters" => ResourceClass::Persistent,
        _ => ResourceClass::Transient,
    }
}

/// Resources one pass reads and writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassNode {
    pub pass: GiPass,
    pub reads: Vec<&'static str>,
    pub writes: Vec<&'static str>,
}

impl PassNode {
    /// Build from the pass's binding table. Read-write bindings count as
    /// writes, and as reads too when the resource is persistent.
    pub fn from_bindings(pass: GiPass) -> Self {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        for b in expected_bind_group(pass).bindings {
            match b.binding_type {
                ExpectedBindingType::StorageBufferReadWrite | ExpectedBindingType::StorageTexture2dArray => {
                    writes.push(b.label);
                    if resource_class(b.label) == ResourceClass::Persistent {
                        reads.push(b.label);
                    }
                }
                _ => reads.push(b.label),
            }
        }
        Self { pass, reads, writes }
    }
}

/// Ordered list of passes for one frame.
#[derive(Clone, Debug)]
pub struct FrameGraph {
    nodes: Vec<PassNode>,
}

impl FrameGraph {
    pub fn new(order: &[GiPass]) -> Self {
        Self { nodes: order.iter().map(|&p| PassNode::from_bindings(p)).collect() }
    }

    /// The full GI frame in recording order.
    pub fn gi_frame() -> Self {
        Self::new(&GiPass::ALL)
    }

    pub fn nodes(&self) -> &[PassNode] {
        &self.nodes
    }

    /// Check the order for hazards. The error names the first offending pass.
    pub fn validate(&self) -> GiResult<()> {
        let mut producer: HashMap<&'static str, GiPass> = HashMap::new();

        for node in &self.nodes {
            for &name in &node.reads {
                if resource_class(name) == ResourceClass::Transient && !producer.contains_key(name) {
                    return Err(GiError::resource(format!(
                        "pass '{}' reads '{}' before any pass produces it",
                        node.pass, name
                    )));
                }
            }
            for &name in &node.writes {
                match resource_class(name) {
                    ResourceClass::Upload => {
                        return Err(GiError::resource(format!(
                            "pass '{}' writes host-uploaded resource '{}'",
                            node.pass, name
                        )));
                    }
                    ResourceClass::Transient => {
                        if let Some(previous) = producer.insert(name, node.pass) {
                            return Err(GiError::resource(format!(
                                "'{}' is produced by both '{}' and '{}'",
                                name, previous, node.pass
                            )));
                        }
                    }
                    ResourceClass::Persistent => {
                        producer.insert(name, node.pass);
                    }
                }
            }
        }
        log::debug!("[FrameGraph] {} passes validated", self.nodes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gi_frame_order_is_valid() {
        FrameGraph::gi_frame().validate().unwrap();
    }

    #[test]
    fn test_gather_before_sh9_is_rejected() {
        let mut order = GiPass::ALL.to_vec();
        let sh9 = order.iter().position(|&p| p == GiPass::Sh9Project).unwrap();
        let gather = order.iter().position(|&p| p == GiPass::Gather).unwrap();
        order.swap(sh9, gather);
        let err = FrameGraph::new(&order).validate().unwrap_err();
        assert!(err.to_string().contains("ShProbes"), "{err}");
    }

    #[test]
    fn test_combine_without_upsample_is_rejected() {
        let order: Vec<GiPass> = GiPass::ALL.iter().copied().filter(|&p| p != GiPass::Upsample).collect();
        assert!(FrameGraph::new(&order).validate().is_err());
    }

    #[test]
    fn test_duplicate_producer_is_rejected() {
        let order = [GiPass::Anchor, GiPass::Anchor];
        assert!(FrameGraph::new(&order).validate().is_err());
    }

    #[test]
    fn test_relight_reads_persistent_cache_without_capture() {
        // Frames with no capture work skip the capture pass
        let order: Vec<GiPass> = GiPass::ALL.iter().copied().filter(|&p| p != GiPass::SceneCapture).collect();
        FrameGraph::new(&order).validate().unwrap();
    }

    #[test]
    fn test_temporal_reads_history_and_writes_filtered() {
        let node = PassNode::from_bindings(GiPass::TemporalFilter);
        assert!(node.reads.contains(&"HistoryAtlas"));
        assert!(node.reads.contains(&"TraceAtlas"));
        assert_eq!(node.writes, vec!["FilteredAtlas"]);
    }

    #[test]
    fn test_every_binding_is_classified_consistently() {
        for node in FrameGraph::gi_frame().nodes() {
            for name in node.writes.iter() {
                assert_ne!(resource_class(name), ResourceClass::Upload, "{} writes {}", node.pass, name);
            }
        }
    }
}
