//! Dispose Tests - Cross-thread GPU object release
//!
//! Worker threads may only enqueue disposals. The owning thread performs every
//! destroy call during its drain tick.

use std::sync::mpsc;
use std::thread::{self, ThreadId};

use voxel_gi_engine::render::resource_registry::{DrainReport, ResourceBackend, ResourceRegistry};

/// Backend that records the thread of every destroy call.
#[derive(Default)]
struct RecordingBackend {
    calls: Vec<(String, ThreadId)>,
}

impl ResourceBackend for RecordingBackend {
    type Resource = String;

    fn destroy(&mut self, resource: String) -> Result<(), String> {
        self.calls.push((resource, thread::current().id()));
        Ok(())
    }
}

#[test]
fn test_worker_dispose_runs_on_render_thread() {
    let render_thread = thread::current().id();
    let mut registry = ResourceRegistry::new(RecordingBackend::default());
    let handle = registry.insert("probe_atlas".to_string());
    let sender = registry.dispose_sender();

    let worker = thread::spawn(move || {
        sender.dispose(handle);
        thread::current().id()
    });
    let worker_thread = worker.join().unwrap();

    assert!(registry.backend().calls.is_empty(), "no destroy before the drain");
    assert!(registry.contains(handle));

    let report = registry.drain();
    assert_eq!(report, DrainReport { deleted: 1, ignored: 0, errors: 0 });
    assert!(!registry.contains(handle));

    let calls = &registry.backend().calls;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, render_thread);
    assert_ne!(calls[0].1, worker_thread);
}

#[test]
fn test_drain_is_idempotent() {
    let mut registry = ResourceRegistry::new(RecordingBackend::default());
    let handle = registry.insert("sh_probes".to_string());
    let sender = registry.dispose_sender();

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        sender.dispose(handle);
        sender.dispose(handle);
        done_tx.send(()).unwrap();
    });
    done_rx.recv().unwrap();

    let first = registry.drain();
    assert_eq!(first.deleted, 1);
    assert_eq!(first.ignored, 1);
    assert_eq!(registry.drain(), DrainReport::default());
    assert_eq!(registry.backend().calls.len(), 1);
}

#[test]
fn test_sender_outliving_registry_reports_failure() {
    let mut registry = ResourceRegistry::new(RecordingBackend::default());
    let handle = registry.insert("trace_atlas".to_string());
    let sender = registry.dispose_sender();
    drop(registry);
    assert!(!sender.dispose(handle));
}
