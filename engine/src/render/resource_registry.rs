//! Deferred disposal of GPU objects
//!
//! The render thread owns every live GPU object in a [`ResourceRegistry`].
//! Other threads only hold [`DisposeSender`]s: a dispose request is a message
//! over an mpsc channel, never a graphics call. The registry drains the
//! channel once per tick on the render thread.
//!
//! Guarantees:
//! - a handle queued mid-frame stays valid until the next drain;
//! - each live handle is destroyed exactly once, so duplicate or stale
//!   requests are counted as ignored;
//! - draining an empty queue does nothing.
//!
//! The registry is `!Send`, so it cannot leave the thread that created it.

use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, Sender};

/// Generational handle to a registered GPU object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuHandle {
    index: u32,
    generation: u32,
}

/// Destroys GPU objects. Only ever called from [`ResourceRegistry::drain`].
pub trait ResourceBackend {
    type Resource;

    fn destroy(&mut self, resource: Self::Resource) -> Result<(), String>;
}

/// Outcome of one drain tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub deleted: u32,
    /// Duplicate, stale or unknown handles
    pub ignored: u32,
    pub errors: u32,
}

/// Clonable, thread-safe end of the dispose queue.
#[derive(Clone, Debug)]
pub struct DisposeSender {
    tx: Sender<GpuHandle>,
}

impl DisposeSender {
    /// Queue `handle` for destruction on the next drain. Returns false if the
    /// registry is gone (its resources were already released with it).
    pub fn dispose(&self, handle: GpuHandle) -> bool {
        self.tx.send(handle).is_ok()
    }
}

struct Slot<R> {
    generation: u32,
    resource: Option<R>,
}

/// Arena of live GPU objects owned by the render thread.
pub struct ResourceRegistry<B: ResourceBackend> {
    backend: B,
    slots: Vec<Slot<B::Resource>>,
    free: Vec<u32>,
    tx: Sender<GpuHandle>,
    rx: Receiver<GpuHandle>,
    _render_thread_only: PhantomData<*const ()>,
}

impl<B: ResourceBackend> ResourceRegistry<B> {
    pub fn new(backend: B) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { backend, slots: Vec::new(), free: Vec::new(), tx, rx, _render_thread_only: PhantomData }
    }

    pub fn insert(&mut self, resource: B::Resource) -> GpuHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.resource = Some(resource);
            return GpuHandle { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, resource: Some(resource) });
        GpuHandle { index, generation: 0 }
    }

    pub fn get(&self, handle: GpuHandle) -> Option<&B::Resource> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.resource.as_ref()
    }

    #[inline]
    pub fn contains(&self, handle: GpuHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.resource.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispose_sender(&self) -> DisposeSender {
        DisposeSender { tx: self.tx.clone() }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Process every queued request. Call once per tick on the render thread.
    pub fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();
        while let Ok(handle) = self.rx.try_recv() {
            let Some(resource) = self.take(handle) else {
                report.ignored += 1;
                continue;
            };
            match self.backend.destroy(resource) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    log::warn!("[ResourceRegistry] Failed to destroy {:?}: {}", handle, e);
                    report.errors += 1;
                }
            }
        }
        if report != DrainReport::default() {
            log::debug!(
                "[ResourceRegistry] Drained: {} deleted, {} ignored, {} errors",
                report.deleted, report.ignored, report.errors
            );
        }
        report
    }

    fn take(&mut self, handle: GpuHandle) -> Option<B::Resource> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let resource = slot.resource.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(resource)
    }
}

/// GPU objects the GI pipeline retires.
#[derive(Debug)]
pub enum GpuResource {
    Buffer(wgpu::Buffer),
    Texture(wgpu::Texture),
}

/// Backend that releases wgpu memory immediately.
#[derive(Debug, Default)]
pub struct WgpuBackend;

impl ResourceBackend for WgpuBackend {
    type Resource = GpuResource;

    fn destroy(&mut self, resource: GpuResource) -> Result<(), String> {
        match resource {
            GpuResource::Buffer(buffer) => buffer.destroy(),
            GpuResource::Texture(texture) => texture.destroy(),
        }
        Ok(())
    }
}
