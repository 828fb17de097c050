//! Virtual → physical page table for the surface cache.
//!
//! Virtual pages are card slots (`chunk_slot * 6 + face`); physical pages are
//! fixed `page_size²` tiles of the card atlas. The pool never grows.
//!
//! # Aliasing rule
//!
//! A released physical page is quarantined with the frame it was released on
//! and only returns to the free list at a `begin_frame` for a strictly later
//! frame. Passes recorded this frame that still reference the old occupant
//! therefore never see the page handed to a different card.
//!
//! # Example
//!
//! ```ignore
//! let mut table = PageTable::new(virtual_pages, 256, 16);
//! table.begin_frame(frame);
//! for card in &cards {
//!     if let Some(mapping) = table.map(card.virtual_page_index) {
//!         if mapping.fresh { /* queue capture */ }
//!     }
//! }
//! table.evict_stale(config.max_idle_frames);
//! ```

use super::card_builder::MeshCard;
use super::work_items::{CaptureWorkItem, CardMeta, RelightWorkItem};
use crate::error::{GiError, GiResult};

/// Marker for unmapped entries in the GPU page table.
pub const PAGE_UNMAPPED: u32 = 0xFFFF_FFFF;

/// Result of [`PageTable::map`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageMapping {
    pub physical_page: u32,
    /// Newly allocated this call; contents are undefined until captured
    pub fresh: bool,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    physical_page: u32,
    last_used_frame: u64,
    dirty: bool,
}

/// Allocation counters for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageTableStats {
    pub resident: u32,
    pub free: u32,
    pub quarantined: u32,
    /// `map` calls deferred because the pool was empty (this frame)
    pub deferred: u32,
}

#[derive(Debug)]
pub struct PageTable {
    page_size: u32,
    capacity: u32,
    entries: Vec<Option<Entry>>,
    owners: Vec<Option<u32>>,
    /// Free physical pages, popped from the back (lowest id last pushed)
    free: Vec<u32>,
    quarantine: Vec<(u32, u64)>,
    frame: u64,
    deferred: u32,
}

impl PageTable {
    pub fn new(virtual_pages: u32, capacity: u32, page_size: u32) -> Self {
        log::info!(
            "[PageTable] {} physical pages of {}x{} texels, {} virtual pages",
            capacity, page_size, page_size, virtual_pages
        );
        Self {
            page_size,
            capacity,
            entries: vec![None; virtual_pages as usize],
            owners: vec![None; capacity as usize],
            free: (0..capacity).rev().collect(),
            quarantine: Vec::new(),
            frame: 0,
            deferred: 0,
        }
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn virtual_pages(&self) -> u32 {
        self.entries.len() as u32
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Start a new frame, returning pages quarantined on earlier frames to
    /// the free list.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        self.deferred = 0;
        let mut released = 0;
        let free = &mut self.free;
        self.quarantine.retain(|&(page, released_on)| {
            if released_on < frame {
                free.push(page);
                released += 1;
                false
            } else {
                true
            }
        });
        if released > 0 {
            // Keep allocation order deterministic: lowest id first.
            self.free.sort_unstable_by(|a, b| b.cmp(a));
            log::debug!("[PageTable] Frame {}: {} pages left quarantine", frame, released);
        }
    }

    /// Map a virtual page, allocating a physical page if needed.
    ///
    /// Returns `None` when the pool is exhausted; the caller retries on a
    /// later frame.
    pub fn map(&mut self, virtual_page: u32) -> Option<PageMapping> {
        let frame = self.frame;
        let slot = self.entries.get_mut(virtual_page as usize)?;
        if let Some(entry) = slot {
            entry.last_used_frame = frame;
            return Some(PageMapping { physical_page: entry.physical_page, fresh: false });
        }
        let Some(page) = self.free.pop() else {
            self.deferred += 1;
            if self.deferred == 1 {
                log::warn!(
                    "[PageTable] Physical page pool exhausted ({} pages), deferring mappings",
                    self.capacity
                );
            }
            return None;
        };
        *slot = Some(Entry { physical_page: page, last_used_frame: frame, dirty: true });
        self.owners[page as usize] = Some(virtual_page);
        Some(PageMapping { physical_page: page, fresh: true })
    }

    /// Release a virtual page into quarantine. Returns the physical page.
    pub fn unmap(&mut self, virtual_page: u32) -> Option<u32> {
        let entry = self.entries.get_mut(virtual_page as usize)?.take()?;
        self.owners[entry.physical_page as usize] = None;
        self.quarantine.push((entry.physical_page, self.frame));
        Some(entry.physical_page)
    }

    /// Unmap every virtual page idle for more than `max_idle_frames`.
    pub fn evict_stale(&mut self, max_idle_frames: u64) -> Vec<u32> {
        let frame = self.frame;
        let stale: Vec<u32> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                let e = e.as_ref()?;
                (frame.saturating_sub(e.last_used_frame) > max_idle_frames).then_some(i as u32)
            })
            .collect();
        for &v in &stale {
            self.unmap(v);
        }
        if !stale.is_empty() {
            log::debug!("[PageTable] Evicted {} stale pages", stale.len());
        }
        stale
    }

    /// Request a recapture of a resident page.
    pub fn mark_dirty(&mut self, virtual_page: u32) {
        if let Some(Some(entry)) = self.entries.get_mut(virtual_page as usize) {
            entry.dirty = true;
        }
    }

    pub fn is_dirty(&self, virtual_page: u32) -> bool {
        matches!(self.entries.get(virtual_page as usize), Some(Some(e)) if e.dirty)
    }

    pub fn clear_dirty(&mut self, virtual_page: u32) {
        if let Some(Some(entry)) = self.entries.get_mut(virtual_page as usize) {
            entry.dirty = false;
        }
    }

    pub fn physical_page(&self, virtual_page: u32) -> Option<u32> {
        self.entries.get(virtual_page as usize)?.as_ref().map(|e| e.physical_page)
    }

    pub fn owner(&self, physical_page: u32) -> Option<u32> {
        self.owners.get(physical_page as usize).copied().flatten()
    }

    /// `(virtual, physical)` for every resident page, by virtual index.
    pub fn resident(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(v, e)| e.as_ref().map(|e| (v as u32, e.physical_page)))
    }

    pub fn stats(&self) -> PageTableStats {
        PageTableStats {
            resident: self.owners.iter().filter(|o| o.is_some()).count() as u32,
            free: self.free.len() as u32,
            quarantined: self.quarantine.len() as u32,
            deferred: self.deferred,
        }
    }

    /// Grow or shrink the virtual range (volume resized). Mappings past the
    /// new end are released.
    pub fn resize_virtual(&mut self, virtual_pages: u32) {
        let old = self.entries.len() as u32;
        for v in virtual_pages..old {
            self.unmap(v);
        }
        self.entries.resize(virtual_pages as usize, None);
    }

    /// GPU page table / card directory: one `u32` per virtual page.
    pub fn gpu_table(&self) -> Vec<u32> {
        self.entries
            .iter()
            .map(|e| e.as_ref().map(|e| e.physical_page).unwrap_or(PAGE_UNMAPPED))
            .collect()
    }

    /// Card metadata indexed by physical page; unowned pages are zeroed.
    pub fn gpu_card_meta(&self, cards: &[MeshCard]) -> Vec<CardMeta> {
        let mut meta = vec![CardMeta::default(); self.capacity as usize];
        for card in cards {
            if let Some(page) = self.physical_page(card.virtual_page_index) {
                meta[page as usize] = card.gpu_meta();
            }
        }
        meta
    }

    /// Check internal consistency (tests and debug builds).
    pub fn validate(&self) -> GiResult<()> {
        let mut seen = vec![false; self.capacity as usize];
        for (v, e) in self.entries.iter().enumerate() {
            let Some(e) = e else { continue };
            let p = e.physical_page as usize;
            if seen[p] {
                return Err(GiError::PageTable(format!("physical page {p} mapped twice")));
            }
            seen[p] = true;
            if self.owners[p] != Some(v as u32) {
                return Err(GiError::PageTable(format!("owner mismatch on page {p}")));
            }
        }
        for &p in self.free.iter().chain(self.quarantine.iter().map(|(p, _)| p)) {
            if seen[p as usize] {
                return Err(GiError::PageTable(format!("page {p} both free and mapped")));
            }
            seen[p as usize] = true;
        }
        if seen.iter().any(|s| !s) {
            return Err(GiError::PageTable("physical page leaked".into()));
        }
        Ok(())
    }
}

/// Work for one frame of surface-cache maintenance.
#[derive(Clone, Debug, Default)]
pub struct SurfaceCacheWork {
    pub capture: Vec<CaptureWorkItem>,
    /// Triangles referenced by `capture`, flattened
    pub triangles: Vec<[glam::Vec3; 3]>,
    pub relight: Vec<RelightWorkItem>,
}

/// Outcome of [`apply_card_rebuild`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CardRebuild {
    /// Resident pages whose card geometry changed
    pub dirtied: u32,
    /// Resident pages whose card disappeared
    pub unmapped: u32,
}

/// Reconcile the table with a fresh card list. Only pages whose card differs
/// from the previous build are marked for recapture. Both lists are sorted by
/// virtual page index.
pub fn apply_card_rebuild(table: &mut PageTable, previous: &[MeshCard], cards: &[MeshCard]) -> CardRebuild {
    let mut result = CardRebuild::default();
    let mut live = vec![false; table.virtual_pages() as usize];
    for card in cards {
        let v = card.virtual_page_index;
        if let Some(slot) = live.get_mut(v as usize) {
            *slot = true;
        }
        let unchanged = previous
            .binary_search_by_key(&v, |c| c.virtual_page_index)
            .is_ok_and(|i| previous[i] == *card);
        if !unchanged && table.physical_page(v).is_some() {
            table.mark_dirty(v);
            result.dirtied += 1;
        }
    }
    let orphaned: Vec<u32> = table
        .resident()
        .filter(|(v, _)| !live.get(*v as usize).copied().unwrap_or(false))
        .map(|(v, _)| v)
        .collect();
    for v in orphaned {
        table.unmap(v);
        result.unmapped += 1;
    }
    result
}

/// Map every card, then emit capture items for fresh or dirty pages and relight
/// items for every resident card. Cards whose mapping was deferred are skipped
/// this frame.
pub fn build_work_items(table: &mut PageTable, cards: &[MeshCard]) -> SurfaceCacheWork {
    let mut work = SurfaceCacheWork::default();
    for card in cards {
        let Some(mapping) = table.map(card.virtual_page_index) else { continue };
        if mapping.fresh || table.is_dirty(card.virtual_page_index) {
            work.capture.push(CaptureWorkItem {
                physical_page_id: mapping.physical_page,
                triangle_offset: work.triangles.len() as u32,
                triangle_count: card.triangles.len() as u32,
            });
            work.triangles.extend_from_slice(&card.triangles);
            table.clear_dirty(card.virtual_page_index);
        }
        work.relight.push(RelightWorkItem {
            physical_page_id: mapping.physical_page,
            chunk_slot: card.chunk_slot,
            patch_id: card.patch_id,
            virtual_page_index: card.virtual_page_index,
        });
    }
    log::debug!(
        "[PageTable] Work items: {} capture ({} triangles), {} relight",
        work.capture.len(),
        work.triangles.len(),
        work.relight.len()
    );
    work
}
