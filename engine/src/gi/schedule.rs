//! Temporal distribution of tracing work.
//!
//! A page (or probe tile) of `total` texels is split into batches of
//! `per_frame` consecutive texels. Each frame exactly one batch per page is
//! visited, rotated by the page/probe key so neighbouring pages do not refresh
//! in lockstep. The trace passes and the temporal filter share this rule.

/// Number of batches needed to cover `total` texels, at least one.
#[inline]
pub fn batch_count(total: u32, per_frame: u32) -> u32 {
    if per_frame == 0 {
        return 1;
    }
    total.div_ceil(per_frame).max(1)
}

/// Batch visited this frame for `key` (physical page id or probe index).
#[inline]
pub fn active_batch(frame_index: u32, key: u32, batches: u32) -> u32 {
    frame_index.wrapping_add(key) % batches.max(1)
}

/// True if `texel` is traced this frame.
///
/// `batch = texel / per_frame; traced = batch == (frame + key) % batches`.
#[inline]
pub fn is_texel_scheduled(texel: u32, per_frame: u32, frame_index: u32, key: u32, total: u32) -> bool {
    if per_frame == 0 || per_frame >= total {
        return true;
    }
    let batches = batch_count(total, per_frame);
    texel / per_frame == active_batch(frame_index, key, batches)
}
