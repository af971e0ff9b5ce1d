//! Final buffer assembly.
//!
//! Interleaved blocks and every still-referenced original view are copied into
//! one buffer, each region once and 4-byte aligned. Original views that end up
//! unreferenced are either reused as a block's view slot or neutralized to a
//! one-byte range at offset 0 so bufferView indices stay stable.

use std::collections::{BTreeSet, HashMap};

use serde_json::Map;

use crate::accessor::{align4, TARGET_ARRAY_BUFFER};
use crate::document::{BufferView, Document};
use crate::error::GltfError;
use crate::interleave::InterleavedBlock;

/// Summary of an assembly pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub byte_length: usize,
    pub geometry_views: usize,
    pub retained_views: usize,
    pub neutralized_views: usize,
}

enum Region {
    Block(usize),
    View(usize),
}

fn push_region(out: &mut Vec<u8>, bytes: &[u8]) -> usize {
    out.resize(align4(out.len()), 0);
    let offset = out.len();
    out.extend_from_slice(bytes);
    offset
}

/// Merge every buffer of `doc` into a single buffer holding `blocks`.
///
/// Every accessor placed in a block is pointed at that block's bufferView.
/// Views referenced by the remaining accessors, by sparse storage or by images
/// are copied over unchanged. Afterwards `doc.buffers` holds one buffer, or
/// none when nothing references binary data.
pub fn assemble_buffers(
    doc: &mut Document,
    blocks: &[InterleavedBlock],
) -> Result<AssemblyStats, GltfError> {
    let mut block_of: HashMap<usize, usize> = HashMap::new();
    for (b, block) in blocks.iter().enumerate() {
        for placement in &block.placements {
            if block_of.insert(placement.accessor, b).is_some() {
                return Err(GltfError::internal(format!(
                    "accessor {} placed in more than one block",
                    placement.accessor
                )));
            }
        }
    }

    // Views some remaining reference still needs.
    let mut retained: BTreeSet<usize> = BTreeSet::new();
    let mut vacated: BTreeSet<usize> = BTreeSet::new();
    for (i, accessor) in doc.accessors.iter().enumerate() {
        if let Some(view) = accessor.buffer_view {
            if block_of.contains_key(&i) {
                vacated.insert(view);
            } else {
                retained.insert(view);
            }
        }
        retained.extend(accessor.sparse_views());
    }
    retained.extend(doc.image_views());
    for &view in &retained {
        if view >= doc.buffer_views.len() {
            return Err(GltfError::invalid(format!("reference to missing bufferView {}", view)));
        }
    }

    // Region order follows first use by accessors; image-only views trail.
    let mut regions = Vec::new();
    let mut seen_blocks = vec![false; blocks.len()];
    let mut seen_views = BTreeSet::new();
    for (i, accessor) in doc.accessors.iter().enumerate() {
        if let Some(&b) = block_of.get(&i) {
            if !seen_blocks[b] {
                seen_blocks[b] = true;
                regions.push(Region::Block(b));
            }
        } else if let Some(view) = accessor.buffer_view {
            if seen_views.insert(view) {
                regions.push(Region::View(view));
            }
        }
    }
    for (b, seen) in seen_blocks.iter().enumerate() {
        if !seen {
            regions.push(Region::Block(b));
        }
    }
    for &view in &retained {
        if seen_views.insert(view) {
            regions.push(Region::View(view));
        }
    }

    let mut free_slots: Vec<usize> = vacated.difference(&retained).copied().collect();
    free_slots.reverse();
    let original_views = doc.buffer_views.len();

    let mut out = Vec::new();
    let mut stats = AssemblyStats::default();
    let mut block_views = vec![0usize; blocks.len()];
    let mut new_views: Vec<(usize, BufferView)> = Vec::new();
    let mut relocated: Vec<(usize, usize)> = Vec::new();

    for region in &regions {
        match *region {
            Region::Block(b) => {
                let block = &blocks[b];
                let offset = push_region(&mut out, &block.data);
                let slot = free_slots.pop().unwrap_or_else(|| {
                    original_views + new_views.iter().filter(|(s, _)| *s >= original_views).count()
                });
                new_views.push((
                    slot,
                    BufferView {
                        buffer: 0,
                        byte_offset: offset,
                        byte_length: block.data.len(),
                        byte_stride: Some(block.stride),
                        target: Some(TARGET_ARRAY_BUFFER),
                        extra: Map::new(),
                    },
                ));
                block_views[b] = slot;
                stats.geometry_views += 1;
            }
            Region::View(v) => {
                let offset = push_region(&mut out, doc.view_bytes(v)?);
                relocated.push((v, offset));
                stats.retained_views += 1;
            }
        }
    }

    for (v, offset) in relocated {
        let view = &mut doc.buffer_views[v];
        view.buffer = 0;
        view.byte_offset = offset;
    }
    let live: BTreeSet<usize> = seen_views
        .iter()
        .copied()
        .chain(new_views.iter().map(|(s, _)| *s))
        .collect();
    for (slot, view) in new_views {
        if slot < doc.buffer_views.len() {
            doc.buffer_views[slot] = view;
        } else {
            doc.buffer_views.push(view);
        }
    }
    for (v, view) in doc.buffer_views.iter_mut().enumerate() {
        if live.contains(&v) {
            continue;
        }
        view.buffer = 0;
        view.byte_offset = 0;
        view.byte_length = 1;
        view.byte_stride = None;
        stats.neutralized_views += 1;
    }
    if stats.neutralized_views > 0 && out.is_empty() {
        out.resize(4, 0);
    }
    out.resize(align4(out.len()), 0);

    for (i, accessor) in doc.accessors.iter_mut().enumerate() {
        if let Some(&b) = block_of.get(&i) {
            accessor.buffer_view = Some(block_views[b]);
        }
    }

    stats.byte_length = out.len();
    doc.buffers = if out.is_empty() { Vec::new() } else { vec![out] };
    tracing::debug!(
        bytes = stats.byte_length,
        geometry_views = stats.geometry_views,
        retained_views = stats.retained_views,
        neutralized_views = stats.neutralized_views,
        "assembled buffer"
    );
    Ok(stats)
}
