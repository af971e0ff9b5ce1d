//! Interleaving of one geometry's attributes into per-vertex blocks.
//!
//! Attribute slots are 4-byte aligned. When the summed stride is above
//! [`MAX_STRIDE`] the attributes are split across two blocks of equal stride,
//! the lighter block padded with a zero-filled float accessor.

use crate::accessor::{AccessorShape, Bounds};
use crate::document::{Accessor, Document};
use crate::error::GltfError;
use crate::grouper::Geometry;

/// Largest per-vertex stride of one interleaved block.
pub const MAX_STRIDE: usize = 252;

/// Largest stride difference between the two halves of a split geometry.
pub const MAX_SPLIT_DIFF: usize = 16;

/// Placement of one layout item inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlacement {
    /// Index into the size list passed to [`plan_layout`].
    pub item: usize,
    pub offset: usize,
}

/// Layout of one block as computed by [`plan_layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    pub stride: usize,
    pub slots: Vec<SlotPlacement>,
    /// Zero filler appended after the slots: (shape, byte offset).
    pub filler: Option<(AccessorShape, usize)>,
}

impl BlockLayout {
    /// Bytes per vertex actually occupied by attributes (filler excluded).
    pub fn used(&self, sizes: &[usize]) -> usize {
        self.slots.iter().map(|s| sizes[s.item]).sum()
    }
}

fn sequential(items: &[usize], sizes: &[usize]) -> (Vec<SlotPlacement>, usize) {
    let mut offset = 0;
    let slots = items
        .iter()
        .map(|&item| {
            let slot = SlotPlacement { item, offset };
            offset += sizes[item];
            slot
        })
        .collect();
    (slots, offset)
}

/// Compute block layouts for attributes of the given aligned sizes.
///
/// A total up to [`MAX_STRIDE`] yields one block in input order. Otherwise the
/// sizes are visited largest first (stable for ties) and each goes to the
/// first block unless it already holds more bytes than the second.
pub fn plan_layout(sizes: &[usize]) -> Result<Vec<BlockLayout>, GltfError> {
    let total: usize = sizes.iter().sum();
    if total > 2 * MAX_STRIDE {
        return Err(GltfError::UnsupportedGeometry {
            reason: format!("combined attribute stride exceeds twice the {} byte limit", MAX_STRIDE),
            stride: total,
            diff: 0,
        });
    }

    if total <= MAX_STRIDE {
        let items: Vec<usize> = (0..sizes.len()).collect();
        let (slots, stride) = sequential(&items, sizes);
        return Ok(vec![BlockLayout {
            stride,
            slots,
            filler: None,
        }]);
    }

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]));
    let mut halves: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    let mut sums = [0usize; 2];
    for item in order {
        let half = if sums[0] <= sums[1] { 0 } else { 1 };
        halves[half].push(item);
        sums[half] += sizes[item];
    }

    let stride = sums[0].max(sums[1]);
    let diff = sums[0].abs_diff(sums[1]);
    if stride > MAX_STRIDE || diff % 4 != 0 || diff > MAX_SPLIT_DIFF {
        return Err(GltfError::UnsupportedGeometry {
            reason: "attributes cannot be split into two balanced blocks".into(),
            stride,
            diff,
        });
    }

    let lighter = if sums[0] < sums[1] { 0 } else { 1 };
    let mut blocks = Vec::with_capacity(2);
    for (half, items) in halves.iter().enumerate() {
        let (slots, used) = sequential(items, sizes);
        let filler = if half == lighter && diff > 0 {
            let shape = AccessorShape::float_filler(diff)
                .ok_or_else(|| GltfError::internal(format!("no filler shape for {} bytes", diff)))?;
            Some((shape, used))
        } else {
            None
        };
        blocks.push(BlockLayout {
            stride,
            slots,
            filler,
        });
    }
    Ok(blocks)
}

/// An accessor written into a block at a per-vertex byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub accessor: usize,
    pub offset: usize,
}

/// One interleaved vertex buffer ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedBlock {
    pub stride: usize,
    pub count: usize,
    pub placements: Vec<Placement>,
    pub data: Vec<u8>,
}

/// Copy accessor `accessor` into `data` at `offset` within each `stride` slot.
///
/// Returns the bounds of the copied source elements.
fn copy_attribute(
    doc: &Document,
    accessor: usize,
    data: &mut [u8],
    stride: usize,
    offset: usize,
) -> Result<Option<Bounds>, GltfError> {
    let Some(view) = doc.accessor_view(accessor)? else {
        let source = &doc.accessors[accessor];
        if source.count == 0 {
            return Ok(None);
        }
        let arity = source.format.shape.arity();
        return Ok(Some(Bounds {
            min: vec![0.0; arity],
            max: vec![0.0; arity],
        }));
    };
    let size = view.format().size();
    for i in 0..view.count() {
        let start = i * stride + offset;
        data[start..start + size].copy_from_slice(view.element_bytes(i));
    }
    Ok(Bounds::of_view(&view))
}

/// Interleave every attribute and morph-target accessor of `geometry`.
///
/// Each accessor is rewritten in place: `byteOffset` becomes its offset within
/// the vertex, `count` the largest count in the geometry (missing trailing
/// elements read as zeros) and `min`/`max` the bounds of its source data. The
/// accessor's `bufferView` still names its source view; the assembler swaps in
/// the block's view.
pub fn interleave_geometry(
    doc: &mut Document,
    geometry: &Geometry,
) -> Result<Vec<InterleavedBlock>, GltfError> {
    let accessors = geometry.accessor_indices();
    if accessors.is_empty() {
        return Ok(Vec::new());
    }
    for (i, a) in accessors.iter().enumerate() {
        if accessors[..i].contains(a) {
            return Err(GltfError::internal(format!(
                "accessor {} appears twice in one geometry",
                a
            )));
        }
    }

    let sizes: Vec<usize> = accessors
        .iter()
        .map(|&a| doc.accessors[a].format.aligned_size())
        .collect();
    let count = accessors
        .iter()
        .map(|&a| doc.accessors[a].count)
        .max()
        .unwrap_or(0);

    let layouts = plan_layout(&sizes)?;
    let mut blocks = Vec::with_capacity(layouts.len());
    for layout in layouts {
        let mut data = vec![0u8; count * layout.stride];
        let mut placements = Vec::with_capacity(layout.slots.len() + 1);
        for slot in &layout.slots {
            let a = accessors[slot.item];
            let bounds = copy_attribute(doc, a, &mut data, layout.stride, slot.offset)?;
            let target = &mut doc.accessors[a];
            target.count = count;
            target.byte_offset = slot.offset;
            target.min = bounds.as_ref().map(|b| b.min.clone());
            target.max = bounds.map(|b| b.max);
            placements.push(Placement {
                accessor: a,
                offset: slot.offset,
            });
        }
        if let Some((shape, offset)) = layout.filler {
            let mut filler = Accessor::zeroed_float(shape, count);
            filler.byte_offset = offset;
            doc.accessors.push(filler);
            placements.push(Placement {
                accessor: doc.accessors.len() - 1,
                offset,
            });
        }
        tracing::debug!(
            stride = layout.stride,
            count,
            attributes = placements.len(),
            "interleaved block"
        );
        blocks.push(InterleavedBlock {
            stride: layout.stride,
            count,
            placements,
            data,
        });
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{AttributeView, ComponentType, ElementFormat};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_single_block_keeps_order() {
        let blocks = plan_layout(&[12, 12, 8]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].stride, 32);
        let offsets: Vec<usize> = blocks[0].slots.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(blocks[0].filler, None);
    }

    #[test]
    fn test_exactly_max_stride_is_one_block() {
        let sizes = vec![12; 21];
        let blocks = plan_layout(&sizes).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].stride, 252);
    }

    #[test]
    fn test_split_300_bytes() {
        // 18 × 16 + 12 = 300
        let mut sizes = vec![16; 18];
        sizes.push(12);
        let blocks = plan_layout(&sizes).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].stride, blocks[1].stride);
        assert!(blocks[0].stride <= MAX_STRIDE);

        let used: usize = blocks.iter().map(|b| b.used(&sizes)).sum();
        assert_eq!(used, 300);

        let mut items: Vec<usize> = blocks
            .iter()
            .flat_map(|b| b.slots.iter().map(|s| s.item))
            .collect();
        items.sort_unstable();
        assert_eq!(items, (0..sizes.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_filler_goes_to_lighter_block() {
        // 16 × 16 + 4 = 260: halves 128 + 4 / 128 after greedy fill -> diff 4
        let mut sizes = vec![16; 16];
        sizes.push(4);
        let blocks = plan_layout(&sizes).unwrap();
        let heavy = blocks.iter().position(|b| b.used(&sizes) == b.stride).unwrap();
        let light = 1 - heavy;
        assert_eq!(blocks[heavy].filler, None);
        let (shape, offset) = blocks[light].filler.unwrap();
        assert_eq!(shape, AccessorShape::Scalar);
        assert_eq!(offset, blocks[light].used(&sizes));
        assert_eq!(offset + 4, blocks[light].stride);
    }

    #[test]
    fn test_too_wide_is_unsupported() {
        let err = plan_layout(&vec![64; 8]).unwrap_err();
        assert!(err.is_unsupported_geometry());
    }

    #[test]
    fn test_unbalanced_split_is_unsupported() {
        // 64 × 3 + 4 × 16 = 256; greedy leaves 128 / 128 -> ok.
        assert!(plan_layout(&[64, 64, 64, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4]).is_ok());
        // Five 64s plus 20 split 192 / 148, a 44 byte gap.
        let err = plan_layout(&[64, 64, 64, 64, 64, 20]).unwrap_err();
        assert!(err.is_unsupported_geometry());
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_interleave_copies_strided_source() {
        // Source: positions in an interleaved view with a 4-byte gap, uvs packed.
        let mut buffer = f32_bytes(&[1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]);
        buffer.extend(f32_bytes(&[0.5, 0.25, 0.75, 1.0]));
        let json = json!({
            "asset": {"version": "2.0"},
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 2, "type": "VEC3"},
                {"bufferView": 1, "componentType": 5126, "count": 2, "type": "VEC2"}
            ],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 32, "byteStride": 16},
                {"buffer": 0, "byteOffset": 32, "byteLength": 16}
            ],
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0, "TEXCOORD_0": 1}}]}],
            "buffers": [{"byteLength": 48}]
        });
        let mut doc = Document::from_json(json, vec![buffer]).unwrap();
        let geometry = Geometry {
            attributes: doc.meshes[0].primitives[0].attributes.clone(),
            targets: None,
        };
        let blocks = interleave_geometry(&mut doc, &geometry).unwrap();
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.stride, 20);
        assert_eq!(block.data.len(), 40);

        let pos = &doc.accessors[0];
        assert_eq!(pos.byte_offset, 0);
        assert_eq!(pos.min, Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(pos.max, Some(vec![4.0, 5.0, 6.0]));
        let view = AttributeView::new(&block.data, pos.byte_offset, 20, 2, pos.format).unwrap();
        assert_eq!(view.get_vec3(1), [4.0, 5.0, 6.0]);

        let uv = &doc.accessors[1];
        assert_eq!(uv.byte_offset, 12);
        let view = AttributeView::new(&block.data, uv.byte_offset, 20, 2, uv.format).unwrap();
        assert_eq!(view.get_vec2(1), [0.75, 1.0]);
    }

    #[test]
    fn test_count_promoted_to_geometry_max() {
        let json = json!({
            "asset": {"version": "2.0"},
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 3, "type": "SCALAR"},
                {"bufferView": 1, "componentType": 5121, "count": 1, "type": "VEC2"}
            ],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 12},
                {"buffer": 0, "byteOffset": 12, "byteLength": 2}
            ],
            "buffers": [{"byteLength": 14}]
        });
        let mut buffer = f32_bytes(&[1.0, 2.0, 3.0]);
        buffer.extend([7u8, 9]);
        let mut doc = Document::from_json(json, vec![buffer]).unwrap();
        let geometry = Geometry {
            attributes: [("A".to_string(), 0), ("B".to_string(), 1)].into_iter().collect(),
            targets: None,
        };
        let blocks = interleave_geometry(&mut doc, &geometry).unwrap();
        assert_eq!(blocks[0].stride, 8);
        assert_eq!(doc.accessors[1].count, 3);
        assert_eq!(doc.accessors[1].format, ElementFormat::new(ComponentType::U8, AccessorShape::Vec2));
        assert_eq!(doc.accessors[1].max, Some(vec![7.0, 9.0]));
        // Second vertex of B is zero-filled.
        assert_eq!(&blocks[0].data[12..14], &[0, 0]);
    }
}
