//! Property-based invariant tests for xrbake using proptest.
//!
//! These tests check grouping agreement, interleaved layout bounds and the
//! RGBD codec for arbitrary inputs.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p xrbake-tests --test proptest_invariants
//! ```

use proptest::prelude::*;
use serde_json::Map;

use xrbake_backend_gltf::document::{AttributeMap, Mesh, Primitive};
use xrbake_backend_gltf::interleave::MAX_SPLIT_DIFF;
use xrbake_backend_gltf::{group_primitives, plan_layout, MAX_STRIDE};
use xrbake_backend_ibl::{nearest_pot, rgbd};

// ============================================================================
// 1. Geometry Grouping
// ============================================================================

fn attribute_map(names: Vec<&'static str>, accessors: std::ops::Range<usize>) -> BoxedStrategy<AttributeMap> {
    prop::collection::btree_map(
        prop::sample::select(names).prop_map(String::from),
        accessors,
        1..4,
    )
    .boxed()
}

fn primitive() -> impl Strategy<Value = Primitive> {
    (
        attribute_map(vec!["POSITION", "NORMAL", "TEXCOORD_0", "COLOR_0"], 0..4),
        prop::option::weighted(
            0.3,
            prop::collection::vec(attribute_map(vec!["POSITION", "NORMAL"], 4..6), 1..3),
        ),
        prop::sample::select(vec![None, Some(4u64), Some(1u64)]),
    )
        .prop_map(|(attributes, targets, mode)| Primitive {
            attributes,
            targets,
            indices: None,
            material: None,
            mode,
            extra: Map::new(),
        })
}

fn meshes() -> impl Strategy<Value = Vec<Mesh>> {
    prop::collection::vec(
        prop::collection::vec(primitive(), 1..5).prop_map(|primitives| Mesh {
            primitives,
            extra: Map::new(),
        }),
        1..4,
    )
}

proptest! {
    /// Primitives sharing a geometry agree on every shared attribute and on
    /// their morph targets.
    #[test]
    fn grouped_primitives_agree(meshes in meshes()) {
        let grouping = group_primitives(&meshes);

        for (g, geometry) in grouping.geometries.iter().enumerate() {
            let members = grouping.members(g);
            prop_assert!(!members.is_empty());
            for (i, &(ma, pa)) in members.iter().enumerate() {
                let a = &meshes[ma].primitives[pa];
                for (name, accessor) in &a.attributes {
                    prop_assert_eq!(geometry.attributes.get(name), Some(accessor));
                }
                if a.targets.is_some() {
                    prop_assert_eq!(&a.targets, &geometry.targets);
                }
                for &(mb, pb) in &members[i + 1..] {
                    let b = &meshes[mb].primitives[pb];
                    for (name, accessor) in &a.attributes {
                        if let Some(other) = b.attributes.get(name) {
                            prop_assert_eq!(accessor, other);
                        }
                    }
                    if a.targets.is_some() && b.targets.is_some() {
                        prop_assert_eq!(&a.targets, &b.targets);
                    }
                }
            }
        }
    }

    /// Only triangle primitives are assigned a geometry.
    #[test]
    fn only_triangles_are_grouped(meshes in meshes()) {
        let grouping = group_primitives(&meshes);
        for (m, mesh) in meshes.iter().enumerate() {
            for (p, prim) in mesh.primitives.iter().enumerate() {
                prop_assert_eq!(grouping.assignments[m][p].is_some(), prim.is_triangles());
            }
        }
    }
}

// ============================================================================
// 2. Interleaved Layout
// ============================================================================

fn aligned_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(prop::sample::select(vec![4usize, 8, 12, 16, 36, 64]), 1..14)
}

proptest! {
    /// Successful layouts keep every block within the stride limit, place each
    /// attribute exactly once and balance split blocks with a filler.
    #[test]
    fn layout_respects_stride_limit(sizes in aligned_sizes()) {
        let total: usize = sizes.iter().sum();
        match plan_layout(&sizes) {
            Ok(blocks) => {
                prop_assert!(blocks.len() == 1 || blocks.len() == 2);
                let stride = blocks[0].stride;

                let mut items = Vec::new();
                let mut used_total = 0;
                for block in &blocks {
                    prop_assert_eq!(block.stride, stride);
                    prop_assert!(block.stride <= MAX_STRIDE);
                    let used = block.used(&sizes);
                    used_total += used;
                    for slot in &block.slots {
                        prop_assert!(slot.offset + sizes[slot.item] <= block.stride);
                        items.push(slot.item);
                    }
                    match block.filler {
                        Some((shape, offset)) => {
                            prop_assert_eq!(offset, used);
                            prop_assert_eq!(offset + shape.arity() * 4, block.stride);
                        }
                        None => prop_assert_eq!(used, block.stride),
                    }
                }
                items.sort_unstable();
                prop_assert_eq!(items, (0..sizes.len()).collect::<Vec<_>>());
                prop_assert_eq!(used_total, total);

                if blocks.len() == 2 {
                    let diff = blocks[0].used(&sizes).abs_diff(blocks[1].used(&sizes));
                    prop_assert!(diff <= MAX_SPLIT_DIFF);
                    prop_assert_eq!(diff % 4, 0);
                } else {
                    prop_assert!(total <= MAX_STRIDE);
                }
            }
            Err(err) => {
                prop_assert!(err.is_unsupported_geometry());
                prop_assert!(total > MAX_STRIDE);
            }
        }
    }
}

// ============================================================================
// 3. RGBD and Size Rounding
// ============================================================================

proptest! {
    /// Encoded channels stay in [0, 1] and decode back to the input.
    #[test]
    fn rgbd_round_trip(r in 0.0f32..1000.0, g in 0.0f32..1000.0, b in 0.0f32..1000.0) {
        let encoded = rgbd::encode([r, g, b]);
        for c in encoded {
            prop_assert!((0.0..=1.0).contains(&c));
        }

        let m = r.max(g).max(b);
        if m <= 1.0 {
            prop_assert_eq!(encoded[3], 1.0);
        }
        let decoded = rgbd::decode(encoded);
        let tolerance = m.max(1.0) * 4.0 * f32::EPSILON;
        for (got, want) in decoded.iter().zip([r, g, b]) {
            prop_assert!((got - want).abs() <= tolerance, "{:?} vs {:?}", decoded, [r, g, b]);
        }
    }

    /// Rounded sizes are powers of two within a factor of two of the request.
    #[test]
    fn nearest_pot_is_close_power_of_two(size in 1u32..100_000) {
        let pot = nearest_pot(size);
        prop_assert!(pot.is_power_of_two());
        prop_assert!(pot / 2 < size);
        prop_assert!(pot * 2 > size);
    }
}
