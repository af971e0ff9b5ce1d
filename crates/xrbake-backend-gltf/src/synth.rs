//! Normal and tangent synthesis from triangle data.

use crate::accessor::{AccessorShape, AttributeView};
use crate::document::Document;
use crate::error::{GltfError, Warning, WarningCode};
use crate::grouper::Grouping;
use crate::math::{self, Vec2, Vec3};

/// Below this UV determinant a triangle contributes no tangent.
const UV_DET_EPSILON: f32 = 1e-12;

/// Attributes generated for one geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisReport {
    pub normals: Vec<usize>,
    pub tangents: Vec<usize>,
}

/// Per-vertex normals as the normalized sum of unnormalized face normals.
///
/// Each face normal is `(p0 - p1) x (p0 - p2)`; every face touching a vertex
/// contributes with equal weight. Vertices referenced by no triangle get a
/// zero normal.
pub fn compute_vertex_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut sums = vec![[0.0f32; 3]; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let edge0 = math::sub(positions[a], positions[b]);
        let edge1 = math::sub(positions[a], positions[c]);
        let normal = math::cross(edge0, edge1);
        for v in [a, b, c] {
            sums[v] = math::add(sums[v], normal);
        }
    }
    sums.into_iter().map(math::normalize).collect()
}

/// Per-vertex tangents with handedness fixed at +1.
///
/// Per triangle the UV-space x axis is projected onto the edges; triangles
/// with a degenerate UV mapping contribute nothing. The per-vertex sum is
/// normalized, then made orthogonal to the vertex normal by re-projecting
/// through two cross products. A vertex whose faces all have degenerate UVs
/// gets a zero tangent.
pub fn compute_vertex_tangents(
    positions: &[Vec3],
    uvs: &[Vec2],
    normals: &[Vec3],
    indices: &[u32],
) -> Vec<[f32; 4]> {
    let mut sums = vec![[0.0f32; 3]; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let edge0 = math::sub(positions[a], positions[b]);
        let edge1 = math::sub(positions[a], positions[c]);
        let duv0 = math::sub2(uvs[a], uvs[b]);
        let duv1 = math::sub2(uvs[a], uvs[c]);
        let det = duv0[0] * duv1[1] - duv0[1] * duv1[0];
        if det.abs() <= UV_DET_EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let tangent = math::scale(
            math::sub(math::scale(edge0, duv1[1]), math::scale(edge1, duv0[1])),
            r,
        );
        for v in [a, b, c] {
            sums[v] = math::add(sums[v], tangent);
        }
    }

    sums.into_iter()
        .zip(normals)
        .map(|(sum, &n)| {
            let t = math::normalize(sum);
            let n = math::normalize(n);
            let ortho = math::normalize(math::cross(math::cross(n, t), n));
            [ortho[0], ortho[1], ortho[2], 1.0]
        })
        .collect()
}

fn read_vec3s(view: &AttributeView<'_>) -> Vec<Vec3> {
    (0..view.count()).map(|i| view.get_vec3(i)).collect()
}

fn read_vec2s(view: &AttributeView<'_>) -> Vec<Vec2> {
    (0..view.count()).map(|i| view.get_vec2(i)).collect()
}

fn zero_vec3s(count: usize) -> Vec<Vec3> {
    vec![[0.0; 3]; count]
}

fn attribute_vec3s(doc: &Document, accessor: usize) -> Result<Vec<Vec3>, GltfError> {
    match doc.accessor_view(accessor)? {
        Some(view) => Ok(read_vec3s(&view)),
        None => Ok(zero_vec3s(doc.accessors[accessor].count)),
    }
}

fn attribute_vec2s(doc: &Document, accessor: usize) -> Result<Vec<Vec2>, GltfError> {
    match doc.accessor_view(accessor)? {
        Some(view) => Ok(read_vec2s(&view)),
        None => Ok(vec![[0.0; 2]; doc.accessors[accessor].count]),
    }
}

fn read_indices(doc: &Document, accessor: usize, vertex_count: usize) -> Result<Vec<u32>, GltfError> {
    let Some(view) = doc.accessor_view(accessor)? else {
        return Ok(vec![0; doc.accessors[accessor].count]);
    };
    if view.format().shape != AccessorShape::Scalar || view.format().component.is_float() {
        return Err(GltfError::invalid(format!(
            "index accessor {} must be an unsigned integer scalar",
            accessor
        )));
    }
    let mut out = Vec::with_capacity(view.count());
    for i in 0..view.count() {
        let index = view.get_index(i);
        if index as usize >= vertex_count {
            return Err(GltfError::invalid(format!(
                "index accessor {} references vertex {} of {}",
                accessor, index, vertex_count
            )));
        }
        out.push(index);
    }
    Ok(out)
}

/// Generate missing NORMAL and (when a member material has a normal map)
/// TANGENT attributes for every geometry.
///
/// Triangles come from the index accessors of all primitives in the geometry.
/// Geometries lacking TEXCOORD_0 or any index accessor are left as they are and
/// a warning is recorded.
pub fn synthesize_attributes(
    doc: &mut Document,
    grouping: &mut Grouping,
    warnings: &mut Vec<Warning>,
) -> Result<SynthesisReport, GltfError> {
    let mut report = SynthesisReport::default();

    for g in 0..grouping.geometries.len() {
        let members = grouping.members(g);
        let geometry = &grouping.geometries[g];
        let wants_tangent = !geometry.attributes.contains_key("TANGENT")
            && members.iter().any(|&(m, p)| {
                doc.meshes[m].primitives[p]
                    .material
                    .is_some_and(|mat| doc.material_has_normal_texture(mat))
            });
        let wants_normal = !geometry.attributes.contains_key("NORMAL");
        if !wants_normal && !wants_tangent {
            continue;
        }

        let Some(&uv_accessor) = geometry.attributes.get("TEXCOORD_0") else {
            warnings.push(Warning::new(
                WarningCode::MissingTexcoord,
                format!("geometry {} needs normals or tangents but has no TEXCOORD_0; skipped", g),
            ));
            continue;
        };
        let index_accessors: Vec<usize> = members
            .iter()
            .filter_map(|&(m, p)| doc.meshes[m].primitives[p].indices)
            .collect();
        if index_accessors.is_empty() {
            warnings.push(Warning::new(
                WarningCode::MissingIndices,
                format!("geometry {} needs normals or tangents but has no indices; skipped", g),
            ));
            continue;
        }
        let existing_normal = geometry.attributes.get("NORMAL").copied();
        let Some(&pos_accessor) = geometry.attributes.get("POSITION") else {
            return Err(GltfError::invalid(format!("geometry {} has no POSITION", g)));
        };

        let positions = attribute_vec3s(doc, pos_accessor)?;
        let mut indices = Vec::new();
        for accessor in index_accessors {
            indices.extend(read_indices(doc, accessor, positions.len())?);
        }

        let normal_accessor = match existing_normal {
            Some(a) => a,
            None => {
                tracing::debug!(geometry = g, "generating normals");
                let normals = compute_vertex_normals(&positions, &indices);
                let flat: Vec<f32> = normals.iter().flatten().copied().collect();
                let a = doc.push_float_attribute(AccessorShape::Vec3, &flat);
                grouping.geometries[g].attributes.insert("NORMAL".into(), a);
                report.normals.push(a);
                a
            }
        };

        if wants_tangent {
            tracing::debug!(geometry = g, "generating tangents");
            let mut uvs = attribute_vec2s(doc, uv_accessor)?;
            uvs.resize(positions.len(), [0.0; 2]);
            let mut normals = attribute_vec3s(doc, normal_accessor)?;
            normals.resize(positions.len(), [0.0; 3]);
            let tangents = compute_vertex_tangents(&positions, &uvs, &normals, &indices);
            let flat: Vec<f32> = tangents.iter().flatten().copied().collect();
            let a = doc.push_float_attribute(AccessorShape::Vec4, &flat);
            grouping.geometries[g].attributes.insert("TANGENT".into(), a);
            report.tangents.push(a);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouper::group_primitives;
    use serde_json::{json, Value};

    fn approx(a: Vec3, b: Vec3) -> bool {
        (0..3).all(|i| (a[i] - b[i]).abs() < 1e-5)
    }

    /// One triangle in the XY plane. Accessor 0 is POSITION, 1 TEXCOORD_0,
    /// 2 the u16 indices. `primitive` picks which of them the primitive uses.
    fn triangle_doc(primitive: Value) -> Document {
        let mut bin = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            bin.extend_from_slice(&v.to_le_bytes());
        }
        for v in [0.0f32, 0.0, 1.0, 0.0, 0.0, 1.0] {
            bin.extend_from_slice(&v.to_le_bytes());
        }
        for i in [0u16, 1, 2, 0] {
            bin.extend_from_slice(&i.to_le_bytes());
        }
        let json = json!({
            "asset": {"version": "2.0"},
            "materials": [{"normalTexture": {"index": 0}}],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                 "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]},
                {"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC2"},
                {"bufferView": 2, "componentType": 5123, "count": 3, "type": "SCALAR"}
            ],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 36},
                {"buffer": 0, "byteOffset": 36, "byteLength": 24},
                {"buffer": 0, "byteOffset": 60, "byteLength": 6}
            ],
            "meshes": [{"primitives": [primitive]}],
            "buffers": [{"byteLength": 68}]
        });
        Document::from_json(json, vec![bin]).unwrap()
    }

    fn synthesize(doc: &mut Document) -> (Grouping, Vec<Warning>, SynthesisReport) {
        let mut grouping = group_primitives(&doc.meshes);
        let mut warnings = Vec::new();
        let report = synthesize_attributes(doc, &mut grouping, &mut warnings).unwrap();
        (grouping, warnings, report)
    }

    #[test]
    fn test_missing_texcoord_skips_with_warning() {
        let mut doc = triangle_doc(json!({"attributes": {"POSITION": 0}, "indices": 2, "material": 0}));
        let (accessors, views) = (doc.accessors.len(), doc.buffer_views.len());

        let (grouping, warnings, report) = synthesize(&mut doc);
        assert_eq!(report, SynthesisReport::default());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::MissingTexcoord);
        assert_eq!(doc.accessors.len(), accessors);
        assert_eq!(doc.buffer_views.len(), views);
        assert!(!grouping.geometries[0].attributes.contains_key("NORMAL"));
        assert!(!grouping.geometries[0].attributes.contains_key("TANGENT"));
    }

    #[test]
    fn test_missing_indices_skips_with_warning() {
        let mut doc = triangle_doc(json!({"attributes": {"POSITION": 0, "TEXCOORD_0": 1}, "material": 0}));
        let (accessors, views) = (doc.accessors.len(), doc.buffer_views.len());

        let (grouping, warnings, report) = synthesize(&mut doc);
        assert_eq!(report, SynthesisReport::default());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::MissingIndices);
        assert_eq!(doc.accessors.len(), accessors);
        assert_eq!(doc.buffer_views.len(), views);
        assert_eq!(grouping.geometries[0].attributes.len(), 2);
    }

    #[test]
    fn test_generates_normal_and_tangent_accessors() {
        let mut doc = triangle_doc(json!({
            "attributes": {"POSITION": 0, "TEXCOORD_0": 1}, "indices": 2, "material": 0
        }));

        let (grouping, warnings, report) = synthesize(&mut doc);
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(report.normals, vec![3]);
        assert_eq!(report.tangents, vec![4]);
        assert_eq!(grouping.geometries[0].attributes["NORMAL"], 3);
        assert_eq!(grouping.geometries[0].attributes["TANGENT"], 4);

        let normals = doc.accessor_view(3).unwrap().unwrap();
        assert_eq!(normals.count(), 3);
        for i in 0..3 {
            assert!(approx(normals.get_vec3(i), [0.0, 0.0, 1.0]), "{:?}", normals.get_vec3(i));
        }
        assert_eq!(doc.accessors[4].format.shape, AccessorShape::Vec4);
    }

    #[test]
    fn test_existing_normal_without_normal_map_is_left_alone() {
        let mut doc = triangle_doc(json!({"attributes": {"POSITION": 0, "NORMAL": 0}, "indices": 2}));
        let (grouping, warnings, report) = synthesize(&mut doc);
        assert!(warnings.is_empty());
        assert_eq!(report, SynthesisReport::default());
        assert_eq!(grouping.geometries[0].attributes["NORMAL"], 0);
    }

    #[test]
    fn test_single_triangle_normal() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let normals = compute_vertex_normals(&positions, &[0, 1, 2]);
        for n in &normals {
            assert!(approx(*n, [0.0, 0.0, 1.0]), "{:?}", n);
        }
    }

    #[test]
    fn test_equal_weight_face_averaging() {
        // Two faces sharing vertex 0: one small in +Z, one large in +X.
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 10.0, 0.0],
            [0.0, 0.0, 10.0],
        ];
        let normals = compute_vertex_normals(&positions, &[0, 1, 2, 0, 3, 4]);
        // Unnormalized face normals are summed: (0,0,1) + (100,0,0).
        let expected = math::normalize([100.0, 0.0, 1.0]);
        assert!(approx(normals[0], expected));
        // Vertex only in the small face keeps that face's direction.
        assert!(approx(normals[1], [0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_unreferenced_vertex_gets_zero_normal() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [5.0; 3]];
        let normals = compute_vertex_normals(&positions, &[0, 1, 2]);
        assert_eq!(normals[3], [0.0; 3]);
    }

    #[test]
    fn test_tangent_follows_u_axis() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let normals = [[0.0, 0.0, 1.0]; 3];
        let tangents = compute_vertex_tangents(&positions, &uvs, &normals, &[0, 1, 2]);
        for t in &tangents {
            assert!(approx([t[0], t[1], t[2]], [1.0, 0.0, 0.0]), "{:?}", t);
            assert_eq!(t[3], 1.0);
        }
    }

    #[test]
    fn test_tangent_orthogonal_to_normal() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.5], [0.0, 1.0, 0.0]];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let normals = [[0.0, 0.0, 1.0]; 3];
        let tangents = compute_vertex_tangents(&positions, &uvs, &normals, &[0, 1, 2]);
        for t in &tangents {
            let t3 = [t[0], t[1], t[2]];
            assert!(math::dot(t3, [0.0, 0.0, 1.0]).abs() < 1e-5);
            assert!((math::length(t3) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_degenerate_uvs_give_zero_tangent() {
        let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let uvs = [[0.5, 0.5]; 3];
        let normals = [[0.0, 0.0, 1.0]; 3];
        let tangents = compute_vertex_tangents(&positions, &uvs, &normals, &[0, 1, 2]);
        for t in &tangents {
            assert_eq!(*t, [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_degenerate_face_does_not_spoil_shared_vertex() {
        // Vertex 0 sits in one mapped face and one face with collapsed UVs.
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, -1.0, 0.0],
        ];
        let uvs = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0], [0.0, 0.0]];
        let normals = [[0.0, 0.0, 1.0]; 5];
        let tangents = compute_vertex_tangents(&positions, &uvs, &normals, &[0, 1, 2, 0, 3, 4]);
        let t0 = [tangents[0][0], tangents[0][1], tangents[0][2]];
        assert!(approx(t0, [1.0, 0.0, 0.0]), "{:?}", t0);
        assert_eq!(tangents[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
