//! Mutable intermediate representation of a glTF document.
//!
//! Accessors, buffer views and mesh primitives are lifted out of the JSON
//! graph into typed structs so the repacking passes never observe a
//! half-rewritten JSON tree. Every property the passes do not touch is kept
//! verbatim and written back by [`Document::to_json`].

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::accessor::{AccessorShape, AttributeView, ComponentType, ElementFormat};
use crate::error::GltfError;

/// Extension marking a document as already repacked.
pub const PROCESSED_EXTENSION: &str = "WX_processed_model";

/// Semantic attribute name to accessor index.
pub type AttributeMap = BTreeMap<String, usize>;

/// glTF primitive topology for triangle lists.
pub const MODE_TRIANGLES: u64 = 4;

/// A typed array description.
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub buffer_view: Option<usize>,
    pub byte_offset: usize,
    pub format: ElementFormat,
    pub count: usize,
    pub normalized: bool,
    pub min: Option<Vec<f64>>,
    pub max: Option<Vec<f64>>,
    /// Untouched properties (name, sparse, extensions, extras).
    pub extra: Map<String, Value>,
}

impl Accessor {
    /// A float accessor with no backing view, reading as zeros.
    pub fn zeroed_float(shape: AccessorShape, count: usize) -> Self {
        Self {
            buffer_view: None,
            byte_offset: 0,
            format: ElementFormat::new(ComponentType::F32, shape),
            count,
            normalized: false,
            min: None,
            max: None,
            extra: Map::new(),
        }
    }

    /// Buffer views referenced by sparse storage.
    pub fn sparse_views(&self) -> Vec<usize> {
        let Some(sparse) = self.extra.get("sparse") else {
            return Vec::new();
        };
        ["indices", "values"]
            .iter()
            .filter_map(|key| sparse.get(key)?.get("bufferView")?.as_u64())
            .map(|v| v as usize)
            .collect()
    }

    fn from_json(index: usize, value: &Value) -> Result<Self, GltfError> {
        let obj = value
            .as_object()
            .ok_or_else(|| GltfError::invalid(format!("accessor {} is not an object", index)))?;
        let code = obj
            .get("componentType")
            .and_then(Value::as_u64)
            .ok_or_else(|| GltfError::invalid(format!("accessor {} has no componentType", index)))?;
        let component = ComponentType::from_code(code).ok_or_else(|| {
            GltfError::invalid(format!("accessor {} has unknown componentType {}", index, code))
        })?;
        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GltfError::invalid(format!("accessor {} has no type", index)))?;
        let shape = AccessorShape::from_name(type_name).ok_or_else(|| {
            GltfError::invalid(format!("accessor {} has unknown type {}", index, type_name))
        })?;
        let count = obj
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| GltfError::invalid(format!("accessor {} has no count", index)))?;

        let mut extra = obj.clone();
        for key in [
            "bufferView",
            "byteOffset",
            "componentType",
            "type",
            "count",
            "normalized",
            "min",
            "max",
        ] {
            extra.remove(key);
        }

        Ok(Self {
            buffer_view: index_field(obj, "bufferView", "accessor", index)?,
            byte_offset: index_field(obj, "byteOffset", "accessor", index)?.unwrap_or(0),
            format: ElementFormat::new(component, shape),
            count: count as usize,
            normalized: obj.get("normalized").and_then(Value::as_bool).unwrap_or(false),
            min: number_array(obj.get("min")),
            max: number_array(obj.get("max")),
            extra,
        })
    }

    fn to_json(&self) -> Value {
        let mut obj = self.extra.clone();
        if let Some(view) = self.buffer_view {
            obj.insert("bufferView".into(), json!(view));
        }
        if self.byte_offset != 0 {
            obj.insert("byteOffset".into(), json!(self.byte_offset));
        }
        obj.insert("componentType".into(), json!(self.format.component.code()));
        obj.insert("type".into(), json!(self.format.shape.name()));
        obj.insert("count".into(), json!(self.count));
        if self.normalized {
            obj.insert("normalized".into(), json!(true));
        }
        if let (Some(min), Some(max)) = (&self.min, &self.max) {
            let is_float = self.format.component.is_float();
            if let (Some(min), Some(max)) = (bounds_json(min, is_float), bounds_json(max, is_float)) {
                obj.insert("min".into(), min);
                obj.insert("max".into(), max);
            }
        }
        Value::Object(obj)
    }
}

fn bounds_json(values: &[f64], is_float: bool) -> Option<Value> {
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        if is_float {
            out.push(Value::Number(serde_json::Number::from_f64(v)?));
        } else {
            out.push(json!(v as i64));
        }
    }
    Some(Value::Array(out))
}

fn number_array(value: Option<&Value>) -> Option<Vec<f64>> {
    value?.as_array()?.iter().map(Value::as_f64).collect()
}

fn index_field(
    obj: &Map<String, Value>,
    key: &str,
    kind: &str,
    index: usize,
) -> Result<Option<usize>, GltfError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v.as_u64().map(|v| Some(v as usize)).ok_or_else(|| {
            GltfError::invalid(format!("{} {} has a non-integer {}", kind, index, key))
        }),
    }
}

/// A byte range into one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferView {
    pub buffer: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    pub byte_stride: Option<usize>,
    pub target: Option<u32>,
    pub extra: Map<String, Value>,
}

impl BufferView {
    fn from_json(index: usize, value: &Value) -> Result<Self, GltfError> {
        let obj = value
            .as_object()
            .ok_or_else(|| GltfError::invalid(format!("bufferView {} is not an object", index)))?;
        let buffer = index_field(obj, "buffer", "bufferView", index)?
            .ok_or_else(|| GltfError::invalid(format!("bufferView {} has no buffer", index)))?;
        let byte_length = index_field(obj, "byteLength", "bufferView", index)?
            .ok_or_else(|| GltfError::invalid(format!("bufferView {} has no byteLength", index)))?;

        let mut extra = obj.clone();
        for key in ["buffer", "byteOffset", "byteLength", "byteStride", "target"] {
            extra.remove(key);
        }

        Ok(Self {
            buffer,
            byte_offset: index_field(obj, "byteOffset", "bufferView", index)?.unwrap_or(0),
            byte_length,
            byte_stride: index_field(obj, "byteStride", "bufferView", index)?,
            target: index_field(obj, "target", "bufferView", index)?.map(|t| t as u32),
            extra,
        })
    }

    fn to_json(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("buffer".into(), json!(self.buffer));
        obj.insert("byteOffset".into(), json!(self.byte_offset));
        obj.insert("byteLength".into(), json!(self.byte_length));
        if let Some(stride) = self.byte_stride {
            obj.insert("byteStride".into(), json!(stride));
        }
        if let Some(target) = self.target {
            obj.insert("target".into(), json!(target));
        }
        Value::Object(obj)
    }
}

/// One draw call's worth of geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub attributes: AttributeMap,
    pub targets: Option<Vec<AttributeMap>>,
    pub indices: Option<usize>,
    pub material: Option<usize>,
    pub mode: Option<u64>,
    pub extra: Map<String, Value>,
}

impl Primitive {
    /// True when the primitive is a triangle list (absent mode means triangles).
    pub fn is_triangles(&self) -> bool {
        self.mode.map_or(true, |m| m == MODE_TRIANGLES)
    }

    fn from_json(mesh: usize, index: usize, value: &Value) -> Result<Self, GltfError> {
        let obj = value.as_object().ok_or_else(|| {
            GltfError::invalid(format!("mesh {} primitive {} is not an object", mesh, index))
        })?;
        let attributes = match obj.get("attributes") {
            Some(v) => attribute_map(v)?,
            None => AttributeMap::new(),
        };
        let targets = match obj.get("targets").and_then(Value::as_array) {
            Some(list) => Some(list.iter().map(attribute_map).collect::<Result<Vec<_>, _>>()?),
            None => None,
        };

        let mut extra = obj.clone();
        for key in ["attributes", "targets", "indices", "material", "mode"] {
            extra.remove(key);
        }

        Ok(Self {
            attributes,
            targets,
            indices: index_field(obj, "indices", "primitive", index)?,
            material: index_field(obj, "material", "primitive", index)?,
            mode: obj.get("mode").and_then(Value::as_u64),
            extra,
        })
    }

    fn to_json(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("attributes".into(), json!(self.attributes));
        if let Some(targets) = &self.targets {
            obj.insert("targets".into(), json!(targets));
        }
        if let Some(indices) = self.indices {
            obj.insert("indices".into(), json!(indices));
        }
        if let Some(material) = self.material {
            obj.insert("material".into(), json!(material));
        }
        if let Some(mode) = self.mode {
            obj.insert("mode".into(), json!(mode));
        }
        Value::Object(obj)
    }
}

fn attribute_map(value: &Value) -> Result<AttributeMap, GltfError> {
    let obj = value
        .as_object()
        .ok_or_else(|| GltfError::invalid("attribute map is not an object"))?;
    obj.iter()
        .map(|(name, v)| {
            v.as_u64()
                .map(|i| (name.clone(), i as usize))
                .ok_or_else(|| GltfError::invalid(format!("attribute {} is not an index", name)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
    pub extra: Map<String, Value>,
}

/// A parsed glTF document plus its binary buffers.
#[derive(Debug, Clone)]
pub struct Document {
    /// Every top-level property other than accessors, bufferViews, meshes and buffers.
    pub root: Map<String, Value>,
    pub accessors: Vec<Accessor>,
    pub buffer_views: Vec<BufferView>,
    pub meshes: Vec<Mesh>,
    /// Payload of each buffer, indexed like the JSON `buffers` array.
    pub buffers: Vec<Vec<u8>>,
}

impl Document {
    /// Lift a glTF JSON graph into the intermediate representation.
    ///
    /// `buffers` must hold one payload per entry of the JSON `buffers` array.
    pub fn from_json(value: Value, buffers: Vec<Vec<u8>>) -> Result<Self, GltfError> {
        let Value::Object(mut root) = value else {
            return Err(GltfError::invalid("glTF root is not an object"));
        };

        let declared = root
            .remove("buffers")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        if declared.len() != buffers.len() {
            return Err(GltfError::invalid(format!(
                "document declares {} buffers but {} payloads were provided",
                declared.len(),
                buffers.len()
            )));
        }
        let mut payloads = Vec::with_capacity(buffers.len());
        for (i, (decl, mut data)) in declared.iter().zip(buffers).enumerate() {
            let length = decl
                .get("byteLength")
                .and_then(Value::as_u64)
                .ok_or_else(|| GltfError::invalid(format!("buffer {} has no byteLength", i)))?
                as usize;
            if data.len() < length {
                return Err(GltfError::invalid(format!(
                    "buffer {} declares {} bytes but only {} are available",
                    i,
                    length,
                    data.len()
                )));
            }
            data.truncate(length);
            payloads.push(data);
        }

        let accessors = array_of(&mut root, "accessors")
            .iter()
            .enumerate()
            .map(|(i, v)| Accessor::from_json(i, v))
            .collect::<Result<Vec<_>, _>>()?;
        let buffer_views = array_of(&mut root, "bufferViews")
            .iter()
            .enumerate()
            .map(|(i, v)| BufferView::from_json(i, v))
            .collect::<Result<Vec<_>, _>>()?;
        let mut meshes = Vec::new();
        for (m, mesh) in array_of(&mut root, "meshes").iter().enumerate() {
            let mut extra = mesh.as_object().cloned().unwrap_or_default();
            let primitives = extra
                .remove("primitives")
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(p, v)| Primitive::from_json(m, p, v))
                .collect::<Result<Vec<_>, _>>()?;
            meshes.push(Mesh { primitives, extra });
        }

        let doc = Self {
            root,
            accessors,
            buffer_views,
            meshes,
            buffers: payloads,
        };
        doc.check_references()?;
        Ok(doc)
    }

    fn check_references(&self) -> Result<(), GltfError> {
        for (i, view) in self.buffer_views.iter().enumerate() {
            let len = self.buffers.get(view.buffer).map(Vec::len).ok_or_else(|| {
                GltfError::invalid(format!("bufferView {} references missing buffer {}", i, view.buffer))
            })?;
            if view.byte_offset + view.byte_length > len {
                return Err(GltfError::invalid(format!(
                    "bufferView {} range {}..{} exceeds buffer {} length {}",
                    i,
                    view.byte_offset,
                    view.byte_offset + view.byte_length,
                    view.buffer,
                    len
                )));
            }
        }
        for (i, accessor) in self.accessors.iter().enumerate() {
            if let Some(view) = accessor.buffer_view {
                if view >= self.buffer_views.len() {
                    return Err(GltfError::invalid(format!(
                        "accessor {} references missing bufferView {}",
                        i, view
                    )));
                }
            }
        }
        for (m, mesh) in self.meshes.iter().enumerate() {
            for prim in &mesh.primitives {
                let targets = prim.targets.iter().flatten().flat_map(|t| t.values());
                for &a in prim.attributes.values().chain(targets).chain(prim.indices.iter()) {
                    if a >= self.accessors.len() {
                        return Err(GltfError::invalid(format!(
                            "mesh {} references missing accessor {}",
                            m, a
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Write the document back to glTF JSON.
    ///
    /// Buffer 0 receives `buffer_uri` when given (external `.bin`); GLB output
    /// passes `None` so the first buffer refers to the binary chunk.
    pub fn to_json(&self, buffer_uri: Option<&str>) -> Value {
        let mut root = self.root.clone();
        if !self.accessors.is_empty() {
            root.insert(
                "accessors".into(),
                Value::Array(self.accessors.iter().map(Accessor::to_json).collect()),
            );
        }
        if !self.buffer_views.is_empty() {
            root.insert(
                "bufferViews".into(),
                Value::Array(self.buffer_views.iter().map(BufferView::to_json).collect()),
            );
        }
        if !self.meshes.is_empty() {
            let meshes = self
                .meshes
                .iter()
                .map(|mesh| {
                    let mut obj = mesh.extra.clone();
                    obj.insert(
                        "primitives".into(),
                        Value::Array(mesh.primitives.iter().map(Primitive::to_json).collect()),
                    );
                    Value::Object(obj)
                })
                .collect();
            root.insert("meshes".into(), Value::Array(meshes));
        }
        if !self.buffers.is_empty() {
            let buffers = self
                .buffers
                .iter()
                .enumerate()
                .map(|(i, data)| match (i, buffer_uri) {
                    (0, Some(uri)) => json!({ "byteLength": data.len(), "uri": uri }),
                    _ => json!({ "byteLength": data.len() }),
                })
                .collect();
            root.insert("buffers".into(), Value::Array(buffers));
        }
        Value::Object(root)
    }

    /// True if an earlier run already repacked this document.
    pub fn is_processed(&self) -> bool {
        self.root
            .get("extensionsUsed")
            .and_then(Value::as_array)
            .is_some_and(|list| list.iter().any(|e| e.as_str() == Some(PROCESSED_EXTENSION)))
    }

    /// Tag the document with the processed-model extension.
    pub fn mark_processed(&mut self) {
        let used = self
            .root
            .entry("extensionsUsed")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = used {
            if !list.iter().any(|e| e.as_str() == Some(PROCESSED_EXTENSION)) {
                list.push(json!(PROCESSED_EXTENSION));
            }
        }
        let extensions = self
            .root
            .entry("extensions")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = extensions {
            map.insert(
                PROCESSED_EXTENSION.into(),
                json!({ "trustMaxAndMin": true, "simpleAttribNodeDontCheckTangent": true }),
            );
        }
    }

    /// True if the material at `index` samples a normal texture.
    pub fn material_has_normal_texture(&self, index: usize) -> bool {
        self.root
            .get("materials")
            .and_then(|m| m.get(index))
            .and_then(|m| m.get("normalTexture"))
            .is_some()
    }

    /// Buffer views referenced by images (GLB-embedded textures).
    pub fn image_views(&self) -> Vec<usize> {
        self.root
            .get("images")
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .filter_map(|img| img.get("bufferView")?.as_u64())
                    .map(|v| v as usize)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bytes covered by buffer view `index`.
    pub fn view_bytes(&self, index: usize) -> Result<&[u8], GltfError> {
        let view = self
            .buffer_views
            .get(index)
            .ok_or_else(|| GltfError::invalid(format!("missing bufferView {}", index)))?;
        let buffer = self.buffers.get(view.buffer).ok_or_else(|| {
            GltfError::invalid(format!("bufferView {} references missing buffer {}", index, view.buffer))
        })?;
        buffer
            .get(view.byte_offset..view.byte_offset + view.byte_length)
            .ok_or_else(|| GltfError::invalid(format!("bufferView {} is out of range", index)))
    }

    /// Typed view over the source data of accessor `index`.
    ///
    /// Returns `None` for accessors without a buffer view (all zeros).
    pub fn accessor_view(&self, index: usize) -> Result<Option<AttributeView<'_>>, GltfError> {
        let accessor = self
            .accessors
            .get(index)
            .ok_or_else(|| GltfError::invalid(format!("missing accessor {}", index)))?;
        let Some(view_index) = accessor.buffer_view else {
            return Ok(None);
        };
        let bytes = self.view_bytes(view_index)?;
        let stride = self.buffer_views[view_index]
            .byte_stride
            .unwrap_or_else(|| accessor.format.size());
        AttributeView::new(bytes, accessor.byte_offset, stride, accessor.count, accessor.format)
            .map(Some)
            .map_err(|e| GltfError::invalid(format!("accessor {}: {}", index, e)))
    }

    /// Append a tightly packed float attribute backed by its own buffer.
    ///
    /// Returns the new accessor index.
    pub fn push_float_attribute(&mut self, shape: AccessorShape, values: &[f32]) -> usize {
        let format = ElementFormat::new(ComponentType::F32, shape);
        let count = values.len() / shape.arity();
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        self.buffer_views.push(BufferView {
            buffer: self.buffers.len(),
            byte_offset: 0,
            byte_length: data.len(),
            byte_stride: None,
            target: Some(crate::accessor::TARGET_ARRAY_BUFFER),
            extra: Map::new(),
        });
        self.buffers.push(data);

        let mut accessor = Accessor::zeroed_float(shape, count);
        accessor.buffer_view = Some(self.buffer_views.len() - 1);
        accessor.format = format;
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    /// Iterate over (mesh, primitive) index pairs in document order.
    pub fn primitive_indices(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.meshes
            .iter()
            .enumerate()
            .flat_map(|(m, mesh)| (0..mesh.primitives.len()).map(move |p| (m, p)))
    }
}

fn array_of(root: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match root.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> (Value, Vec<Vec<u8>>) {
        let json = json!({
            "asset": {"version": "2.0"},
            "materials": [{"normalTexture": {"index": 0}}, {}],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                 "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0], "name": "pos"},
                {"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}
            ],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962},
                {"buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963}
            ],
            "meshes": [{"name": "tri", "primitives": [
                {"attributes": {"POSITION": 0}, "indices": 1, "material": 0}
            ]}],
            "buffers": [{"byteLength": 42}]
        });
        (json, vec![vec![0u8; 44]])
    }

    #[test]
    fn test_parse_and_write_back() {
        let (json, buffers) = sample();
        let doc = Document::from_json(json, buffers).unwrap();
        assert_eq!(doc.accessors.len(), 2);
        assert_eq!(doc.buffers[0].len(), 42);
        assert_eq!(doc.accessors[0].extra.get("name"), Some(&json!("pos")));
        assert!(doc.material_has_normal_texture(0));
        assert!(!doc.material_has_normal_texture(1));
        assert!(!doc.material_has_normal_texture(7));

        let out = doc.to_json(Some("buffer.bin"));
        assert_eq!(out["buffers"], json!([{"byteLength": 42, "uri": "buffer.bin"}]));
        assert_eq!(out["meshes"][0]["name"], json!("tri"));
        assert_eq!(out["meshes"][0]["primitives"][0]["attributes"]["POSITION"], json!(0));
        assert_eq!(out["accessors"][1]["componentType"], json!(5123));
        assert_eq!(out["accessors"][0]["max"], json!([1.0, 1.0, 0.0]));
    }

    #[test]
    fn test_rejects_dangling_references() {
        let (mut json, buffers) = sample();
        json["meshes"][0]["primitives"][0]["attributes"]["NORMAL"] = json!(9);
        let err = Document::from_json(json, buffers).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_rejects_short_buffer() {
        let (json, _) = sample();
        let err = Document::from_json(json, vec![vec![0u8; 10]]).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_processed_marker() {
        let (json, buffers) = sample();
        let mut doc = Document::from_json(json, buffers).unwrap();
        assert!(!doc.is_processed());
        doc.mark_processed();
        doc.mark_processed();
        assert!(doc.is_processed());
        let used = doc.root["extensionsUsed"].as_array().unwrap();
        assert_eq!(used.len(), 1);
        assert_eq!(
            doc.root["extensions"][PROCESSED_EXTENSION]["trustMaxAndMin"],
            json!(true)
        );
    }

    #[test]
    fn test_push_float_attribute() {
        let (json, buffers) = sample();
        let mut doc = Document::from_json(json, buffers).unwrap();
        let idx = doc.push_float_attribute(AccessorShape::Vec3, &[0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(idx, 2);
        let view = doc.accessor_view(idx).unwrap().unwrap();
        assert_eq!(view.count(), 2);
        assert_eq!(view.get_vec3(1), [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_integer_bounds_serialize_as_integers() {
        let (json, buffers) = sample();
        let mut doc = Document::from_json(json, buffers).unwrap();
        doc.accessors[1].min = Some(vec![0.0]);
        doc.accessors[1].max = Some(vec![2.0]);
        let out = doc.to_json(None);
        assert_eq!(out["accessors"][1]["max"], json!([2]));
        assert!(out["buffers"][0].get("uri").is_none());
    }
}
