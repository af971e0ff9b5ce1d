//! In-memory glTF models and panoramas for integration tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use xrbake_backend_gltf::{Document, ModelSource};
use xrbake_backend_ibl::{ColorSpace, PanoramaImage, PixelData};

/// glTF component type FLOAT.
pub const FLOAT: u32 = 5126;
/// glTF component type UNSIGNED_SHORT.
pub const UNSIGNED_SHORT: u32 = 5123;

/// Component count of a glTF accessor type.
pub fn arity(shape: &str) -> usize {
    match shape {
        "SCALAR" => 1,
        "VEC2" => 2,
        "VEC3" => 3,
        "VEC4" => 4,
        "MAT2" => 4,
        "MAT3" => 9,
        "MAT4" => 16,
        other => panic!("unknown accessor type {}", other),
    }
}

/// Builds the binary buffer and JSON graph of a test model.
///
/// Every accessor gets its own tightly packed, 4-byte aligned bufferView.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
    meshes: Vec<Value>,
    materials: Vec<Value>,
    images: Vec<Value>,
    textures: Vec<Value>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_view(&mut self, bytes: &[u8]) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": bytes.len(),
        }));
        self.views.len() - 1
    }

    /// Add a float accessor with `min`/`max`; returns its index.
    pub fn float_accessor(&mut self, shape: &str, values: &[f32]) -> usize {
        let n = arity(shape);
        assert_eq!(values.len() % n, 0, "values do not fill whole {} elements", shape);
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = self.push_view(&bytes);
        let (min, max) = bounds(values, n);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": FLOAT,
            "count": values.len() / n,
            "type": shape,
            "min": min,
            "max": max,
        }));
        self.accessors.len() - 1
    }

    /// Add an unsigned short index accessor; returns its index.
    pub fn index_accessor(&mut self, indices: &[u16]) -> usize {
        let bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
        let view = self.push_view(&bytes);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": UNSIGNED_SHORT,
            "count": indices.len(),
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }

    /// Add a material whose normal texture samples `texture`.
    pub fn normal_mapped_material(&mut self, texture: usize) -> usize {
        self.materials.push(json!({ "normalTexture": { "index": texture } }));
        self.materials.len() - 1
    }

    /// Add a material whose base color samples `texture`.
    pub fn textured_material(&mut self, texture: usize) -> usize {
        self.materials.push(json!({
            "pbrMetallicRoughness": { "baseColorTexture": { "index": texture } }
        }));
        self.materials.len() - 1
    }

    /// Add an external image and a texture sampling it with the default
    /// (repeat) wrap mode; returns the texture index.
    pub fn image_texture(&mut self, uri: &str) -> usize {
        self.images.push(json!({ "uri": uri }));
        self.textures.push(json!({ "source": self.images.len() - 1 }));
        self.textures.len() - 1
    }

    pub fn mesh(&mut self, primitives: Vec<Value>) -> usize {
        self.meshes.push(json!({ "primitives": primitives }));
        self.meshes.len() - 1
    }

    /// Finish the model: the JSON graph (buffer 0 without a `uri`) and the
    /// payload of buffer 0.
    pub fn build(self) -> (Value, Vec<u8>) {
        let mut root = json!({
            "asset": { "version": "2.0" },
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0 }],
            "meshes": self.meshes,
            "accessors": self.accessors,
            "bufferViews": self.views,
            "buffers": [{ "byteLength": self.bin.len() }],
        });
        if !self.materials.is_empty() {
            root["materials"] = Value::Array(self.materials);
        }
        if !self.images.is_empty() {
            root["images"] = Value::Array(self.images);
            root["textures"] = Value::Array(self.textures);
        }
        (root, self.bin)
    }
}

fn bounds(values: &[f32], n: usize) -> (Vec<f32>, Vec<f32>) {
    let mut min = vec![f32::INFINITY; n];
    let mut max = vec![f32::NEG_INFINITY; n];
    for element in values.chunks(n) {
        for (c, &v) in element.iter().enumerate() {
            min[c] = min[c].min(v);
            max[c] = max[c].max(v);
        }
    }
    (min, max)
}

/// Wrap a built model as an in-memory source.
pub fn model_source(json: Value, bin: Vec<u8>) -> ModelSource {
    ModelSource {
        document: Document::from_json(json, vec![bin]).expect("fixture document is valid"),
        assets: BTreeMap::new(),
        is_glb: false,
    }
}

/// Write a built model as `<dir>/scene.gltf` + `<dir>/scene.bin`.
pub fn write_gltf(dir: &Path, mut json: Value, bin: &[u8]) -> PathBuf {
    fs::create_dir_all(dir).expect("create model directory");
    json["buffers"][0]["uri"] = json!("scene.bin");
    fs::write(dir.join("scene.bin"), bin).expect("write buffer");
    let path = dir.join("scene.gltf");
    fs::write(&path, serde_json::to_vec_pretty(&json).expect("serialize model"))
        .expect("write model");
    path
}

/// A unit quad split into two primitives that share POSITION, NORMAL and
/// TEXCOORD_0 and use a normal-mapped material, with no TANGENT.
pub fn shared_quad() -> (Value, Vec<u8>) {
    let mut b = ModelBuilder::new();
    let position = b.float_accessor(
        "VEC3",
        &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
    );
    let normal = b.float_accessor("VEC3", &[0.0f32, 0.0, 1.0].repeat(4));
    let uv = b.float_accessor("VEC2", &[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
    let first = b.index_accessor(&[0, 1, 2]);
    let second = b.index_accessor(&[0, 2, 3]);
    let material = b.normal_mapped_material(0);
    let attributes = json!({ "POSITION": position, "NORMAL": normal, "TEXCOORD_0": uv });
    b.mesh(vec![
        json!({ "attributes": attributes, "indices": first, "material": material }),
        json!({ "attributes": attributes, "indices": second, "material": material }),
    ]);
    b.build()
}

/// One triangle whose attributes add up to a 300-byte vertex.
///
/// POSITION, NORMAL and COLOR_0 are VEC3, TEXCOORD_0 is VEC2 and four custom
/// MAT4 attributes carry 64 bytes each.
pub fn wide_triangle() -> (Value, Vec<u8>) {
    let mut b = ModelBuilder::new();
    let position = b.float_accessor(
        "VEC3",
        &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    );
    let normal = b.float_accessor("VEC3", &[0.0f32, 0.0, 1.0].repeat(3));
    let color = b.float_accessor("VEC3", &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    let uv = b.float_accessor("VEC2", &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    let mut attributes = json!({
        "POSITION": position,
        "NORMAL": normal,
        "COLOR_0": color,
        "TEXCOORD_0": uv,
    });
    for (k, name) in ["_CUSTOM_A", "_CUSTOM_B", "_CUSTOM_C", "_CUSTOM_D"]
        .iter()
        .enumerate()
    {
        let values: Vec<f32> = (0..48).map(|i| (k * 100 + i) as f32 * 0.5).collect();
        attributes[*name] = json!(b.float_accessor("MAT4", &values));
    }
    b.mesh(vec![json!({ "attributes": attributes })]);
    b.build()
}

/// Decode float accessor `index` of a glTF document as element rows,
/// honoring `byteOffset` and the view's `byteStride`.
pub fn read_float_accessor(json: &Value, bin: &[u8], index: usize) -> Vec<Vec<f32>> {
    let accessor = &json["accessors"][index];
    assert_eq!(accessor["componentType"], FLOAT, "accessor {} is not float", index);
    let n = arity(accessor["type"].as_str().expect("accessor type"));
    let count = accessor["count"].as_u64().expect("accessor count") as usize;
    let Some(view) = accessor["bufferView"].as_u64() else {
        return vec![vec![0.0; n]; count];
    };
    let view = &json["bufferViews"][view as usize];
    let base = view["byteOffset"].as_u64().unwrap_or(0) as usize
        + accessor["byteOffset"].as_u64().unwrap_or(0) as usize;
    let stride = view["byteStride"]
        .as_u64()
        .map(|s| s as usize)
        .unwrap_or(n * 4);

    (0..count)
        .map(|i| {
            (0..n)
                .map(|c| {
                    let at = base + i * stride + c * 4;
                    f32::from_le_bytes([bin[at], bin[at + 1], bin[at + 2], bin[at + 3]])
                })
                .collect()
        })
        .collect()
}

/// `min` or `max` of an accessor as f32 values.
pub fn accessor_bound(json: &Value, index: usize, key: &str) -> Vec<f32> {
    json["accessors"][index][key]
        .as_array()
        .map(|values| {
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(f64::NAN) as f32)
                .collect()
        })
        .unwrap_or_default()
}

/// Attribute name to accessor index of one primitive.
pub fn primitive_attributes(json: &Value, mesh: usize, primitive: usize) -> BTreeMap<String, usize> {
    json["meshes"][mesh]["primitives"][primitive]["attributes"]
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_u64()? as usize)))
                .collect()
        })
        .unwrap_or_default()
}

/// An 8-bit sRGB panorama with a smooth gradient.
pub fn srgb_panorama(width: u32, height: u32) -> PanoramaImage {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                96,
            ]);
        }
    }
    PanoramaImage::new(width, height, 3, PixelData::U8(data), ColorSpace::Srgb)
        .expect("fixture panorama is valid")
}

/// A linear float panorama of one constant color.
pub fn constant_hdr_panorama(width: u32, height: u32, rgb: [f32; 3]) -> PanoramaImage {
    let data = (0..width * height).flat_map(|_| rgb).collect();
    PanoramaImage::new(width, height, 3, PixelData::F32(data), ColorSpace::Linear)
        .expect("fixture panorama is valid")
}
