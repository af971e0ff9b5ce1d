//! Binary glTF container reading and writing.

use std::collections::BTreeMap;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use serde_json::{json, Map, Value};

use crate::accessor::align4;
use crate::document::{BufferView, Document};
use crate::error::GltfError;

/// `glTF` in little-endian.
pub const GLB_MAGIC: u32 = 0x4654_6C67;
pub const GLB_VERSION: u32 = 2;
/// `JSON` chunk type.
pub const CHUNK_JSON: u32 = 0x4E4F_534A;
/// `BIN\0` chunk type.
pub const CHUNK_BIN: u32 = 0x004E_4942;

const HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

/// Parsed contents of a GLB file.
#[derive(Debug, Clone)]
pub struct GlbContents {
    pub json: Value,
    pub bin: Option<Vec<u8>>,
}

/// Split a GLB container into its JSON document and binary chunk.
pub fn read_glb(bytes: &[u8]) -> Result<GlbContents, GltfError> {
    let glb = gltf::binary::Glb::from_slice(bytes).map_err(|e| GltfError::Glb(e.to_string()))?;
    let json = serde_json::from_slice(&glb.json)?;
    Ok(GlbContents {
        json,
        bin: glb.bin.map(|b| b.into_owned()),
    })
}

/// Serialize a GLB container.
///
/// The JSON chunk is padded with spaces and the binary chunk with zeros, each
/// to a multiple of 4 bytes. An empty `bin` omits the binary chunk.
pub fn write_glb(json: &Value, bin: &[u8]) -> Result<Vec<u8>, GltfError> {
    let mut json_bytes = serde_json::to_vec(json)?;
    json_bytes.resize(align4(json_bytes.len()), b' ');
    let bin_len = align4(bin.len());

    let mut total = HEADER_LEN + CHUNK_HEADER_LEN + json_bytes.len();
    if !bin.is_empty() {
        total += CHUNK_HEADER_LEN + bin_len;
    }
    let total_u32 = u32::try_from(total)
        .map_err(|_| GltfError::Glb(format!("container of {} bytes exceeds 4 GiB", total)))?;

    let mut out = Vec::with_capacity(total);
    out.write_u32::<LittleEndian>(GLB_MAGIC)?;
    out.write_u32::<LittleEndian>(GLB_VERSION)?;
    out.write_u32::<LittleEndian>(total_u32)?;

    out.write_u32::<LittleEndian>(json_bytes.len() as u32)?;
    out.write_u32::<LittleEndian>(CHUNK_JSON)?;
    out.write_all(&json_bytes)?;

    if !bin.is_empty() {
        out.write_u32::<LittleEndian>(bin_len as u32)?;
        out.write_u32::<LittleEndian>(CHUNK_BIN)?;
        out.write_all(bin)?;
        out.resize(total, 0);
    }
    Ok(out)
}

/// Guess an image MIME type from its leading bytes.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    match data {
        [0x42, 0x4D, ..] => Some("image/bmp"),
        [0x47, 0x49, ..] => Some("image/gif"),
        [0xFF, 0xD8, ..] => Some("image/jpeg"),
        [0x89, 0x50, ..] => Some("image/png"),
        [0xAB, 0x4B, ..] => Some("image/ktx"),
        [0x48, 0x78, ..] => Some("image/crn"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

/// Move external image assets into buffer 0.
///
/// Every image whose `uri` names an entry of `assets` gets a new bufferView
/// (4-byte aligned start), a sniffed `mimeType`, and loses its `uri`. Returns
/// the number of images embedded.
pub fn embed_assets(
    doc: &mut Document,
    assets: &BTreeMap<String, Vec<u8>>,
) -> Result<usize, GltfError> {
    if doc.buffers.is_empty() {
        doc.buffers.push(Vec::new());
    }
    let Some(Value::Array(images)) = doc.root.get_mut("images") else {
        return Ok(0);
    };

    let mut placed: BTreeMap<&str, usize> = BTreeMap::new();
    let mut embedded = 0;
    for (i, image) in images.iter_mut().enumerate() {
        let Some(uri) = image.get("uri").and_then(Value::as_str) else {
            continue;
        };
        let Some((key, data)) = assets.get_key_value(uri) else {
            continue;
        };
        let mime = sniff_mime(data).ok_or_else(|| {
            GltfError::invalid(format!("image {} ({}) does not have a recognized header", i, uri))
        })?;

        let view = match placed.get(key.as_str()) {
            Some(&view) => view,
            None => {
                let buffer = &mut doc.buffers[0];
                buffer.resize(align4(buffer.len()), 0);
                let offset = buffer.len();
                buffer.extend_from_slice(data);
                doc.buffer_views.push(BufferView {
                    buffer: 0,
                    byte_offset: offset,
                    byte_length: data.len(),
                    byte_stride: None,
                    target: None,
                    extra: Map::new(),
                });
                let view = doc.buffer_views.len() - 1;
                placed.insert(key.as_str(), view);
                view
            }
        };

        if let Value::Object(obj) = image {
            obj.remove("uri");
            obj.insert("bufferView".into(), json!(view));
            obj.insert("mimeType".into(), json!(mime));
        }
        embedded += 1;
    }
    let buffer = &mut doc.buffers[0];
    buffer.resize(align4(buffer.len()), 0);
    Ok(embedded)
}
