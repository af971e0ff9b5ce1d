//! Loading `.gltf` / `.glb` files together with their external resources.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::document::Document;
use crate::error::GltfError;
use crate::glb::read_glb;

/// A parsed model plus the auxiliary files it references.
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub document: Document,
    /// External image files keyed by their `uri` as written in the document.
    pub assets: BTreeMap<String, Vec<u8>>,
    pub is_glb: bool,
}

/// True if `path` has a `.gltf` or `.glb` extension.
pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gltf") || e.eq_ignore_ascii_case("glb"))
}

fn is_glb_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("glb"))
}

/// Decode a `data:` URI payload. Returns `None` for other URIs.
pub fn decode_data_uri(uri: &str) -> Option<Result<Vec<u8>, GltfError>> {
    let rest = uri.strip_prefix("data:")?;
    let Some((header, payload)) = rest.split_once(',') else {
        return Some(Err(GltfError::invalid("data URI has no payload separator")));
    };
    if !header.ends_with(";base64") {
        return Some(Ok(percent_decode_str(payload).collect()));
    }
    Some(
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| GltfError::invalid(format!("data URI is not valid base64: {}", e))),
    )
}

/// Percent-decode a relative `uri` into a file-system path.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, GltfError> {
    let decoded = percent_decode_str(uri)
        .decode_utf8()
        .map_err(|e| GltfError::invalid(format!("uri '{}' does not decode to UTF-8: {}", uri, e)))?;
    Ok(PathBuf::from(decoded.as_ref()))
}

fn read_relative(dir: &Path, uri: &str, what: &str) -> Result<Vec<u8>, GltfError> {
    let path = dir.join(uri_to_path(uri)?);
    fs::read(&path).map_err(|e| {
        GltfError::invalid(format!("cannot read {} '{}': {}", what, path.display(), e))
    })
}

/// Resolve every buffer payload of a glTF JSON graph.
fn load_buffers(json: &Value, dir: &Path, mut bin: Option<Vec<u8>>) -> Result<Vec<Vec<u8>>, GltfError> {
    let Some(buffers) = json.get("buffers").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(buffers.len());
    for (i, buffer) in buffers.iter().enumerate() {
        let data = match buffer.get("uri").and_then(Value::as_str) {
            Some(uri) => match decode_data_uri(uri) {
                Some(decoded) => decoded?,
                None => read_relative(dir, uri, "buffer")?,
            },
            None => bin.take().ok_or_else(|| {
                GltfError::invalid(format!("buffer {} has no uri and no binary chunk is available", i))
            })?,
        };
        out.push(data);
    }
    Ok(out)
}

/// Read external image files referenced by relative `uri`.
fn load_image_assets(json: &Value, dir: &Path) -> Result<BTreeMap<String, Vec<u8>>, GltfError> {
    let mut assets = BTreeMap::new();
    let images = json.get("images").and_then(Value::as_array);
    for image in images.into_iter().flatten() {
        let Some(uri) = image.get("uri").and_then(Value::as_str) else {
            continue;
        };
        if uri.starts_with("data:") || assets.contains_key(uri) {
            continue;
        }
        assets.insert(uri.to_string(), read_relative(dir, uri, "image")?);
    }
    Ok(assets)
}

/// Load a model from raw bytes. `dir` resolves relative URIs.
pub fn load_model_bytes(bytes: &[u8], is_glb: bool, dir: &Path) -> Result<ModelSource, GltfError> {
    let (json, bin) = if is_glb {
        let glb = read_glb(bytes)?;
        (glb.json, glb.bin)
    } else {
        (serde_json::from_slice::<Value>(bytes)?, None)
    };
    let buffers = load_buffers(&json, dir, bin)?;
    let assets = load_image_assets(&json, dir)?;
    let document = Document::from_json(json, buffers)?;
    Ok(ModelSource {
        document,
        assets,
        is_glb,
    })
}

/// Load a `.gltf` or `.glb` file and every resource it references.
pub fn load_model(path: &Path) -> Result<ModelSource, GltfError> {
    let bytes = fs::read(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "loading model");
    load_model_bytes(&bytes, is_glb_path(path), dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_model_file() {
        assert!(is_model_file(Path::new("a/scene.gltf")));
        assert!(is_model_file(Path::new("scene.GLB")));
        assert!(!is_model_file(Path::new("scene.obj")));
        assert!(!is_model_file(Path::new("gltf")));
    }

    #[test]
    fn test_decode_data_uri() {
        let bytes = decode_data_uri("data:application/octet-stream;base64,AQID").unwrap().unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert!(decode_data_uri("buffer.bin").is_none());
        assert!(decode_data_uri("data:;base64,@@@").unwrap().is_err());
    }

    #[test]
    fn test_load_gltf_with_external_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mesh.bin"), [0u8; 12]).unwrap();
        fs::write(dir.path().join("tex.png"), [0x89, 0x50]).unwrap();
        let json = json!({
            "asset": {"version": "2.0"},
            "images": [{"uri": "tex.png"}],
            "buffers": [
                {"uri": "mesh.bin", "byteLength": 12},
                {"uri": "data:application/octet-stream;base64,AAAAAA==", "byteLength": 4}
            ]
        });
        let path = dir.path().join("scene.gltf");
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        let model = load_model(&path).unwrap();
        assert!(!model.is_glb);
        assert_eq!(model.document.buffers.len(), 2);
        assert_eq!(model.document.buffers[1], vec![0u8; 4]);
        assert_eq!(model.assets.get("tex.png"), Some(&vec![0x89, 0x50]));
    }

    #[test]
    fn test_plain_data_uri_is_percent_decoded() {
        let bytes = decode_data_uri("data:text/plain,a%20b").unwrap().unwrap();
        assert_eq!(bytes, b"a b".to_vec());
    }

    #[test]
    fn test_encoded_uris_resolve_to_decoded_file_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("my tex.png"), [0x89, 0x50]).unwrap();
        fs::write(dir.path().join("mesh data.bin"), [7u8; 4]).unwrap();
        let json = json!({
            "asset": {"version": "2.0"},
            "images": [{"uri": "my%20tex.png"}],
            "buffers": [{"uri": "mesh%20data.bin", "byteLength": 4}]
        });

        let model = load_model_bytes(&serde_json::to_vec(&json).unwrap(), false, dir.path()).unwrap();
        assert_eq!(model.document.buffers, vec![vec![7u8; 4]]);
        // Keyed by the URI as written so image lookups still match.
        assert_eq!(model.assets.get("my%20tex.png"), Some(&vec![0x89, 0x50]));
        assert!(!model.assets.contains_key("my tex.png"));
    }

    #[test]
    fn test_uri_to_path() {
        assert_eq!(uri_to_path("a%20b/c.png").unwrap(), PathBuf::from("a b/c.png"));
        assert_eq!(uri_to_path("plain.png").unwrap(), PathBuf::from("plain.png"));
        assert!(uri_to_path("%FF.png").unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_missing_buffer_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let json = json!({"asset": {"version": "2.0"}, "buffers": [{"uri": "nope.bin", "byteLength": 4}]});
        let err = load_model_bytes(&serde_json::to_vec(&json).unwrap(), false, dir.path()).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_load_glb_uses_binary_chunk() {
        let json = json!({"asset": {"version": "2.0"}, "buffers": [{"byteLength": 4}]});
        let glb = crate::glb::write_glb(&json, &[5, 6, 7, 8]).unwrap();
        let model = load_model_bytes(&glb, true, Path::new(".")).unwrap();
        assert!(model.is_glb);
        assert_eq!(model.document.buffers, vec![vec![5, 6, 7, 8]]);
    }
}
