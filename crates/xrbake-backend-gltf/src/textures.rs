//! Power-of-two conversion of repeat-wrapped textures.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde_json::Value;

use crate::document::Document;
use crate::error::{GltfError, Warning, WarningCode};

/// glTF sampler wrap mode REPEAT (also the default when unset).
pub const WRAP_REPEAT: u64 = 10497;

/// Nearest power of two, rounding down unless `log2(size)` is at least 0.4
/// past an integer.
pub fn pot(size: u32) -> u32 {
    if size <= 1 {
        return 1;
    }
    let log = (size as f64).log2();
    let floor = log.floor();
    let exp = if log - floor < 0.4 { floor } else { floor + 1.0 };
    1u32 << (exp as u32).min(31)
}

/// Image URIs sampled by at least one texture with a REPEAT wrap on either axis.
pub fn repeat_wrapped_images(doc: &Document) -> BTreeSet<String> {
    let textures = doc.root.get("textures").and_then(Value::as_array);
    let images = doc.root.get("images").and_then(Value::as_array);
    let samplers = doc.root.get("samplers").and_then(Value::as_array);

    let mut out = BTreeSet::new();
    for texture in textures.into_iter().flatten() {
        let repeat = match texture.get("sampler").and_then(Value::as_u64) {
            None => true,
            Some(s) => {
                let sampler = samplers.and_then(|list| list.get(s as usize));
                let wrap = |key: &str| {
                    sampler
                        .and_then(|smp| smp.get(key))
                        .and_then(Value::as_u64)
                        .unwrap_or(WRAP_REPEAT)
                };
                wrap("wrapS") == WRAP_REPEAT || wrap("wrapT") == WRAP_REPEAT
            }
        };
        if !repeat {
            continue;
        }
        let uri = texture
            .get("source")
            .and_then(Value::as_u64)
            .and_then(|i| images?.get(i as usize))
            .and_then(|img| img.get("uri"))
            .and_then(Value::as_str);
        if let Some(uri) = uri {
            out.insert(uri.to_string());
        }
    }
    out
}

fn resize_to_pot(data: &[u8]) -> Result<Option<Vec<u8>>, GltfError> {
    let format = image::guess_format(data)?;
    let img = image::load_from_memory_with_format(data, format)?;
    let (width, height) = (pot(img.width()), pot(img.height()));
    if (width, height) == (img.width(), img.height()) {
        return Ok(None);
    }
    tracing::debug!(
        from_width = img.width(),
        from_height = img.height(),
        width,
        height,
        "resizing repeat texture"
    );
    let mut resized = img.resize_exact(width, height, FilterType::Triangle);
    if format == ImageFormat::Jpeg {
        resized = DynamicImage::ImageRgb8(resized.to_rgb8());
    }
    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, format)?;
    Ok(Some(out.into_inner()))
}

/// Resize every repeat-wrapped image asset to power-of-two dimensions.
///
/// Images are re-encoded in the format they were read in; assets already at
/// power-of-two size are left byte-identical. Images the codecs cannot handle
/// are skipped with a warning. Returns the number of converted assets.
pub fn convert_repeat_textures(
    doc: &Document,
    assets: &mut BTreeMap<String, Vec<u8>>,
    warnings: &mut Vec<Warning>,
) -> usize {
    let mut converted = 0;
    for uri in repeat_wrapped_images(doc) {
        let Some(data) = assets.get_mut(&uri) else {
            continue;
        };
        match resize_to_pot(data) {
            Ok(Some(resized)) => {
                *data = resized;
                converted += 1;
            }
            Ok(None) => {}
            Err(e) => warnings.push(Warning::new(
                WarningCode::TextureNotConverted,
                format!("repeat texture '{}' left as is: {}", uri, e),
            )),
        }
    }
    converted
}
