//! RGBD encoding of HDR colors into unit-range channels.
//!
//! A color whose largest component exceeds 1 is divided by that component and
//! the divisor's reciprocal is stored in alpha; decoders recover the HDR value
//! as `rgb / a`. Colors already within range keep `a == 1`.

/// Encode a linear HDR color. Negative components are clamped to zero.
pub fn encode(rgb: [f32; 3]) -> [f32; 4] {
    let [r, g, b] = rgb.map(|c| c.max(0.0));
    let m = r.max(g).max(b);
    let d = if m > 1.0 { 1.0 / m } else { 1.0 };
    [(r * d).min(1.0), (g * d).min(1.0), (b * d).min(1.0), d]
}

/// Decode an RGBD color back to linear HDR.
pub fn decode(rgbd: [f32; 4]) -> [f32; 3] {
    let d = rgbd[3];
    if d <= 0.0 {
        return [0.0; 3];
    }
    [rgbd[0] / d, rgbd[1] / d, rgbd[2] / d]
}

/// Decode an 8-bit RGBD texel.
pub fn decode_u8(texel: [u8; 4]) -> [f32; 3] {
    decode(texel.map(|c| c as f32 / 255.0))
}
