//! Typed, bounds-checked views over accessor data.
//!
//! An accessor describes its elements as a (component type, shape) pair; a view
//! pairs that description with a byte slice, a start offset and an element
//! stride. All reads and writes are little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::GltfError;

/// glTF `bufferView.target` for vertex attribute data.
pub const TARGET_ARRAY_BUFFER: u32 = 34962;
/// glTF `bufferView.target` for index data.
pub const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;

/// Component type of an accessor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    /// Parse a glTF `componentType` code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            5120 => Some(ComponentType::I8),
            5121 => Some(ComponentType::U8),
            5122 => Some(ComponentType::I16),
            5123 => Some(ComponentType::U16),
            5125 => Some(ComponentType::U32),
            5126 => Some(ComponentType::F32),
            _ => None,
        }
    }

    /// Returns the glTF `componentType` code.
    pub fn code(self) -> u32 {
        match self {
            ComponentType::I8 => 5120,
            ComponentType::U8 => 5121,
            ComponentType::I16 => 5122,
            ComponentType::U16 => 5123,
            ComponentType::U32 => 5125,
            ComponentType::F32 => 5126,
        }
    }

    /// Size of one component in bytes.
    pub fn size(self) -> usize {
        match self {
            ComponentType::I8 | ComponentType::U8 => 1,
            ComponentType::I16 | ComponentType::U16 => 2,
            ComponentType::U32 | ComponentType::F32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        self == ComponentType::F32
    }
}

/// Shape of an accessor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorShape {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl AccessorShape {
    /// Parse a glTF accessor `type` name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCALAR" => Some(AccessorShape::Scalar),
            "VEC2" => Some(AccessorShape::Vec2),
            "VEC3" => Some(AccessorShape::Vec3),
            "VEC4" => Some(AccessorShape::Vec4),
            "MAT2" => Some(AccessorShape::Mat2),
            "MAT3" => Some(AccessorShape::Mat3),
            "MAT4" => Some(AccessorShape::Mat4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessorShape::Scalar => "SCALAR",
            AccessorShape::Vec2 => "VEC2",
            AccessorShape::Vec3 => "VEC3",
            AccessorShape::Vec4 => "VEC4",
            AccessorShape::Mat2 => "MAT2",
            AccessorShape::Mat3 => "MAT3",
            AccessorShape::Mat4 => "MAT4",
        }
    }

    /// Number of components per element.
    pub fn arity(self) -> usize {
        match self {
            AccessorShape::Scalar => 1,
            AccessorShape::Vec2 => 2,
            AccessorShape::Vec3 => 3,
            AccessorShape::Vec4 | AccessorShape::Mat2 => 4,
            AccessorShape::Mat3 => 9,
            AccessorShape::Mat4 => 16,
        }
    }

    /// Float vector shape occupying `bytes` bytes, used for stride fillers.
    pub fn float_filler(bytes: usize) -> Option<Self> {
        match bytes {
            4 => Some(AccessorShape::Scalar),
            8 => Some(AccessorShape::Vec2),
            12 => Some(AccessorShape::Vec3),
            16 => Some(AccessorShape::Vec4),
            _ => None,
        }
    }
}

/// Element layout: component type plus shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementFormat {
    pub component: ComponentType,
    pub shape: AccessorShape,
}

impl ElementFormat {
    pub fn new(component: ComponentType, shape: AccessorShape) -> Self {
        Self { component, shape }
    }

    /// Tightly packed element size in bytes.
    pub fn size(&self) -> usize {
        self.component.size() * self.shape.arity()
    }

    /// Element size rounded up to the 4-byte vertex attribute alignment.
    pub fn aligned_size(&self) -> usize {
        align4(self.size())
    }
}

/// Round `n` up to the next multiple of 4.
#[inline]
pub fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn check_range(
    len: usize,
    offset: usize,
    stride: usize,
    count: usize,
    format: ElementFormat,
) -> Result<(), GltfError> {
    if stride < format.size() {
        return Err(GltfError::invalid(format!(
            "stride {} is smaller than element size {}",
            stride,
            format.size()
        )));
    }
    if count == 0 {
        return Ok(());
    }
    let end = (count - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(offset))
        .and_then(|v| v.checked_add(format.size()))
        .ok_or_else(|| GltfError::invalid("accessor range overflows"))?;
    if end > len {
        return Err(GltfError::invalid(format!(
            "accessor reads {} bytes but only {} are available",
            end, len
        )));
    }
    Ok(())
}

fn read_component(bytes: &[u8], component: ComponentType) -> f64 {
    match component {
        ComponentType::I8 => bytes[0] as i8 as f64,
        ComponentType::U8 => bytes[0] as f64,
        ComponentType::I16 => LittleEndian::read_i16(bytes) as f64,
        ComponentType::U16 => LittleEndian::read_u16(bytes) as f64,
        ComponentType::U32 => LittleEndian::read_u32(bytes) as f64,
        ComponentType::F32 => LittleEndian::read_f32(bytes) as f64,
    }
}

fn write_component(bytes: &mut [u8], component: ComponentType, value: f64) {
    match component {
        ComponentType::I8 => bytes[0] = value as i8 as u8,
        ComponentType::U8 => bytes[0] = value as u8,
        ComponentType::I16 => LittleEndian::write_i16(bytes, value as i16),
        ComponentType::U16 => LittleEndian::write_u16(bytes, value as u16),
        ComponentType::U32 => LittleEndian::write_u32(bytes, value as u32),
        ComponentType::F32 => LittleEndian::write_f32(bytes, value as f32),
    }
}

/// Read-only typed view over strided element data.
#[derive(Debug, Clone, Copy)]
pub struct AttributeView<'a> {
    data: &'a [u8],
    offset: usize,
    stride: usize,
    count: usize,
    format: ElementFormat,
}

impl<'a> AttributeView<'a> {
    /// Create a view, validating that every element lies inside `data`.
    pub fn new(
        data: &'a [u8],
        offset: usize,
        stride: usize,
        count: usize,
        format: ElementFormat,
    ) -> Result<Self, GltfError> {
        check_range(data.len(), offset, stride, count, format)?;
        Ok(Self {
            data,
            offset,
            stride,
            count,
            format,
        })
    }

    /// Create a view over tightly packed elements.
    pub fn packed(data: &'a [u8], count: usize, format: ElementFormat) -> Result<Self, GltfError> {
        Self::new(data, 0, format.size(), count, format)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn format(&self) -> ElementFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Raw bytes of element `index` (tightly packed length).
    pub fn element_bytes(&self, index: usize) -> &'a [u8] {
        assert!(index < self.count, "element {} out of {}", index, self.count);
        let start = self.offset + index * self.stride;
        &self.data[start..start + self.format.size()]
    }

    /// Component `component` of element `index`, converted to f64 without normalization.
    pub fn get(&self, index: usize, component: usize) -> f64 {
        let size = self.format.component.size();
        let bytes = self.element_bytes(index);
        read_component(&bytes[component * size..], self.format.component)
    }

    pub fn get_vec2(&self, index: usize) -> [f32; 2] {
        [self.get(index, 0) as f32, self.get(index, 1) as f32]
    }

    pub fn get_vec3(&self, index: usize) -> [f32; 3] {
        [
            self.get(index, 0) as f32,
            self.get(index, 1) as f32,
            self.get(index, 2) as f32,
        ]
    }

    /// Read a scalar element as an index value.
    pub fn get_index(&self, index: usize) -> u32 {
        self.get(index, 0) as u32
    }
}

/// Mutable typed view over strided element data.
#[derive(Debug)]
pub struct AttributeViewMut<'a> {
    data: &'a mut [u8],
    offset: usize,
    stride: usize,
    count: usize,
    format: ElementFormat,
}

impl<'a> AttributeViewMut<'a> {
    pub fn new(
        data: &'a mut [u8],
        offset: usize,
        stride: usize,
        count: usize,
        format: ElementFormat,
    ) -> Result<Self, GltfError> {
        check_range(data.len(), offset, stride, count, format)?;
        Ok(Self {
            data,
            offset,
            stride,
            count,
            format,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn set(&mut self, index: usize, component: usize, value: f64) {
        assert!(index < self.count, "element {} out of {}", index, self.count);
        let size = self.format.component.size();
        let start = self.offset + index * self.stride + component * size;
        write_component(&mut self.data[start..start + size], self.format.component, value);
    }

    /// Copy one element's raw bytes into slot `index`.
    pub fn set_element_bytes(&mut self, index: usize, bytes: &[u8]) {
        assert!(index < self.count, "element {} out of {}", index, self.count);
        assert_eq!(bytes.len(), self.format.size());
        let start = self.offset + index * self.stride;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

/// Running per-component extrema.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl Bounds {
    pub fn new(arity: usize) -> Self {
        Self {
            min: vec![f64::INFINITY; arity],
            max: vec![f64::NEG_INFINITY; arity],
        }
    }

    #[inline]
    pub fn include(&mut self, component: usize, value: f64) {
        if value < self.min[component] {
            self.min[component] = value;
        }
        if value > self.max[component] {
            self.max[component] = value;
        }
    }

    /// Bounds over every element of `view`, or `None` when the view is empty.
    pub fn of_view(view: &AttributeView<'_>) -> Option<Self> {
        if view.count() == 0 {
            return None;
        }
        let arity = view.format().shape.arity();
        let mut bounds = Bounds::new(arity);
        for i in 0..view.count() {
            for c in 0..arity {
                bounds.include(c, view.get(i, c));
            }
        }
        Some(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_component_codes_roundtrip() {
        for code in [5120, 5121, 5122, 5123, 5125, 5126] {
            let ct = ComponentType::from_code(code).unwrap();
            assert_eq!(ct.code() as u64, code);
        }
        assert!(ComponentType::from_code(5124).is_none());
    }

    #[test]
    fn test_element_sizes() {
        let pos = ElementFormat::new(ComponentType::F32, AccessorShape::Vec3);
        assert_eq!(pos.size(), 12);
        assert_eq!(pos.aligned_size(), 12);

        let joints = ElementFormat::new(ComponentType::U8, AccessorShape::Vec3);
        assert_eq!(joints.size(), 3);
        assert_eq!(joints.aligned_size(), 4);

        let m3 = ElementFormat::new(ComponentType::I16, AccessorShape::Mat3);
        assert_eq!(m3.size(), 18);
        assert_eq!(m3.aligned_size(), 20);
    }

    #[test]
    fn test_strided_read() {
        // Two interleaved vertices: position (3 floats) + pad float.
        let data = f32_bytes(&[1.0, 2.0, 3.0, 9.0, 4.0, 5.0, 6.0, 9.0]);
        let fmt = ElementFormat::new(ComponentType::F32, AccessorShape::Vec3);
        let view = AttributeView::new(&data, 0, 16, 2, fmt).unwrap();
        assert_eq!(view.get_vec3(0), [1.0, 2.0, 3.0]);
        assert_eq!(view.get_vec3(1), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_view_rejects_out_of_bounds() {
        let data = vec![0u8; 20];
        let fmt = ElementFormat::new(ComponentType::F32, AccessorShape::Vec3);
        assert!(AttributeView::new(&data, 0, 12, 2, fmt).is_err());
        assert!(AttributeView::new(&data, 0, 8, 1, fmt).is_err());
        assert!(AttributeView::new(&data, 8, 12, 1, fmt).is_ok());
    }

    #[test]
    fn test_mutable_write_and_bounds() {
        let fmt = ElementFormat::new(ComponentType::U16, AccessorShape::Vec2);
        let mut data = vec![0u8; 16];
        {
            let mut view = AttributeViewMut::new(&mut data, 0, 8, 2, fmt).unwrap();
            view.set(0, 0, 7.0);
            view.set(0, 1, 300.0);
            view.set(1, 0, 2.0);
            view.set(1, 1, 900.0);
        }
        let view = AttributeView::new(&data, 0, 8, 2, fmt).unwrap();
        let bounds = Bounds::of_view(&view).unwrap();
        assert_eq!(bounds.min, vec![2.0, 300.0]);
        assert_eq!(bounds.max, vec![7.0, 900.0]);
    }

    #[test]
    fn test_signed_components() {
        let fmt = ElementFormat::new(ComponentType::I8, AccessorShape::Scalar);
        let data = vec![0xFFu8, 0x7F];
        let view = AttributeView::packed(&data, 2, fmt).unwrap();
        assert_eq!(view.get(0, 0), -1.0);
        assert_eq!(view.get(1, 0), 127.0);
    }

    #[test]
    fn test_filler_shapes() {
        assert_eq!(AccessorShape::float_filler(4), Some(AccessorShape::Scalar));
        assert_eq!(AccessorShape::float_filler(16), Some(AccessorShape::Vec4));
        assert_eq!(AccessorShape::float_filler(20), None);
    }
}
