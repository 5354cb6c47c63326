//! Descriptors for the values a fused kernel reads and writes.
//!
//! Tensor storage lives with the caller; this crate only sees shapes,
//! strides, element types and stable identities, plus the scalar payloads
//! captured as source-time constants.

use serde::{Deserialize, Serialize};

use crate::shape_helpers::element_count;

/// Stable identity of an array for naming and constant lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArrayId(pub u64);

/// Element types expressible in generated Metal source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I1,
    Si8,
    Si16,
    Si32,
    Si64,
    Ui8,
    Ui16,
    Ui32,
    Ui64,
    F16,
    Bf16,
    F32,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 | DType::Si8 | DType::Ui8 => 1,
            DType::Si16 | DType::Ui16 | DType::F16 | DType::Bf16 => 2,
            DType::Si32 | DType::Ui32 | DType::F32 => 4,
            DType::Si64 | DType::Ui64 => 8,
        }
    }

    /// Scalar type as spelled in generated kernel source.
    pub fn source_name(self) -> &'static str {
        match self {
            DType::I1 => "bool",
            DType::Si8 => "int8_t",
            DType::Si16 => "int16_t",
            DType::Si32 => "int32_t",
            DType::Si64 => "int64_t",
            DType::Ui8 => "uint8_t",
            DType::Ui16 => "uint16_t",
            DType::Ui32 => "uint32_t",
            DType::Ui64 => "uint64_t",
            DType::F16 => "half",
            DType::Bf16 => "bfloat16_t",
            DType::F32 => "float",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::Bf16 | DType::F32)
    }
}

/// Scalar payload captured by value at generation time and inlined as a
/// typed literal instead of being bound as a kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    I1(bool),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl Literal {
    /// Literal text as spelled in generated kernel source. Non-finite floats
    /// print as the NAN/INFINITY macros so the emitted source always parses.
    pub fn source_text(self) -> String {
        match self {
            Literal::I1(value) => value.to_string(),
            Literal::Signed(value) => value.to_string(),
            Literal::Unsigned(value) => format!("{value}u"),
            Literal::Float(value) => format_float(value),
        }
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_negative() {
            "-INFINITY".to_string()
        } else {
            "INFINITY".to_string()
        }
    } else {
        let base = value.to_string();
        let needs_decimal = !base.contains('.') && !base.contains('e') && !base.contains('E');
        if needs_decimal {
            format!("{base}.0f")
        } else {
            format!("{base}f")
        }
    }
}

/// Shape/stride/dtype descriptor of one externally owned tensor value.
///
/// `data_size` is the element count of the underlying storage, which can
/// exceed the logical size for donated or oversized buffers; it drives the
/// wide-index decision on the contiguous path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Array {
    id: ArrayId,
    dtype: DType,
    shape: Vec<usize>,
    strides: Vec<usize>,
    data_size: usize,
}

impl Array {
    pub fn new(id: ArrayId, dtype: DType, shape: Vec<usize>, strides: Vec<usize>) -> Self {
        let data_size = element_count(&shape);
        Self {
            id,
            dtype,
            shape,
            strides,
            data_size,
        }
    }

    pub fn with_data_size(mut self, data_size: usize) -> Self {
        self.data_size = data_size;
        self
    }

    pub fn id(&self) -> ArrayId {
        self.id
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Logical element count.
    pub fn size(&self) -> usize {
        element_count(&self.shape)
    }

    /// Element count of the underlying storage.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn is_scalar(&self) -> bool {
        self.size() == 1
    }

    /// True when the strides match the row-major layout implied by the
    /// shape. Strides on size-1 axes never affect addressing and are
    /// ignored.
    pub fn is_row_contiguous(&self) -> bool {
        let mut expected = 1usize;
        for axis in (0..self.shape.len()).rev() {
            if self.shape[axis] == 1 {
                continue;
            }
            if self.strides[axis] != expected {
                return false;
            }
            expected *= self.shape[axis];
        }
        true
    }
}
