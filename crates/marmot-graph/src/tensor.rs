//! Tensor payloads and value metadata
//!
//! Initializers carry their data inline as typed payloads. A model saved in
//! external-data mode stores `External` location records instead; the loader
//! resolves those back to inline payloads before handing the model out.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element data types for graph tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit float
    F32,
    /// 8-bit unsigned integer (packed quantized payloads)
    U8,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
}

impl DataType {
    /// Size of a single element in bytes
    pub fn byte_size(&self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::U8 => 1,
            Self::I64 => 8,
        }
    }
}

/// Location of a tensor payload inside the external data sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalData {
    /// Element type of the stored payload
    pub dtype: DataType,
    /// Byte offset into the sidecar file
    pub offset: u64,
    /// Payload length in bytes
    pub len: u64,
}

/// Typed tensor payload, stored inline or in the external sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorValues {
    F32(Vec<f32>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    /// Placeholder written by external-data saves, resolved at load time
    External(ExternalData),
}

impl TensorValues {
    /// Element type of this payload
    pub fn dtype(&self) -> DataType {
        match self {
            Self::F32(_) => DataType::F32,
            Self::U8(_) => DataType::U8,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::External(ext) => ext.dtype,
        }
    }

    /// Number of elements in the payload
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::External(ext) => ext.len as usize / ext.dtype.byte_size(),
        }
    }

    /// Returns true if the payload holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inline f32 view, if this payload is inline f32 data
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Inline u8 view, if this payload is inline u8 data
    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Self::U8(v) => Some(v),
            _ => None,
        }
    }
}

/// A named constant tensor registered in a graph scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Tensor name, unique within its defining scope
    pub name: String,
    /// Dimensions (shape)
    pub dims: Vec<usize>,
    /// Payload
    pub values: TensorValues,
}

impl TensorData {
    fn checked(name: String, dims: Vec<usize>, values: TensorValues) -> Result<Self> {
        let expected: usize = dims.iter().product();
        let actual = values.len();
        if expected != actual {
            return Err(Error::DataLength {
                name,
                dims,
                expected,
                actual,
            });
        }
        Ok(Self { name, dims, values })
    }

    /// Creates an f32 tensor, validating data length against `dims`
    pub fn new_f32(name: impl Into<String>, dims: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        Self::checked(name.into(), dims, TensorValues::F32(data))
    }

    /// Creates a u8 tensor, validating data length against `dims`
    pub fn new_u8(name: impl Into<String>, dims: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        Self::checked(name.into(), dims, TensorValues::U8(data))
    }

    /// Creates an i64 tensor, validating data length against `dims`
    pub fn new_i64(name: impl Into<String>, dims: Vec<usize>, data: Vec<i64>) -> Result<Self> {
        Self::checked(name.into(), dims, TensorValues::I64(data))
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns true for rank-2 tensors
    pub fn is_matrix(&self) -> bool {
        self.dims.len() == 2
    }
}

/// Metadata describing a declared graph input or output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    /// Value name
    pub name: String,
    /// Dimensions (shape)
    pub dims: Vec<usize>,
    /// Element type
    pub dtype: DataType,
}

impl ValueInfo {
    /// Creates a new value description
    pub fn new(name: impl Into<String>, dims: Vec<usize>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dims,
            dtype,
        }
    }
}
