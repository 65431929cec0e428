//! Captured argument and return values
//!
//! Every observed value is reduced at capture time to a tagged variant:
//! a scalar, a dense array, a sparse array, or an unrepresentable
//! placeholder. Which variant a type produces is decided statically by its
//! [`Capture`] implementation, never by attempting serialization and
//! catching the failure.
//!
//! Element values are stored as `f64` together with their original
//! [`DType`]. Capture is not bit-exact for `u64`/`i64` magnitudes above 2^53
//! or for extended-precision inputs.

use crate::error::{Result, TraceError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Argument name → captured value, ordered for deterministic encoding
pub type ArgumentMap = BTreeMap<String, CapturedValue>;

/// Element type of a captured value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F16,
    F32,
    F64,
    /// x87 extended precision
    F80,
    Text,
    Object,
}

impl DType {
    /// Storage width in bits (0 for object data)
    pub fn bit_width(self) -> u32 {
        match self {
            DType::Bool => 1,
            DType::U8 | DType::I8 | DType::Text => 8,
            DType::U16 | DType::I16 | DType::F16 => 16,
            DType::U32 | DType::I32 | DType::F32 => 32,
            DType::U64 | DType::I64 | DType::F64 => 64,
            DType::F80 => 80,
            DType::Object => 0,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64 | DType::F80)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::U16 => "u16",
            DType::I16 => "i16",
            DType::U32 => "u32",
            DType::I32 => "i32",
            DType::U64 => "u64",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::F80 => "f80",
            DType::Text => "text",
            DType::Object => "object",
        }
    }
}

/// Row-major dense array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseArray {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub values: Vec<f64>,
}

fn fills_shape(shape: &[usize], len: usize) -> bool {
    shape.iter().product::<usize>() == len
}

impl DenseArray {
    /// Create an array, checking that `values` fills `shape` exactly
    pub fn new(shape: Vec<usize>, dtype: DType, values: Vec<f64>) -> Result<Self> {
        if !fills_shape(&shape, values.len()) {
            return Err(TraceError::ShapeMismatch {
                expected: shape,
                found: vec![values.len()],
            });
        }
        Ok(Self {
            shape,
            dtype,
            values,
        })
    }

    /// Whether `values` fills `shape`; replayed arrays are not checked on decode
    pub fn is_well_formed(&self) -> bool {
        fills_shape(&self.shape, self.values.len())
    }

    /// One-dimensional array over `values`
    pub fn from_vec(dtype: DType, values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            dtype,
            values,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Coordinate-format sparse array (flat row-major indices)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseArray {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseArray {
    pub fn new(shape: Vec<usize>, dtype: DType, indices: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let size: usize = shape.iter().product();
        if indices.len() != values.len() || indices.iter().any(|&i| i >= size) {
            return Err(TraceError::ShapeMismatch {
                expected: shape,
                found: vec![indices.len(), values.len()],
            });
        }
        Ok(Self {
            shape,
            dtype,
            indices,
            values,
        })
    }

    /// Number of stored (non-zero) entries
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Sum of the stored entries
    pub fn mass(&self) -> f64 {
        self.values.iter().sum()
    }
}

/// A value observed at a call boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CapturedValue {
    Scalar { value: f64, dtype: DType },
    Dense(DenseArray),
    Sparse(SparseArray),
    /// Placeholder for values with no numeric representation
    Unrepresentable { type_name: String },
}

impl CapturedValue {
    pub fn scalar(value: f64, dtype: DType) -> Self {
        CapturedValue::Scalar { value, dtype }
    }

    pub fn unrepresentable(type_name: impl Into<String>) -> Self {
        CapturedValue::Unrepresentable {
            type_name: type_name.into(),
        }
    }

    pub fn is_representable(&self) -> bool {
        !matches!(self, CapturedValue::Unrepresentable { .. })
    }

    pub fn dtype(&self) -> Option<DType> {
        match self {
            CapturedValue::Scalar { dtype, .. } => Some(*dtype),
            CapturedValue::Dense(array) => Some(array.dtype),
            CapturedValue::Sparse(array) => Some(array.dtype),
            CapturedValue::Unrepresentable { .. } => None,
        }
    }

    /// Element shape; scalars are zero-dimensional
    pub fn shape(&self) -> Vec<usize> {
        match self {
            CapturedValue::Scalar { .. } | CapturedValue::Unrepresentable { .. } => Vec::new(),
            CapturedValue::Dense(array) => array.shape.clone(),
            CapturedValue::Sparse(array) => array.shape.clone(),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            CapturedValue::Scalar { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// Conversion of an observed value into a [`CapturedValue`]
///
/// Implementations must not mutate or retain the observed value.
pub trait Capture {
    fn capture(&self) -> CapturedValue;
}

/// Numeric element types that can populate arrays
pub trait Element: Copy {
    const DTYPE: DType;
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }

            impl Capture for $ty {
                fn capture(&self) -> CapturedValue {
                    CapturedValue::scalar(Element::to_f64(*self), DType::$dtype)
                }
            }
        )*
    };
}

impl_element!(
    f64 => F64,
    f32 => F32,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    isize => I64,
    usize => U64,
);

impl Element for bool {
    const DTYPE: DType = DType::Bool;
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

impl Capture for bool {
    fn capture(&self) -> CapturedValue {
        CapturedValue::scalar(self.to_f64(), DType::Bool)
    }
}

impl<T: Element> Capture for [T] {
    fn capture(&self) -> CapturedValue {
        CapturedValue::Dense(DenseArray::from_vec(
            T::DTYPE,
            self.iter().map(|v| v.to_f64()).collect(),
        ))
    }
}

impl<T: Element> Capture for Vec<T> {
    fn capture(&self) -> CapturedValue {
        self.as_slice().capture()
    }
}

impl<T: Element, const N: usize> Capture for [T; N] {
    fn capture(&self) -> CapturedValue {
        self.as_slice().capture()
    }
}

impl Capture for str {
    fn capture(&self) -> CapturedValue {
        CapturedValue::Dense(DenseArray::from_vec(
            DType::Text,
            self.bytes().map(f64::from).collect(),
        ))
    }
}

impl Capture for String {
    fn capture(&self) -> CapturedValue {
        self.as_str().capture()
    }
}

impl<T: Capture> Capture for Option<T> {
    fn capture(&self) -> CapturedValue {
        match self {
            Some(value) => value.capture(),
            None => CapturedValue::unrepresentable("None"),
        }
    }
}

impl Capture for () {
    fn capture(&self) -> CapturedValue {
        CapturedValue::unrepresentable("()")
    }
}

impl<T: Capture + ?Sized> Capture for &T {
    fn capture(&self) -> CapturedValue {
        (**self).capture()
    }
}

impl Capture for CapturedValue {
    fn capture(&self) -> CapturedValue {
        self.clone()
    }
}

impl Capture for DenseArray {
    fn capture(&self) -> CapturedValue {
        CapturedValue::Dense(self.clone())
    }
}

impl Capture for SparseArray {
    fn capture(&self) -> CapturedValue {
        CapturedValue::Sparse(self.clone())
    }
}

/// Marks a value as observed but not numerically representable
#[derive(Debug, Clone, Copy)]
pub struct Opaque<'a, T: ?Sized>(pub &'a T);

impl<T: ?Sized> Capture for Opaque<'_, T> {
    fn capture(&self) -> CapturedValue {
        CapturedValue::unrepresentable(std::any::type_name::<T>())
    }
}

/// Positional argument lists that can be captured under parameter names
///
/// Implemented for tuples of up to six [`Capture`] values. Missing or empty
/// parameter names fall back to `arg<N>`.
pub trait CaptureArgs {
    const ARITY: usize;
    fn capture_args(&self, names: &[String]) -> ArgumentMap;
}

/// Name for the parameter at `index`, degrading to a positional name
pub fn param_name(names: &[String], index: usize) -> String {
    match names.get(index) {
        Some(name) if !name.is_empty() => name.clone(),
        _ => format!("arg{}", index),
    }
}

impl CaptureArgs for () {
    const ARITY: usize = 0;
    fn capture_args(&self, _names: &[String]) -> ArgumentMap {
        ArgumentMap::new()
    }
}

macro_rules! impl_capture_args {
    ($arity:expr; $($idx:tt $ty:ident),+) => {
        impl<$($ty: Capture),+> CaptureArgs for ($($ty,)+) {
            const ARITY: usize = $arity;
            fn capture_args(&self, names: &[String]) -> ArgumentMap {
                let mut args = ArgumentMap::new();
                $(
                    args.insert(param_name(names, $idx), self.$idx.capture());
                )+
                args
            }
        }
    };
}

impl_capture_args!(1; 0 A);
impl_capture_args!(2; 0 A, 1 B);
impl_capture_args!(3; 0 A, 1 B, 2 C);
impl_capture_args!(4; 0 A, 1 B, 2 C, 3 D);
impl_capture_args!(5; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_capture_args!(6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
