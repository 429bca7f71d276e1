//! Element types and the dynamically typed block payload.
//!
//! Blocks travel between backends as [`NdArray`], an n-dimensional
//! `ndarray::ArrayD` tagged with one of the supported [`DType`]s. Kernel code
//! is written once against the [`Element`] trait and instantiated per dtype
//! through the [`with_array!`](crate::with_array) and
//! [`map_array!`](crate::map_array) macros.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Canonical name, as accepted by `astype` and grid metadata.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Result type of an arithmetic operation between two dtypes.
    ///
    /// Booleans promote to integers for arithmetic; any float operand makes
    /// the result a float, `float32` only when both float operands are.
    pub fn promote(self, other: DType) -> DType {
        use DType::*;
        match (self, other) {
            (Float64, _) | (_, Float64) => Float64,
            (Float32, Int64) | (Int64, Float32) => Float64,
            (Float32, _) | (_, Float32) => Float32,
            _ => Int64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bool" | "bool_" => Ok(DType::Bool),
            "int64" | "int" | "i64" | "intp" => Ok(DType::Int64),
            "float32" | "f32" | "single" => Ok(DType::Float32),
            "float64" | "float" | "f64" | "double" => Ok(DType::Float64),
            other => Err(Error::unsupported("dtype", other)),
        }
    }
}

/// Scalar types that can be stored in an [`NdArray`].
pub trait Element:
    Copy + Clone + PartialEq + PartialOrd + fmt::Debug + Send + Sync + Default + 'static
{
    const DTYPE: DType;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;

    fn from_i64(v: i64) -> Self {
        Self::from_f64(v as f64)
    }

    fn zero() -> Self;
    fn one() -> Self;
    fn wrap(array: ArrayD<Self>) -> NdArray;
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn from_f64(v: f64) -> Self {
        v != 0.0
    }
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
    fn zero() -> Self {
        false
    }
    fn one() -> Self {
        true
    }
    fn wrap(array: ArrayD<Self>) -> NdArray {
        NdArray::Bool(array)
    }
}

impl Element for i64 {
    const DTYPE: DType = DType::Int64;

    fn from_f64(v: f64) -> Self {
        v as i64
    }
    fn from_i64(v: i64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn zero() -> Self {
        0
    }
    fn one() -> Self {
        1
    }
    fn wrap(array: ArrayD<Self>) -> NdArray {
        NdArray::Int64(array)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::Float32;

    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn wrap(array: ArrayD<Self>) -> NdArray {
        NdArray::Float32(array)
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::Float64;

    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn wrap(array: ArrayD<Self>) -> NdArray {
        NdArray::Float64(array)
    }
}

/// Run a dtype-generic expression against the array held by an [`NdArray`].
///
/// `with_array!(arr, a => a.len())` binds `a` to the inner `ArrayD<T>`.
#[macro_export]
macro_rules! with_array {
    ($arr:expr, $a:ident => $body:expr) => {
        match $arr {
            $crate::dtype::NdArray::Bool($a) => $body,
            $crate::dtype::NdArray::Int64($a) => $body,
            $crate::dtype::NdArray::Float32($a) => $body,
            $crate::dtype::NdArray::Float64($a) => $body,
        }
    };
}

/// Like [`with_array!`], but rewraps the resulting `ArrayD` in the same variant.
#[macro_export]
macro_rules! map_array {
    ($arr:expr, $a:ident => $body:expr) => {
        match $arr {
            $crate::dtype::NdArray::Bool($a) => $crate::dtype::NdArray::Bool($body),
            $crate::dtype::NdArray::Int64($a) => $crate::dtype::NdArray::Int64($body),
            $crate::dtype::NdArray::Float32($a) => $crate::dtype::NdArray::Float32($body),
            $crate::dtype::NdArray::Float64($a) => $crate::dtype::NdArray::Float64($body),
        }
    };
}

/// A dynamically typed n-dimensional block.
#[derive(Debug, Clone, PartialEq)]
pub enum NdArray {
    Bool(ArrayD<bool>),
    Int64(ArrayD<i64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

impl NdArray {
    /// Array of zeros (or `false`) with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Self::filled(shape, dtype, 0.0)
    }

    /// Array of ones (or `true`) with the given shape and dtype.
    pub fn ones(shape: &[usize], dtype: DType) -> Self {
        Self::filled(shape, dtype, 1.0)
    }

    fn filled(shape: &[usize], dtype: DType, value: f64) -> Self {
        fn build<T: Element>(shape: &[usize], value: f64) -> NdArray {
            T::wrap(ArrayD::from_elem(IxDyn(shape), T::from_f64(value)))
        }
        match dtype {
            DType::Bool => build::<bool>(shape, value),
            DType::Int64 => build::<i64>(shape, value),
            DType::Float32 => build::<f32>(shape, value),
            DType::Float64 => build::<f64>(shape, value),
        }
    }

    /// Zero-dimensional array holding a single value.
    pub fn scalar<T: Element>(value: T) -> Self {
        T::wrap(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Build an array from a row-major vector.
    pub fn from_vec<T: Element>(shape: &[usize], data: Vec<T>) -> Result<Self> {
        let len = data.len();
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(T::wrap)
            .map_err(|_| Error::shape_mismatch(shape, &[len]))
    }

    pub fn dtype(&self) -> DType {
        match self {
            NdArray::Bool(_) => DType::Bool,
            NdArray::Int64(_) => DType::Int64,
            NdArray::Float32(_) => DType::Float32,
            NdArray::Float64(_) => DType::Float64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        with_array!(self, a => a.len())
    }

    /// Convert every element to `dtype`, copying the data.
    pub fn cast(&self, dtype: DType) -> NdArray {
        if self.dtype() == dtype {
            return self.clone();
        }
        match dtype {
            DType::Bool => NdArray::Bool(self.to_typed::<bool>()),
            DType::Int64 => NdArray::Int64(self.to_typed::<i64>()),
            DType::Float32 => NdArray::Float32(self.to_typed::<f32>()),
            DType::Float64 => NdArray::Float64(self.to_typed::<f64>()),
        }
    }

    /// Copy of the data converted to element type `T`.
    pub fn to_typed<T: Element>(&self) -> ArrayD<T> {
        match self {
            NdArray::Bool(a) => a.mapv(|x| T::from_f64(x.to_f64())),
            NdArray::Int64(a) => a.mapv(T::from_i64),
            NdArray::Float32(a) => a.mapv(|x| T::from_f64(x as f64)),
            NdArray::Float64(a) => a.mapv(T::from_f64),
        }
    }

    /// Values as `f64`, the common type used by order statistics.
    pub fn to_f64(&self) -> ArrayD<f64> {
        self.to_typed::<f64>()
    }

    /// Reverse the axes (a full transpose), sharing no storage with `self`.
    pub fn transposed(&self) -> NdArray {
        map_array!(self, a => a.clone().reversed_axes())
    }

    /// Transpose when `flag` is set, otherwise clone.
    pub fn transposed_if(&self, flag: bool) -> NdArray {
        if flag {
            self.transposed()
        } else {
            self.clone()
        }
    }

    /// Reshape in row-major order.
    pub fn reshape(&self, shape: &[usize]) -> Result<NdArray> {
        let size: usize = shape.iter().product();
        if size != self.size() {
            return Err(Error::shape_mismatch(shape, self.shape()));
        }
        with_array!(self, a => NdArray::from_vec(shape, a.iter().cloned().collect()))
    }

    /// The single element of a zero-dimensional or one-element array.
    pub fn item_f64(&self) -> Result<f64> {
        if self.size() != 1 {
            return Err(Error::invalid(
                "array",
                format!("expected a single element, got shape {:?}", self.shape()),
            ));
        }
        Ok(with_array!(self, a => a.iter().next().map(|x| x.to_f64()).unwrap_or_default()))
    }
}

impl<T: Element> From<ArrayD<T>> for NdArray {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dtype_names_roundtrip() {
        for dtype in [DType::Bool, DType::Int64, DType::Float32, DType::Float64] {
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
        }
        assert_eq!("float".parse::<DType>().unwrap(), DType::Float64);
        assert!("complex128".parse::<DType>().is_err());
    }

    #[test]
    fn test_promotion() {
        assert_eq!(DType::Int64.promote(DType::Float32), DType::Float64);
        assert_eq!(DType::Float32.promote(DType::Float32), DType::Float32);
        assert_eq!(DType::Bool.promote(DType::Bool), DType::Int64);
    }

    #[test]
    fn test_cast_truncates_and_preserves_large_ints() {
        let a = NdArray::from(array![1.7, -2.2].into_dyn());
        assert_eq!(a.cast(DType::Int64), NdArray::from(array![1i64, -2].into_dyn()));

        let big = NdArray::from(array![i64::MAX - 1].into_dyn());
        assert_eq!(big.cast(DType::Int64), big);
    }

    #[test]
    fn test_reshape_row_major() {
        let a = NdArray::from(array![[1i64, 2, 3], [4, 5, 6]].into_dyn());
        let r = a.reshape(&[3, 2]).unwrap();
        assert_eq!(r, NdArray::from(array![[1i64, 2], [3, 4], [5, 6]].into_dyn()));
        assert!(a.reshape(&[4]).is_err());
    }
}
