//! Block operations, grouped by family.
//!
//! Every public function here is pure: it reads its block arguments and
//! returns new blocks. The only randomness comes from explicit
//! [`RngParams`](tessera_core::RngParams).

use ndarray::{Array2, ArrayD, ArrayView2, Ix2, LinalgScalar};
use num_traits::{Float, Num};
use tessera_core::{DType, Element, Error, NdArray, Result};

/// Run a generic expression against the array held by a [`NumArray`],
/// wrapping the result back into an [`NdArray`].
macro_rules! map_numeric {
    ($arr:expr, $a:ident => $body:expr) => {
        match $arr {
            $crate::ops::NumArray::I64($a) => ::tessera_core::NdArray::from($body),
            $crate::ops::NumArray::F32($a) => ::tessera_core::NdArray::from($body),
            $crate::ops::NumArray::F64($a) => ::tessera_core::NdArray::from($body),
        }
    };
}

/// Like [`map_numeric!`] for two arrays already converted to the same type.
macro_rules! map_numeric_pair {
    ($x:expr, $y:expr, $a:ident, $b:ident => $body:expr) => {
        match ($x, $y) {
            ($crate::ops::NumArray::I64($a), $crate::ops::NumArray::I64($b)) => {
                Ok(::tessera_core::NdArray::from($body))
            }
            ($crate::ops::NumArray::F32($a), $crate::ops::NumArray::F32($b)) => {
                Ok(::tessera_core::NdArray::from($body))
            }
            ($crate::ops::NumArray::F64($a), $crate::ops::NumArray::F64($b)) => {
                Ok(::tessera_core::NdArray::from($body))
            }
            _ => Err(::tessera_core::Error::invalid(
                "operands",
                "operands were not converted to a common type",
            )),
        }
    };
}

pub(crate) use map_numeric;
pub(crate) use map_numeric_pair;

pub mod argop;
pub mod assembly;
pub mod binary;
pub mod compare;
pub mod construct;
pub mod elementwise;
pub mod linalg;
pub mod order_stats;
pub mod random;
pub mod reduce;

/// Element types that support arithmetic. Booleans are promoted to `i64`
/// before arithmetic.
pub trait Numeric: Element + LinalgScalar + Num + std::iter::Sum {
    /// Addition that wraps on integer overflow, like numpy.
    fn add_wrapping(self, other: Self) -> Self;
    fn sub_wrapping(self, other: Self) -> Self;
    fn mul_wrapping(self, other: Self) -> Self;
    fn floor_div(self, other: Self) -> Self;
    /// Remainder with the sign of the divisor.
    fn modulo(self, other: Self) -> Self;
    fn power(self, exp: Self) -> Self;
    fn is_nan_value(self) -> bool {
        self != self
    }

    /// Matrix product `a · b`.
    fn matrix_product(a: ArrayView2<'_, Self>, b: ArrayView2<'_, Self>) -> Array2<Self> {
        a.dot(&b)
    }
}

impl Numeric for i64 {
    fn add_wrapping(self, other: Self) -> Self {
        self.wrapping_add(other)
    }

    fn sub_wrapping(self, other: Self) -> Self {
        self.wrapping_sub(other)
    }

    fn mul_wrapping(self, other: Self) -> Self {
        self.wrapping_mul(other)
    }

    fn floor_div(self, other: Self) -> Self {
        if other == 0 {
            return 0;
        }
        let q = self.wrapping_div(other);
        if self.wrapping_rem(other) != 0 && ((self < 0) != (other < 0)) {
            q - 1
        } else {
            q
        }
    }

    fn modulo(self, other: Self) -> Self {
        if other == 0 {
            return 0;
        }
        let r = self.wrapping_rem(other);
        if r != 0 && ((r < 0) != (other < 0)) {
            r + other
        } else {
            r
        }
    }

    fn power(self, exp: Self) -> Self {
        if exp < 0 {
            return match self {
                1 => 1,
                -1 if exp % 2 == 0 => 1,
                -1 => -1,
                _ => 0,
            };
        }
        self.wrapping_pow(exp.min(u32::MAX as i64) as u32)
    }

    /// Wraps on overflow, as the elementwise operators do; ndarray's `dot`
    /// would panic in debug builds.
    fn matrix_product(a: ArrayView2<'_, Self>, b: ArrayView2<'_, Self>) -> Array2<Self> {
        let k = a.ncols();
        Array2::from_shape_fn((a.nrows(), b.ncols()), |(i, j)| {
            (0..k).fold(0i64, |acc, l| acc.wrapping_add(a[[i, l]].wrapping_mul(b[[l, j]])))
        })
    }
}

macro_rules! impl_float_numeric {
    ($t:ty) => {
        impl Numeric for $t {
            fn add_wrapping(self, other: Self) -> Self {
                self + other
            }

            fn sub_wrapping(self, other: Self) -> Self {
                self - other
            }

            fn mul_wrapping(self, other: Self) -> Self {
                self * other
            }

            fn floor_div(self, other: Self) -> Self {
                (self / other).floor()
            }

            fn modulo(self, other: Self) -> Self {
                let r = self % other;
                if r != 0.0 && ((r < 0.0) != (other < 0.0)) {
                    r + other
                } else {
                    r
                }
            }

            fn power(self, exp: Self) -> Self {
                self.powf(exp)
            }
        }
    };
}

impl_float_numeric!(f32);
impl_float_numeric!(f64);

/// Floating-point element types.
pub trait FloatElement: Numeric + Float {}

impl FloatElement for f32 {}
impl FloatElement for f64 {}

/// A block restricted to arithmetic element types.
#[derive(Debug, Clone)]
pub enum NumArray {
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl NumArray {
    /// Copy of `arr` with booleans converted to `i64`.
    pub fn new(arr: &NdArray) -> Self {
        Self::from_owned(arr.clone())
    }

    pub fn from_owned(arr: NdArray) -> Self {
        match arr {
            NdArray::Bool(_) => NumArray::I64(arr.to_typed::<i64>()),
            NdArray::Int64(a) => NumArray::I64(a),
            NdArray::Float32(a) => NumArray::F32(a),
            NdArray::Float64(a) => NumArray::F64(a),
        }
    }

    /// Convert to the arithmetic type closest to `dtype`.
    pub fn with_dtype(arr: &NdArray, dtype: DType) -> Self {
        match dtype {
            DType::Bool | DType::Int64 => NumArray::I64(arr.to_typed()),
            DType::Float32 => NumArray::F32(arr.to_typed()),
            DType::Float64 => NumArray::F64(arr.to_typed()),
        }
    }
}

pub(crate) fn view2<T>(a: &ArrayD<T>) -> Result<ArrayView2<'_, T>> {
    a.view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| Error::invalid("operand", e.to_string()))
}

/// Resolve a possibly negative axis against `ndim`.
pub fn normalize_axis(axis: i64, ndim: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + ndim as i64 } else { axis };
    if resolved < 0 || resolved >= ndim as i64 {
        return Err(Error::invalid(
            "axis",
            format!("axis {} is out of bounds for a {}-D block", axis, ndim),
        ));
    }
    Ok(resolved as usize)
}

/// Numpy broadcasting of two shapes.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let dim = |s: &[usize], i: usize| {
        let offset = ndim - s.len();
        if i < offset {
            1
        } else {
            s[i - offset]
        }
    };
    (0..ndim)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            _ => Err(Error::shape_mismatch(a, b)),
        })
        .collect()
}

/// Result type of combining two blocks elementwise: the shared dtype, or the
/// promoted one when they differ.
pub fn result_dtype(a: DType, b: DType) -> DType {
    if a == b {
        a
    } else {
        a.promote(b)
    }
}

/// Float type used for operations that always produce floats.
pub fn float_dtype(dtype: DType) -> DType {
    if dtype == DType::Float32 {
        DType::Float32
    } else {
        DType::Float64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_division_follows_floor_semantics() {
        assert_eq!((-7i64).floor_div(2), -4);
        assert_eq!((-7i64).modulo(2), 1);
        assert_eq!(7i64.modulo(-2), -1);
        assert_eq!(5i64.floor_div(0), 0);
        assert_eq!(2i64.power(-1), 0);
        assert_eq!((-7.0f64).modulo(2.0), 1.0);
    }

    #[test]
    fn test_integer_matrix_product_wraps() {
        let a = ndarray::array![[i64::MAX, 1]];
        let b = ndarray::array![[1i64], [1]];
        assert_eq!(i64::matrix_product(a.view(), b.view())[[0, 0]], i64::MIN);
        let f = ndarray::array![[1.5f64, 2.0]];
        let g = ndarray::array![[2.0f64], [1.0]];
        assert_eq!(f64::matrix_product(f.view(), g.view())[[0, 0]], 5.0);
    }

    #[test]
    fn test_broadcast_shape() {
        assert_eq!(broadcast_shape(&[3, 1], &[4]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shape(&[], &[2, 2]).unwrap(), vec![2, 2]);
        assert!(broadcast_shape(&[3], &[4]).is_err());
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert!(normalize_axis(3, 3).is_err());
    }
}
