//! Whole-block comparisons and boolean folds.

use std::str::FromStr;

use tessera_core::{Error, NdArray, Result};

use super::broadcast_shape;
use super::binary::zip_broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayCompare {
    /// Same shape and equal elements.
    ArrayEqual,
    /// Equal after broadcasting.
    ArrayEquiv,
    /// `|a - b| <= atol + rtol * |b|` everywhere, after broadcasting.
    Allclose,
}

impl FromStr for ArrayCompare {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "array_equal" => Ok(ArrayCompare::ArrayEqual),
            "array_equiv" => Ok(ArrayCompare::ArrayEquiv),
            "allclose" => Ok(ArrayCompare::Allclose),
            other => Err(Error::unsupported("array comparison", other)),
        }
    }
}

/// Compare two blocks. `allclose` takes exactly `[rtol, atol]`; the other
/// comparisons take no arguments.
pub fn array_compare(op: ArrayCompare, a: &NdArray, b: &NdArray, args: &[f64]) -> Result<bool> {
    let expected = if op == ArrayCompare::Allclose { 2 } else { 0 };
    if args.len() != expected {
        return Err(Error::invalid(
            "args",
            format!("{:?} takes {} argument(s), got {}", op, expected, args.len()),
        ));
    }
    let (x, y) = (a.to_f64(), b.to_f64());
    match op {
        ArrayCompare::ArrayEqual => Ok(a.shape() == b.shape() && x == y),
        ArrayCompare::ArrayEquiv => {
            let Ok(shape) = broadcast_shape(a.shape(), b.shape()) else {
                return Ok(false);
            };
            Ok(zip_broadcast(&x, &y, &shape, |u, v| u == v)?.iter().all(|&e| e))
        }
        ArrayCompare::Allclose => {
            let (rtol, atol) = (args[0], args[1]);
            let shape = broadcast_shape(a.shape(), b.shape())?;
            let close = zip_broadcast(&x, &y, &shape, |u, v| {
                if u == v {
                    return true;
                }
                (u - v).abs() <= atol + rtol * v.abs()
            })?;
            Ok(close.iter().all(|&e| e))
        }
    }
}

/// Logical conjunction of a list of flags.
pub fn logical_and(values: &[bool]) -> bool {
    values.iter().all(|&v| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_equal_versus_equiv() {
        let row = NdArray::from(array![1i64, 2].into_dyn());
        let rows = NdArray::from(array![[1.0f64, 2.0], [1.0, 2.0]].into_dyn());
        assert!(!array_compare(ArrayCompare::ArrayEqual, &row, &rows, &[]).unwrap());
        assert!(array_compare(ArrayCompare::ArrayEquiv, &row, &rows, &[]).unwrap());
        let wide = NdArray::from(array![1i64, 2, 3].into_dyn());
        assert!(!array_compare(ArrayCompare::ArrayEquiv, &wide, &rows, &[]).unwrap());
    }

    #[test]
    fn test_allclose_needs_tolerances() {
        let a = NdArray::from(array![1.0f64, 100.0].into_dyn());
        let b = NdArray::from(array![1.0f64 + 1e-9, 100.0 + 1e-6].into_dyn());
        assert!(array_compare(ArrayCompare::Allclose, &a, &b, &[1e-5, 1e-8]).unwrap());
        assert!(!array_compare(ArrayCompare::Allclose, &a, &b, &[0.0, 0.0]).unwrap());
        assert!(array_compare(ArrayCompare::Allclose, &a, &b, &[]).is_err());
        assert!(array_compare(ArrayCompare::ArrayEqual, &a, &b, &[1e-5]).is_err());
    }

    #[test]
    fn test_logical_and() {
        assert!(logical_and(&[]));
        assert!(!logical_and(&[true, false, true]));
    }
}
