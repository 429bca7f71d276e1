//! Argmin/argmax as a left fold over blocks.

use std::cmp::Ordering;
use std::str::FromStr;

use tessera_core::{DType, Error, NdArray, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgOp {
    Argmin,
    Argmax,
}

impl ArgOp {
    /// Whether `candidate` strictly beats `incumbent`. NaN never wins.
    fn beats(self, candidate: Scalar, incumbent: Scalar) -> bool {
        if candidate.is_nan() {
            return false;
        }
        if incumbent.is_nan() {
            return true;
        }
        let ordering = match (candidate, incumbent) {
            (Scalar::Int(c), Scalar::Int(i)) => c.partial_cmp(&i),
            _ => candidate.to_f64().partial_cmp(&incumbent.to_f64()),
        };
        match self {
            ArgOp::Argmin => ordering == Some(Ordering::Less),
            ArgOp::Argmax => ordering == Some(Ordering::Greater),
        }
    }
}

impl FromStr for ArgOp {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "argmin" => Ok(ArgOp::Argmin),
            "argmax" => Ok(ArgOp::Argmax),
            other => Err(Error::unsupported("arg reduction", other)),
        }
    }
}

/// An element value compared without leaving its number domain: integers
/// stay exact, floats keep NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn is_nan(self) -> bool {
        matches!(self, Scalar::Float(v) if v.is_nan())
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// Decode a carried optimum value. Booleans and 0-d integer arrays decode
    /// as integers.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(Scalar::Int(*v)),
            Value::Bool(b) => Ok(Scalar::Int(i64::from(*b))),
            Value::Array(a) if a.dtype() == DType::Int64 => {
                Ok(Scalar::Int(value.as_i64()?))
            }
            other => Ok(Scalar::Float(other.as_f64()?)),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Int(v) => Value::Int(v),
            Scalar::Float(v) => Value::Float(v),
        }
    }
}

/// A running optimum: global flat index and value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArgOptimum {
    pub index: usize,
    pub value: Scalar,
}

fn local_best(op: ArgOp, values: impl Iterator<Item = Scalar>) -> Option<(usize, Scalar)> {
    values.enumerate().reduce(|best, (i, v)| if op.beats(v, best.1) { (i, v) } else { best })
}

/// Fold one block into the running optimum.
///
/// The block's local optimum is shifted into global coordinates by
/// `block_start`, then compared with `carried`. On a tie the carried
/// optimum, which came from an earlier block, is kept.
pub fn arg_op(op: ArgOp, arr: &NdArray, block_start: usize, carried: Option<ArgOptimum>) -> Result<ArgOptimum> {
    let best = match arr {
        NdArray::Bool(a) => local_best(op, a.iter().map(|&b| Scalar::Int(i64::from(b)))),
        NdArray::Int64(a) => local_best(op, a.iter().map(|&v| Scalar::Int(v))),
        NdArray::Float32(a) => local_best(op, a.iter().map(|&v| Scalar::Float(f64::from(v)))),
        NdArray::Float64(a) => local_best(op, a.iter().map(|&v| Scalar::Float(v))),
    };
    let (index, value) = best.ok_or_else(|| Error::invalid("arr", format!("{:?} of an empty block", op)))?;
    let local = ArgOptimum {
        index: block_start + index,
        value,
    };
    Ok(match carried {
        Some(prev) if !op.beats(local.value, prev.value) => prev,
        _ => local,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_local_index_is_offset() {
        let a = NdArray::from(array![3.0f64, -1.0, 4.0].into_dyn());
        let found = arg_op(ArgOp::Argmin, &a, 10, None).unwrap();
        assert_eq!(found, ArgOptimum { index: 11, value: Scalar::Float(-1.0) });
        let found = arg_op(ArgOp::Argmax, &a, 10, None).unwrap();
        assert_eq!(found.index, 12);
    }

    #[test]
    fn test_ties_keep_first_processed() {
        let carried = ArgOptimum { index: 2, value: Scalar::Int(-1) };
        let a = NdArray::from(array![-1i64, 0].into_dyn());
        assert_eq!(arg_op(ArgOp::Argmin, &a, 5, Some(carried)).unwrap(), carried);
        let within = NdArray::from(array![7i64, 1, 1].into_dyn());
        assert_eq!(arg_op(ArgOp::Argmin, &within, 0, None).unwrap().index, 1);
    }

    #[test]
    fn test_nan_never_wins() {
        let a = NdArray::from(array![f64::NAN, 2.0].into_dyn());
        assert_eq!(arg_op(ArgOp::Argmax, &a, 0, None).unwrap().index, 1);
        let carried = ArgOptimum { index: 0, value: Scalar::Float(f64::NAN) };
        let b = NdArray::from(array![5.0f64].into_dyn());
        assert_eq!(arg_op(ArgOp::Argmax, &b, 3, Some(carried)).unwrap().index, 3);
        assert!(arg_op(ArgOp::Argmin, &NdArray::from(ndarray::Array1::<f64>::zeros(0).into_dyn()), 0, None).is_err());
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let big = 1i64 << 53;
        let a = NdArray::from(array![big + 1, big].into_dyn());
        let found = arg_op(ArgOp::Argmin, &a, 0, None).unwrap();
        assert_eq!(found, ArgOptimum { index: 1, value: Scalar::Int(big) });

        // A carried integer optimum is not rounded through f64 either.
        let carried = ArgOptimum { index: 7, value: Scalar::Int(big + 1) };
        let b = NdArray::from(array![big + 2, big].into_dyn());
        assert_eq!(arg_op(ArgOp::Argmax, &b, 10, Some(carried)).unwrap().index, 10);
        assert_eq!(arg_op(ArgOp::Argmin, &b, 10, Some(carried)).unwrap().value, Scalar::Int(big));
    }

    #[test]
    fn test_carried_value_decoding() {
        assert_eq!(Scalar::from_value(&Value::Int(-3)).unwrap(), Scalar::Int(-3));
        assert_eq!(Scalar::from_value(&Value::Float(2.5)).unwrap(), Scalar::Float(2.5));
        let zero_d = Value::from(NdArray::scalar(i64::MAX));
        assert_eq!(Scalar::from_value(&zero_d).unwrap(), Scalar::Int(i64::MAX));
        assert!(Scalar::from_value(&Value::from("x")).is_err());
    }
}
