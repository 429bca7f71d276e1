//! Dynamic payload passed to and returned from remote functions.

use std::collections::BTreeMap;

use crate::block::GridMeta;
use crate::dtype::{DType, NdArray};
use crate::error::{Error, Result};
use crate::rng::RngParams;
use crate::selection::Selection;
use crate::tdigest::TDigest;

/// Keyword arguments of a remote call.
pub type Kwargs = BTreeMap<String, Value>;

/// A value that can cross a backend boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Shape(Vec<usize>),
    Array(NdArray),
    Selection(Selection),
    Digest(TDigest),
    Grid(GridMeta),
    Rng(RngParams),
    List(Vec<Value>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Shape(_) => "shape",
            Value::Array(_) => "array",
            Value::Selection(_) => "selection",
            Value::Digest(_) => "digest",
            Value::Grid(_) => "grid",
            Value::Rng(_) => "rng",
            Value::List(_) => "list",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_array(self) -> Result<NdArray> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(mismatch("array", &other)),
        }
    }

    /// Numeric value as `f64`; zero-dimensional arrays are accepted.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Array(a) => a.item_f64(),
            other => Err(mismatch("number", other)),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            Value::Array(a) if a.dtype() == DType::Int64 => a.item_f64().map(|v| v as i64),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("str", other)),
        }
    }

    /// A shape or coordinate tuple. Lists of integers are accepted.
    pub fn as_shape(&self) -> Result<Vec<usize>> {
        match self {
            Value::Shape(s) => Ok(s.clone()),
            Value::List(items) => items
                .iter()
                .map(|v| {
                    let i = v.as_i64()?;
                    usize::try_from(i).map_err(|_| Error::invalid("shape", format!("negative entry {}", i)))
                })
                .collect(),
            other => Err(mismatch("shape", other)),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(mismatch("list", other)),
        }
    }

    pub fn as_selection(&self) -> Result<&Selection> {
        match self {
            Value::Selection(s) => Ok(s),
            other => Err(mismatch("selection", other)),
        }
    }

    pub fn as_digest(&self) -> Result<&TDigest> {
        match self {
            Value::Digest(d) => Ok(d),
            other => Err(mismatch("digest", other)),
        }
    }

    pub fn as_grid(&self) -> Result<&GridMeta> {
        match self {
            Value::Grid(g) => Ok(g),
            other => Err(mismatch("grid", other)),
        }
    }

    pub fn as_rng(&self) -> Result<RngParams> {
        match self {
            Value::Rng(p) => Ok(*p),
            other => Err(mismatch("rng", other)),
        }
    }
}

fn mismatch(expected: &str, got: &Value) -> Error {
    Error::invalid("value", format!("expected {}, got {}", expected, got.kind()))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NdArray> for Value {
    fn from(v: NdArray) -> Self {
        Value::Array(v)
    }
}

impl From<Selection> for Value {
    fn from(v: Selection) -> Self {
        Value::Selection(v)
    }
}

impl From<TDigest> for Value {
    fn from(v: TDigest) -> Self {
        Value::Digest(v)
    }
}

impl From<GridMeta> for Value {
    fn from(v: GridMeta) -> Self {
        Value::Grid(v)
    }
}

impl From<RngParams> for Value {
    fn from(v: RngParams) -> Self {
        Value::Rng(v)
    }
}

impl From<Vec<usize>> for Value {
    fn from(v: Vec<usize>) -> Self {
        Value::Shape(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl<T: crate::dtype::Element> From<ndarray::ArrayD<T>> for Value {
    fn from(v: ndarray::ArrayD<T>) -> Self {
        Value::Array(T::wrap(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Value::Int(3).as_f64().unwrap(), 3.0);
        assert_eq!(Value::Float(4.0).as_i64().unwrap(), 4);
        assert!(Value::Float(4.5).as_i64().is_err());
        let scalar = Value::from(NdArray::scalar(2.5f64));
        assert_eq!(scalar.as_f64().unwrap(), 2.5);
    }

    #[test]
    fn test_shape_from_list() {
        let v = Value::List(vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(v.as_shape().unwrap(), vec![2, 3]);
        assert!(Value::List(vec![Value::Int(-1)]).as_shape().is_err());
    }

    #[test]
    fn test_kind_mismatch_is_invalid_argument() {
        let err = Value::Str("x".into()).into_array().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "value", .. }));
        let arr = Value::from(array![1.0f64, 2.0].into_dyn());
        assert_eq!(arr.as_array().map(|a| a.dtype()), Some(DType::Float64));
    }
}
