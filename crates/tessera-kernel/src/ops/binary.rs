//! Binary operations with numpy broadcasting, and tensor contraction.
//!
//! Operator names resolve in two stages: the numeric operators first, then
//! the special functions. Names found in neither are rejected with
//! [`Error::UnsupportedOperation`].

use std::str::FromStr;

use ndarray::{Array2, ArrayD, ArrayViewD, IxDyn, Zip};
use tessera_core::{DType, Error, NdArray, Result};

use super::{broadcast_shape, float_dtype, map_numeric_pair, result_dtype, NumArray, Numeric};

/// Arithmetic operators; the result has the operands' common type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    FloorDivide,
    Power,
    Remainder,
    Maximum,
    Minimum,
}

/// Operators that always produce floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatOp {
    TrueDivide,
    Arctan2,
    Hypot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    Xor,
}

/// Special functions of two arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialOp {
    /// `x * log(y)`, zero where `x == 0`.
    Xlogy,
    /// `x * log1p(y)`, zero where `x == 0`.
    Xlog1py,
}

/// An elementwise binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Arith(ArithOp),
    Float(FloatOp),
    Compare(CmpOp),
    Logical(LogicOp),
    Special(SpecialOp),
}

/// Map operator aliases (python operator module names and symbols) to the
/// canonical ufunc name.
fn canonical_name(name: &str) -> &str {
    match name {
        "+" => "add",
        "sub" | "-" => "subtract",
        "mul" | "*" => "multiply",
        "truediv" | "div" | "divide" | "/" => "true_divide",
        "floordiv" | "//" => "floor_divide",
        "pow" | "**" => "power",
        "mod" | "%" => "remainder",
        "lt" | "<" => "less",
        "le" | "<=" => "less_equal",
        "gt" | ">" => "greater",
        "ge" | ">=" => "greater_equal",
        "eq" | "==" => "equal",
        "ne" | "!=" => "not_equal",
        "and" | "&" => "logical_and",
        "or" | "|" => "logical_or",
        "xor" | "^" => "logical_xor",
        other => other,
    }
}

impl BinaryOp {
    fn numeric(name: &str) -> Option<Self> {
        use BinaryOp::*;
        Some(match name {
            "add" => Arith(ArithOp::Add),
            "subtract" => Arith(ArithOp::Subtract),
            "multiply" => Arith(ArithOp::Multiply),
            "floor_divide" => Arith(ArithOp::FloorDivide),
            "power" => Arith(ArithOp::Power),
            "remainder" => Arith(ArithOp::Remainder),
            "maximum" => Arith(ArithOp::Maximum),
            "minimum" => Arith(ArithOp::Minimum),
            "true_divide" => Float(FloatOp::TrueDivide),
            "arctan2" => Float(FloatOp::Arctan2),
            "hypot" => Float(FloatOp::Hypot),
            "less" => Compare(CmpOp::Less),
            "less_equal" => Compare(CmpOp::LessEqual),
            "greater" => Compare(CmpOp::Greater),
            "greater_equal" => Compare(CmpOp::GreaterEqual),
            "equal" => Compare(CmpOp::Equal),
            "not_equal" => Compare(CmpOp::NotEqual),
            "logical_and" => Logical(LogicOp::And),
            "logical_or" => Logical(LogicOp::Or),
            "logical_xor" => Logical(LogicOp::Xor),
            _ => return None,
        })
    }

    fn special(name: &str) -> Option<Self> {
        match name {
            "xlogy" => Some(BinaryOp::Special(SpecialOp::Xlogy)),
            "xlog1py" => Some(BinaryOp::Special(SpecialOp::Xlog1py)),
            _ => None,
        }
    }

    /// Apply elementwise with numpy broadcasting.
    pub fn apply(self, a: &NdArray, b: &NdArray) -> Result<NdArray> {
        let shape = broadcast_shape(a.shape(), b.shape())?;
        let common = result_dtype(a.dtype(), b.dtype());
        match self {
            BinaryOp::Arith(op) => {
                let (x, y) = (NumArray::with_dtype(a, common), NumArray::with_dtype(b, common));
                map_numeric_pair!(&x, &y, p, q => zip_broadcast(p, q, &shape, |u, v| arith(op, u, v))?)
            }
            BinaryOp::Compare(op) => {
                let (x, y) = (NumArray::with_dtype(a, common), NumArray::with_dtype(b, common));
                map_numeric_pair!(&x, &y, p, q => zip_broadcast(p, q, &shape, |u, v| compare(op, u, v))?)
            }
            BinaryOp::Logical(op) => {
                let (x, y) = (a.to_typed::<bool>(), b.to_typed::<bool>());
                let out = zip_broadcast(&x, &y, &shape, |u, v| match op {
                    LogicOp::And => u && v,
                    LogicOp::Or => u || v,
                    LogicOp::Xor => u != v,
                })?;
                Ok(NdArray::Bool(out))
            }
            BinaryOp::Float(op) => float_apply(a, b, &shape, common, move |u, v| float_op(op, u, v)),
            BinaryOp::Special(op) => float_apply(a, b, &shape, common, move |u, v| special(op, u, v)),
        }
    }
}

impl FromStr for BinaryOp {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        let canonical = canonical_name(name);
        Self::numeric(canonical)
            .or_else(|| Self::special(canonical))
            .ok_or_else(|| Error::unsupported("binary operator", name))
    }
}

/// Apply a float-valued operator, computing in `f32` only when neither
/// operand forces `f64`.
fn float_apply(
    a: &NdArray,
    b: &NdArray,
    shape: &[usize],
    common: DType,
    f: impl Fn(f64, f64) -> f64,
) -> Result<NdArray> {
    match float_dtype(common) {
        DType::Float32 => {
            let (x, y) = (a.to_typed::<f32>(), b.to_typed::<f32>());
            let out = zip_broadcast(&x, &y, shape, |u, v| f(u as f64, v as f64) as f32)?;
            Ok(NdArray::Float32(out))
        }
        _ => {
            let (x, y) = (a.to_typed::<f64>(), b.to_typed::<f64>());
            Ok(NdArray::Float64(zip_broadcast(&x, &y, shape, f)?))
        }
    }
}

/// Broadcast both operands to `shape` and combine them elementwise.
pub fn zip_broadcast<T: Copy, U>(
    a: &ArrayD<T>,
    b: &ArrayD<T>,
    shape: &[usize],
    f: impl Fn(T, T) -> U,
) -> Result<ArrayD<U>> {
    let av = a
        .broadcast(IxDyn(shape))
        .ok_or_else(|| Error::shape_mismatch(shape, a.shape()))?;
    let bv = b
        .broadcast(IxDyn(shape))
        .ok_or_else(|| Error::shape_mismatch(shape, b.shape()))?;
    Ok(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y)))
}

fn arith<T: Numeric>(op: ArithOp, x: T, y: T) -> T {
    match op {
        ArithOp::Add => x.add_wrapping(y),
        ArithOp::Subtract => x.sub_wrapping(y),
        ArithOp::Multiply => x.mul_wrapping(y),
        ArithOp::FloorDivide => x.floor_div(y),
        ArithOp::Power => x.power(y),
        ArithOp::Remainder => x.modulo(y),
        ArithOp::Maximum => {
            if x.is_nan_value() || x >= y {
                x
            } else {
                y
            }
        }
        ArithOp::Minimum => {
            if x.is_nan_value() || x <= y {
                x
            } else {
                y
            }
        }
    }
}

fn compare<T: PartialOrd>(op: CmpOp, x: T, y: T) -> bool {
    match op {
        CmpOp::Less => x < y,
        CmpOp::LessEqual => x <= y,
        CmpOp::Greater => x > y,
        CmpOp::GreaterEqual => x >= y,
        CmpOp::Equal => x == y,
        CmpOp::NotEqual => x != y,
    }
}

fn float_op(op: FloatOp, x: f64, y: f64) -> f64 {
    match op {
        FloatOp::TrueDivide => x / y,
        FloatOp::Arctan2 => x.atan2(y),
        FloatOp::Hypot => x.hypot(y),
    }
}

fn special(op: SpecialOp, x: f64, y: f64) -> f64 {
    if x == 0.0 && !y.is_nan() {
        return 0.0;
    }
    match op {
        SpecialOp::Xlogy => x * y.ln(),
        SpecialOp::Xlog1py => x * y.ln_1p(),
    }
}

/// `x * log(y)` with the convention `0 * log(0) = 0`.
pub fn xlogy(x: &NdArray, y: &NdArray) -> Result<NdArray> {
    BinaryOp::Special(SpecialOp::Xlogy).apply(x, y)
}

/// Contraction axes for [`tensordot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorAxes {
    /// The last `n` axes of `a` against the first `n` axes of `b`.
    Count(usize),
    /// Explicit axis lists of equal length.
    Pairs(Vec<usize>, Vec<usize>),
}

/// `np.tensordot`. With `axes = 1` and operands of rank at most two this is
/// a matrix (or matrix-vector, or inner) product.
pub fn tensordot(a: &NdArray, b: &NdArray, axes: &TensorAxes) -> Result<NdArray> {
    let common = result_dtype(a.dtype(), b.dtype());
    let (x, y) = (NumArray::with_dtype(a, common), NumArray::with_dtype(b, common));
    map_numeric_pair!(&x, &y, p, q => tensordot_typed(p, q, axes)?)
}

fn tensordot_typed<T: Numeric>(a: &ArrayD<T>, b: &ArrayD<T>, axes: &TensorAxes) -> Result<ArrayD<T>> {
    if *axes == TensorAxes::Count(1) && (1..=2).contains(&a.ndim()) && (1..=2).contains(&b.ndim()) {
        return matmul(a, b);
    }
    let (a_axes, b_axes): (Vec<usize>, Vec<usize>) = match axes {
        TensorAxes::Count(n) => {
            if *n > a.ndim() || *n > b.ndim() {
                return Err(Error::invalid("axes", format!("cannot contract {} axes", n)));
            }
            ((a.ndim() - n..a.ndim()).collect(), (0..*n).collect())
        }
        TensorAxes::Pairs(x, y) => (x.clone(), y.clone()),
    };
    if a_axes.len() != b_axes.len() || !valid_axes(&a_axes, a.ndim()) || !valid_axes(&b_axes, b.ndim()) {
        return Err(Error::invalid("axes", format!("{:?} / {:?}", a_axes, b_axes)));
    }
    for (&i, &j) in a_axes.iter().zip(&b_axes) {
        if a.shape()[i] != b.shape()[j] {
            return Err(Error::shape_mismatch(a.shape(), b.shape()));
        }
    }

    let a_free: Vec<usize> = (0..a.ndim()).filter(|i| !a_axes.contains(i)).collect();
    let b_free: Vec<usize> = (0..b.ndim()).filter(|i| !b_axes.contains(i)).collect();
    let dims = |arr: &ArrayD<T>, axes: &[usize]| axes.iter().map(|&i| arr.shape()[i]).product::<usize>();
    let (m, k, n) = (dims(a, &a_free), dims(a, &a_axes), dims(b, &b_free));

    let a_perm: Vec<usize> = a_free.iter().chain(&a_axes).copied().collect();
    let b_perm: Vec<usize> = b_axes.iter().chain(&b_free).copied().collect();
    let lhs = to_matrix(a.view().permuted_axes(IxDyn(&a_perm)), m, k)?;
    let rhs = to_matrix(b.view().permuted_axes(IxDyn(&b_perm)), k, n)?;
    let product = T::matrix_product(lhs.view(), rhs.view());

    let out_shape: Vec<usize> = a_free
        .iter()
        .map(|&i| a.shape()[i])
        .chain(b_free.iter().map(|&i| b.shape()[i]))
        .collect();
    ArrayD::from_shape_vec(IxDyn(&out_shape), product.iter().copied().collect())
        .map_err(|e| Error::invalid("axes", e.to_string()))
}

fn valid_axes(axes: &[usize], ndim: usize) -> bool {
    axes.iter().enumerate().all(|(n, &i)| i < ndim && !axes[..n].contains(&i))
}

/// Row-major copy of `view` as a `rows x cols` matrix.
fn to_matrix<T: Copy>(view: ArrayViewD<'_, T>, rows: usize, cols: usize) -> Result<Array2<T>> {
    Array2::from_shape_vec((rows, cols), view.iter().copied().collect())
        .map_err(|e| Error::invalid("operand", e.to_string()))
}

fn matmul<T: Numeric>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>> {
    let k = b.shape()[0];
    if a.shape()[a.ndim() - 1] != k {
        return Err(Error::shape_mismatch(a.shape(), b.shape()));
    }
    // Vectors become a single row (left) or column (right).
    let m = if a.ndim() == 2 { a.shape()[0] } else { 1 };
    let n = if b.ndim() == 2 { b.shape()[1] } else { 1 };
    let product = T::matrix_product(to_matrix(a.view(), m, k)?.view(), to_matrix(b.view(), k, n)?.view());
    let out_shape: Vec<usize> = a.shape()[..a.ndim() - 1].iter().chain(&b.shape()[1..]).copied().collect();
    ArrayD::from_shape_vec(IxDyn(&out_shape), product.iter().copied().collect())
        .map_err(|e| Error::invalid("operand", e.to_string()))
}

/// `bop(op, a1, a2)` after applying the per-operand transpose flags.
/// `tensordot` contracts over `axes`; every other name is an elementwise
/// [`BinaryOp`].
pub fn bop(op: &str, a1: &NdArray, a2: &NdArray, a1_t: bool, a2_t: bool, axes: &TensorAxes) -> Result<NdArray> {
    let a1 = a1.transposed_if(a1_t);
    let a2 = a2.transposed_if(a2_t);
    if op == "tensordot" {
        return tensordot(&a1, &a2, axes);
    }
    op.parse::<BinaryOp>()?.apply(&a1, &a2)
}
