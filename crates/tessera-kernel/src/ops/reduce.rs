//! Reductions over one axis, over a list of blocks, and pairwise.

use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayD, ArrayView1, Axis, IxDyn};
use tessera_core::{Error, NdArray, Result};

use super::binary::{ArithOp, BinaryOp};
use super::{map_numeric, map_numeric_pair, result_dtype, view2, NumArray, Numeric};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
    All,
    Any,
    /// Sum treating NaN as zero.
    Nansum,
}

impl FromStr for ReduceOp {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Ok(match name {
            "sum" => ReduceOp::Sum,
            "prod" => ReduceOp::Prod,
            "min" | "amin" => ReduceOp::Min,
            "max" | "amax" => ReduceOp::Max,
            "all" => ReduceOp::All,
            "any" => ReduceOp::Any,
            "nansum" => ReduceOp::Nansum,
            other => return Err(Error::unsupported("reduction", other)),
        })
    }
}

/// Elementwise sum of equally shaped blocks.
pub fn sum_reduce(arrays: &[NdArray]) -> Result<NdArray> {
    let (first, rest) = arrays
        .split_first()
        .ok_or_else(|| Error::invalid("arrays", "sum_reduce needs at least one block"))?;
    let add = BinaryOp::Arith(ArithOp::Add);
    rest.iter().try_fold(first.clone(), |acc, a| {
        if a.shape() != acc.shape() {
            return Err(Error::shape_mismatch(acc.shape(), a.shape()));
        }
        add.apply(&acc, a)
    })
}

/// Reduce `arr` with `op` along `axis`, or over every element when `axis`
/// is `None`.
///
/// A plain sum along one axis of length greater than one is computed as a
/// contraction against a vector of ones, which lets the matrix product
/// routines do the work.
pub fn reduce_axis(
    op: ReduceOp,
    arr: &NdArray,
    axis: Option<usize>,
    keepdims: bool,
    transposed: bool,
) -> Result<NdArray> {
    let arr = arr.transposed_if(transposed);
    if let Some(ax) = axis {
        if ax >= arr.ndim() {
            return Err(Error::invalid(
                "axis",
                format!("axis {} is out of bounds for a {}-D block", ax, arr.ndim()),
            ));
        }
        if op == ReduceOp::Sum && !keepdims && arr.shape()[ax] > 1 {
            let num = NumArray::from_owned(arr);
            return Ok(map_numeric!(&num, a => sum_by_ones(a, ax)?));
        }
    }
    match op {
        ReduceOp::All | ReduceOp::Any => {
            let flags = arr.to_typed::<bool>();
            let out = reduce_lanes(&flags, axis, keepdims, |lane| {
                Some(if op == ReduceOp::All {
                    lane.iter().all(|&x| x)
                } else {
                    lane.iter().any(|&x| x)
                })
            })?;
            Ok(NdArray::Bool(out))
        }
        _ => {
            let num = NumArray::from_owned(arr);
            Ok(map_numeric!(&num, a => reduce_lanes(a, axis, keepdims, |lane| fold_lane(op, lane))?))
        }
    }
}

fn fold_lane<T: Numeric>(op: ReduceOp, lane: ArrayView1<'_, T>) -> Option<T> {
    let zero = T::from_f64(0.0);
    match op {
        ReduceOp::Sum => Some(lane.iter().fold(zero, |acc, &x| acc.add_wrapping(x))),
        ReduceOp::Nansum => Some(
            lane.iter()
                .filter(|x| !x.is_nan_value())
                .fold(zero, |acc, &x| acc.add_wrapping(x)),
        ),
        ReduceOp::Prod => Some(lane.iter().fold(T::from_f64(1.0), |acc, &x| acc.mul_wrapping(x))),
        ReduceOp::Min => lane.iter().copied().reduce(|acc, x| {
            if acc.is_nan_value() || acc <= x {
                acc
            } else {
                x
            }
        }),
        ReduceOp::Max => lane.iter().copied().reduce(|acc, x| {
            if acc.is_nan_value() || acc >= x {
                acc
            } else {
                x
            }
        }),
        ReduceOp::All | ReduceOp::Any => None,
    }
}

/// Apply `f` to every lane along `axis` (or to the flattened block). `f`
/// returns `None` when the lane cannot be reduced, e.g. the minimum of an
/// empty lane.
fn reduce_lanes<T: Copy, U: Clone>(
    a: &ArrayD<T>,
    axis: Option<usize>,
    keepdims: bool,
    f: impl Fn(ArrayView1<'_, T>) -> Option<U>,
) -> Result<ArrayD<U>> {
    let empty = || Error::invalid("arr", "zero-size reduction without an identity");
    match axis {
        None => {
            let flat: Array1<T> = a.iter().copied().collect();
            let value = f(flat.view()).ok_or_else(empty)?;
            let shape = if keepdims { vec![1; a.ndim()] } else { Vec::new() };
            Ok(ArrayD::from_elem(IxDyn(&shape), value))
        }
        Some(ax) => {
            let lanes = a.map_axis(Axis(ax), |lane| f(lane));
            let values: Vec<U> = lanes.iter().cloned().collect::<Option<_>>().ok_or_else(empty)?;
            let out = ArrayD::from_shape_vec(lanes.raw_dim(), values)
                .map_err(|e| Error::invalid("arr", e.to_string()))?;
            Ok(if keepdims { out.insert_axis(Axis(ax)) } else { out })
        }
    }
}

/// `ones · A` / `A · ones` for matrices; for higher ranks the summed axis is
/// moved to the front and contracted the same way.
fn sum_by_ones<T: Numeric>(a: &ArrayD<T>, axis: usize) -> Result<ArrayD<T>> {
    let n = a.shape()[axis];
    let one = T::from_f64(1.0);
    if a.ndim() == 2 {
        let m = view2(a)?;
        let v = if axis == 0 {
            T::matrix_product(Array2::from_elem((1, n), one).view(), m)
        } else {
            T::matrix_product(m, Array2::from_elem((n, 1), one).view())
        };
        let len = v.len();
        return ArrayD::from_shape_vec(IxDyn(&[len]), v.iter().copied().collect())
            .map_err(|e| Error::invalid("arr", e.to_string()));
    }
    let rest: Vec<usize> = a
        .shape()
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != axis)
        .map(|(_, &d)| d)
        .collect();
    let cols = rest.iter().product::<usize>();
    let mut order = vec![axis];
    order.extend((0..a.ndim()).filter(|&i| i != axis));
    let moved: Vec<T> = a.view().permuted_axes(IxDyn(&order)).iter().copied().collect();
    let m = Array2::from_shape_vec((n, cols), moved).map_err(|e| Error::invalid("arr", e.to_string()))?;
    let summed = T::matrix_product(Array2::from_elem((1, n), one).view(), m.view());
    ArrayD::from_shape_vec(IxDyn(&rest), summed.iter().copied().collect())
        .map_err(|e| Error::invalid("arr", e.to_string()))
}

/// Combine two partial results of a reduction.
///
/// `sum` and `prod` use the elementwise operator directly; any other
/// reduction stacks both operands and reduces the new leading axis.
/// Non-scalar operands must share a shape, which the result keeps.
pub fn bop_reduce(op: &str, a1: &NdArray, a2: &NdArray, a1_t: bool, a2_t: bool) -> Result<NdArray> {
    let a1 = a1.transposed_if(a1_t);
    let a2 = a2.transposed_if(a2_t);
    let result = match op {
        "sum" => BinaryOp::Arith(ArithOp::Add).apply(&a1, &a2)?,
        "prod" => BinaryOp::Arith(ArithOp::Multiply).apply(&a1, &a2)?,
        other => {
            let op: ReduceOp = other.parse()?;
            if a1.shape() != a2.shape() {
                return Err(Error::shape_mismatch(a1.shape(), a2.shape()));
            }
            reduce_axis(op, &stack_pair(&a1, &a2)?, Some(0), false, false)?
        }
    };
    let scalar = a1.ndim() == 0 && a2.ndim() == 0;
    if !scalar && (a1.shape() != a2.shape() || a2.shape() != result.shape()) {
        return Err(Error::shape_mismatch(a1.shape(), a2.shape()));
    }
    Ok(result)
}

fn stack_pair(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    let common = result_dtype(a.dtype(), b.dtype());
    let (x, y) = (NumArray::with_dtype(a, common), NumArray::with_dtype(b, common));
    map_numeric_pair!(&x, &y, p, q => ndarray::stack(Axis(0), &[p.view(), q.view()])
        .map_err(|_| Error::shape_mismatch(a.shape(), b.shape()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use tessera_core::DType;

    #[test]
    fn test_integer_axis_sum_wraps_like_full_sum() {
        let a = NdArray::from(array![[i64::MAX, 1], [1, 1]].into_dyn());
        let total = reduce_axis(ReduceOp::Sum, &a, None, false, false).unwrap();
        assert_eq!(total, NdArray::scalar(i64::MAX.wrapping_add(3)));
        let rows = reduce_axis(ReduceOp::Sum, &a, Some(0), false, false).unwrap();
        assert_eq!(rows, NdArray::from(array![i64::MIN, 2].into_dyn()));
        let cols = reduce_axis(ReduceOp::Sum, &a, Some(1), false, false).unwrap();
        assert_eq!(cols, NdArray::from(array![i64::MIN, 2].into_dyn()));
        let summed_again = reduce_axis(ReduceOp::Sum, &rows, None, false, false).unwrap();
        assert_eq!(summed_again, total);
    }

    #[test]
    fn test_sum_axis_matches_ones_contraction() {
        let a = NdArray::from(array![[1.5f64, 2.0, 3.0], [4.0, 5.25, 6.0]].into_dyn());
        let rows = reduce_axis(ReduceOp::Sum, &a, Some(0), false, false).unwrap();
        assert_eq!(rows, NdArray::from(array![5.5f64, 7.25, 9.0].into_dyn()));
        let cols = reduce_axis(ReduceOp::Sum, &a, Some(1), false, false).unwrap();
        assert_eq!(cols, NdArray::from(array![6.5f64, 15.25].into_dyn()));
        let kept = reduce_axis(ReduceOp::Sum, &a, Some(1), true, false).unwrap();
        assert_eq!(kept.shape(), &[2, 1]);
    }

    #[test]
    fn test_sum_three_dimensional_axis() {
        let a = NdArray::from(ArrayD::from_shape_fn(IxDyn(&[2, 3, 4]), |i| (i[0] * 12 + i[1] * 4 + i[2]) as i64));
        let s = reduce_axis(ReduceOp::Sum, &a, Some(1), false, false).unwrap();
        assert_eq!(s.shape(), &[2, 4]);
        assert_eq!(s.to_typed::<i64>()[[0, 0]], 12);
        assert_eq!(s.to_typed::<i64>()[[1, 3]], 57);
    }

    #[test]
    fn test_min_max_and_flags() {
        let a = NdArray::from(array![[3.0f64, f64::NAN], [1.0, 2.0]].into_dyn());
        let mins = reduce_axis(ReduceOp::Min, &a, Some(0), false, false).unwrap().to_f64();
        assert_relative_eq!(mins[[0]], 1.0);
        assert!(mins[[1]].is_nan());
        let total = reduce_axis(ReduceOp::Nansum, &a, None, false, false).unwrap();
        assert_relative_eq!(total.item_f64().unwrap(), 6.0);

        let b = NdArray::from(array![true, false].into_dyn());
        assert_eq!(reduce_axis(ReduceOp::Any, &b, None, false, false).unwrap(), NdArray::scalar(true));
        assert_eq!(reduce_axis(ReduceOp::All, &b, Some(0), false, false).unwrap(), NdArray::scalar(false));

        let empty = NdArray::zeros(&[0], DType::Float64);
        assert!(reduce_axis(ReduceOp::Max, &empty, None, false, false).is_err());
        assert_eq!(reduce_axis(ReduceOp::Sum, &empty, None, false, false).unwrap(), NdArray::scalar(0.0f64));
    }

    #[test]
    fn test_sum_reduce_and_bop_reduce() {
        let a = NdArray::from(array![1i64, 2].into_dyn());
        let b = NdArray::from(array![10i64, 20].into_dyn());
        assert_eq!(
            sum_reduce(&[a.clone(), b.clone(), a.clone()]).unwrap(),
            NdArray::from(array![12i64, 24].into_dyn())
        );
        assert_eq!(bop_reduce("max", &a, &b, false, false).unwrap(), b);
        assert_eq!(
            bop_reduce("prod", &a, &b, false, false).unwrap(),
            NdArray::from(array![10i64, 40].into_dyn())
        );
        let short = NdArray::from(array![1i64].into_dyn());
        assert!(matches!(
            bop_reduce("sum", &a, &short, false, false),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(bop_reduce("median", &a, &b, false, false).is_err());
    }
}
