//! Unary maps, masked selection, and metadata-shaped operations.

use std::str::FromStr;

use ndarray::{Array1, ArrayD, Axis, Zip};
use tessera_core::{map_array, DType, Element, Error, NdArray, Result};

use super::{map_numeric, normalize_axis, result_dtype, NumArray, Numeric};

/// Elementwise unary functions accepted by `map_uop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negative,
    Abs,
    Sqrt,
    Square,
    Exp,
    Expm1,
    Log,
    Log2,
    Log10,
    Log1p,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Floor,
    Ceil,
    /// Round to nearest, ties to even.
    Rint,
    Sign,
    Reciprocal,
    LogicalNot,
    Isnan,
    Isinf,
    Isfinite,
    /// `clip(lo, hi)`.
    Clip,
}

impl UnaryOp {
    /// Number of scalar arguments the function takes after the block.
    pub fn arity(self) -> usize {
        match self {
            UnaryOp::Clip => 2,
            _ => 0,
        }
    }

    fn preserves_type(self) -> bool {
        matches!(
            self,
            UnaryOp::Negative | UnaryOp::Abs | UnaryOp::Square | UnaryOp::Sign | UnaryOp::Clip
        )
    }

    fn float_fn(self) -> Option<fn(f64) -> f64> {
        use UnaryOp::*;
        Some(match self {
            Sqrt => f64::sqrt,
            Exp => f64::exp,
            Expm1 => f64::exp_m1,
            Log => f64::ln,
            Log2 => f64::log2,
            Log10 => f64::log10,
            Log1p => f64::ln_1p,
            Sin => f64::sin,
            Cos => f64::cos,
            Tan => f64::tan,
            Arcsin => f64::asin,
            Arccos => f64::acos,
            Arctan => f64::atan,
            Sinh => f64::sinh,
            Cosh => f64::cosh,
            Tanh => f64::tanh,
            Floor => f64::floor,
            Ceil => f64::ceil,
            Rint => f64::round_ties_even,
            Reciprocal => f64::recip,
            _ => return None,
        })
    }
}

impl FromStr for UnaryOp {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        use UnaryOp::*;
        Ok(match name {
            "negative" | "neg" => Negative,
            "abs" | "absolute" => Abs,
            "sqrt" => Sqrt,
            "square" => Square,
            "exp" => Exp,
            "expm1" => Expm1,
            "log" => Log,
            "log2" => Log2,
            "log10" => Log10,
            "log1p" => Log1p,
            "sin" => Sin,
            "cos" => Cos,
            "tan" => Tan,
            "arcsin" => Arcsin,
            "arccos" => Arccos,
            "arctan" => Arctan,
            "sinh" => Sinh,
            "cosh" => Cosh,
            "tanh" => Tanh,
            "floor" => Floor,
            "ceil" => Ceil,
            "rint" => Rint,
            "sign" => Sign,
            "reciprocal" => Reciprocal,
            "logical_not" | "invert" => LogicalNot,
            "isnan" => Isnan,
            "isinf" => Isinf,
            "isfinite" => Isfinite,
            "clip" => Clip,
            other => return Err(Error::unsupported("unary operator", other)),
        })
    }
}

/// Apply `op` to every element of `arr`.
///
/// Sign-like functions keep the input type (booleans become `int64`);
/// predicates return booleans; everything else returns floats, `float32`
/// only for `float32` input.
pub fn map_uop(op: UnaryOp, arr: &NdArray, args: &[f64]) -> Result<NdArray> {
    if args.len() != op.arity() {
        return Err(Error::invalid(
            "args",
            format!("{:?} takes {} argument(s), got {}", op, op.arity(), args.len()),
        ));
    }
    if op.preserves_type() {
        let num = NumArray::new(arr);
        return Ok(map_numeric!(&num, a => a.mapv(|x| preserving(op, x, args))));
    }
    if let Some(f) = op.float_fn() {
        return Ok(match arr {
            NdArray::Float32(a) => NdArray::Float32(a.mapv(|x| f(x as f64) as f32)),
            other => NdArray::Float64(other.to_f64().mapv(f)),
        });
    }
    let out = match op {
        UnaryOp::LogicalNot => arr.to_typed::<bool>().mapv(|x| !x),
        UnaryOp::Isnan => arr.to_f64().mapv(f64::is_nan),
        UnaryOp::Isinf => arr.to_f64().mapv(f64::is_infinite),
        UnaryOp::Isfinite => arr.to_f64().mapv(f64::is_finite),
        other => return Err(Error::unsupported("unary operator", format!("{:?}", other))),
    };
    Ok(NdArray::Bool(out))
}

fn preserving<T: Numeric>(op: UnaryOp, x: T, args: &[f64]) -> T {
    let zero = T::from_f64(0.0);
    match op {
        UnaryOp::Negative => zero.sub_wrapping(x),
        UnaryOp::Abs if x < zero => zero.sub_wrapping(x),
        UnaryOp::Square => x.mul_wrapping(x),
        UnaryOp::Sign if x > zero => T::from_f64(1.0),
        UnaryOp::Sign if x < zero => T::from_f64(-1.0),
        UnaryOp::Clip => {
            let (lo, hi) = (T::from_f64(args[0]), T::from_f64(args[1]));
            if x < lo {
                lo
            } else if x > hi {
                hi
            } else {
                x
            }
        }
        _ => x,
    }
}

/// Masked select: `x` where `cond` holds, else `y`. All three blocks must
/// have the same shape.
pub fn where_select(cond: &NdArray, x: &NdArray, y: &NdArray) -> Result<NdArray> {
    if cond.shape() != x.shape() {
        return Err(Error::shape_mismatch(cond.shape(), x.shape()));
    }
    if x.shape() != y.shape() {
        return Err(Error::shape_mismatch(x.shape(), y.shape()));
    }
    let mask = cond.to_typed::<bool>();
    let y = y.cast(result_dtype(x.dtype(), y.dtype()));
    let x = x.cast(y.dtype());
    Ok(map_array!(&x, a => select(&mask, a, &y.to_typed())))
}

fn select<T: Element>(mask: &ArrayD<bool>, x: &ArrayD<T>, y: &ArrayD<T>) -> ArrayD<T> {
    Zip::from(mask)
        .and(x)
        .and(y)
        .map_collect(|&m, &a, &b| if m { a } else { b })
}

/// Global coordinates of the non-zero elements of `arr`.
///
/// `block_slices` holds the block's `(start, stop)` range along each axis of
/// the full array; local coordinates are shifted by `start`. Returns one
/// `int64` coordinate array per axis and the shared shape of those arrays.
pub fn nonzero(arr: &NdArray, block_slices: &[(usize, usize)]) -> Result<(Vec<NdArray>, Vec<usize>)> {
    if arr.ndim() == 0 {
        return Err(Error::invalid("arr", "nonzero is undefined for 0-D blocks"));
    }
    if block_slices.len() != arr.ndim() {
        return Err(Error::invalid(
            "block_slice_tuples",
            format!("expected {} ranges, got {}", arr.ndim(), block_slices.len()),
        ));
    }
    let mask = arr.to_typed::<bool>();
    let mut coords: Vec<Vec<i64>> = vec![Vec::new(); arr.ndim()];
    for (index, _) in mask.indexed_iter().filter(|(_, v)| **v) {
        for (axis, column) in coords.iter_mut().enumerate() {
            column.push((index[axis] + block_slices[axis].0) as i64);
        }
    }
    let count = coords.first().map_or(0, Vec::len);
    let arrays = coords
        .into_iter()
        .map(|c| NdArray::from(Array1::from(c).into_dyn()))
        .collect();
    Ok((arrays, vec![count]))
}

pub fn astype(arr: &NdArray, dtype: DType) -> NdArray {
    arr.cast(dtype)
}

/// Full transpose (axis order reversed).
pub fn transpose(arr: &NdArray) -> NdArray {
    arr.transposed()
}

pub fn swapaxes(arr: &NdArray, axis1: i64, axis2: i64) -> Result<NdArray> {
    let a1 = normalize_axis(axis1, arr.ndim())?;
    let a2 = normalize_axis(axis2, arr.ndim())?;
    Ok(map_array!(arr, a => {
        let mut out = a.clone();
        out.swap_axes(a1, a2);
        out
    }))
}

/// How [`split`] divides an axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitSpec {
    /// Equal sections; the axis length must be divisible.
    Sections(usize),
    /// Split before each index; indices past the end give empty pieces.
    Indices(Vec<usize>),
}

/// `np.split` along `axis`, after an optional full transpose.
pub fn split(arr: &NdArray, spec: &SplitSpec, axis: i64, transposed: bool) -> Result<Vec<NdArray>> {
    let arr = arr.transposed_if(transposed);
    let axis = normalize_axis(axis, arr.ndim())?;
    let len = arr.shape()[axis];
    let bounds: Vec<usize> = match spec {
        SplitSpec::Sections(0) => return Err(Error::invalid("indices_or_sections", "zero sections")),
        SplitSpec::Sections(n) if len % n != 0 => {
            return Err(Error::invalid(
                "indices_or_sections",
                format!("{} sections do not divide an axis of length {}", n, len),
            ))
        }
        SplitSpec::Sections(n) => (1..*n).map(|i| i * len / n).collect(),
        SplitSpec::Indices(indices) => indices.iter().map(|&i| i.min(len)).collect(),
    };
    let mut starts = vec![0];
    starts.extend(bounds.iter().copied());
    let mut stops = bounds;
    stops.push(len);
    Ok(starts
        .into_iter()
        .zip(stops)
        .map(|(start, stop)| {
            let stop = stop.max(start);
            map_array!(&arr, a => a
                .slice_axis(Axis(axis), ndarray::Slice::from(start..stop))
                .to_owned())
        })
        .collect())
}

/// `(shape, dtype)` of a block, fetched without moving its data.
pub fn shape_dtype(arr: &NdArray) -> (Vec<usize>, DType) {
    (arr.shape().to_vec(), arr.dtype())
}

pub fn size(arr: &NdArray) -> usize {
    arr.size()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_type_classes() {
        let ints = NdArray::from(array![-2i64, 0, 3].into_dyn());
        assert_eq!(
            map_uop(UnaryOp::Sign, &ints, &[]).unwrap(),
            NdArray::from(array![-1i64, 0, 1].into_dyn())
        );
        let roots = map_uop(UnaryOp::Sqrt, &NdArray::from(array![4i64, 9].into_dyn()), &[]).unwrap();
        assert_eq!(roots, NdArray::from(array![2.0f64, 3.0].into_dyn()));
        let f32s = map_uop(UnaryOp::Exp, &NdArray::from(array![0.0f32].into_dyn()), &[]).unwrap();
        assert_eq!(f32s.dtype(), DType::Float32);
        let nans = map_uop(UnaryOp::Isnan, &NdArray::from(array![f64::NAN, 1.0].into_dyn()), &[]).unwrap();
        assert_eq!(nans, NdArray::from(array![true, false].into_dyn()));
    }

    #[test]
    fn test_rint_ties_to_even_and_clip_arity() {
        let a = NdArray::from(array![0.5f64, 1.5, 2.5, -0.5].into_dyn());
        let r = map_uop(UnaryOp::Rint, &a, &[]).unwrap().to_f64();
        for (got, want) in r.iter().zip([0.0, 2.0, 2.0, -0.0]) {
            assert_relative_eq!(*got, want);
        }
        assert!(map_uop(UnaryOp::Clip, &a, &[0.0]).is_err());
        let c = map_uop(UnaryOp::Clip, &a, &[0.0, 1.0]).unwrap();
        assert_eq!(c, NdArray::from(array![0.5f64, 1.0, 1.0, 0.0].into_dyn()));
        assert!("erf".parse::<UnaryOp>().is_err());
    }

    #[test]
    fn test_where_requires_identical_shapes() {
        let cond = NdArray::from(array![true, false].into_dyn());
        let x = NdArray::from(array![1i64, 2].into_dyn());
        let y = NdArray::from(array![0.5f64, 0.5].into_dyn());
        assert_eq!(
            where_select(&cond, &x, &y).unwrap(),
            NdArray::from(array![1.0f64, 0.5].into_dyn())
        );
        let short = NdArray::from(array![0.5f64].into_dyn());
        assert!(matches!(where_select(&cond, &x, &short), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_nonzero_offsets_by_block_position() {
        let a = NdArray::from(array![[0i64, 7], [5, 0]].into_dyn());
        let (coords, shape) = nonzero(&a, &[(2, 4), (10, 12)]).unwrap();
        assert_eq!(shape, vec![2]);
        assert_eq!(coords[0], NdArray::from(array![2i64, 3].into_dyn()));
        assert_eq!(coords[1], NdArray::from(array![11i64, 10].into_dyn()));
    }

    #[test]
    fn test_split_sections_and_indices() {
        let a = NdArray::from(array![[1i64, 2, 3, 4], [5, 6, 7, 8]].into_dyn());
        let halves = split(&a, &SplitSpec::Sections(2), 1, false).unwrap();
        assert_eq!(halves[1], NdArray::from(array![[3i64, 4], [7, 8]].into_dyn()));
        assert!(split(&a, &SplitSpec::Sections(3), 1, false).is_err());

        let pieces = split(&a, &SplitSpec::Indices(vec![1, 9]), 0, true).unwrap();
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], NdArray::from(array![[1i64, 5]].into_dyn()));
        assert_eq!(pieces[2].shape(), &[0, 2]);
    }

    #[test]
    fn test_swapaxes() {
        let a = NdArray::zeros(&[2, 3, 4], DType::Float64);
        assert_eq!(swapaxes(&a, 0, -1).unwrap().shape(), &[4, 3, 2]);
        assert!(swapaxes(&a, 0, 3).is_err());
    }
}
