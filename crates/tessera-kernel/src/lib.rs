//! # tessera-kernel
//!
//! The block operation contract. Every backend executes these operations on
//! the device that owns a block, so each one takes blocks and plain values
//! and returns new blocks, never mutating its inputs.
//!
//! Operations are reachable two ways:
//! - as typed functions in [`ops`], for local callers and tests;
//! - by name through [`KernelOp`] and [`dispatch`], which decode dynamic
//!   [`Value`] arguments. This is the form backends register and invoke.

pub mod args;
pub mod ops;

use std::fmt;
use std::str::FromStr;

use log::debug;
use tessera_core::{Error, Kwargs, NdArray, Result, Value};

use args::{to_array, ArgReader};
use ops::argop::{arg_op, ArgOp, ArgOptimum, Scalar};
use ops::assembly::{self, SelectTarget};
use ops::binary::{self, TensorAxes};
use ops::compare::{self, ArrayCompare};
use ops::construct::{self, BlockInit};
use ops::elementwise::{self, SplitSpec, UnaryOp};
use ops::order_stats::{self, PivotOp};
use ops::random::{self, Distribution};
use ops::reduce::{self, ReduceOp};
use ops::{linalg, normalize_axis};

macro_rules! kernel_ops {
    ($($variant:ident => $name:literal,)*) => {
        /// Every operation of the block contract.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum KernelOp {
            $($variant,)*
        }

        impl KernelOp {
            /// All operations, in registration order.
            pub const ALL: &'static [KernelOp] = &[$(KernelOp::$variant,)*];

            /// Name under which the operation is registered with a backend.
            pub fn name(self) -> &'static str {
                match self {
                    $(KernelOp::$variant => $name,)*
                }
            }
        }

        impl FromStr for KernelOp {
            type Err = Error;

            fn from_str(name: &str) -> Result<Self> {
                match name {
                    $($name => Ok(KernelOp::$variant),)*
                    other => Err(Error::unsupported("kernel operation", other)),
                }
            }
        }
    };
}

kernel_ops! {
    NewBlock => "new_block",
    RandomBlock => "random_block",
    Permutation => "permutation",
    CreateBlock => "create_block",
    UpdateBlock => "update_block",
    UpdateBlockByIndex => "update_block_by_index",
    AdvancedSelectBlockAlongAxis => "advanced_select_block_along_axis",
    AdvancedAssignBlockAlongAxis => "advanced_assign_block_along_axis",
    Diag => "diag",
    Arange => "arange",
    SumReduce => "sum_reduce",
    ReduceAxis => "reduce_axis",
    MapUop => "map_uop",
    Where => "where",
    Xlogy => "xlogy",
    Astype => "astype",
    Transpose => "transpose",
    Swapaxes => "swapaxes",
    Split => "split",
    ShapeDtype => "shape_dtype",
    Size => "size",
    TdigestChunk => "tdigest_chunk",
    PercentilesFromTdigest => "percentiles_from_tdigest",
    SelectMedian => "select_median",
    WeightedMedian => "weighted_median",
    PivotPartition => "pivot_partition",
    Bop => "bop",
    BopReduce => "bop_reduce",
    Qr => "qr",
    Cholesky => "cholesky",
    Svd => "svd",
    Inv => "inv",
    ArrayCompare => "array_compare",
    LogicalAnd => "logical_and",
    ArgOp => "arg_op",
    Reshape => "reshape",
    Identity => "identity",
    Touch => "touch",
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execute `op` on dynamically typed arguments.
///
/// Positional arguments follow the order of the typed functions in [`ops`].
/// Selection parameters of `create_block` / `update_block` and the options
/// of `qr` are keyword arguments; every other keyword is rejected.
pub fn dispatch(op: KernelOp, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
    debug!("kernel {} ({} args, {} kwargs)", op, args.len(), kwargs.len());
    let mut r = ArgReader::new(op.name(), args, kwargs);
    let out: Value = match op {
        KernelOp::NewBlock => {
            let init: BlockInit = r.str("op_name")?.parse()?;
            let grid_entry = r.shape("grid_entry")?;
            let grid_meta = r.value("grid_meta")?;
            construct::new_block(init, &grid_entry, grid_meta.as_grid()?)?.into()
        }
        KernelOp::RandomBlock => {
            let params = r.value("rng_params")?.as_rng()?;
            let name = r.str("distribution")?;
            let dist_args = r.floats("distribution_args")?;
            let shape = r.shape("shape")?;
            let dtype = r.str("dtype")?.parse()?;
            let dist = Distribution::from_name(&name, &dist_args)?;
            random::random_block(params, &dist, &shape, dtype)?.into()
        }
        KernelOp::Permutation => {
            let params = r.value("rng_params")?.as_rng()?;
            random::permutation(params, r.usize("size")?)?.into()
        }
        KernelOp::CreateBlock => {
            let srcs = r.arrays()?;
            let src_params = r.src_params()?;
            let dst_params = r.dst_params()?;
            let dst_shape = r.required_kwarg("dst_shape")?.as_shape()?;
            let dst_shape_bc = r.kwarg("dst_shape_bc").map(|v| v.as_shape()).transpose()?;
            assembly::create_block(&srcs, &src_params, &dst_params, &dst_shape, dst_shape_bc.as_deref())?.into()
        }
        KernelOp::UpdateBlock => {
            let dst = r.array("dst")?;
            let srcs = r.arrays()?;
            let src_params = r.src_params()?;
            let dst_params = r.dst_params()?;
            assembly::update_block(&dst, &srcs, &src_params, &dst_params)?.into()
        }
        KernelOp::UpdateBlockByIndex => {
            let dst = r.array("dst")?;
            let src = r.array("src")?;
            let pairs = r
                .list("index_pairs")?
                .iter()
                .map(index_pair)
                .collect::<Result<Vec<_>>>()?;
            assembly::update_block_by_index(&dst, &src, &pairs)?.into()
        }
        KernelOp::AdvancedSelectBlockAlongAxis => {
            let dst = SelectTarget::from_value(r.value("dst")?)?;
            let src = r.array("src")?;
            let ss = r.selection("ss")?;
            let dst_axis = r.usize("dst_axis")?;
            let src_axis = r.usize("src_axis")?;
            let dst_coord = r.shape("dst_coord")?;
            let src_coord = r.shape("src_coord")?;
            assembly::advanced_select_block_along_axis(dst, &src, &ss, dst_axis, src_axis, &dst_coord, &src_coord)?
                .into_value()
        }
        KernelOp::AdvancedAssignBlockAlongAxis => {
            let dst = r.array("dst")?;
            let src = r.array("src")?;
            let ss = r.selection("ss")?;
            let axis = r.usize("axis")?;
            let dst_coord = r.shape("dst_coord")?;
            let src_coord = r.shape("src_coord")?;
            assembly::advanced_assign_block_along_axis(dst, &src, &ss, axis, &dst_coord, &src_coord)?.into()
        }
        KernelOp::Diag => {
            let arr = r.array("arr")?;
            let offset = r.opt_int()?.unwrap_or(0);
            construct::diag(&arr, offset)?.into()
        }
        KernelOp::Arange => {
            let start = r.float("start")?;
            let stop = r.float("stop")?;
            let step = r.float("step")?;
            let dtype = r.str("dtype")?.parse()?;
            construct::arange(start, stop, step, dtype)?.into()
        }
        KernelOp::SumReduce => reduce::sum_reduce(&r.arrays()?)?.into(),
        KernelOp::ReduceAxis => {
            let op: ReduceOp = r.str("op_name")?.parse()?;
            let arr = r.array("arr")?;
            let axis = r.opt_int()?;
            let keepdims = r.bool("keepdims")?;
            let transposed = r.bool("transposed")?;
            let axis = axis.map(|a| normalize_axis(a, arr.ndim())).transpose()?;
            reduce::reduce_axis(op, &arr, axis, keepdims, transposed)?.into()
        }
        KernelOp::MapUop => {
            let uop: UnaryOp = r.str("op_name")?.parse()?;
            let arr = r.array("arr")?;
            let uop_args = match r.opt_value() {
                Some(v) => v.as_list()?.iter().map(Value::as_f64).collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            elementwise::map_uop(uop, &arr, &uop_args)?.into()
        }
        KernelOp::Where => {
            let arr = r.array("arr")?;
            match (r.opt_array()?, r.opt_array()?) {
                (Some(x), Some(y)) => elementwise::where_select(&arr, &x, &y)?.into(),
                (None, None) => {
                    let slices = r
                        .list("block_slice_tuples")?
                        .iter()
                        .map(start_stop)
                        .collect::<Result<Vec<_>>>()?;
                    let (coords, shape) = elementwise::nonzero(&arr, &slices)?;
                    Value::List(vec![
                        Value::List(coords.into_iter().map(Value::Array).collect()),
                        Value::Shape(shape),
                    ])
                }
                _ => return Err(Error::invalid("where", "x and y must be given together")),
            }
        }
        KernelOp::Xlogy => {
            let x = r.array("x")?;
            let y = r.array("y")?;
            binary::xlogy(&x, &y)?.into()
        }
        KernelOp::Astype => {
            let arr = r.array("arr")?;
            elementwise::astype(&arr, r.str("dtype")?.parse()?).into()
        }
        KernelOp::Transpose => elementwise::transpose(&r.array("arr")?).into(),
        KernelOp::Swapaxes => {
            let arr = r.array("arr")?;
            let axis1 = r.int("axis1")?;
            let axis2 = r.int("axis2")?;
            elementwise::swapaxes(&arr, axis1, axis2)?.into()
        }
        KernelOp::Split => {
            let arr = r.array("arr")?;
            let spec = match r.value("indices_or_sections")? {
                Value::Int(n) => SplitSpec::Sections(
                    usize::try_from(n).map_err(|_| Error::invalid("indices_or_sections", "negative"))?,
                ),
                other => SplitSpec::Indices(other.as_shape()?),
            };
            let axis = r.int("axis")?;
            let transposed = r.bool("transposed")?;
            let pieces = elementwise::split(&arr, &spec, axis, transposed)?;
            Value::List(pieces.into_iter().map(Value::Array).collect())
        }
        KernelOp::ShapeDtype => {
            let (shape, dtype) = elementwise::shape_dtype(&r.array("arr")?);
            Value::List(vec![Value::Shape(shape), Value::Str(dtype.name().to_string())])
        }
        KernelOp::Size => elementwise::size(&r.array("arr")?).into(),
        KernelOp::TdigestChunk => order_stats::tdigest_chunk(&r.array("arr")?).into(),
        KernelOp::PercentilesFromTdigest => {
            let q = r.array("q")?;
            let digests = r
                .rest()
                .iter()
                .map(|v| v.as_digest().cloned())
                .collect::<Result<Vec<_>>>()?;
            order_stats::percentiles_from_tdigest(&q, &digests)?.into()
        }
        KernelOp::SelectMedian => order_stats::select_median(&r.array("arr")?)?.into(),
        KernelOp::WeightedMedian => {
            let mut all = r.arrays()?;
            if all.len() % 2 != 0 {
                return Err(Error::invalid(
                    "arr_and_weights",
                    format!("expected values and weights of equal count, got {} items", all.len()),
                ));
            }
            let weights = all.split_off(all.len() / 2);
            let keys = all.iter().map(NdArray::item_f64).collect::<Result<Vec<_>>>()?;
            let weights = weights.iter().map(NdArray::item_f64).collect::<Result<Vec<_>>>()?;
            let at = order_stats::weighted_median(&keys, &weights)?;
            all.swap_remove(at).into()
        }
        KernelOp::PivotPartition => {
            let arr = r.array("arr")?;
            let pivot = r.float("pivot")?;
            let op: PivotOp = r.str("op")?.parse()?;
            let (count, kept) = order_stats::pivot_partition(&arr, pivot, op);
            Value::List(vec![count.into(), kept.into()])
        }
        KernelOp::Bop => {
            let name = r.str("op")?;
            let a1 = r.array("a1")?;
            let a2 = r.array("a2")?;
            let a1_t = r.bool("a1_T")?;
            let a2_t = r.bool("a2_T")?;
            let axes = match r.opt_value() {
                None => TensorAxes::Count(1),
                Some(v) => tensor_axes(&v)?,
            };
            binary::bop(&name, &a1, &a2, a1_t, a2_t, &axes)?.into()
        }
        KernelOp::BopReduce => {
            let name = r.str("op")?;
            let a1 = r.array("a1")?;
            let a2 = r.array("a2")?;
            let a1_t = r.bool("a1_T")?;
            let a2_t = r.bool("a2_T")?;
            reduce::bop_reduce(&name, &a1, &a2, a1_t, a2_t)?.into()
        }
        KernelOp::Qr => {
            let arrays = r.arrays()?;
            if let Some(mode) = r.kwarg("mode") {
                if mode.as_str()? != "reduced" {
                    return Err(Error::unsupported("qr mode", mode.as_str()?));
                }
            }
            let axis = r.kwarg("axis").map(|v| v.as_i64()).transpose()?;
            let ndim = arrays.first().map_or(2, NdArray::ndim);
            let axis = axis.map(|a| normalize_axis(a, ndim)).transpose()?;
            let (q, rr) = linalg::qr(&arrays, axis)?;
            Value::List(vec![q.into(), rr.into()])
        }
        KernelOp::Cholesky => linalg::cholesky(&r.array("arr")?)?.into(),
        KernelOp::Svd => {
            let (u, s, vt) = linalg::svd(&r.array("arr")?)?;
            Value::List(vec![u.into(), s.into(), vt.into()])
        }
        KernelOp::Inv => linalg::inv(&r.array("arr")?)?.into(),
        KernelOp::ArrayCompare => {
            let name: ArrayCompare = r.str("func_name")?.parse()?;
            let a = r.array("a")?;
            let b = r.array("b")?;
            let extra = r.rest().iter().map(Value::as_f64).collect::<Result<Vec<_>>>()?;
            compare::array_compare(name, &a, &b, &extra)?.into()
        }
        KernelOp::LogicalAnd => {
            let flags = r.rest().into_iter().map(flag).collect::<Result<Vec<_>>>()?;
            compare::logical_and(&flags).into()
        }
        KernelOp::ArgOp => {
            let op: ArgOp = r.str("op_name")?.parse()?;
            let arr = r.array("arr")?;
            let start = block_start(&r.value("block_slice")?)?;
            let carried = match (r.opt_value(), r.opt_value()) {
                (Some(index), Some(value)) => Some(ArgOptimum {
                    index: usize::try_from(index.as_i64()?)
                        .map_err(|_| Error::invalid("other_argoptimum", "negative index"))?,
                    value: Scalar::from_value(&value)?,
                }),
                (None, None) => None,
                _ => {
                    return Err(Error::invalid(
                        "other_optimum",
                        "argoptimum and optimum must be given together",
                    ))
                }
            };
            let best = arg_op(op, &arr, start, carried)?;
            Value::List(vec![best.index.into(), best.value.into()])
        }
        KernelOp::Reshape => {
            let arr = r.array("arr")?;
            arr.reshape(&r.shape("shape")?)?.into()
        }
        KernelOp::Identity => r.value("value")?,
        KernelOp::Touch => {
            r.value("value")?;
            Value::Bool(true)
        }
    };
    r.finish()?;
    Ok(out)
}

/// Look up `name` and dispatch it.
pub fn dispatch_by_name(name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
    dispatch(name.parse()?, args, kwargs)
}

fn index_pair(value: &Value) -> Result<(Vec<usize>, Vec<usize>)> {
    match value.as_list()? {
        [dst, src] => Ok((dst.as_shape()?, src.as_shape()?)),
        _ => Err(Error::invalid("index_pairs", "expected [dst_index, src_index]")),
    }
}

fn start_stop(value: &Value) -> Result<(usize, usize)> {
    match value.as_shape()?.as_slice() {
        [start, stop] => Ok((*start, *stop)),
        other => Err(Error::invalid(
            "block_slice_tuples",
            format!("expected (start, stop), got {:?}", other),
        )),
    }
}

/// Start of a block slice given as an integer or a `(start, stop)` pair.
fn block_start(value: &Value) -> Result<usize> {
    match value {
        Value::Int(_) => usize::try_from(value.as_i64()?).map_err(|_| Error::invalid("block_slice", "negative start")),
        other => start_stop(other).map(|(start, _)| start),
    }
}

fn tensor_axes(value: &Value) -> Result<TensorAxes> {
    match value {
        Value::Int(n) => usize::try_from(*n)
            .map(TensorAxes::Count)
            .map_err(|_| Error::invalid("axes", "negative axis count")),
        Value::List(pair) => match pair.as_slice() {
            [a, b] => Ok(TensorAxes::Pairs(a.as_shape()?, b.as_shape()?)),
            _ => Err(Error::invalid("axes", "expected [axes_a, axes_b]")),
        },
        other => Err(Error::invalid("axes", format!("expected int or axis pair, got {}", other.kind()))),
    }
}

fn flag(value: Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Ok(to_array(other)?.item_f64()? != 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tessera_core::{DType, GridMeta, RngParams};

    fn call(op: KernelOp, args: Vec<Value>) -> Result<Value> {
        dispatch(op, args, Kwargs::new())
    }

    #[test]
    fn test_names_roundtrip() {
        for op in KernelOp::ALL {
            assert_eq!(op.name().parse::<KernelOp>().unwrap(), *op);
        }
        assert!(matches!(
            "not_an_op".parse::<KernelOp>(),
            Err(Error::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_new_block_through_dispatch() {
        let meta = GridMeta::new(vec![3, 3], vec![2, 2], DType::Float64).unwrap();
        let out = call(
            KernelOp::NewBlock,
            vec!["eye".into(), vec![1usize, 1].into(), meta.into()],
        )
        .unwrap();
        assert_eq!(out.into_array().unwrap(), NdArray::from(array![[1.0f64]].into_dyn()));
    }

    #[test]
    fn test_random_block_through_dispatch() {
        let params = RngParams { seed: 7, jump_index: 2 };
        let args = || {
            vec![
                params.into(),
                "uniform".into(),
                Value::List(vec![(-1.0).into(), 1.0.into()]),
                vec![2usize, 3].into(),
                "float32".into(),
            ]
        };
        let a = call(KernelOp::RandomBlock, args()).unwrap();
        assert_eq!(a, call(KernelOp::RandomBlock, args()).unwrap());
        assert_eq!(a.as_array().unwrap().dtype(), DType::Float32);
    }

    #[test]
    fn test_where_both_forms() {
        let mask: Value = NdArray::from(array![[false, true], [true, true]].into_dyn()).into();
        let x: Value = NdArray::from(array![[1i64, 2], [3, 4]].into_dyn()).into();
        let y: Value = NdArray::from(array![[0i64, 0], [0, 0]].into_dyn()).into();
        let selected = call(KernelOp::Where, vec![mask.clone(), x, y]).unwrap();
        assert_eq!(
            selected.into_array().unwrap(),
            NdArray::from(array![[0i64, 2], [3, 4]].into_dyn())
        );

        let slices = Value::List(vec![vec![4usize, 6].into(), vec![0usize, 2].into()]);
        let out = call(KernelOp::Where, vec![mask, Value::None, Value::None, slices]).unwrap();
        let parts = out.as_list().unwrap();
        assert_eq!(parts[1], Value::Shape(vec![3]));
        let rows = parts[0].as_list().unwrap()[0].as_array().unwrap().clone();
        assert_eq!(rows, NdArray::from(array![4i64, 5, 5].into_dyn()));
    }

    #[test]
    fn test_weighted_median_returns_value() {
        let args: Vec<Value> = [1.0f64, 9.0, 4.0, 1.0, 1.0, 5.0]
            .into_iter()
            .map(|v| Value::Array(NdArray::scalar(v)))
            .collect();
        let out = call(KernelOp::WeightedMedian, args).unwrap();
        assert_eq!(out.into_array().unwrap(), NdArray::scalar(4.0f64));
    }

    #[test]
    fn test_unexpected_arguments_are_rejected() {
        let arr: Value = NdArray::from(array![1.0f64].into_dyn()).into();
        assert!(call(KernelOp::Size, vec![arr.clone(), arr.clone()]).is_err());
        let mut kwargs = Kwargs::new();
        kwargs.insert("out".into(), Value::None);
        kwargs.insert("order".into(), "C".into());
        assert!(dispatch(KernelOp::Transpose, vec![arr], kwargs).is_err());
    }

    #[test]
    fn test_qr_mode_keyword() {
        let arr: Value = NdArray::from(array![[2.0f64, 0.0], [0.0, 3.0]].into_dyn()).into();
        let mut kwargs = Kwargs::new();
        kwargs.insert("mode".into(), "complete".into());
        assert!(dispatch(KernelOp::Qr, vec![arr.clone()], kwargs).is_err());
        let out = call(KernelOp::Qr, vec![arr]).unwrap();
        assert_eq!(out.as_list().unwrap().len(), 2);
    }
}
