//! Properties of the block contract that the array layer relies on.
//!
//! - Axis sums computed by contraction agree with the plain reduction
//! - Argmin folded over blocks finds the global index and value
//! - Pivot partition keeps exactly the elements that satisfy the pivot
//! - Block updates never modify the blocks they were given
//! - Random blocks depend only on their stream parameters
//! - Unknown operation names are rejected by name

use approx::assert_relative_eq;
use ndarray::{array, ArrayD, Axis, Dimension, IxDyn};

use tessera_core::{BlockRngState, DType, Error, Kwargs, NdArray, Selection, Value};
use tessera_kernel::ops::argop::{arg_op, ArgOp, ArgOptimum, Scalar};
use tessera_kernel::ops::assembly::{update_block, update_block_by_index, DstParam, SrcParam};
use tessera_kernel::ops::order_stats::{pivot_partition, PivotOp};
use tessera_kernel::ops::reduce::{reduce_axis, ReduceOp};
use tessera_kernel::{dispatch, dispatch_by_name, KernelOp};

fn floats(shape: &[usize]) -> NdArray {
    let data = ArrayD::from_shape_fn(IxDyn(shape), |i| {
        let flat = i.slice().iter().fold(0usize, |acc, &x| acc * 7 + x);
        ((flat * 37) % 101) as f64 / 8.0 - 3.0
    });
    NdArray::from(data)
}

// ─────────────────────────────────────────────────────────────
// Reductions
// ─────────────────────────────────────────────────────────────

#[test]
fn test_axis_sum_matches_direct_sum() {
    for shape in [vec![5, 4], vec![3, 4, 2], vec![6]] {
        let arr = floats(&shape);
        let direct = arr.to_f64();
        for axis in 0..shape.len() {
            let fast = reduce_axis(ReduceOp::Sum, &arr, Some(axis), false, false).unwrap().to_f64();
            let slow = direct.sum_axis(Axis(axis));
            assert_eq!(fast.shape(), slow.shape());
            for (a, b) in fast.iter().zip(slow.iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn test_transposed_sum_uses_true_orientation() {
    let arr = NdArray::from(array![[1.0f64, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn());
    let sums = reduce_axis(ReduceOp::Sum, &arr, Some(0), false, true).unwrap();
    assert_eq!(sums, NdArray::from(array![6.0f64, 15.0].into_dyn()));
}

// ─────────────────────────────────────────────────────────────
// Distributed selection
// ─────────────────────────────────────────────────────────────

#[test]
fn test_argmin_fold_over_blocks() {
    // Global array of 10 elements split into blocks of 4, 4 and 2. The
    // minimum -9.5 appears at global index 5 and again at 8.
    let blocks = [
        (0usize, array![3.0f64, 1.0, 4.0, 1.5]),
        (4, array![5.0f64, -9.5, 2.0, 6.0]),
        (8, array![-9.5f64, 0.0]),
    ];
    let mut carried: Option<ArgOptimum> = None;
    for (start, data) in &blocks {
        let arr = NdArray::from(data.clone().into_dyn());
        carried = Some(arg_op(ArgOp::Argmin, &arr, *start, carried).unwrap());
    }
    assert_eq!(carried, Some(ArgOptimum { index: 5, value: Scalar::Float(-9.5) }));
}

#[test]
fn test_arg_op_through_dispatch() {
    let arr: Value = NdArray::from(array![2i64, 8, 8].into_dyn()).into();
    let out = dispatch_by_name(
        "arg_op",
        vec![
            "argmax".into(),
            arr,
            Value::List(vec![3usize.into(), 6usize.into()]),
            1usize.into(),
            8.0.into(),
        ],
        Kwargs::new(),
    )
    .unwrap();
    // The carried optimum ties with the block's and was seen first.
    assert_eq!(out, Value::List(vec![1usize.into(), 8.0.into()]));
}

#[test]
fn test_arg_op_carries_large_integers_exactly() {
    // Neighbouring integers above 2^53 share one f64.
    let big = (1i64 << 53) + 1;
    let arr: Value = NdArray::from(array![big - 1, big + 1].into_dyn()).into();
    let out = dispatch_by_name(
        "arg_op",
        vec![
            "argmax".into(),
            arr,
            Value::List(vec![3usize.into(), 5usize.into()]),
            0usize.into(),
            Value::Int(big),
        ],
        Kwargs::new(),
    )
    .unwrap();
    assert_eq!(out, Value::List(vec![4usize.into(), Value::Int(big + 1)]));
}

#[test]
fn test_touch_returns_readiness_marker() {
    let arr: Value = NdArray::from(array![1.0f64, 2.0].into_dyn()).into();
    let out = dispatch_by_name("touch", vec![arr.clone()], Kwargs::new()).unwrap();
    assert_eq!(out, Value::Bool(true));
    assert_eq!(dispatch_by_name("identity", vec![arr.clone()], Kwargs::new()).unwrap(), arr);
}

#[test]
fn test_pivot_partition_completeness() {
    let arr = floats(&[4, 6]);
    for pivot in [-3.5, -1.0, 0.0, 2.25, 10.0] {
        let (count, kept) = pivot_partition(&arr, pivot, PivotOp::Gt);
        assert_eq!(count, kept.size());
        let expected: Vec<f64> = arr.to_f64().iter().copied().filter(|&e| e > pivot).collect();
        assert_eq!(kept.to_f64().iter().copied().collect::<Vec<_>>(), expected);
    }
}

// ─────────────────────────────────────────────────────────────
// Copy-on-write
// ─────────────────────────────────────────────────────────────

#[test]
fn test_update_block_leaves_inputs_untouched() {
    let dst = NdArray::zeros(&[3, 3], DType::Float64);
    let src = NdArray::ones(&[2, 2], DType::Float64);
    let updated = update_block(
        &dst,
        &[src.clone()],
        &[SrcParam::new(Selection::from_ranges(&[(0, 2), (0, 2)]), false)],
        &[DstParam::new(Selection::from_ranges(&[(1, 3), (1, 3)]), false)],
    )
    .unwrap();
    assert_eq!(dst, NdArray::zeros(&[3, 3], DType::Float64));
    assert_eq!(src, NdArray::ones(&[2, 2], DType::Float64));
    assert_relative_eq!(updated.to_f64()[[2, 2]], 1.0);
    assert_relative_eq!(updated.to_f64()[[0, 0]], 0.0);

    let by_index = update_block_by_index(&dst, &src, &[(vec![0, 2], vec![1, 1])]).unwrap();
    assert_eq!(dst, NdArray::zeros(&[3, 3], DType::Float64));
    assert_relative_eq!(by_index.to_f64()[[0, 2]], 1.0);
}

#[test]
fn test_mismatched_param_lists_are_rejected() {
    let dst = NdArray::zeros(&[2, 2], DType::Int64);
    let result = update_block(
        &dst,
        &[dst.clone()],
        &[SrcParam::new(Selection::from_ranges(&[(0, 2), (0, 2)]), false)],
        &[],
    );
    assert!(result.is_err());
}

// ─────────────────────────────────────────────────────────────
// Random streams
// ─────────────────────────────────────────────────────────────

fn sample_blocks(state: &BlockRngState, n: usize) -> Vec<Value> {
    (0..n)
        .map(|_| {
            let params = state.new_block_rng_params();
            dispatch(
                KernelOp::RandomBlock,
                vec![
                    params.into(),
                    "normal".into(),
                    Value::List(vec![0.0.into(), 1.0.into()]),
                    vec![3usize, 3].into(),
                    "float64".into(),
                ],
                Kwargs::new(),
            )
            .unwrap()
        })
        .collect()
}

#[test]
fn test_random_blocks_reproducible_from_seed() {
    let first = sample_blocks(&BlockRngState::new(2024), 4);
    let second = sample_blocks(&BlockRngState::new(2024), 4);
    assert_eq!(first, second);
    assert_ne!(first[0], first[1]);

    let other = sample_blocks(&BlockRngState::new(2025), 1);
    assert_ne!(first[0], other[0]);
}

// ─────────────────────────────────────────────────────────────
// Names
// ─────────────────────────────────────────────────────────────

#[test]
fn test_unknown_names_are_unsupported() {
    let arr: Value = NdArray::from(array![1.0f64, 2.0].into_dyn()).into();
    let unsupported = |r: tessera_core::Result<Value>| matches!(r, Err(Error::UnsupportedOperation { .. }));

    assert!(unsupported(dispatch_by_name("frobnicate", vec![], Kwargs::new())));
    assert!(unsupported(dispatch_by_name(
        "map_uop",
        vec!["erfinv".into(), arr.clone()],
        Kwargs::new()
    )));
    assert!(unsupported(dispatch_by_name(
        "bop",
        vec!["spaceship".into(), arr.clone(), arr.clone(), false.into(), false.into()],
        Kwargs::new()
    )));
    assert!(unsupported(dispatch_by_name(
        "reduce_axis",
        vec!["median".into(), arr, Value::None, false.into(), false.into()],
        Kwargs::new()
    )));
}
