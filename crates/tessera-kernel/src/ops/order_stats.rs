//! Per-block steps of distributed selection and quantile estimation.
//!
//! None of these operations gather data: each block contributes a small
//! summary (a median, a count, a digest) that the caller combines.

use std::str::FromStr;

use ndarray::Array1;
use tessera_core::{with_array, Element, Error, NdArray, Result, TDigest};

/// Median of a 1-D block by partial selection.
///
/// Returns the element at rank `len / 2` with the block's dtype. An empty
/// block yields `0`, which carries zero weight in a weighted median.
pub fn select_median(arr: &NdArray) -> Result<NdArray> {
    if arr.ndim() != 1 {
        return Err(Error::invalid(
            "arr",
            format!("select_median expects a 1-D block, got {}-D", arr.ndim()),
        ));
    }
    let n = arr.size();
    if n == 0 {
        return Ok(NdArray::scalar(0i64));
    }
    let keys = arr.to_f64();
    let mut order: Vec<usize> = (0..n).collect();
    let k = n / 2;
    order.select_nth_unstable_by(k, |&i, &j| keys[[i]].total_cmp(&keys[[j]]));
    let pick = order[k];
    Ok(with_array!(arr, a => NdArray::scalar(a[[pick]])))
}

/// Position in `values` of the weighted median: sort by value, accumulate
/// weights, and take the first value whose running weight reaches half of
/// the total.
pub fn weighted_median(values: &[f64], weights: &[f64]) -> Result<usize> {
    if values.len() != weights.len() {
        return Err(Error::shape_mismatch(&[values.len()], &[weights.len()]));
    }
    if values.is_empty() {
        return Err(Error::invalid("values", "weighted median of no values"));
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
    let half = weights.iter().sum::<f64>() / 2.0;
    let mut cumulative = 0.0;
    for &i in &order {
        cumulative += weights[i];
        if cumulative >= half {
            return Ok(i);
        }
    }
    Ok(order[order.len() - 1])
}

/// Comparison used by [`pivot_partition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl PivotOp {
    pub fn test(self, x: f64, pivot: f64) -> bool {
        match self {
            PivotOp::Gt => x > pivot,
            PivotOp::Lt => x < pivot,
            PivotOp::Ge => x >= pivot,
            PivotOp::Le => x <= pivot,
            PivotOp::Eq => x == pivot,
            PivotOp::Ne => x != pivot,
        }
    }
}

impl FromStr for PivotOp {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "gt" => Ok(PivotOp::Gt),
            "lt" => Ok(PivotOp::Lt),
            "ge" => Ok(PivotOp::Ge),
            "le" => Ok(PivotOp::Le),
            "eq" => Ok(PivotOp::Eq),
            "ne" => Ok(PivotOp::Ne),
            other => Err(Error::unsupported("pivot comparison", other)),
        }
    }
}

/// Elements of `arr` that satisfy `op` against `pivot`, flattened, and
/// their count. An empty block is returned as is.
pub fn pivot_partition(arr: &NdArray, pivot: f64, op: PivotOp) -> (usize, NdArray) {
    if arr.size() == 0 {
        return (0, arr.clone());
    }
    let kept = with_array!(arr, a => {
        let values: Array1<_> = a.iter().copied().filter(|x| op.test(x.to_f64(), pivot)).collect();
        NdArray::from(values.into_dyn())
    });
    (kept.size(), kept)
}

/// Digest summarising one block.
pub fn tdigest_chunk(arr: &NdArray) -> TDigest {
    let mut digest = TDigest::default();
    digest.update(arr.to_f64().iter().copied());
    digest
}

/// Approximate quantiles from the merge of every block's digest.
///
/// `q` holds fractions in `[0, 1]`; a 0-D `q` gives a 0-D result.
pub fn percentiles_from_tdigest(q: &NdArray, digests: &[TDigest]) -> Result<NdArray> {
    let qs = q.to_f64();
    if let Some(bad) = qs.iter().find(|v| !(0.0..=1.0).contains(*v)) {
        return Err(Error::invalid("q", format!("quantiles must lie in [0, 1], got {}", bad)));
    }
    let merged = TDigest::merge(digests);
    Ok(NdArray::from(qs.mapv(|v| merged.quantile(v))))
}
