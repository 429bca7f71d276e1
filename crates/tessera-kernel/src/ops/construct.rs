//! Fresh block construction.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2};
use tessera_core::{map_array, DType, Element, Error, GridMeta, NdArray, Result};

/// Initialiser used by [`new_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockInit {
    Zeros,
    Ones,
    /// Uninitialised in numpy; zero-filled here.
    Empty,
    Eye,
}

impl FromStr for BlockInit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zeros" => Ok(BlockInit::Zeros),
            "ones" => Ok(BlockInit::Ones),
            "empty" => Ok(BlockInit::Empty),
            "eye" => Ok(BlockInit::Eye),
            other => Err(Error::unsupported("block initialiser", other)),
        }
    }
}

impl fmt::Display for BlockInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockInit::Zeros => "zeros",
            BlockInit::Ones => "ones",
            BlockInit::Empty => "empty",
            BlockInit::Eye => "eye",
        })
    }
}

/// Build the block at `grid_entry` of an array described by `grid_meta`.
///
/// `eye` blocks must lie on the grid diagonal; off-diagonal identity blocks
/// are zero blocks and are built with `zeros` by the caller.
pub fn new_block(init: BlockInit, grid_entry: &[usize], grid_meta: &GridMeta) -> Result<NdArray> {
    let shape = grid_meta.block_shape_for(grid_entry)?;
    match init {
        BlockInit::Zeros | BlockInit::Empty => Ok(NdArray::zeros(&shape, grid_meta.dtype)),
        BlockInit::Ones => Ok(NdArray::ones(&shape, grid_meta.dtype)),
        BlockInit::Eye => {
            if grid_entry.windows(2).any(|w| w[0] != w[1]) {
                return Err(Error::invalid(
                    "grid_entry",
                    format!("eye block requested off the diagonal at {:?}", grid_entry),
                ));
            }
            let (rows, cols) = match shape.as_slice() {
                [n] => (*n, *n),
                [rows, cols] => (*rows, *cols),
                _ => return Err(Error::invalid("grid_meta", "eye requires a 1-D or 2-D block shape")),
            };
            Ok(NdArray::from(eye(rows, cols).into_dyn()).cast(grid_meta.dtype))
        }
    }
}

fn eye(rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| if i == j { 1.0 } else { 0.0 })
}

/// Evenly spaced values in `[start, stop)`.
pub fn arange(start: f64, stop: f64, step: f64, dtype: DType) -> Result<NdArray> {
    if step == 0.0 || !step.is_finite() {
        return Err(Error::invalid("step", format!("must be finite and non-zero, got {}", step)));
    }
    let len = ((stop - start) / step).ceil().max(0.0) as usize;
    if dtype == DType::Int64 && [start, step].iter().all(|v| v.fract() == 0.0) {
        let (start, step) = (start as i64, step as i64);
        let data: Vec<i64> = (0..len as i64).map(|i| start + i * step).collect();
        return NdArray::from_vec(&[len], data);
    }
    let data: Vec<f64> = (0..len).map(|i| start + i as f64 * step).collect();
    Ok(NdArray::from_vec(&[len], data)?.cast(dtype))
}

/// `np.diag`: a 1-D input becomes a square matrix with the input on diagonal
/// `offset`; a 2-D input yields its `offset` diagonal.
pub fn diag(arr: &NdArray, offset: i64) -> Result<NdArray> {
    let k = offset.unsigned_abs() as usize;
    let shift = if offset >= 0 { (0, k) } else { (k, 0) };
    match arr.ndim() {
        1 => Ok(map_array!(arr, a => diag_matrix(a, k, shift)?)),
        2 => Ok(map_array!(arr, a => diag_extract(a, shift)?)),
        n => Err(Error::invalid("arr", format!("diag expects a 1-D or 2-D block, got {}-D", n))),
    }
}

fn diag_matrix<T: Element>(a: &ArrayD<T>, k: usize, (rs, cs): (usize, usize)) -> Result<ArrayD<T>> {
    let v = a
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|e| Error::invalid("arr", e.to_string()))?;
    let n = v.len() + k;
    let mut out = Array2::from_elem((n, n), T::zero());
    for (i, x) in v.iter().enumerate() {
        out[(i + rs, i + cs)] = *x;
    }
    Ok(out.into_dyn())
}

fn diag_extract<T: Element>(a: &ArrayD<T>, (rs, cs): (usize, usize)) -> Result<ArrayD<T>> {
    let m = a
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| Error::invalid("arr", e.to_string()))?;
    let (rows, cols) = m.dim();
    let len = rows.saturating_sub(rs).min(cols.saturating_sub(cs));
    Ok(Array1::from_shape_fn(len, |i| m[(i + rs, i + cs)]).into_dyn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_new_block_edge_shape() {
        let meta = GridMeta::new(vec![5, 4], vec![2, 3], DType::Float32).unwrap();
        let block = new_block(BlockInit::Ones, &[2, 1], &meta).unwrap();
        assert_eq!(block.shape(), &[1, 1]);
        assert_eq!(block.dtype(), DType::Float32);
    }

    #[test]
    fn test_eye_on_diagonal_only() {
        let meta = GridMeta::new(vec![4, 4], vec![2, 2], DType::Int64).unwrap();
        let block = new_block(BlockInit::Eye, &[1, 1], &meta).unwrap();
        assert_eq!(block, NdArray::from(array![[1i64, 0], [0, 1]].into_dyn()));
        assert!(new_block(BlockInit::Eye, &[0, 1], &meta).is_err());
        assert!("full".parse::<BlockInit>().is_err());
    }

    #[test]
    fn test_arange() {
        let a = arange(0.0, 5.0, 2.0, DType::Int64).unwrap();
        assert_eq!(a, NdArray::from(array![0i64, 2, 4].into_dyn()));
        let f = arange(1.0, 0.0, -0.25, DType::Float64).unwrap();
        assert_eq!(f.size(), 4);
        assert!(arange(0.0, 1.0, 0.0, DType::Float64).is_err());
    }

    #[test]
    fn test_diag_both_directions() {
        let v = NdArray::from(array![1i64, 2].into_dyn());
        let m = diag(&v, 1).unwrap();
        assert_eq!(m, NdArray::from(array![[0i64, 1, 0], [0, 0, 2], [0, 0, 0]].into_dyn()));
        assert_eq!(diag(&m, 1).unwrap(), NdArray::from(array![1i64, 2].into_dyn()));
        assert_eq!(diag(&m, -1).unwrap(), NdArray::from(array![0i64, 0].into_dyn()));
    }
}
