//! Block metadata and grid geometry.
//!
//! The array layer owns blocks; the execution substrate only needs the
//! metadata below to size new blocks, compute global coordinates, and track
//! deferred transposes.

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{Error, Result};

/// Geometry of a block-partitioned array: its shape, the block shape used to
/// partition it, and its element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridMeta {
    pub shape: Vec<usize>,
    pub block_shape: Vec<usize>,
    pub dtype: DType,
}

impl GridMeta {
    pub fn new(shape: Vec<usize>, block_shape: Vec<usize>, dtype: DType) -> Result<Self> {
        if shape.len() != block_shape.len() {
            return Err(Error::shape_mismatch(&shape, &block_shape));
        }
        if block_shape.iter().zip(&shape).any(|(&b, &s)| b == 0 && s > 0) {
            return Err(Error::invalid("block_shape", "block dimensions must be non-zero"));
        }
        Ok(Self {
            shape,
            block_shape,
            dtype,
        })
    }

    /// Number of blocks along each axis.
    pub fn grid_shape(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(&self.block_shape)
            .map(|(&s, &b)| if b == 0 { 0 } else { s.div_ceil(b) })
            .collect()
    }

    /// All grid entries in row-major order.
    pub fn grid_entries(&self) -> Vec<Vec<usize>> {
        let grid_shape = self.grid_shape();
        let total: usize = grid_shape.iter().product();
        (0..total)
            .map(|flat| {
                let mut rem = flat;
                let mut entry = vec![0; grid_shape.len()];
                for axis in (0..grid_shape.len()).rev() {
                    entry[axis] = rem % grid_shape[axis];
                    rem /= grid_shape[axis];
                }
                entry
            })
            .collect()
    }

    fn check_entry(&self, grid_entry: &[usize]) -> Result<()> {
        let grid_shape = self.grid_shape();
        if grid_entry.len() != grid_shape.len()
            || grid_entry.iter().zip(&grid_shape).any(|(&e, &g)| e >= g)
        {
            return Err(Error::invalid(
                "grid_entry",
                format!("{:?} is outside grid {:?}", grid_entry, grid_shape),
            ));
        }
        Ok(())
    }

    /// Global `(start, stop)` coordinates covered by the block at `grid_entry`.
    pub fn block_slice_for(&self, grid_entry: &[usize]) -> Result<Vec<(usize, usize)>> {
        self.check_entry(grid_entry)?;
        Ok(grid_entry
            .iter()
            .zip(self.block_shape.iter().zip(&self.shape))
            .map(|(&e, (&b, &s))| {
                let start = e * b;
                (start, (start + b).min(s))
            })
            .collect())
    }

    /// Shape of the block at `grid_entry`; edge blocks are truncated.
    pub fn block_shape_for(&self, grid_entry: &[usize]) -> Result<Vec<usize>> {
        Ok(self
            .block_slice_for(grid_entry)?
            .into_iter()
            .map(|(start, stop)| stop - start)
            .collect())
    }
}

/// Metadata of one block of a larger array.
///
/// `transposed` marks a deferred transpose: the block's data has not been
/// permuted, and `grid_entry`/`grid_shape`/`shape` are stored reversed. The
/// `true_*` accessors give the values as if the transpose were materialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub grid_entry: Vec<usize>,
    pub grid_shape: Vec<usize>,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub transposed: bool,
}

impl Block {
    pub fn new(grid_entry: Vec<usize>, grid_shape: Vec<usize>, shape: Vec<usize>, dtype: DType) -> Self {
        Self {
            grid_entry,
            grid_shape,
            shape,
            dtype,
            transposed: false,
        }
    }

    /// The block at `grid_entry` of an array with the given geometry.
    pub fn from_grid(meta: &GridMeta, grid_entry: &[usize]) -> Result<Self> {
        Ok(Self::new(
            grid_entry.to_vec(),
            meta.grid_shape(),
            meta.block_shape_for(grid_entry)?,
            meta.dtype,
        ))
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn true_grid_entry(&self) -> Vec<usize> {
        reversed_if(&self.grid_entry, self.transposed)
    }

    pub fn true_grid_shape(&self) -> Vec<usize> {
        reversed_if(&self.grid_shape, self.transposed)
    }

    pub fn true_shape(&self) -> Vec<usize> {
        reversed_if(&self.shape, self.transposed)
    }

    /// Transposed block metadata.
    ///
    /// With `defer`, only the metadata changes and `transposed` is flipped.
    /// Otherwise the caller materialises the data (the kernel `transpose`
    /// op) and the returned block describes it directly.
    pub fn transpose(&self, defer: bool) -> Block {
        Block {
            grid_entry: self.grid_entry.iter().rev().copied().collect(),
            grid_shape: self.grid_shape.iter().rev().copied().collect(),
            shape: self.shape.iter().rev().copied().collect(),
            dtype: self.dtype,
            transposed: if defer { !self.transposed } else { false },
        }
    }
}

fn reversed_if(values: &[usize], flag: bool) -> Vec<usize> {
    if flag {
        values.iter().rev().copied().collect()
    } else {
        values.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_blocks_are_truncated() {
        let meta = GridMeta::new(vec![10, 7], vec![4, 4], DType::Float64).unwrap();
        assert_eq!(meta.grid_shape(), vec![3, 2]);
        assert_eq!(meta.block_shape_for(&[2, 1]).unwrap(), vec![2, 3]);
        assert_eq!(meta.block_slice_for(&[1, 1]).unwrap(), vec![(4, 8), (4, 7)]);
        assert!(meta.block_shape_for(&[3, 0]).is_err());
    }

    #[test]
    fn test_grid_entries_row_major() {
        let meta = GridMeta::new(vec![2, 3], vec![1, 2], DType::Int64).unwrap();
        assert_eq!(
            meta.grid_entries(),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
    }

    #[test]
    fn test_deferred_transpose_twice_is_identity() {
        let block = Block::new(vec![1, 0], vec![2, 1], vec![1, 3], DType::Int64);
        let twice = block.transpose(true).transpose(true);
        assert_eq!(twice, block);
    }
}
