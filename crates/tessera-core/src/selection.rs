//! Numpy-style subscripts over a single block.
//!
//! A [`Selection`] is a tuple of per-axis selectors: basic slices, integer
//! indices (which drop the axis) and at most one explicit index list (the
//! "advanced" axis used by distributed fancy indexing). Axes beyond the end of
//! the selection are selected in full.

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, SliceInfo, SliceInfoElem};

use crate::error::{Error, Result};

/// Selector for one axis of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisSelector {
    /// `start:stop:step`, with python semantics for negative bounds.
    Slice {
        start: isize,
        stop: Option<isize>,
        step: isize,
    },
    /// A single position; the axis is removed from the result.
    Index(isize),
    /// An explicit list of positions along the axis.
    Indices(Vec<usize>),
}

impl AxisSelector {
    /// The full axis, `:`.
    pub fn full() -> Self {
        AxisSelector::Slice {
            start: 0,
            stop: None,
            step: 1,
        }
    }

    /// `start:stop`.
    pub fn range(start: usize, stop: usize) -> Self {
        AxisSelector::Slice {
            start: start as isize,
            stop: Some(stop as isize),
            step: 1,
        }
    }

    fn to_slice_elem(&self) -> SliceInfoElem {
        match self {
            AxisSelector::Slice { start, stop, step } => SliceInfoElem::Slice {
                start: *start,
                end: *stop,
                step: *step,
            },
            AxisSelector::Index(i) => SliceInfoElem::Index(*i),
            // The advanced axis is applied separately after basic slicing.
            AxisSelector::Indices(_) => SliceInfoElem::Slice {
                start: 0,
                end: None,
                step: 1,
            },
        }
    }
}

/// A subscript tuple applied to one block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection(pub Vec<AxisSelector>);

impl Selection {
    pub fn new(axes: Vec<AxisSelector>) -> Self {
        Self(axes)
    }

    /// Contiguous ranges `[(start, stop), ...]` on the leading axes.
    pub fn from_ranges(ranges: &[(usize, usize)]) -> Self {
        Self(
            ranges
                .iter()
                .map(|&(start, stop)| AxisSelector::range(start, stop))
                .collect(),
        )
    }

    pub fn axes(&self) -> &[AxisSelector] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of the advanced (index-list) axis, if any, and its indices.
    fn advanced_axis(&self) -> Result<Option<(usize, &[usize])>> {
        let mut found = None;
        for (axis, sel) in self.0.iter().enumerate() {
            if let AxisSelector::Indices(idx) = sel {
                if found.is_some() {
                    return Err(Error::InvalidSelection(
                        "at most one index-list axis is supported".into(),
                    ));
                }
                found = Some((axis, idx.as_slice()));
            }
        }
        Ok(found)
    }

    fn slice_info(&self, ndim: usize) -> Result<SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn>> {
        if self.0.len() > ndim {
            return Err(Error::InvalidSelection(format!(
                "selection has {} axes, block has {}",
                self.0.len(),
                ndim
            )));
        }
        let mut elems: Vec<SliceInfoElem> = self.0.iter().map(|s| s.to_slice_elem()).collect();
        elems.resize(ndim, AxisSelector::full().to_slice_elem());
        SliceInfo::try_from(elems).map_err(|e| Error::InvalidSelection(e.to_string()))
    }

    /// Index of the advanced axis once integer-indexed axes before it are dropped.
    fn reduced_axis(&self, axis: usize) -> usize {
        let dropped = self.0[..axis]
            .iter()
            .filter(|s| matches!(s, AxisSelector::Index(_)))
            .count();
        axis - dropped
    }

    fn check_bounds(&self, shape: &[usize]) -> Result<()> {
        for (axis, sel) in self.0.iter().enumerate() {
            let len = shape[axis];
            match sel {
                AxisSelector::Index(i) => {
                    let resolved = if *i < 0 { *i + len as isize } else { *i };
                    if resolved < 0 || resolved >= len as isize {
                        return Err(Error::IndexOutOfBounds { index: *i, len });
                    }
                }
                AxisSelector::Indices(idx) => {
                    if let Some(&bad) = idx.iter().find(|&&i| i >= len) {
                        return Err(Error::IndexOutOfBounds {
                            index: bad as isize,
                            len,
                        });
                    }
                }
                AxisSelector::Slice { start, stop, step } => {
                    if *step == 0 {
                        return Err(Error::InvalidSelection("slice step must be non-zero".into()));
                    }
                    slice_bounds(len, *start, *stop)?;
                }
            }
        }
        Ok(())
    }

    /// Copy out `array[self]`.
    pub fn gather<T: Clone>(&self, array: &ArrayViewD<'_, T>) -> Result<ArrayD<T>> {
        let info = self.slice_info(array.ndim())?;
        self.check_bounds(array.shape())?;
        let view = array.slice(info);
        match self.advanced_axis()? {
            Some((axis, indices)) => Ok(view.select(Axis(self.reduced_axis(axis)), indices)),
            None => Ok(view.to_owned()),
        }
    }

    /// Shape of `array[self]` for an array of the given shape.
    pub fn result_shape(&self, shape: &[usize]) -> Result<Vec<usize>> {
        if self.0.len() > shape.len() {
            return Err(Error::InvalidSelection(format!(
                "selection has {} axes, block has {}",
                self.0.len(),
                shape.len()
            )));
        }
        self.check_bounds(shape)?;
        let mut out = Vec::with_capacity(shape.len());
        for (axis, &len) in shape.iter().enumerate() {
            match self.0.get(axis) {
                None => out.push(len),
                Some(AxisSelector::Index(_)) => {}
                Some(AxisSelector::Indices(idx)) => out.push(idx.len()),
                Some(AxisSelector::Slice { start, stop, step }) => {
                    let (lo, hi) = slice_bounds(len, *start, *stop)?;
                    let stride = step.unsigned_abs();
                    out.push(if hi > lo { (hi - lo).div_ceil(stride) } else { 0 });
                }
            }
        }
        Ok(out)
    }

    /// Perform `array[self] = values`, broadcasting `values` to the selected
    /// region the way numpy assignment does.
    pub fn assign<T: Clone>(&self, array: &mut ArrayD<T>, values: &ArrayViewD<'_, T>) -> Result<()> {
        let region_shape = self.result_shape(array.shape())?;
        let values = values
            .broadcast(IxDyn(&region_shape))
            .ok_or_else(|| Error::shape_mismatch(&region_shape, values.shape()))?;
        let info = self.slice_info(array.ndim())?;
        let advanced = self.advanced_axis()?;
        let mut view = array.slice_mut(info);
        match advanced {
            Some((axis, indices)) => {
                let axis = Axis(self.reduced_axis(axis));
                for (j, &pos) in indices.iter().enumerate() {
                    view.index_axis_mut(axis, pos)
                        .assign(&values.index_axis(axis, j));
                }
            }
            None => view.assign(&values),
        }
        Ok(())
    }
}

/// Resolve slice bounds against an axis of length `len` (negative values
/// count from the end). Out-of-range bounds are an error rather than clamped.
fn slice_bounds(len: usize, start: isize, stop: Option<isize>) -> Result<(usize, usize)> {
    let resolve = |v: isize| -> Result<usize> {
        let abs = if v < 0 { v + len as isize } else { v };
        if abs < 0 || abs > len as isize {
            return Err(Error::IndexOutOfBounds { index: v, len });
        }
        Ok(abs as usize)
    };
    let lo = resolve(start)?;
    let hi = match stop {
        Some(v) => resolve(v)?,
        None => len,
    };
    Ok((lo, hi))
}

impl From<Vec<AxisSelector>> for Selection {
    fn from(axes: Vec<AxisSelector>) -> Self {
        Self(axes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayD};

    fn grid() -> ArrayD<i64> {
        array![[0i64, 1, 2, 3], [4, 5, 6, 7], [8, 9, 10, 11]].into_dyn()
    }

    #[test]
    fn test_gather_ranges() {
        let a = grid();
        let sel = Selection::from_ranges(&[(1, 3), (2, 4)]);
        let out = sel.gather(&a.view()).unwrap();
        assert_eq!(out, array![[6i64, 7], [10, 11]].into_dyn());
    }

    #[test]
    fn test_gather_index_drops_axis() {
        let a = grid();
        let sel = Selection::new(vec![AxisSelector::Index(-1), AxisSelector::range(0, 2)]);
        assert_eq!(sel.gather(&a.view()).unwrap(), array![8i64, 9].into_dyn());
    }

    #[test]
    fn test_gather_indices_after_dropped_axis() {
        let a = grid();
        let sel = Selection::new(vec![AxisSelector::Index(1), AxisSelector::Indices(vec![3, 0])]);
        assert_eq!(sel.gather(&a.view()).unwrap(), array![7i64, 4].into_dyn());
    }

    #[test]
    fn test_assign_broadcasts_scalar() {
        let mut a = grid();
        let sel = Selection::new(vec![AxisSelector::full(), AxisSelector::Indices(vec![0, 2])]);
        let zero = ArrayD::from_elem(IxDyn(&[]), 0i64);
        sel.assign(&mut a, &zero.view()).unwrap();
        assert_eq!(a, array![[0i64, 1, 0, 3], [0, 5, 0, 7], [0, 9, 0, 11]].into_dyn());
    }

    #[test]
    fn test_out_of_bounds_index_rejected() {
        let a = grid();
        let sel = Selection::new(vec![AxisSelector::Indices(vec![5])]);
        assert!(matches!(
            sel.gather(&a.view()),
            Err(Error::IndexOutOfBounds { index: 5, len: 3 })
        ));
    }

    #[test]
    fn test_result_shape_matches_gather() {
        let a = grid();
        let sel = Selection::new(vec![
            AxisSelector::Slice { start: 0, stop: None, step: 2 },
            AxisSelector::Indices(vec![1, 1, 2]),
        ]);
        let out = sel.gather(&a.view()).unwrap();
        assert_eq!(sel.result_shape(a.shape()).unwrap(), out.shape().to_vec());
        assert_eq!(out, array![[1i64, 1, 2], [9, 9, 10]].into_dyn());
    }

    #[test]
    fn test_slice_past_end_rejected() {
        let a = grid();
        let sel = Selection::from_ranges(&[(0, 4)]);
        assert!(sel.gather(&a.view()).is_err());
    }

    #[test]
    fn test_two_index_lists_rejected() {
        let a = grid();
        let sel = Selection::new(vec![
            AxisSelector::Indices(vec![0]),
            AxisSelector::Indices(vec![1]),
        ]);
        assert!(matches!(sel.gather(&a.view()), Err(Error::InvalidSelection(_))));
    }
}
