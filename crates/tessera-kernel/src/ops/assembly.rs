//! Assembly of blocks from pieces of other blocks.
//!
//! These are the data-movement primitives behind reshaping, slicing and fancy
//! indexing of block-partitioned arrays. Every operation that modifies an
//! existing block works on a copy: blocks are shared between arrays, and an
//! update through one array must never be visible through another.

use tessera_core::{map_array, AxisSelector, DType, Error, NdArray, Result, Selection, Value};

/// How one source block contributes to an assembled block.
#[derive(Debug, Clone, PartialEq)]
pub struct SrcParam {
    pub selection: Selection,
    pub transposed: bool,
    /// View the (possibly transposed) source with this shape before selecting.
    pub shape_bc: Option<Vec<usize>>,
}

/// Where a source contribution lands in the destination block.
#[derive(Debug, Clone, PartialEq)]
pub struct DstParam {
    pub selection: Selection,
    pub transposed: bool,
}

impl SrcParam {
    pub fn new(selection: Selection, transposed: bool) -> Self {
        Self {
            selection,
            transposed,
            shape_bc: None,
        }
    }

    /// Decode `[selection, transposed]` or `[selection, shape_bc, transposed]`.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.as_list()? {
            [sel, t] => Ok(Self::new(sel.as_selection()?.clone(), t.as_bool()?)),
            [sel, bc, t] => Ok(Self {
                selection: sel.as_selection()?.clone(),
                transposed: t.as_bool()?,
                shape_bc: if bc.is_none() { None } else { Some(bc.as_shape()?) },
            }),
            other => Err(Error::invalid(
                "src_params",
                format!("expected 2 or 3 fields, got {}", other.len()),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Selection(self.selection.clone()),
            self.shape_bc.clone().map(Value::Shape).unwrap_or_default(),
            Value::Bool(self.transposed),
        ])
    }
}

impl DstParam {
    pub fn new(selection: Selection, transposed: bool) -> Self {
        Self {
            selection,
            transposed,
        }
    }

    /// Decode `[selection, transposed]`.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.as_list()? {
            [sel, t] => Ok(Self::new(sel.as_selection()?.clone(), t.as_bool()?)),
            other => Err(Error::invalid(
                "dst_params",
                format!("expected 2 fields, got {}", other.len()),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::Selection(self.selection.clone()),
            Value::Bool(self.transposed),
        ])
    }
}

/// `arr[selection]` for a dynamically typed block.
pub fn gather(arr: &NdArray, selection: &Selection) -> Result<NdArray> {
    Ok(map_array!(arr, a => selection.gather(&a.view())?))
}

/// `dst[selection] = values`, converting `values` to the destination dtype.
pub fn assign(dst: &mut NdArray, selection: &Selection, values: &NdArray) -> Result<()> {
    let values = values.cast(dst.dtype());
    match (dst, &values) {
        (NdArray::Bool(d), NdArray::Bool(v)) => selection.assign(d, &v.view()),
        (NdArray::Int64(d), NdArray::Int64(v)) => selection.assign(d, &v.view()),
        (NdArray::Float32(d), NdArray::Float32(v)) => selection.assign(d, &v.view()),
        (NdArray::Float64(d), NdArray::Float64(v)) => selection.assign(d, &v.view()),
        (_, v) => Err(Error::UnsupportedDType {
            dtype: v.dtype(),
            op: "assign",
        }),
    }
}

fn check_param_counts(n_src: usize, src: usize, dst: usize) -> Result<()> {
    if src != dst {
        return Err(Error::invalid(
            "src_params",
            format!("{} source params for {} destination params", src, dst),
        ));
    }
    if n_src < src {
        return Err(Error::invalid(
            "src_arrs",
            format!("{} source blocks for {} source params", n_src, src),
        ));
    }
    Ok(())
}

fn source_values(src: &NdArray, param: &SrcParam) -> Result<NdArray> {
    let mut src = src.transposed_if(param.transposed);
    if let Some(bc) = &param.shape_bc {
        src = src.reshape(bc)?;
    }
    gather(&src, &param.selection)
}

/// Allocate a `dst_shape` block and fill it from the given sources.
///
/// When `dst_shape_bc` is given, destination selections address the block
/// viewed with that shape.
pub fn create_block(
    srcs: &[NdArray],
    src_params: &[SrcParam],
    dst_params: &[DstParam],
    dst_shape: &[usize],
    dst_shape_bc: Option<&[usize]>,
) -> Result<NdArray> {
    check_param_counts(srcs.len(), src_params.len(), dst_params.len())?;
    let dtype = srcs.first().map(NdArray::dtype).unwrap_or(DType::Float64);
    let mut result = NdArray::zeros(dst_shape, dtype);
    if let Some(bc) = dst_shape_bc {
        result = result.reshape(bc)?;
    }
    for ((src, sp), dp) in srcs.iter().zip(src_params).zip(dst_params) {
        let values = source_values(src, sp)?;
        assign(&mut result, &dp.selection, &values)?;
    }
    if dst_shape_bc.is_some() {
        result = result.reshape(dst_shape)?;
    }
    Ok(result)
}

/// Copy `dst` and write the given sources into the copy.
///
/// If the first destination param is transposed, the copy is transposed
/// before writing and returned in that orientation.
pub fn update_block(
    dst: &NdArray,
    srcs: &[NdArray],
    src_params: &[SrcParam],
    dst_params: &[DstParam],
) -> Result<NdArray> {
    check_param_counts(srcs.len(), src_params.len(), dst_params.len())?;
    let transposed = dst_params.first().is_some_and(|p| p.transposed);
    let mut result = dst.transposed_if(transposed);
    for ((src, sp), dp) in srcs.iter().zip(src_params).zip(dst_params) {
        let values = source_values(src, sp)?;
        assign(&mut result, &dp.selection, &values)?;
    }
    Ok(result)
}

fn point(index: &[usize]) -> Selection {
    Selection::new(index.iter().map(|&i| AxisSelector::Index(i as isize)).collect())
}

/// Copy `dst` and set `copy[dst_index] = src[src_index]` for every pair.
pub fn update_block_by_index(
    dst: &NdArray,
    src: &NdArray,
    index_pairs: &[(Vec<usize>, Vec<usize>)],
) -> Result<NdArray> {
    let mut result = dst.clone();
    for (dst_index, src_index) in index_pairs {
        let values = gather(src, &point(src_index))?;
        assign(&mut result, &point(dst_index), &values)?;
    }
    Ok(result)
}

/// Destination of [`advanced_select_block_along_axis`]: an existing block, or
/// the shape and dtype of one that has not been allocated yet.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectTarget {
    Block(NdArray),
    Placeholder { shape: Vec<usize>, dtype: DType },
}

impl SelectTarget {
    fn shape(&self) -> &[usize] {
        match self {
            SelectTarget::Block(a) => a.shape(),
            SelectTarget::Placeholder { shape, .. } => shape,
        }
    }

    /// Decode an array or a `[shape, dtype]` pair.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(a) => Ok(SelectTarget::Block(a)),
            Value::List(items) => match items.as_slice() {
                [shape, dtype] => Ok(SelectTarget::Placeholder {
                    shape: shape.as_shape()?,
                    dtype: dtype.as_str()?.parse()?,
                }),
                _ => Err(Error::invalid("dst", "expected [shape, dtype]")),
            },
            other => Err(Error::invalid("dst", format!("expected array or [shape, dtype], got {}", other.kind()))),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            SelectTarget::Block(a) => Value::Array(a),
            SelectTarget::Placeholder { shape, dtype } => {
                Value::List(vec![Value::Shape(shape), Value::Str(dtype.name().to_string())])
            }
        }
    }
}

fn index_list<'a>(ss: &'a Selection, axis: usize) -> Result<&'a [usize]> {
    match ss.axes().get(axis) {
        Some(AxisSelector::Indices(idx)) => Ok(idx),
        _ => Err(Error::InvalidSelection(format!(
            "axis {} of the subscript is not an index list",
            axis
        ))),
    }
}

fn within(coord: usize, len: usize, i: usize) -> bool {
    coord <= i && i < coord + len
}

fn coord_at(coords: &[usize], axis: usize) -> Result<usize> {
    coords
        .get(axis)
        .copied()
        .ok_or_else(|| Error::invalid("coord", format!("no coordinate for axis {}", axis)))
}

/// Fill the part of a destination block covered by the global index list
/// `ss[src_axis]` with the matching elements of one source block.
///
/// Only the positions whose destination slot lies in the destination block
/// and whose source index lies in the source block are touched. If there
/// are none the target is returned as given, so blocks that do not intersect
/// the selection are never allocated or copied. A placeholder target is
/// allocated zero-filled on first write.
pub fn advanced_select_block_along_axis(
    dst: SelectTarget,
    src: &NdArray,
    ss: &Selection,
    dst_axis: usize,
    src_axis: usize,
    dst_coord: &[usize],
    src_coord: &[usize],
) -> Result<SelectTarget> {
    let indices = index_list(ss, src_axis)?;
    let dst_start = coord_at(dst_coord, dst_axis)?;
    let dst_len = dst.shape().get(dst_axis).copied().unwrap_or(0);
    let src_start = coord_at(src_coord, src_axis)?;
    let src_len = src.shape().get(src_axis).copied().unwrap_or(0);

    let (src_vec, dst_vec): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .enumerate()
        .filter(|&(j, &i)| within(dst_start, dst_len, j) && within(src_start, src_len, i))
        .map(|(j, &i)| (i - src_start, j - dst_start))
        .unzip();
    if dst_vec.is_empty() {
        return Ok(dst);
    }

    let mut out = match dst {
        SelectTarget::Block(a) => a,
        SelectTarget::Placeholder { shape, dtype } => NdArray::zeros(&shape, dtype),
    };

    let mut src_sel = Vec::with_capacity(ss.len());
    let mut dst_sel = Vec::with_capacity(ss.len());
    for (axis, sel) in ss.axes().iter().enumerate() {
        if axis == src_axis {
            src_sel.push(AxisSelector::Indices(src_vec.clone()));
        } else {
            match sel {
                AxisSelector::Slice { .. } => src_sel.push(sel.clone()),
                AxisSelector::Index(i) => {
                    src_sel.push(AxisSelector::Index(i - coord_at(src_coord, axis)? as isize))
                }
                AxisSelector::Indices(_) => {
                    return Err(Error::InvalidSelection(
                        "only one index-list axis is supported".into(),
                    ))
                }
            }
        }
        if axis == dst_axis {
            dst_sel.push(AxisSelector::Indices(dst_vec.clone()));
        } else if let AxisSelector::Slice { .. } = sel {
            dst_sel.push(sel.clone());
        }
    }

    let values = gather(src, &Selection::new(src_sel))?;
    assign(&mut out, &Selection::new(dst_sel), &values)?;
    Ok(SelectTarget::Block(out))
}

/// Write the elements of `src` selected by the global subscript `ss` into
/// `dst`, along the index-list axis `axis`.
///
/// `src` may be a scalar, a 1-D block of values in index-list order, or a
/// block with the same rank as `dst`. When no index in `ss[axis]` falls in
/// both blocks, `dst` is handed back untouched.
pub fn advanced_assign_block_along_axis(
    dst: NdArray,
    src: &NdArray,
    ss: &Selection,
    axis: usize,
    dst_coord: &[usize],
    src_coord: &[usize],
) -> Result<NdArray> {
    let indices = index_list(ss, axis)?;
    let dst_start = coord_at(dst_coord, axis)?;
    let dst_len = dst.shape().get(axis).copied().unwrap_or(0);

    // Source positions run over the index list itself, not over its values.
    let src_axis = if src.ndim() == 1 { 0 } else { axis };
    let src_range = match src.ndim() {
        0 => None,
        _ => Some((
            coord_at(src_coord, src_axis)?,
            src.shape()[src_axis],
        )),
    };

    let (src_vec, dst_vec): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .enumerate()
        .filter(|&(j, &i)| {
            within(dst_start, dst_len, i)
                && src_range.map_or(true, |(start, len)| within(start, len, j))
        })
        .map(|(j, &i)| (j - src_range.map_or(0, |(start, _)| start), i - dst_start))
        .unzip();
    if dst_vec.is_empty() {
        return Ok(dst);
    }

    let mut dst_sel = Vec::with_capacity(ss.len());
    for (i, sel) in ss.axes().iter().enumerate() {
        if i == axis {
            dst_sel.push(AxisSelector::Indices(dst_vec.clone()));
        } else {
            match sel {
                AxisSelector::Slice { .. } => dst_sel.push(sel.clone()),
                AxisSelector::Index(k) => {
                    dst_sel.push(AxisSelector::Index(k - coord_at(dst_coord, i)? as isize))
                }
                AxisSelector::Indices(_) => {
                    return Err(Error::InvalidSelection(
                        "only one index-list axis is supported".into(),
                    ))
                }
            }
        }
    }

    let values = match src.ndim() {
        0 => src.clone(),
        1 => gather(src, &Selection::new(vec![AxisSelector::Indices(src_vec)]))?,
        _ => {
            let mut src_sel = vec![AxisSelector::full(); ss.len()];
            src_sel[axis] = AxisSelector::Indices(src_vec);
            gather(src, &Selection::new(src_sel))?
        }
    };
    let mut out = dst;
    assign(&mut out, &Selection::new(dst_sel), &values)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn nd(a: ndarray::ArrayD<i64>) -> NdArray {
        NdArray::from(a)
    }

    #[test]
    fn test_create_block_from_two_sources() {
        let left = nd(array![[1i64, 2], [3, 4]].into_dyn());
        let right = nd(array![[5i64], [6]].into_dyn());
        let block = create_block(
            &[left, right],
            &[
                SrcParam::new(Selection::default(), false),
                SrcParam::new(Selection::default(), true),
            ],
            &[
                DstParam::new(Selection::from_ranges(&[(0, 2), (0, 2)]), false),
                DstParam::new(Selection::from_ranges(&[(2, 3), (0, 2)]), false),
            ],
            &[3, 2],
            None,
        )
        .unwrap();
        assert_eq!(block, nd(array![[1i64, 2], [3, 4], [5, 6]].into_dyn()));
    }

    #[test]
    fn test_create_block_param_count_mismatch() {
        let a = nd(array![1i64].into_dyn());
        let err = create_block(
            &[a],
            &[SrcParam::new(Selection::default(), false)],
            &[],
            &[1],
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_update_block_leaves_original_untouched() {
        let shared = nd(array![[0i64, 0], [0, 0]].into_dyn());
        let alias = shared.clone();
        let src = nd(array![[9i64]].into_dyn());
        let updated = update_block(
            &shared,
            &[src],
            &[SrcParam::new(Selection::default(), false)],
            &[DstParam::new(Selection::from_ranges(&[(1, 2), (1, 2)]), false)],
        )
        .unwrap();
        assert_eq!(updated, nd(array![[0i64, 0], [0, 9]].into_dyn()));
        assert_eq!(shared, alias);
    }

    #[test]
    fn test_update_block_by_index() {
        let dst = nd(array![[0i64, 0], [0, 0]].into_dyn());
        let src = nd(array![7i64, 8].into_dyn());
        let out = update_block_by_index(&dst, &src, &[(vec![0, 1], vec![1]), (vec![1, 0], vec![0])]).unwrap();
        assert_eq!(out, nd(array![[0i64, 8], [7, 0]].into_dyn()));
        assert_eq!(dst, nd(array![[0i64, 0], [0, 0]].into_dyn()));
    }

    #[test]
    fn test_advanced_select_skips_disjoint_blocks() {
        // Global index list [5, 1, 6] selected from a source block covering
        // rows 4..8 into a destination block covering result rows 0..2.
        let src = nd(array![[40i64], [50], [60], [70]].into_dyn());
        let ss = Selection::new(vec![AxisSelector::Indices(vec![5, 1, 6]), AxisSelector::full()]);
        let placeholder = SelectTarget::Placeholder {
            shape: vec![2, 1],
            dtype: DType::Int64,
        };
        let out = advanced_select_block_along_axis(placeholder, &src, &ss, 0, 0, &[0, 0], &[4, 0]).unwrap();
        assert_eq!(out, SelectTarget::Block(nd(array![[50i64], [0]].into_dyn())));

        // A source block covering rows 8..12 intersects nothing.
        let disjoint = advanced_select_block_along_axis(out.clone(), &src, &ss, 0, 0, &[0, 0], &[8, 0]).unwrap();
        assert_eq!(disjoint, out);
    }

    #[test]
    fn test_advanced_assign_one_dimensional_source() {
        // dst covers global rows 2..4; assign values [10, 20, 30] at rows [3, 0, 2].
        let dst = nd(array![0i64, 0].into_dyn());
        let src = nd(array![10i64, 20, 30].into_dyn());
        let ss = Selection::new(vec![AxisSelector::Indices(vec![3, 0, 2])]);
        let out = advanced_assign_block_along_axis(dst, &src, &ss, 0, &[2], &[0]).unwrap();
        assert_eq!(out, nd(array![30i64, 10].into_dyn()));
    }

    #[test]
    fn test_advanced_assign_scalar_and_disjoint() {
        let dst = nd(array![[1i64, 1], [1, 1]].into_dyn());
        let ss = Selection::new(vec![AxisSelector::Indices(vec![1]), AxisSelector::full()]);
        let out = advanced_assign_block_along_axis(dst.clone(), &NdArray::scalar(0i64), &ss, 0, &[0, 0], &[]).unwrap();
        assert_eq!(out, nd(array![[1i64, 1], [0, 0]].into_dyn()));

        let untouched = advanced_assign_block_along_axis(dst.clone(), &NdArray::scalar(0i64), &ss, 0, &[2, 0], &[]).unwrap();
        assert_eq!(untouched, dst);
    }

    #[test]
    fn test_advanced_assign_disjoint_keeps_buffer() {
        let dst = nd(array![[1i64, 1], [1, 1]].into_dyn());
        let before = match &dst {
            NdArray::Int64(a) => a.as_ptr(),
            other => panic!("unexpected dtype {:?}", other.dtype()),
        };
        let ss = Selection::new(vec![AxisSelector::Indices(vec![1]), AxisSelector::full()]);
        let out = advanced_assign_block_along_axis(dst, &NdArray::scalar(0i64), &ss, 0, &[2, 0], &[]).unwrap();
        match &out {
            NdArray::Int64(a) => assert_eq!(a.as_ptr(), before),
            other => panic!("unexpected dtype {:?}", other.dtype()),
        }
    }

    #[test]
    fn test_param_value_encoding() {
        let sp = SrcParam {
            selection: Selection::from_ranges(&[(0, 1)]),
            transposed: true,
            shape_bc: Some(vec![1, 4]),
        };
        assert_eq!(SrcParam::from_value(&sp.to_value()).unwrap(), sp);
        let dp = DstParam::new(Selection::default(), false);
        assert_eq!(DstParam::from_value(&dp.to_value()).unwrap(), dp);
    }
}
