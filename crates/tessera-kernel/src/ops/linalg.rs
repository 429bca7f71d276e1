//! Dense factorizations of single blocks, computed with `faer`.
//!
//! Blocks are factorized in `f64`. Results are returned as `float32` when
//! every input was `float32`, and as `float64` otherwise.

use faer::linalg::solvers::SpSolver;
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayD, ArrayView2, Axis};
use tessera_core::{DType, Error, NdArray, Result};

use super::view2;

fn to_faer(m: ArrayView2<'_, f64>) -> Mat<f64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)])
}

fn from_faer(m: MatRef<'_, f64>, dtype: DType) -> NdArray {
    let out = Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m.read(i, j));
    NdArray::from(out.into_dyn()).cast(dtype)
}

fn output_dtype<'a>(arrays: impl IntoIterator<Item = &'a NdArray>) -> DType {
    if arrays.into_iter().all(|a| a.dtype() == DType::Float32) {
        DType::Float32
    } else {
        DType::Float64
    }
}

fn square(a: &ArrayD<f64>, op: &'static str) -> Result<Mat<f64>> {
    let m = view2(a)?;
    if m.nrows() != m.ncols() {
        return Err(Error::LinAlg(format!(
            "{} requires a square matrix, got {}x{}",
            op,
            m.nrows(),
            m.ncols()
        )));
    }
    Ok(to_faer(m))
}

/// Reduced QR factorization `(q, r)`.
///
/// More than one block is first concatenated along `axis`, which is then
/// required.
pub fn qr(arrays: &[NdArray], axis: Option<usize>) -> Result<(NdArray, NdArray)> {
    let dtype = output_dtype(arrays);
    let a = match arrays {
        [] => return Err(Error::invalid("arrays", "qr needs at least one block")),
        [single] => single.to_f64(),
        many => {
            let axis = axis.ok_or_else(|| Error::invalid("axis", "required when stacking several blocks"))?;
            let parts: Vec<ArrayD<f64>> = many.iter().map(NdArray::to_f64).collect();
            let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
            ndarray::concatenate(Axis(axis), &views).map_err(|e| Error::invalid("arrays", e.to_string()))?
        }
    };
    let m = to_faer(view2(&a)?);
    let factors = m.qr();
    Ok((
        from_faer(factors.compute_thin_q().as_ref(), dtype),
        from_faer(factors.compute_thin_r().as_ref(), dtype),
    ))
}

/// Lower-triangular Cholesky factor.
pub fn cholesky(arr: &NdArray) -> Result<NdArray> {
    let m = square(&arr.to_f64(), "cholesky")?;
    let factor = m
        .cholesky(Side::Lower)
        .map_err(|_| Error::LinAlg("matrix is not positive definite".to_string()))?;
    Ok(from_faer(factor.compute_l().as_ref(), output_dtype([arr])))
}

/// Reduced SVD `(u, s, vt)` with `u: m×k`, `s: k`, `vt: k×n`, `k = min(m, n)`.
pub fn svd(arr: &NdArray) -> Result<(NdArray, NdArray, NdArray)> {
    let dtype = output_dtype([arr]);
    let m = to_faer(view2(&arr.to_f64())?);
    let decomposition = m.thin_svd();
    let s = decomposition.s_diagonal();
    let singular: Array1<f64> = (0..s.nrows()).map(|i| s.read(i)).collect();
    Ok((
        from_faer(decomposition.u(), dtype),
        NdArray::from(singular.into_dyn()).cast(dtype),
        from_faer(decomposition.v().transpose(), dtype),
    ))
}

/// Matrix inverse through a partially pivoted LU solve against the identity.
pub fn inv(arr: &NdArray) -> Result<NdArray> {
    let m = square(&arr.to_f64(), "inv")?;
    let n = m.nrows();
    let identity = Mat::<f64>::identity(n, n);
    let inverse = m.partial_piv_lu().solve(identity.as_ref());
    for j in 0..n {
        for i in 0..n {
            if !inverse.read(i, j).is_finite() {
                return Err(Error::LinAlg("matrix is singular".to_string()));
            }
        }
    }
    Ok(from_faer(inverse.as_ref(), output_dtype([arr])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn sample() -> NdArray {
        NdArray::from(array![[4.0f64, 1.0], [2.0, 3.0], [0.0, 1.0]].into_dyn())
    }

    #[test]
    fn test_qr_reconstructs_input() {
        let (q, r) = qr(&[sample()], None).unwrap();
        assert_eq!(q.shape(), &[3, 2]);
        assert_eq!(r.shape(), &[2, 2]);
        let q = q.to_f64().into_dimensionality::<ndarray::Ix2>().unwrap();
        let r = r.to_f64().into_dimensionality::<ndarray::Ix2>().unwrap();
        let back = q.dot(&r);
        let orig = sample().to_f64();
        for (x, y) in back.iter().zip(orig.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_qr_stacks_blocks() {
        let top = NdArray::from(array![[1.0f32, 2.0]].into_dyn());
        let bottom = NdArray::from(array![[3.0f32, 4.0], [5.0, 6.0]].into_dyn());
        let (q, r) = qr(&[top.clone(), bottom.clone()], Some(0)).unwrap();
        assert_eq!(q.shape(), &[3, 2]);
        assert_eq!(r.dtype(), DType::Float32);
        assert!(qr(&[top, bottom], None).is_err());
    }

    #[test]
    fn test_cholesky_and_inverse() {
        let spd = NdArray::from(array![[4.0f64, 2.0], [2.0, 3.0]].into_dyn());
        let l = cholesky(&spd).unwrap().to_f64();
        assert_relative_eq!(l[[0, 0]], 2.0, epsilon = 1e-12);
        assert_relative_eq!(l[[0, 1]], 0.0);
        assert_relative_eq!(l[[1, 0]], 1.0, epsilon = 1e-12);

        let inverse = inv(&spd).unwrap().to_f64();
        assert_relative_eq!(inverse[[0, 0]], 0.375, epsilon = 1e-12);
        assert_relative_eq!(inverse[[0, 1]], -0.25, epsilon = 1e-12);

        let indefinite = NdArray::from(array![[1.0f64, 2.0], [2.0, 1.0]].into_dyn());
        assert!(matches!(cholesky(&indefinite), Err(Error::LinAlg(_))));
        assert!(inv(&sample()).is_err());
    }

    #[test]
    fn test_svd_is_reduced() {
        let (u, s, vt) = svd(&sample()).unwrap();
        assert_eq!(u.shape(), &[3, 2]);
        assert_eq!(s.shape(), &[2]);
        assert_eq!(vt.shape(), &[2, 2]);
        let s = s.to_f64();
        assert!(s[[0]] >= s[[1]]);
        let frobenius: f64 = sample().to_f64().iter().map(|x| x * x).sum();
        assert_relative_eq!(s.iter().map(|x| x * x).sum::<f64>(), frobenius, epsilon = 1e-10);
    }
}
