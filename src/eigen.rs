// src/eigen.rs

use crate::error::KpcaError;
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use std::cmp::Ordering;

/// Raw output of a covariance eigendecomposition.
/// `eigenvectors.column(j)` belongs to `eigenvalues[j]`; no ordering is assumed.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    pub eigenvalues: Array1<f64>,
    pub eigenvectors: Array2<f64>,
}

/// Seam for whatever routine produces eigenpairs of the (symmetric) covariance matrix.
pub trait CovarianceEigensolver {
    fn decompose(&self, covariance: ArrayView2<f64>) -> Result<EigenDecomposition, KpcaError>;
}

/// `ndarray-linalg` backed symmetric eigensolver reading the upper triangle.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayEigensolver;

impl CovarianceEigensolver for NdarrayEigensolver {
    fn decompose(&self, covariance: ArrayView2<f64>) -> Result<EigenDecomposition, KpcaError> {
        if covariance.nrows() != covariance.ncols() {
            return Err(KpcaError::dimension_mismatch(
                "covariance eigendecomposition",
                (covariance.nrows(), covariance.nrows()),
                covariance.dim(),
            ));
        }
        if covariance.is_empty() {
            return Ok(EigenDecomposition {
                eigenvalues: Array1::zeros(0),
                eigenvectors: Array2::zeros((0, 0)),
            });
        }
        let (eigenvalues, eigenvectors) = covariance
            .eigh(UPLO::Upper)
            .map_err(|e| KpcaError::Eigendecomposition(e.to_string()))?;
        Ok(EigenDecomposition {
            eigenvalues,
            eigenvectors,
        })
    }
}

/// Orders two `(original_index, eigenvalue)` entries: larger value first,
/// equal values by ascending original index. NaN compares below every number.
fn descending_with_index_tiebreak(a: &(usize, f64), b: &(usize, f64)) -> Ordering {
    let by_value = match (a.1.is_nan(), b.1.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal),
    };
    by_value.then_with(|| a.0.cmp(&b.0))
}

/// Returns the permutation that puts `eigenvalues` into descending order.
///
/// Entry `j` of the result is the original index of the eigenvalue that ends up
/// at position `j`. Ties keep ascending original-index order, so the result is
/// fully determined by the input.
pub fn descending_order(eigenvalues: ArrayView1<f64>) -> Vec<usize> {
    let mut indexed: Vec<(usize, f64)> = eigenvalues.iter().copied().enumerate().collect();
    indexed.sort_unstable_by(descending_with_index_tiebreak);
    indexed.into_iter().map(|(index, _)| index).collect()
}

/// Copies the columns of `matrix` into a new matrix in the order given by `order`.
///
/// # Panics
/// If any index in `order` is out of bounds for the columns of `matrix`.
pub fn reorder_columns_owned(matrix: ArrayView2<f64>, order: &[usize]) -> Array2<f64> {
    if order.is_empty() {
        return Array2::zeros((matrix.nrows(), 0));
    }
    matrix.select(Axis(1), order)
}

/// Copies the elements of `array` into a new array in the order given by `order`.
///
/// # Panics
/// If any index in `order` is out of bounds for `array`.
pub fn reorder_array_owned(array: ArrayView1<f64>, order: &[usize]) -> Array1<f64> {
    if order.is_empty() {
        return Array1::zeros(0);
    }
    array.select(Axis(0), order)
}

/// Sorts eigenpairs into descending eigenvalue order without touching the inputs.
///
/// The eigenvector columns are copied, never recomputed, so output column `j`
/// is bit-identical to input column `order[j]`.
///
/// # Errors
/// `DimensionMismatch` if the eigenvalue count differs from the eigenvector column count.
pub fn sort_eigenpairs_descending(
    eigenvalues: ArrayView1<f64>,
    eigenvectors: ArrayView2<f64>,
) -> Result<(Array1<f64>, Array2<f64>), KpcaError> {
    if eigenvalues.len() != eigenvectors.ncols() {
        return Err(KpcaError::dimension_mismatch(
            "eigenvalue/eigenvector pairing",
            (eigenvectors.nrows(), eigenvalues.len()),
            eigenvectors.dim(),
        ));
    }
    if eigenvalues.iter().any(|v| !v.is_finite()) {
        warn!("Eigenvalue input contains non-finite values; they are ordered last.");
    }
    let order = descending_order(eigenvalues);
    debug!("Eigenpair permutation: {:?}", order);
    Ok((
        reorder_array_owned(eigenvalues, &order),
        reorder_columns_owned(eigenvectors, &order),
    ))
}

/// Fraction of the total eigenvalue mass carried by each eigenvalue.
/// All zeros when the total is not positive.
pub fn explained_variance_ratio(eigenvalues: ArrayView1<f64>) -> Array1<f64> {
    let total: f64 = eigenvalues.iter().filter(|v| v.is_finite()).sum();
    if total > 0.0 {
        eigenvalues.mapv(|v| v / total)
    } else {
        Array1::zeros(eigenvalues.len())
    }
}
