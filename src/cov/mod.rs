//! Covariance estimation for stationary image-patch processes
//!
//! The pipeline is: empirical covariance of the vectorized patch batch
//! ([`empirical_covariance`]), averaging onto the doubly block-Toeplitz
//! structure of a stationary process ([`toeplitz::average_to_doubly_toeplitz`]),
//! then eigenvalue flooring to restore positive-definiteness
//! ([`psd::floor_eigenvalues`]). [`plugin_stationary_covariance`] runs the
//! whole pipeline.

pub mod psd;
pub mod toeplitz;

pub use psd::{floor_eigenvalues, PsdError};
pub use toeplitz::average_to_doubly_toeplitz;

use log::warn;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::fmt;

use crate::misc::vectorize;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum ShapeError {
    /// The patch batch is empty
    EmptyBatch,
    /// A patch is not square
    NotSquare { nrows: usize, ncols: usize },
    /// A patch does not match the size of the first patch in the batch
    SizeMismatch { expected: usize, found: usize },
    /// Too few patches to form an unbiased covariance estimate
    TooFewPatches { n: usize },
}

/// Errors from the combined stationary plugin estimate
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum CovarianceError {
    Shape(ShapeError),
    Psd(PsdError),
}

/// Validate that every image in a batch is square and of uniform size, and
/// return the common side length.
pub(crate) fn batch_side(images: &[DMatrix<f64>]) -> Result<usize, ShapeError> {
    let first = images.first().ok_or(ShapeError::EmptyBatch)?;
    if first.nrows() != first.ncols() {
        return Err(ShapeError::NotSquare {
            nrows: first.nrows(),
            ncols: first.ncols(),
        });
    }
    let side = first.nrows();
    for img in images.iter().skip(1) {
        if img.nrows() != img.ncols() {
            return Err(ShapeError::NotSquare {
                nrows: img.nrows(),
                ncols: img.ncols(),
            });
        }
        if img.nrows() != side {
            return Err(ShapeError::SizeMismatch {
                expected: side,
                found: img.nrows(),
            });
        }
    }
    Ok(side)
}

/// Unbiased sample covariance of a batch of square patches.
///
/// Each patch is vectorized in raster order, each dimension is centered by
/// its own empirical mean across the batch, and the (n − 1)-normalized outer
/// product sum is returned.
pub fn empirical_covariance(
    patches: &[DMatrix<f64>],
) -> Result<DMatrix<f64>, ShapeError> {
    let side = batch_side(patches)?;
    let n = patches.len();
    if n < 2 {
        return Err(ShapeError::TooFewPatches { n });
    }
    let dim = side * side;

    let vecs: Vec<DVector<f64>> = patches.iter().map(vectorize).collect();
    let mean = vecs
        .iter()
        .fold(DVector::zeros(dim), |acc, x| acc + x)
        / n as f64;

    let mut cov = DMatrix::zeros(dim, dim);
    for x in &vecs {
        let d = x - &mean;
        cov += &d * d.transpose();
    }
    cov /= (n - 1) as f64;
    Ok(cov)
}

/// Plugin estimate of a stationary covariance matrix: empirical covariance,
/// doubly block-Toeplitz averaging, then eigenvalue flooring at
/// `eigenvalue_floor`.
///
/// Positive-definiteness is the hard constraint and stationarity the soft
/// one: the returned matrix always has eigenvalues ≥ the floor, but if
/// re-averaging it onto the Toeplitz structure would reintroduce a negative
/// eigenvalue, the two constraints cannot be jointly satisfied and a warning
/// is logged (unless `suppress_warning` is set).
pub fn plugin_stationary_covariance(
    patches: &[DMatrix<f64>],
    eigenvalue_floor: f64,
    suppress_warning: bool,
) -> Result<DMatrix<f64>, CovarianceError> {
    let cov = empirical_covariance(patches)?;
    let patch_size = patches[0].nrows();

    let stationary = average_to_doubly_toeplitz(&cov, patch_size);
    let floored = floor_eigenvalues(&stationary, eigenvalue_floor)?;

    if !suppress_warning {
        let re_averaged = average_to_doubly_toeplitz(&floored, patch_size);
        let min_eig = SymmetricEigen::new(re_averaged).eigenvalues.min();
        if min_eig < 0.0 {
            warn!(
                "cannot make the covariance both doubly Toeplitz and positive \
                 definite; keeping the positive definite matrix (smallest \
                 doubly Toeplitz eigenvalue: {min_eig})"
            );
        }
    }
    Ok(floored)
}

impl std::error::Error for ShapeError {}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBatch => write!(f, "patch batch is empty"),
            Self::NotSquare { nrows, ncols } => {
                write!(f, "patches must be square but found {nrows}x{ncols}")
            }
            Self::SizeMismatch { expected, found } => write!(
                f,
                "patches must all have the same size; expected side {expected} \
                 but found {found}"
            ),
            Self::TooFewPatches { n } => write!(
                f,
                "at least two patches are needed for a covariance estimate, \
                 got {n}"
            ),
        }
    }
}

impl std::error::Error for CovarianceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shape(err) => Some(err),
            Self::Psd(err) => Some(err),
        }
    }
}

impl fmt::Display for CovarianceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(err) => err.fmt(f),
            Self::Psd(err) => err.fmt(f),
        }
    }
}

impl From<ShapeError> for CovarianceError {
    fn from(err: ShapeError) -> Self {
        CovarianceError::Shape(err)
    }
}

impl From<PsdError> for CovarianceError {
    fn from(err: PsdError) -> Self {
        CovarianceError::Psd(err)
    }
}
