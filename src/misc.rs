//! Small shared numeric helpers
//!
//! Images are exchanged as `DMatrix<f64>` and flattened in raster (row-major)
//! order. Every module that indexes into a covariance matrix assumes this
//! order; pixel (i, j) of a p×p patch maps to linear index `i * p + j`.

use nalgebra::{DMatrix, DVector};

/// Flatten an image to a vector in raster (row-major) order.
pub fn vectorize(img: &DMatrix<f64>) -> DVector<f64> {
    let (nrows, ncols) = img.shape();
    DVector::from_fn(nrows * ncols, |ix, _| img[(ix / ncols, ix % ncols)])
}

/// Rebuild a square image from a raster-order vector.
pub fn devectorize(xs: &DVector<f64>, side: usize) -> DMatrix<f64> {
    DMatrix::from_fn(side, side, |i, j| xs[i * side + j])
}
