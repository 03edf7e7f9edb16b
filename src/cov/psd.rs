//! Positive-definiteness projection by eigenvalue flooring

use nalgebra::{DMatrix, SymmetricEigen};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum PsdError {
    /// The floored matrix still has a negative eigenvalue. This indicates
    /// numerical error upstream; the caller should raise the floor.
    StillIndefinite { floor: f64, min_eigenvalue: f64 },
}

/// Project a symmetric matrix onto the positive-definite cone by clamping
/// every eigenvalue below `floor` up to `floor` and reconstructing.
///
/// The reconstructed spectrum is re-checked; a negative eigenvalue after
/// clamping is a catastrophic numerical failure and is surfaced as
/// [`PsdError::StillIndefinite`] along with the floor that was used.
pub fn floor_eigenvalues(
    cov: &DMatrix<f64>,
    floor: f64,
) -> Result<DMatrix<f64>, PsdError> {
    let eig = SymmetricEigen::new(cov.clone());
    let vals = eig.eigenvalues.map(|v| if v < floor { floor } else { v });
    let floored = &eig.eigenvectors
        * DMatrix::from_diagonal(&vals)
        * eig.eigenvectors.transpose();

    let min_eigenvalue = SymmetricEigen::new(floored.clone()).eigenvalues.min();
    if min_eigenvalue < 0.0 {
        Err(PsdError::StillIndefinite {
            floor,
            min_eigenvalue,
        })
    } else {
        Ok(floored)
    }
}

impl std::error::Error for PsdError {}

impl fmt::Display for PsdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StillIndefinite {
                floor,
                min_eigenvalue,
            } => write!(
                f,
                "matrix is not positive definite after flooring eigenvalues \
                 (floor: {floor}, smallest eigenvalue: {min_eigenvalue}); \
                 try raising the floor"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    const TOL: f64 = 1E-10;

    fn indefinite_3x3() -> DMatrix<f64> {
        // eigenvalues 3, 1, -1
        DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
        SymmetricEigen::new(m.clone()).eigenvalues.min()
    }

    #[test]
    fn floors_negative_eigenvalues() {
        let floored = floor_eigenvalues(&indefinite_3x3(), 0.5).unwrap();
        assert!(min_eigenvalue(&floored) >= 0.5 - TOL);
    }

    #[test]
    fn leaves_positive_definite_input_unchanged() {
        let cov = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.0, 0.0, 0.0, 2.0]);
        let floored = floor_eigenvalues(&cov, 1E-3).unwrap();
        assert!((&cov - &floored).abs().max() < TOL);
    }

    #[test]
    fn idempotent_at_fixed_floor() {
        let once = floor_eigenvalues(&indefinite_3x3(), 0.25).unwrap();
        let twice = floor_eigenvalues(&once, 0.25).unwrap();
        assert!((&once - &twice).abs().max() < 1E-8);
    }

    #[test]
    fn raising_the_floor_never_lowers_the_spectrum() {
        let cov = indefinite_3x3();
        let mut last_min = f64::NEG_INFINITY;
        for floor in [1E-3, 1E-2, 0.1, 0.5, 1.0, 2.0] {
            let floored = floor_eigenvalues(&cov, floor).unwrap();
            let min = min_eigenvalue(&floored);
            assert!(min >= last_min - TOL);
            assert!(min >= floor - TOL);
            last_min = min;
        }
    }
}
