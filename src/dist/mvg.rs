//! Multivariate Gaussian distribution, 𝒩(μ, Σ), over `DVector<f64>`
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use std::fmt;

use crate::consts::HALF_LN_2PI;

/// [Multivariate Gaussian/Normal Distribution](https://en.wikipedia.org/wiki/Multivariate_normal_distribution),
/// 𝒩(μ, Σ).
///
/// The Cholesky factor of Σ is computed once at construction, so `ln_f` and
/// `draw` are a triangular solve and a triangular multiply respectively.
///
/// # Example
///
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use sgp::dist::MvGaussian;
///
/// let mvg = MvGaussian::standard(3).unwrap();
/// let x = DVector::<f64>::zeros(3);
/// assert!((mvg.ln_f(&x) + 2.756815599614018).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct MvGaussian {
    /// Mean vector
    mu: DVector<f64>,
    /// Covariance matrix
    cov: DMatrix<f64>,
    /// Lower Cholesky factor of Σ
    chol_l: DMatrix<f64>,
    /// ln |Σ|¹ᐟ² = Σₖ ln Lₖₖ
    half_ln_det: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum MvGaussianError {
    /// The number of dimensions in μ and Σ differ
    DimensionMismatch { mu_len: usize, cov_nrows: usize },
    /// The covariance matrix is not square
    CovNotSquare { nrows: usize, ncols: usize },
    /// The covariance matrix has no Cholesky decomposition
    CovNotPositiveDefinite,
    /// Zero dimensions requested
    ZeroDimension,
}

impl MvGaussian {
    /// Create a new multivariate Gaussian distribution
    ///
    /// # Arguments
    /// - mu: k-length mean vector
    /// - cov: k-by-k positive-definite covariance matrix
    pub fn new(
        mu: DVector<f64>,
        cov: DMatrix<f64>,
    ) -> Result<Self, MvGaussianError> {
        if cov.nrows() != cov.ncols() {
            Err(MvGaussianError::CovNotSquare {
                nrows: cov.nrows(),
                ncols: cov.ncols(),
            })
        } else if mu.len() != cov.nrows() {
            Err(MvGaussianError::DimensionMismatch {
                mu_len: mu.len(),
                cov_nrows: cov.nrows(),
            })
        } else {
            let chol = Cholesky::new(cov.clone())
                .ok_or(MvGaussianError::CovNotPositiveDefinite)?;
            let chol_l = chol.unpack();
            let half_ln_det = chol_l.diagonal().map(|l| l.ln()).sum();
            Ok(MvGaussian {
                mu,
                cov,
                chol_l,
                half_ln_det,
            })
        }
    }

    /// Standard multivariate Gaussian with zero mean and identity covariance
    pub fn standard(dims: usize) -> Result<Self, MvGaussianError> {
        if dims == 0 {
            Err(MvGaussianError::ZeroDimension)
        } else {
            MvGaussian::new(DVector::zeros(dims), DMatrix::identity(dims, dims))
        }
    }

    /// Number of dimensions
    pub fn ndims(&self) -> usize {
        self.mu.len()
    }

    /// Mean vector, μ
    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    /// Covariance matrix, Σ
    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }

    /// Log density, ln 𝒩(x; μ, Σ)
    pub fn ln_f(&self, x: &DVector<f64>) -> f64 {
        let diff = x - &self.mu;
        let z = self
            .chol_l
            .solve_lower_triangular(&diff)
            .expect("Cholesky factor is nonsingular");
        let k = self.mu.len() as f64;
        -k * HALF_LN_2PI - self.half_ln_det - 0.5 * z.norm_squared()
    }

    /// Draw x = μ + Lz with z a vector of standard normals
    pub fn draw<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let z: DVector<f64> =
            DVector::from_fn(self.mu.len(), |_, _| rng.sample(StandardNormal));
        &self.mu + &self.chol_l * z
    }

    /// Draw `n` samples
    pub fn sample<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<DVector<f64>> {
        (0..n).map(|_| self.draw(rng)).collect()
    }
}

impl std::error::Error for MvGaussianError {}

impl fmt::Display for MvGaussianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { mu_len, cov_nrows } => write!(
                f,
                "dimensions of mu ({mu_len}) and cov ({cov_nrows}) must match"
            ),
            Self::CovNotSquare { nrows, ncols } => {
                write!(f, "cov must be square but is {nrows}x{ncols}")
            }
            Self::CovNotPositiveDefinite => {
                write!(f, "cov must be positive definite")
            }
            Self::ZeroDimension => write!(f, "ndims must be >= 1"),
        }
    }
}
