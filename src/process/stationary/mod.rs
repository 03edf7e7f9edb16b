//! Stationary Gaussian process model of image patches
//!
//! [`StationaryGaussianProcess`] owns the fitted parameters of the process —
//! eigenvalues, orthonormal eigenvectors, and a constant mean vector — and
//! exposes construction from a patch batch, projected-gradient refinement,
//! exact sampling at sizes larger than the estimation patch, and per-pixel
//! log-likelihood scoring. The covariance matrix V·diag(λ)·Vᵀ is
//! reconstructed on demand; the eigen-decomposition is the canonical state.

pub mod conditional;
pub mod fit;

pub use conditional::{ConditionalCache, InferenceError};
pub use fit::FitConfig;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::Rng;
use std::fmt;

use crate::cov::{
    batch_side, plugin_stationary_covariance, CovarianceError, PsdError,
    ShapeError,
};
use crate::traits::ImageModel;
use fit::FitState;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum StationaryGaussianProcessError {
    Shape(ShapeError),
    Psd(PsdError),
    Inference(InferenceError),
}

/// A stationary Gaussian process over square image patches.
#[derive(Debug, Clone)]
pub struct StationaryGaussianProcess {
    patch_size: usize,
    eig_vals: DVector<f64>,
    eig_vecs: DMatrix<f64>,
    mean: DVector<f64>,
    /// Conditioning structure for the most recent target size; rebuilt
    /// whenever the parameters or the target size change.
    cache: ConditionalCache,
}

impl StationaryGaussianProcess {
    /// Initialize the model to the plugin estimate of the stationary
    /// covariance of `images`, with eigenvalues floored at
    /// `eigenvalue_floor` and the grand mean of all pixels as the constant
    /// process mean.
    pub fn new(
        images: &[DMatrix<f64>],
        eigenvalue_floor: f64,
    ) -> Result<Self, StationaryGaussianProcessError> {
        let cov = plugin_stationary_covariance(images, eigenvalue_floor, true)?;
        let n_pixels: usize = images.iter().map(|img| img.len()).sum();
        let grand_mean = images.iter().map(|img| img.sum()).sum::<f64>()
            / n_pixels as f64;
        Self::from_parts(cov, grand_mean)
    }

    /// Construct the model directly from a known stationary covariance
    /// matrix and scalar mean.
    pub fn with_covariance(
        cov: DMatrix<f64>,
        mean: f64,
    ) -> Result<Self, StationaryGaussianProcessError> {
        Self::from_parts(cov, mean)
    }

    fn from_parts(
        cov: DMatrix<f64>,
        mean: f64,
    ) -> Result<Self, StationaryGaussianProcessError> {
        let dim = cov.nrows();
        let patch_size = (dim as f64).sqrt().round() as usize;
        let mean = DVector::from_element(dim, mean);
        let cache = ConditionalCache::new(&cov, &mean, patch_size, false)?;
        let eig = SymmetricEigen::new(cov);
        Ok(StationaryGaussianProcess {
            patch_size,
            eig_vals: eig.eigenvalues,
            eig_vecs: eig.eigenvectors,
            mean,
            cache,
        })
    }

    /// Side length of the estimation patch
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Eigenvalues of the fitted covariance matrix
    pub fn eigenvalues(&self) -> &DVector<f64> {
        &self.eig_vals
    }

    /// Constant mean vector of the process
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    /// Reconstruct the covariance matrix, V·diag(λ)·Vᵀ
    pub fn covariance(&self) -> DMatrix<f64> {
        &self.eig_vecs
            * DMatrix::from_diagonal(&self.eig_vals)
            * self.eig_vecs.transpose()
    }

    /// Refine the eigenvalues and mean against the per-pixel likelihood of
    /// `train_images` by projected gradient descent: each epoch takes a
    /// clipped momentum-SGD step on the eigenvalues, then replaces the
    /// eigen-decomposition with the doubly-Toeplitz-averaged, floored
    /// version of the updated covariance. Adopts the parameters with the
    /// best held-out validation loss and returns the validation loss
    /// history.
    pub fn fit(
        &mut self,
        train_images: &[DMatrix<f64>],
        config: &FitConfig,
    ) -> Result<Vec<f64>, StationaryGaussianProcessError> {
        let side = batch_side(train_images)?;
        if side != self.patch_size {
            return Err(StationaryGaussianProcessError::Shape(
                ShapeError::SizeMismatch {
                    expected: self.patch_size,
                    found: side,
                },
            ));
        }

        let state = FitState {
            eig_vals: self.eig_vals.clone(),
            eig_vecs: self.eig_vecs.clone(),
            mean: self.mean.clone(),
            velocity: DVector::zeros(self.eig_vals.len()),
        };
        let patch_size = self.patch_size;
        let step_config = config.clone();
        let step = move |state: FitState, batch: &[DMatrix<f64>]| {
            let (state, loss) = fit::gradient_step(state, batch, &step_config);
            let state =
                fit::project(state, step_config.eigenvalue_floor, patch_size);
            (state, loss)
        };
        let (best, history) = fit::train(train_images, state, config, step);

        self.eig_vals = best.eig_vals;
        self.eig_vecs = best.eig_vecs;
        self.mean = best.mean;
        self.cache = ConditionalCache::new(
            &self.covariance(),
            &self.mean,
            self.patch_size,
            false,
        )?;
        Ok(history)
    }

    /// Log-likelihood per pixel of the estimation patch of a batch of
    /// equally sized square images, which may be larger than the patch.
    pub fn log_likelihood(
        &mut self,
        images: &[DMatrix<f64>],
    ) -> Result<f64, StationaryGaussianProcessError> {
        let side = batch_side(images)?;
        if side < self.patch_size {
            return Err(StationaryGaussianProcessError::Inference(
                InferenceError::SampleSmallerThanPatch {
                    sample_size: side,
                    patch_size: self.patch_size,
                },
            ));
        }
        let ll = self.conditioning(side)?.log_likelihood(images)?;
        Ok(ll)
    }

    /// Draw `num_samples` images of side `sample_size` (the patch size if
    /// `None`). Sizes up to the patch are drawn jointly and cropped; larger
    /// sizes extend the joint corner pixel by pixel through the conditional
    /// recursion.
    pub fn sample<R: Rng>(
        &mut self,
        num_samples: usize,
        sample_size: Option<usize>,
        ensure_nonnegative: bool,
        rng: &mut R,
    ) -> Result<Vec<DMatrix<f64>>, StationaryGaussianProcessError> {
        let size = sample_size.unwrap_or(self.patch_size);
        let cache = self.conditioning(size)?;
        Ok(cache.sample(num_samples, ensure_nonnegative, rng))
    }

    /// The conditioning cache for the given target size, rebuilding it only
    /// when the size differs from the cached one. Parameter changes rebuild
    /// through `fit`.
    fn conditioning(
        &mut self,
        sample_size: usize,
    ) -> Result<&ConditionalCache, StationaryGaussianProcessError> {
        if self.cache.sample_size() != sample_size {
            self.cache = ConditionalCache::new(
                &self.covariance(),
                &self.mean,
                sample_size,
                false,
            )?;
        }
        Ok(&self.cache)
    }
}

impl ImageModel for StationaryGaussianProcess {
    type Error = StationaryGaussianProcessError;

    fn log_likelihood(
        &mut self,
        images: &[DMatrix<f64>],
    ) -> Result<f64, Self::Error> {
        StationaryGaussianProcess::log_likelihood(self, images)
    }

    fn sample<R: Rng>(
        &mut self,
        num_samples: usize,
        sample_size: Option<usize>,
        ensure_nonnegative: bool,
        rng: &mut R,
    ) -> Result<Vec<DMatrix<f64>>, Self::Error> {
        StationaryGaussianProcess::sample(
            self,
            num_samples,
            sample_size,
            ensure_nonnegative,
            rng,
        )
    }
}

impl std::error::Error for StationaryGaussianProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shape(err) => Some(err),
            Self::Psd(err) => Some(err),
            Self::Inference(err) => Some(err),
        }
    }
}

impl fmt::Display for StationaryGaussianProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(err) => err.fmt(f),
            Self::Psd(err) => err.fmt(f),
            Self::Inference(err) => err.fmt(f),
        }
    }
}

impl From<ShapeError> for StationaryGaussianProcessError {
    fn from(err: ShapeError) -> Self {
        Self::Shape(err)
    }
}

impl From<PsdError> for StationaryGaussianProcessError {
    fn from(err: PsdError) -> Self {
        Self::Psd(err)
    }
}

impl From<InferenceError> for StationaryGaussianProcessError {
    fn from(err: InferenceError) -> Self {
        Self::Inference(err)
    }
}

impl From<CovarianceError> for StationaryGaussianProcessError {
    fn from(err: CovarianceError) -> Self {
        match err {
            CovarianceError::Shape(err) => Self::Shape(err),
            CovarianceError::Psd(err) => Self::Psd(err),
        }
    }
}
