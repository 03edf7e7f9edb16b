//! Traits for probabilistic image models

use nalgebra::DMatrix;
use rand::Rng;

/// A probabilistic model of square images that can score held-out data and
/// generate samples.
///
/// Implementations may cache derived inference structure between calls,
/// hence the `&mut self` receivers.
pub trait ImageModel {
    type Error: std::error::Error;

    /// Log-likelihood per pixel of the estimation patch of a batch of
    /// equally sized square images.
    fn log_likelihood(
        &mut self,
        images: &[DMatrix<f64>],
    ) -> Result<f64, Self::Error>;

    /// Draw `num_samples` square images of side `sample_size` (the model's
    /// native patch size if `None`), optionally clamped to be nonnegative.
    fn sample<R: Rng>(
        &mut self,
        num_samples: usize,
        sample_size: Option<usize>,
        ensure_nonnegative: bool,
        rng: &mut R,
    ) -> Result<Vec<DMatrix<f64>>, Self::Error>;
}
