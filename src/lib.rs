//! Stationary Gaussian process models of image patches.
//!
//! `sgp` estimates a stationary Gaussian process from a stack of square
//! image patches and uses it as an exact density model: the covariance is
//! projected onto the doubly block-Toeplitz structure of a stationary 2D
//! process and onto the positive-definite cone, refined by projected
//! gradient descent against a held-out likelihood, and then queried through
//! a pixel-by-pixel conditional recursion that supports exact sampling and
//! per-pixel log-likelihood at sizes larger than the estimation patch.
//!
//! # Example
//!
//! Fit a process to patches and sample an image twice the patch size:
//!
//! ```
//! use nalgebra::DMatrix;
//! use rand::SeedableRng;
//! use sgp::prelude::*;
//!
//! # fn main() -> Result<(), StationaryGaussianProcessError> {
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//!
//! // stand-in for a real patch batch
//! let patches: Vec<DMatrix<f64>> = (0..32)
//!     .map(|k| DMatrix::from_fn(4, 4, |i, j| ((i + j + k) % 5) as f64))
//!     .collect();
//!
//! let mut model = StationaryGaussianProcess::new(&patches, 1e-3)?;
//! let samples = model.sample(10, Some(8), true, &mut rng)?;
//! let score = model.log_likelihood(&samples)?;
//! assert!(score.is_finite());
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - `serde1`: enable serde derives on configuration and error types

pub mod consts;
pub mod cov;
pub mod dist;
pub mod misc;
pub mod noise;
pub mod prelude;
pub mod process;
pub mod traits;
