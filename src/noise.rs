//! Closed-form per-pixel measurement-noise models
//!
//! Conditional entropies H(Y | X) of independent per-pixel noise processes,
//! in nats per pixel. These are the analytic counterparts the process models
//! are compared against in information-theoretic analyses.

use nalgebra::DMatrix;
use std::fmt;

use crate::consts::{HALF_LN_2PI_E, LN_2PI};

/// A measurement-noise process with a per-pixel conditional entropy.
pub trait MeasurementNoiseModel {
    /// Conditional entropy H(Y | X) in nats per pixel.
    fn conditional_entropy(&self, images: &[DMatrix<f64>]) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub enum NoiseModelError {
    /// The sigma parameter is less than or equal to zero
    SigmaTooLow { sigma: f64 },
    /// The sigma parameter is infinite or NaN
    SigmaNotFinite { sigma: f64 },
}

/// Additive independent Gaussian noise with a fixed standard deviation:
/// H(Y | X) = 0.5 ln(2πe σ²) regardless of the signal.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalyticGaussianNoiseModel {
    sigma: f64,
}

impl AnalyticGaussianNoiseModel {
    pub fn new(sigma: f64) -> Result<Self, NoiseModelError> {
        if !sigma.is_finite() {
            Err(NoiseModelError::SigmaNotFinite { sigma })
        } else if sigma <= 0.0 {
            Err(NoiseModelError::SigmaTooLow { sigma })
        } else {
            Ok(AnalyticGaussianNoiseModel { sigma })
        }
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl MeasurementNoiseModel for AnalyticGaussianNoiseModel {
    fn conditional_entropy(&self, _images: &[DMatrix<f64>]) -> f64 {
        HALF_LN_2PI_E + self.sigma.ln()
    }
}

/// Photon shot noise: the Gaussian approximation to Poisson noise gives a
/// per-pixel conditional entropy of 0.5 (ln 2πe + ln x) at signal level x,
/// with non-positive pixels contributing nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub struct PoissonNoiseModel;

impl MeasurementNoiseModel for PoissonNoiseModel {
    fn conditional_entropy(&self, images: &[DMatrix<f64>]) -> f64 {
        let per_image: f64 = images
            .iter()
            .map(|img| {
                let h: f64 = img
                    .iter()
                    .map(|&x| {
                        if x > 0.0 {
                            0.5 * (LN_2PI + 1.0 + x.ln())
                        } else {
                            0.0
                        }
                    })
                    .sum();
                h / img.len() as f64
            })
            .sum();
        per_image / images.len() as f64
    }
}

impl std::error::Error for NoiseModelError {}

impl fmt::Display for NoiseModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigmaTooLow { sigma } => {
                write!(f, "sigma ({sigma}) must be greater than zero")
            }
            Self::SigmaNotFinite { sigma } => {
                write!(f, "non-finite sigma: {sigma}")
            }
        }
    }
}
