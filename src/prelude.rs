//! Re-imports for convenience
#[doc(no_inline)]
pub use crate::cov::{
    average_to_doubly_toeplitz, empirical_covariance, floor_eigenvalues,
    plugin_stationary_covariance, CovarianceError, PsdError, ShapeError,
};
#[doc(no_inline)]
pub use crate::dist::{MvGaussian, MvGaussianError};
#[doc(no_inline)]
pub use crate::noise::{
    AnalyticGaussianNoiseModel, MeasurementNoiseModel, NoiseModelError,
    PoissonNoiseModel,
};
#[doc(no_inline)]
pub use crate::process::stationary::{
    ConditionalCache, FitConfig, InferenceError, StationaryGaussianProcess,
    StationaryGaussianProcessError,
};
#[doc(no_inline)]
pub use crate::traits::ImageModel;
