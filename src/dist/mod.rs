//! Probability distributions

pub mod mvg;

pub use self::mvg::{MvGaussian, MvGaussianError};
