//! Random processes over images

pub mod stationary;

pub use stationary::{
    StationaryGaussianProcess, StationaryGaussianProcessError,
};
