//! Projected-gradient fitting of the eigen-spectrum
//!
//! Each training step is the explicit composition of two pure functions: a
//! clipped momentum-SGD step on the eigenvalues under the per-pixel
//! negative-log-likelihood loss ([`gradient_step`]), followed by projection
//! of the implied covariance back toward the feasible set — doubly
//! block-Toeplitz averaging, eigendecomposition, eigenvalue flooring
//! ([`project`]). The eigenvectors and mean are never moved by the gradient;
//! they only change through the projection.

use log::debug;
use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::consts::LN_2PI;
use crate::cov::toeplitz::average_to_doubly_toeplitz;
use crate::misc::vectorize;

/// Settings for the projected-gradient fitting loop
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde1", serde(rename_all = "snake_case"))]
pub struct FitConfig {
    /// SGD learning rate
    pub learning_rate: f64,
    /// Maximum number of epochs to run
    pub max_epochs: usize,
    /// Minibatch steps per epoch
    pub steps_per_epoch: usize,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
    /// Minibatch size
    pub batch_size: usize,
    /// Number of trailing images held out for validation
    pub num_val_samples: usize,
    /// Eigenvalue floor applied by the projection step
    pub eigenvalue_floor: f64,
    /// Elementwise gradient clip; keeps tiny eigenvalues from producing
    /// divergent updates
    pub gradient_clip: f64,
    /// SGD momentum
    pub momentum: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1E2,
            max_epochs: 200,
            steps_per_epoch: 1,
            patience: 10,
            batch_size: 12,
            num_val_samples: 100,
            eigenvalue_floor: 1E-3,
            gradient_clip: 1.0,
            momentum: 0.9,
        }
    }
}

impl FitConfig {
    pub fn with_learning_rate(self, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..self
        }
    }

    pub fn with_max_epochs(self, max_epochs: usize) -> Self {
        Self { max_epochs, ..self }
    }

    pub fn with_steps_per_epoch(self, steps_per_epoch: usize) -> Self {
        Self {
            steps_per_epoch,
            ..self
        }
    }

    pub fn with_patience(self, patience: usize) -> Self {
        Self { patience, ..self }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_num_val_samples(self, num_val_samples: usize) -> Self {
        Self {
            num_val_samples,
            ..self
        }
    }

    pub fn with_eigenvalue_floor(self, eigenvalue_floor: f64) -> Self {
        Self {
            eigenvalue_floor,
            ..self
        }
    }

    pub fn with_gradient_clip(self, gradient_clip: f64) -> Self {
        Self {
            gradient_clip,
            ..self
        }
    }

    pub fn with_momentum(self, momentum: f64) -> Self {
        Self { momentum, ..self }
    }
}

/// Optimizable state: the eigen-decomposition and mean of the process, plus
/// the momentum buffer of the eigenvalue optimizer.
#[derive(Debug, Clone)]
pub(crate) struct FitState {
    pub eig_vals: DVector<f64>,
    pub eig_vecs: DMatrix<f64>,
    pub mean: DVector<f64>,
    pub velocity: DVector<f64>,
}

/// One clipped momentum-SGD step on the eigenvalues.
///
/// The loss is the batch-mean negative log-likelihood per pixel under
/// Σ = V·diag(λ)·Vᵀ. With w = Vᵀ(x − μ), the eigenvalue gradient is
/// ∂loss/∂λₖ = (1/2P)(1/λₖ − E[wₖ²]/λₖ²) in closed form; the eigenvector and
/// mean gradients vanish because both are held fixed within the step.
/// Returns the loss evaluated before the update.
pub(crate) fn gradient_step(
    mut state: FitState,
    batch: &[DMatrix<f64>],
    config: &FitConfig,
) -> (FitState, f64) {
    debug_assert!(!batch.is_empty());
    let dim = state.eig_vals.len();
    let nf = batch.len() as f64;

    let ln_det: f64 = state.eig_vals.iter().map(|l| l.ln()).sum();
    let mut sq_mean = DVector::<f64>::zeros(dim);
    let mut nll_sum = 0.0;
    for img in batch {
        let w = state.eig_vecs.tr_mul(&(vectorize(img) - &state.mean));
        let maha: f64 = w
            .iter()
            .zip(state.eig_vals.iter())
            .map(|(wk, lk)| wk * wk / lk)
            .sum();
        nll_sum += 0.5 * (dim as f64 * LN_2PI + ln_det + maha);
        sq_mean += w.component_mul(&w);
    }
    sq_mean /= nf;
    let loss = nll_sum / nf / dim as f64;

    let clip = config.gradient_clip;
    let grad = DVector::from_fn(dim, |k, _| {
        let lk = state.eig_vals[k];
        let g = 0.5 * (1.0 / lk - sq_mean[k] / (lk * lk)) / dim as f64;
        g.clamp(-clip, clip)
    });
    state.velocity = &state.velocity * config.momentum + grad;
    state.eig_vals -= config.learning_rate * &state.velocity;
    (state, loss)
}

/// Proximal step: project the updated covariance back toward the feasible
/// set by doubly block-Toeplitz averaging followed by eigenvalue flooring,
/// replacing the eigenvalues and eigenvectors of the state.
pub(crate) fn project(
    mut state: FitState,
    eigenvalue_floor: f64,
    patch_size: usize,
) -> FitState {
    let cov = &state.eig_vecs
        * DMatrix::from_diagonal(&state.eig_vals)
        * state.eig_vecs.transpose();
    let averaged = average_to_doubly_toeplitz(&cov, patch_size);
    let eig = SymmetricEigen::new(averaged);
    state.eig_vals = eig
        .eigenvalues
        .map(|v| if v < eigenvalue_floor { eigenvalue_floor } else { v });
    state.eig_vecs = eig.eigenvectors;
    state
}

/// Batch-mean negative log-likelihood per pixel of `images` under the state.
pub(crate) fn validation_loss(
    state: &FitState,
    images: &[DMatrix<f64>],
) -> f64 {
    let dim = state.eig_vals.len();
    let ln_det: f64 = state.eig_vals.iter().map(|l| l.ln()).sum();
    let nll_sum: f64 = images
        .iter()
        .map(|img| {
            let w = state.eig_vecs.tr_mul(&(vectorize(img) - &state.mean));
            let maha: f64 = w
                .iter()
                .zip(state.eig_vals.iter())
                .map(|(wk, lk)| wk * wk / lk)
                .sum();
            0.5 * (dim as f64 * LN_2PI + ln_det + maha)
        })
        .sum();
    nll_sum / images.len() as f64 / dim as f64
}

/// Minibatch training driver: runs `steps_per_epoch` sequential minibatch
/// steps per epoch, records the held-out validation loss after each epoch,
/// and stops early once `patience` epochs pass without improvement.
/// Returns the best state seen and the validation loss history.
pub(crate) fn train<F>(
    images: &[DMatrix<f64>],
    state: FitState,
    config: &FitConfig,
    mut step: F,
) -> (FitState, Vec<f64>)
where
    F: FnMut(FitState, &[DMatrix<f64>]) -> (FitState, f64),
{
    let n = images.len();
    let n_val = config.num_val_samples.clamp(1, n);
    let split = n - n_val;
    let val = &images[split..];
    let train_set = if split == 0 { images } else { &images[..split] };
    let batch_size = config.batch_size.clamp(1, train_set.len());

    let mut state = state;
    let mut best = state.clone();
    let mut best_loss = f64::INFINITY;
    let mut epochs_since_best = 0;
    let mut history = Vec::with_capacity(config.max_epochs);
    let mut offset = 0;

    for epoch in 0..config.max_epochs {
        for _ in 0..config.steps_per_epoch {
            let end = (offset + batch_size).min(train_set.len());
            let batch = &train_set[offset..end];
            offset = if end == train_set.len() { 0 } else { end };
            let (next, loss) = step(state, batch);
            debug!("epoch {epoch}: batch loss {loss}");
            state = next;
        }
        let val_loss = validation_loss(&state, val);
        debug!("epoch {epoch}: validation loss {val_loss}");
        history.push(val_loss);
        if val_loss < best_loss {
            best_loss = val_loss;
            best = state.clone();
            epochs_since_best = 0;
        } else {
            epochs_since_best += 1;
            if epochs_since_best >= config.patience {
                break;
            }
        }
    }
    (best, history)
}
