use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sgp::prelude::*;

/// Kronecker square of the Toeplitz generator [4, 2, 1]: positive definite
/// and exactly doubly block-Toeplitz over a 3x3 patch.
fn kron_cov() -> DMatrix<f64> {
    let gen = [4.0, 2.0, 1.0];
    let t = DMatrix::from_fn(3, 3, |a, b| gen[a.abs_diff(b)]);
    let mut out = DMatrix::zeros(9, 9);
    for bi in 0..3 {
        for bj in 0..3 {
            let scaled = &t * t[(bi, bj)];
            out.view_mut((bi * 3, bj * 3), (3, 3)).copy_from(&scaled);
        }
    }
    out
}

fn raster(img: &DMatrix<f64>) -> DVector<f64> {
    let p = img.nrows();
    DVector::from_fn(p * p, |ix, _| img[(ix / p, ix % p)])
}

#[test]
fn patch_size_round_trip_matches_joint_density() {
    let cov = kron_cov();
    let mean = 3.0;
    let mut model =
        StationaryGaussianProcess::with_covariance(cov.clone(), mean).unwrap();

    let mut rng = StdRng::seed_from_u64(1234);
    let samples = model.sample(16, None, false, &mut rng).unwrap();
    let score = model.log_likelihood(&samples).unwrap();

    // closed-form joint log-density, computed independently of the model
    let mu = DVector::from_element(9, mean);
    let two_pi_cov = &cov * std::f64::consts::TAU;
    let ln_det = two_pi_cov.determinant().ln();
    let inv = cov.clone().try_inverse().unwrap();
    let expected = samples
        .iter()
        .map(|img| {
            let d = raster(img) - &mu;
            -0.5 * (ln_det + (d.transpose() * &inv * &d)[0])
        })
        .sum::<f64>()
        / samples.len() as f64
        / 9.0;

    assert::close(score, expected, 1E-8);
}

#[test]
fn seeded_sampling_is_reproducible_beyond_the_patch() {
    let mut model =
        StationaryGaussianProcess::with_covariance(kron_cov(), 1.0).unwrap();

    let mut rng_a = StdRng::seed_from_u64(9);
    let xs = model.sample(4, Some(7), false, &mut rng_a).unwrap();

    let mut rng_b = StdRng::seed_from_u64(9);
    let ys = model.sample(4, Some(7), false, &mut rng_b).unwrap();

    for (x, y) in xs.iter().zip(ys.iter()) {
        assert_eq!(x, y);
    }
}

#[test]
fn estimate_fit_and_score_against_the_generating_process() {
    let mut truth =
        StationaryGaussianProcess::with_covariance(kron_cov(), 5.0).unwrap();
    let mut rng = StdRng::seed_from_u64(2026);
    let train = truth.sample(400, None, false, &mut rng).unwrap();

    let mut model = StationaryGaussianProcess::new(&train, 1E-3).unwrap();
    let config = FitConfig::default()
        .with_learning_rate(0.5)
        .with_max_epochs(30)
        .with_patience(5)
        .with_batch_size(32)
        .with_num_val_samples(50);
    let history = model.fit(&train, &config).unwrap();
    assert!(!history.is_empty());

    let held_out = truth.sample(100, None, false, &mut rng).unwrap();
    let ll_truth = truth.log_likelihood(&held_out).unwrap();
    let ll_model = model.log_likelihood(&held_out).unwrap();

    // the estimate cannot beat the generating process by much, and with
    // hundreds of patches it should land close to it
    assert!(ll_model <= ll_truth + 0.05);
    assert!((ll_truth - ll_model).abs() < 0.5);
}

#[test]
fn larger_canvases_extend_the_process() {
    let mut model =
        StationaryGaussianProcess::with_covariance(kron_cov(), 10.0).unwrap();
    let mut rng = StdRng::seed_from_u64(77);
    let samples = model.sample(20, Some(9), true, &mut rng).unwrap();

    assert!(samples.iter().all(|img| img.shape() == (9, 9)));
    assert!(samples.iter().all(|img| img.iter().all(|&v| v >= 0.0)));

    // scoring the generated canvases under the same model is finite and
    // grows (in magnitude) with the canvas rather than the patch
    let score = model.log_likelihood(&samples).unwrap();
    assert!(score.is_finite());

    let small = model.sample(20, None, true, &mut rng).unwrap();
    let small_score = model.log_likelihood(&small).unwrap();
    assert!(score < small_score);
}

#[test]
fn generic_image_model_usage() {
    fn score_own_samples<M: ImageModel>(
        model: &mut M,
        rng: &mut StdRng,
    ) -> Result<f64, M::Error> {
        let samples = model.sample(8, None, false, rng)?;
        model.log_likelihood(&samples)
    }

    let mut model =
        StationaryGaussianProcess::with_covariance(kron_cov(), 0.0).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let score = score_own_samples(&mut model, &mut rng).unwrap();
    assert!(score.is_finite());
}
