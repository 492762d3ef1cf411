// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reparameterisations that turn encoder output into a latent sample plus a
//! per-example KL divergence, with hand-written backward passes.

use crate::error::{Result, VaeError};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use spiral_config::determinism;
use st_tensor::Tensor;

/// Offset used inside the Gumbel double logarithm.
pub const GUMBEL_EPS: f32 = 1e-20;
/// Offset used inside the categorical KL logarithms.
pub const KL_EPS: f32 = 1e-9;

/// Which reparameterisation a model uses. Fixed at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReparamKind {
    /// Diagonal Gaussian with a standard-normal prior.
    #[default]
    Continuous,
    /// Gumbel-Softmax relaxation of a uniform categorical.
    Discrete,
}

impl ReparamKind {
    /// Width the encoder must emit for a latent code of `latent_size`.
    pub fn encoded_width(self, latent_size: usize) -> usize {
        match self {
            ReparamKind::Continuous => 2 * latent_size,
            ReparamKind::Discrete => latent_size,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReparamKind::Continuous => "continuous",
            ReparamKind::Discrete => "discrete",
        }
    }

    /// Builds the matching reparameteriser. `hard` only affects the discrete
    /// variant.
    pub fn build(self, hard: bool, seed: Option<u64>) -> Box<dyn Reparameterizer> {
        match self {
            ReparamKind::Continuous => Box::new(GaussianReparameterizer::new(seed)),
            ReparamKind::Discrete => Box::new(GumbelReparameterizer::new(hard, seed)),
        }
    }
}

/// Forward values each reparameterisation keeps for its backward pass.
#[derive(Clone, Debug)]
pub enum ReparamCache {
    Gaussian {
        log_variance: Tensor,
        mean: Tensor,
        noise: Tensor,
    },
    Gumbel {
        /// `softmax(logits)`
        q: Tensor,
        /// Relaxed sample before any hard rounding.
        soft: Tensor,
        tau: f32,
    },
}

/// Output of a forward pass.
#[derive(Clone, Debug)]
pub struct Reparameterized {
    pub z: Tensor,
    /// One divergence per example.
    pub kl: Vec<f32>,
    pub cache: ReparamCache,
}

/// Maps raw encoder output to `(z, kl)` and back-propagates through it.
pub trait Reparameterizer {
    fn kind(&self) -> ReparamKind;

    /// Samples a latent code. `temperature` is ignored by the Gaussian
    /// variant. `noise` replaces the internally drawn noise: standard normal
    /// for the Gaussian, uniform in `(0, 1)` for Gumbel-Softmax.
    fn forward(
        &mut self,
        encoded: &Tensor,
        temperature: f32,
        noise: Option<&Tensor>,
    ) -> Result<Reparameterized>;

    /// Gradient with respect to the encoder output, given the upstream
    /// gradient of `z` and a per-example weight on `kl`.
    fn backward(&self, cache: &ReparamCache, grad_z: &Tensor, grad_kl: &[f32]) -> Result<Tensor>;
}

fn check_noise(noise: &Tensor, rows: usize, cols: usize) -> Result<()> {
    if noise.shape() != (rows, cols) {
        return Err(VaeError::ShapeMismatch {
            what: "reparameterization noise",
            expected: (rows, cols),
            got: noise.shape(),
        });
    }
    Ok(())
}

fn check_grad_kl(grad_kl: &[f32], rows: usize) -> Result<()> {
    if grad_kl.len() != rows {
        return Err(VaeError::ShapeMismatch {
            what: "kl gradient",
            expected: (rows, 1),
            got: (grad_kl.len(), 1),
        });
    }
    Ok(())
}

/// `z = mean + exp(log_variance / 2) * noise`, reading `[log_variance | mean]`.
#[derive(Debug)]
pub struct GaussianReparameterizer {
    rng: StdRng,
}

impl GaussianReparameterizer {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: determinism::rng_from_optional(seed, "st-vae/reparam/gaussian"),
        }
    }
}

impl Reparameterizer for GaussianReparameterizer {
    fn kind(&self) -> ReparamKind {
        ReparamKind::Continuous
    }

    fn forward(
        &mut self,
        encoded: &Tensor,
        _temperature: f32,
        noise: Option<&Tensor>,
    ) -> Result<Reparameterized> {
        let width = encoded.cols();
        if width % 2 != 0 {
            return Err(VaeError::OddLatentWidth { width });
        }
        let (rows, k) = (encoded.rows(), width / 2);
        let log_variance = encoded.slice_cols(0, k)?;
        let mean = encoded.slice_cols(k, width)?;
        let noise = match noise {
            Some(noise) => {
                check_noise(noise, rows, k)?;
                noise.clone()
            }
            None => {
                let rng = &mut self.rng;
                Tensor::from_fn(rows, k, |_, _| rng.sample::<f32, _>(StandardNormal))?
            }
        };

        let std = log_variance.map(|lv| (0.5 * lv).exp());
        let z = mean.add(&std.hadamard(&noise)?)?;
        let kl = log_variance
            .data()
            .chunks(k)
            .zip(mean.data().chunks(k))
            .map(|(lv_row, mu_row)| {
                let inner: f32 = lv_row
                    .iter()
                    .zip(mu_row)
                    .map(|(&lv, &mu)| 1.0 + lv - mu * mu - lv.exp())
                    .sum();
                -0.5 * inner
            })
            .collect();
        Ok(Reparameterized {
            z,
            kl,
            cache: ReparamCache::Gaussian {
                log_variance,
                mean,
                noise,
            },
        })
    }

    fn backward(&self, cache: &ReparamCache, grad_z: &Tensor, grad_kl: &[f32]) -> Result<Tensor> {
        let ReparamCache::Gaussian {
            log_variance,
            mean,
            noise,
        } = cache
        else {
            return Err(VaeError::InvalidConfig(
                "gaussian backward received a gumbel cache".into(),
            ));
        };
        let (rows, k) = mean.shape();
        if grad_z.shape() != (rows, k) {
            return Err(VaeError::ShapeMismatch {
                what: "latent gradient",
                expected: (rows, k),
                got: grad_z.shape(),
            });
        }
        check_grad_kl(grad_kl, rows)?;

        let mut d_log_variance = Vec::with_capacity(rows * k);
        let mut d_mean = Vec::with_capacity(rows * k);
        for r in 0..rows {
            let w = grad_kl[r];
            let lv = log_variance.row(r)?;
            let mu = mean.row(r)?;
            let eps = noise.row(r)?;
            let g = grad_z.row(r)?;
            for j in 0..k {
                let half = 0.5 * lv[j];
                d_log_variance.push(g[j] * 0.5 * half.exp() * eps[j] + w * 0.5 * (lv[j].exp() - 1.0));
                d_mean.push(g[j] + w * mu[j]);
            }
        }
        let d_log_variance = Tensor::from_vec(rows, k, d_log_variance)?;
        let d_mean = Tensor::from_vec(rows, k, d_mean)?;
        Ok(d_log_variance.concat_cols(&d_mean)?)
    }
}

/// Gumbel-Softmax sampler over `latent_size` categories with a uniform prior.
#[derive(Debug)]
pub struct GumbelReparameterizer {
    hard: bool,
    rng: StdRng,
}

impl GumbelReparameterizer {
    pub fn new(hard: bool, seed: Option<u64>) -> Self {
        Self {
            hard,
            rng: determinism::rng_from_optional(seed, "st-vae/reparam/gumbel"),
        }
    }
}

/// `-ln(-ln(u + eps) + eps)`
fn gumbel(u: f32) -> f32 {
    -(-(u + GUMBEL_EPS).ln() + GUMBEL_EPS).ln()
}

/// Softmax backward: `s * (g - sum(g * s))` row by row.
fn softmax_backward(softmax: &Tensor, grad: &Tensor) -> Result<Tensor> {
    let cols = softmax.cols();
    let mut out = Vec::with_capacity(softmax.len());
    for (s_row, g_row) in softmax.data().chunks(cols).zip(grad.data().chunks(cols)) {
        let dot: f32 = s_row.iter().zip(g_row).map(|(s, g)| s * g).sum();
        out.extend(s_row.iter().zip(g_row).map(|(s, g)| s * (g - dot)));
    }
    Ok(Tensor::from_vec(softmax.rows(), cols, out)?)
}

impl Reparameterizer for GumbelReparameterizer {
    fn kind(&self) -> ReparamKind {
        ReparamKind::Discrete
    }

    fn forward(
        &mut self,
        logits: &Tensor,
        temperature: f32,
        noise: Option<&Tensor>,
    ) -> Result<Reparameterized> {
        if !(temperature > 0.0) || !temperature.is_finite() {
            return Err(VaeError::NonPositiveTemperature { tau: temperature });
        }
        let (rows, latent) = logits.shape();
        let uniform = match noise {
            Some(noise) => {
                check_noise(noise, rows, latent)?;
                noise.clone()
            }
            None => {
                let rng = &mut self.rng;
                Tensor::from_fn(rows, latent, |_, _| rng.gen::<f32>())?
            }
        };

        let q = logits.row_softmax()?;
        let perturbed = logits.zip_map(&uniform, |l, u| (l + gumbel(u)) / temperature)?;
        let soft = perturbed.row_softmax()?;
        let z = if self.hard {
            soft.row_hardmax()?
        } else {
            soft.clone()
        };

        let log_prior = (1.0 / latent as f32 + KL_EPS).ln();
        let kl = q
            .data()
            .chunks(latent)
            .map(|row| {
                row.iter()
                    .map(|&p| p * ((p + KL_EPS).ln() - log_prior))
                    .sum()
            })
            .collect();
        Ok(Reparameterized {
            z,
            kl,
            cache: ReparamCache::Gumbel {
                q,
                soft,
                tau: temperature,
            },
        })
    }

    fn backward(&self, cache: &ReparamCache, grad_z: &Tensor, grad_kl: &[f32]) -> Result<Tensor> {
        let ReparamCache::Gumbel { q, soft, tau } = cache else {
            return Err(VaeError::InvalidConfig(
                "gumbel backward received a gaussian cache".into(),
            ));
        };
        let (rows, latent) = q.shape();
        if grad_z.shape() != (rows, latent) {
            return Err(VaeError::ShapeMismatch {
                what: "latent gradient",
                expected: (rows, latent),
                got: grad_z.shape(),
            });
        }
        check_grad_kl(grad_kl, rows)?;

        // Hard samples pass the gradient straight through to the soft sample.
        let sample_grad = softmax_backward(soft, grad_z)?.scale(1.0 / tau);

        let log_prior = (1.0 / latent as f32 + KL_EPS).ln();
        let d_q = Tensor::from_fn(rows, latent, |r, j| {
            let p = q.data()[r * latent + j];
            grad_kl[r] * ((p + KL_EPS).ln() - log_prior + p / (p + KL_EPS))
        })?;
        let kl_grad = softmax_backward(q, &d_q)?;
        Ok(sample_grad.add(&kl_grad)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn gaussian_with_zero_noise_returns_the_mean() {
        let mut reparam = GaussianReparameterizer::new(Some(1));
        let encoded = Tensor::from_vec(2, 4, vec![0.3, -1.0, 0.5, 2.0, 1.2, 0.1, -0.7, 0.0])
            .unwrap();
        let noise = Tensor::zeros(2, 2).unwrap();
        let out = reparam.forward(&encoded, 1.0, Some(&noise)).unwrap();
        assert_eq!(out.z.data(), &[0.5, 2.0, -0.7, 0.0]);
    }

    #[test]
    fn gaussian_kl_vanishes_at_the_prior() {
        let mut reparam = GaussianReparameterizer::new(Some(2));
        let out = reparam
            .forward(&Tensor::zeros(3, 6).unwrap(), 1.0, None)
            .unwrap();
        assert_eq!(out.kl, vec![0.0; 3]);
        let shifted = Tensor::from_vec(1, 2, vec![0.0, 1.0]).unwrap();
        let out = reparam.forward(&shifted, 1.0, None).unwrap();
        assert!(close(out.kl[0], 0.5, 1e-6));
    }

    #[test]
    fn gaussian_rejects_odd_widths_and_bad_noise() {
        let mut reparam = GaussianReparameterizer::new(Some(3));
        assert!(matches!(
            reparam.forward(&Tensor::zeros(2, 3).unwrap(), 1.0, None),
            Err(VaeError::OddLatentWidth { width: 3 })
        ));
        let noise = Tensor::zeros(2, 3).unwrap();
        assert!(matches!(
            reparam.forward(&Tensor::zeros(2, 4).unwrap(), 1.0, Some(&noise)),
            Err(VaeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn categorical_kl_vanishes_for_uniform_logits() {
        let mut reparam = GumbelReparameterizer::new(false, Some(4));
        let logits = Tensor::from_vec(2, 5, vec![0.7; 10]).unwrap();
        let out = reparam.forward(&logits, 0.8, None).unwrap();
        for kl in out.kl {
            assert!(kl.abs() < 1e-6, "kl = {kl}");
        }
    }

    #[test]
    fn hard_samples_are_one_hot() {
        let mut reparam = GumbelReparameterizer::new(true, Some(5));
        for (seed, tau) in [(10u64, 0.5f32), (11, 1.0), (12, 3.0), (13, 0.1)] {
            let logits = Tensor::random_normal(4, 6, 0.0, 2.0, Some(seed)).unwrap();
            let out = reparam.forward(&logits, tau, None).unwrap();
            for row in out.z.data().chunks(6) {
                assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
                assert_eq!(row.iter().filter(|&&v| v == 0.0).count(), 5);
            }
        }
    }

    #[test]
    fn soft_samples_are_distributions() {
        let mut reparam = GumbelReparameterizer::new(false, Some(6));
        let logits = Tensor::random_normal(3, 4, 0.0, 1.0, Some(7)).unwrap();
        let out = reparam.forward(&logits, 0.7, None).unwrap();
        for row in out.z.data().chunks(4) {
            assert!(close(row.iter().sum::<f32>(), 1.0, 1e-5));
            assert!(row.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn temperature_must_be_positive() {
        let mut reparam = GumbelReparameterizer::new(false, Some(8));
        let logits = Tensor::zeros(1, 3).unwrap();
        for tau in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                reparam.forward(&logits, tau, None),
                Err(VaeError::NonPositiveTemperature { .. })
            ));
        }
    }

    /// Checks `backward` against central differences of
    /// `sum(w * z) + sum(c * kl)` with the noise held fixed.
    fn gradient_check(
        reparam: &mut dyn Reparameterizer,
        encoded: &Tensor,
        noise: &Tensor,
        tau: f32,
    ) {
        let out = reparam.forward(encoded, tau, Some(noise)).unwrap();
        let (rows, cols) = out.z.shape();
        let w = Tensor::from_fn(rows, cols, |r, c| 0.3 + 0.2 * r as f32 - 0.15 * c as f32)
            .unwrap();
        let c: Vec<f32> = (0..rows).map(|r| 0.5 + 0.25 * r as f32).collect();
        let analytic = reparam.backward(&out.cache, &w, &c).unwrap();

        let mut objective = |input: &Tensor| -> f32 {
            let out = reparam.forward(input, tau, Some(noise)).unwrap();
            let linear: f32 = out.z.data().iter().zip(w.data()).map(|(a, b)| a * b).sum();
            let kl: f32 = out.kl.iter().zip(&c).map(|(a, b)| a * b).sum();
            linear + kl
        };
        let h = 1e-2f32;
        for index in 0..encoded.len() {
            let mut plus = encoded.clone();
            plus.data_mut()[index] += h;
            let mut minus = encoded.clone();
            minus.data_mut()[index] -= h;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * h);
            let got = analytic.data()[index];
            assert!(
                close(numeric, got, 2e-2),
                "index {index}: numeric {numeric} vs analytic {got}"
            );
        }
    }

    #[test]
    fn gaussian_backward_matches_finite_differences() {
        let mut reparam = GaussianReparameterizer::new(Some(9));
        let encoded = Tensor::from_vec(
            2,
            6,
            vec![-0.4, 0.2, 0.1, 0.5, -0.3, 0.8, 0.3, -0.6, 0.0, -0.2, 0.9, 0.1],
        )
        .unwrap();
        let noise = Tensor::from_vec(2, 3, vec![0.5, -1.2, 0.3, 1.1, 0.0, -0.4]).unwrap();
        gradient_check(&mut reparam, &encoded, &noise, 1.0);
    }

    #[test]
    fn gumbel_backward_matches_finite_differences() {
        let mut reparam = GumbelReparameterizer::new(false, Some(10));
        let logits =
            Tensor::from_vec(2, 4, vec![0.2, -0.5, 1.0, 0.1, -0.3, 0.4, 0.0, 0.6]).unwrap();
        let noise =
            Tensor::from_vec(2, 4, vec![0.3, 0.7, 0.5, 0.9, 0.2, 0.4, 0.8, 0.6]).unwrap();
        gradient_check(&mut reparam, &logits, &noise, 0.9);
    }

    #[test]
    fn backward_rejects_a_foreign_cache() {
        let mut gaussian = GaussianReparameterizer::new(Some(11));
        let gumbel = GumbelReparameterizer::new(false, Some(12));
        let out = gaussian
            .forward(&Tensor::zeros(1, 2).unwrap(), 1.0, None)
            .unwrap();
        assert!(gumbel
            .backward(&out.cache, &Tensor::zeros(1, 1).unwrap(), &[1.0])
            .is_err());
    }

    #[test]
    fn kinds_report_encoder_widths() {
        assert_eq!(ReparamKind::Continuous.encoded_width(10), 20);
        assert_eq!(ReparamKind::Discrete.encoded_width(10), 10);
        assert_eq!(ReparamKind::Discrete.build(true, Some(1)).kind(), ReparamKind::Discrete);
    }
}
