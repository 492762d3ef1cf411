// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::config::VaeConfig;
use crate::context::TrainingContext;
use crate::error::{ensure_finite, Result, VaeError};
use crate::identity::model_identity;
use crate::loss::{LossComposer, LossReport};
use crate::network::Network;
use crate::reparam::{ReparamKind, Reparameterizer};
use crate::schedule::TemperatureSchedule;
use rand::rngs::StdRng;
use rand::Rng;
use spiral_config::determinism;
use st_mnist::DatasetProvider;
use st_nn::{load_state_dict, save_state_dict, sigmoid, Adam, AdamConfig, Module};
use st_tensor::{Tensor, TensorError};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, info_span, warn};

/// Batch means reported by one successful optimisation step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepMetrics {
    pub cost: f32,
    pub reconstruction: f32,
    pub divergence: f32,
    pub grad_norm: f32,
    /// Temperature the step ran with.
    pub temperature: f32,
    /// Model iteration after the step.
    pub iteration: u64,
}

/// Output of [`VanillaVae::reconstruct`].
#[derive(Clone, Debug)]
pub struct Reconstruction {
    /// Sigmoid-activated decoder output.
    pub images: Tensor,
    pub losses: Option<LossReport>,
}

/// Knobs for [`VanillaVae::train`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainOptions {
    pub epochs: usize,
    /// Log every `display_step` epochs.
    pub display_step: usize,
    /// Save a checkpoint every `n` epochs.
    pub checkpoint_every: Option<usize>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            display_step: 5,
            checkpoint_every: None,
        }
    }
}

/// Summary of one training epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochStats {
    /// One-based epoch number.
    pub epoch: usize,
    pub avg_cost: f32,
    pub last: StepMetrics,
}

struct Forward {
    encoded: Tensor,
    sample: crate::reparam::Reparameterized,
    output: Tensor,
}

/// Variational autoencoder with a Gaussian or Gumbel-Softmax latent.
///
/// The model owns its encoder, decoder, reparameteriser and optimiser. Its
/// iteration counter only advances on successful steps.
pub struct VanillaVae {
    config: VaeConfig,
    identity: String,
    encoder: Network,
    decoder: Network,
    reparam: Box<dyn Reparameterizer>,
    losses: LossComposer,
    optimizer: Adam,
    schedule: TemperatureSchedule,
    iteration: u64,
    context: TrainingContext,
    rng: StdRng,
}

impl core::fmt::Debug for VanillaVae {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "VanillaVae(identity={}, iteration={}, temperature={})",
            self.identity,
            self.iteration,
            self.schedule.current()
        )
    }
}

fn component_seed(seed: Option<u64>, component: &str) -> Option<u64> {
    seed.map(|s| determinism::derive_seed(s, component))
}

impl VanillaVae {
    /// Builds a model around caller-supplied networks. The encoder must emit
    /// `config.reparam.encoded_width(config.latent_size)` columns and the
    /// decoder must map `latent_size` back to `input_size`.
    pub fn new(
        config: VaeConfig,
        mut encoder: Network,
        mut decoder: Network,
        context: TrainingContext,
    ) -> Result<Self> {
        config.validate()?;
        let identity = model_identity(
            config.activation.name(),
            encoder.sizing(),
            decoder.sizing(),
            config.learning_rate,
            config.latent_size,
        );
        for dir in ["models", "imgs", "logs"] {
            let path = config.base_dir.join(dir);
            std::fs::create_dir_all(&path).map_err(|source| VaeError::Io { path, source })?;
        }
        encoder.prefix_parameters(&format!("{identity}/encoder"))?;
        decoder.prefix_parameters(&format!("{identity}/generator"))?;

        let reparam = config
            .reparam
            .build(config.hard_gumbel, component_seed(config.seed, "reparam"));
        let optimizer = Adam::new(AdamConfig::with_learning_rate(config.learning_rate))?;
        let schedule = TemperatureSchedule::new(config.temperature)?;
        let rng = determinism::rng_from_optional(
            component_seed(config.seed, "generate"),
            "st-vae/model/generate",
        );
        info!(
            model = %identity,
            reparam = config.reparam.name(),
            loss = config.reconstruction_loss.name(),
            "built VAE"
        );
        Ok(Self {
            losses: LossComposer::new(config.reconstruction_loss),
            config,
            identity,
            encoder,
            decoder,
            reparam,
            optimizer,
            schedule,
            iteration: 0,
            context,
            rng,
        })
    }

    /// Builds a model with dense encoder and decoder stacks sized from
    /// `config.encoder` and `config.decoder`.
    pub fn dense(config: VaeConfig, context: TrainingContext) -> Result<Self> {
        config.validate()?;
        let encoder = Network::dense(
            config.input_size,
            &config.encoder,
            config.reparam.encoded_width(config.latent_size),
            config.activation,
            component_seed(config.seed, "encoder"),
        )?;
        let decoder = Network::dense(
            config.latent_size,
            &config.decoder,
            config.input_size,
            config.activation,
            component_seed(config.seed, "decoder"),
        )?;
        Self::new(config, encoder, decoder, context)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn config(&self) -> &VaeConfig {
        &self.config
    }

    pub fn context(&self) -> &TrainingContext {
        &self.context
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn temperature(&self) -> f32 {
        self.schedule.current()
    }

    pub fn reparam_kind(&self) -> ReparamKind {
        self.reparam.kind()
    }

    /// `<base_dir>/models/<identity>.<ext>`
    pub fn checkpoint_path(&self) -> PathBuf {
        self.config.base_dir.join("models").join(format!(
            "{}.{}",
            self.identity,
            self.config.checkpoint_format.extension()
        ))
    }

    /// Every encoder and decoder parameter keyed by its prefixed name.
    pub fn state_dict(&self) -> Result<HashMap<String, Tensor>> {
        let mut state = self.encoder.state_dict()?;
        state.extend(self.decoder.state_dict()?);
        Ok(state)
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        if x.cols() != self.config.input_size {
            return Err(VaeError::ShapeMismatch {
                what: "input batch",
                expected: (x.rows(), self.config.input_size),
                got: x.shape(),
            });
        }
        Ok(())
    }

    fn run_forward(&mut self, x: &Tensor, temperature: f32) -> Result<Forward> {
        self.check_input(x)?;
        let encoded = self.encoder.forward(x)?;
        let sample = self.reparam.forward(&encoded, temperature, None)?;
        let output = self.decoder.forward(&sample.z)?;
        Ok(Forward {
            encoded,
            sample,
            output,
        })
    }

    /// One optimisation step on `batch`.
    ///
    /// On any error the accumulated gradients are dropped, parameters are
    /// untouched and neither the iteration counter nor the temperature move.
    pub fn fit_step(&mut self, batch: &Tensor) -> Result<StepMetrics> {
        let annealed = match self.reparam.kind() {
            ReparamKind::Discrete => self.schedule.due(self.iteration),
            ReparamKind::Continuous => None,
        };
        let temperature = annealed.unwrap_or_else(|| self.schedule.current());
        match self.try_step(batch, temperature) {
            Ok(mut metrics) => {
                if annealed.is_some() {
                    if let Some(tau) = self.schedule.update(self.iteration) {
                        debug!(iteration = self.iteration, tau, "updated temperature");
                    }
                }
                self.iteration += 1;
                self.context.advance();
                metrics.iteration = self.iteration;
                Ok(metrics)
            }
            Err(err) => {
                self.encoder.zero_accumulators()?;
                self.decoder.zero_accumulators()?;
                warn!(iteration = self.iteration, error = %err, "training step failed");
                Err(err)
            }
        }
    }

    fn try_step(&mut self, batch: &Tensor, temperature: f32) -> Result<StepMetrics> {
        let Forward {
            encoded,
            sample,
            output,
        } = self.run_forward(batch, temperature)?;
        let report = self.losses.evaluate(&output, batch, &sample.kl)?;
        ensure_finite("reconstruction loss", report.reconstruction_mean)?;
        ensure_finite("divergence", report.divergence_mean)?;
        let cost = ensure_finite("cost", report.cost_mean)?;

        let grad_output = self.losses.reconstruction_gradient(&output, batch)?;
        let grad_z = self.decoder.backward(&sample.z, &grad_output)?;
        let grad_kl = LossComposer::divergence_gradient(batch.rows());
        let grad_encoded = self.reparam.backward(&sample.cache, &grad_z, &grad_kl)?;
        debug_assert_eq!(grad_encoded.shape(), encoded.shape());
        self.encoder.backward(batch, &grad_encoded)?;

        let norm_sq = self.encoder.gradient_norm_sq()? + self.decoder.gradient_norm_sq()?;
        let grad_norm = ensure_finite("gradient norm", norm_sq.sqrt() as f32)?;
        let mut modules: [&mut dyn Module; 2] = [&mut self.encoder, &mut self.decoder];
        self.optimizer.step(&mut modules)?;

        Ok(StepMetrics {
            cost,
            reconstruction: report.reconstruction_mean,
            divergence: report.divergence_mean,
            grad_norm,
            temperature,
            iteration: self.iteration,
        })
    }

    /// Maps `x` into the latent space with the current temperature.
    pub fn transform(&mut self, x: &Tensor) -> Result<Tensor> {
        let temperature = self.schedule.current();
        Ok(self.run_forward(x, temperature)?.sample.z)
    }

    /// Decodes `z`, or a batch of random one-hot codes when `z` is `None`,
    /// and applies the sigmoid.
    pub fn generate(&mut self, z: Option<&Tensor>) -> Result<Tensor> {
        let latent = self.config.latent_size;
        let z = match z {
            Some(z) => {
                if z.cols() != latent {
                    return Err(VaeError::ShapeMismatch {
                        what: "latent code",
                        expected: (z.rows(), latent),
                        got: z.shape(),
                    });
                }
                z.clone()
            }
            None => {
                let rows = self.config.batch_size;
                let hot: Vec<usize> = (0..rows).map(|_| self.rng.gen_range(0..latent)).collect();
                Tensor::from_fn(rows, latent, |r, c| if hot[r] == c { 1.0 } else { 0.0 })?
            }
        };
        Ok(self.decoder.forward(&z)?.map(sigmoid))
    }

    /// Full encode/decode pass without any parameter update.
    pub fn reconstruct(&mut self, x: &Tensor, return_losses: bool) -> Result<Reconstruction> {
        let temperature = self.schedule.current();
        let forward = self.run_forward(x, temperature)?;
        let losses = if return_losses {
            Some(self.losses.evaluate(&forward.output, x, &forward.sample.kl)?)
        } else {
            None
        };
        Ok(Reconstruction {
            images: forward.output.map(sigmoid),
            losses,
        })
    }

    /// Runs `options.epochs` epochs of `floor(num_examples / batch_size)`
    /// steps each. The first failing step aborts training.
    pub fn train<P>(&mut self, provider: &mut P, options: &TrainOptions) -> Result<Vec<EpochStats>>
    where
        P: DatasetProvider + ?Sized,
    {
        if options.display_step == 0 {
            return Err(VaeError::InvalidConfig("display_step must be positive".into()));
        }
        if options.checkpoint_every == Some(0) {
            return Err(VaeError::InvalidConfig(
                "checkpoint_every must be positive".into(),
            ));
        }
        let batch_size = self.config.batch_size;
        let n_samples = provider.num_examples();
        let total_batch = n_samples / batch_size;
        if total_batch == 0 {
            return Err(VaeError::InvalidConfig(format!(
                "{n_samples} examples cannot fill a batch of {batch_size}"
            )));
        }

        let mut history = Vec::with_capacity(options.epochs);
        for epoch in 0..options.epochs {
            let _span = info_span!("epoch", epoch = epoch + 1).entered();
            let mut avg_cost = 0.0f32;
            let mut last = None;
            for _ in 0..total_batch {
                let (batch, _) = provider.next_batch(batch_size)?;
                let metrics = self.fit_step(&batch)?;
                avg_cost += metrics.cost / n_samples as f32 * batch_size as f32;
                last = Some(metrics);
            }
            let Some(last) = last else { continue };
            if epoch % options.display_step == 0 {
                info!(
                    "[Epoch: {:04}] current cost = {:.4} | avg cost = {:.4} | latent cost = {:.4} | recon cost = {:.4}",
                    epoch + 1,
                    last.cost,
                    avg_cost,
                    last.divergence,
                    last.reconstruction
                );
            }
            if let Some(every) = options.checkpoint_every {
                if (epoch + 1) % every == 0 {
                    self.save()?;
                }
            }
            history.push(EpochStats {
                epoch: epoch + 1,
                avg_cost,
                last,
            });
        }
        Ok(history)
    }

    /// Writes every parameter to [`VanillaVae::checkpoint_path`].
    pub fn save(&self) -> Result<PathBuf> {
        let path = self.checkpoint_path();
        info!(path = %path.display(), "saving VAE");
        let state = self.state_dict()?;
        save_state_dict(&state, &path, self.config.checkpoint_format).map_err(|source| {
            VaeError::CheckpointSave {
                path: path.clone(),
                source,
            }
        })?;
        Ok(path)
    }

    /// Loads the checkpoint if one exists. Returns whether it did.
    pub fn restore(&mut self) -> Result<bool> {
        let path = self.checkpoint_path();
        if !path.is_file() {
            debug!(path = %path.display(), "no checkpoint to restore");
            return Ok(false);
        }
        info!(path = %path.display(), "restoring VAE");
        let restore_err = |source: TensorError| VaeError::CheckpointRestore {
            path: path.clone(),
            source,
        };
        let state = load_state_dict(&path, self.config.checkpoint_format).map_err(restore_err)?;
        self.encoder.load_state_dict(&state).map_err(restore_err)?;
        self.decoder.load_state_dict(&state).map_err(restore_err)?;
        Ok(true)
    }
}
