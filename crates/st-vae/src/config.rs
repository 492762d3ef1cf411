// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{Result, VaeError};
use crate::loss::ReconstructionLossKind;
use crate::reparam::ReparamKind;
use crate::schedule::TemperatureConfig;
use serde::{Deserialize, Serialize};
use st_nn::{Activation, StateDictFormat};
use std::path::PathBuf;

/// Everything a [`crate::VanillaVae`] needs at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct VaeConfig {
    pub reparam: ReparamKind,
    pub reconstruction_loss: ReconstructionLossKind,
    /// Width of one flattened input row.
    pub input_size: usize,
    pub latent_size: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub activation: Activation,
    /// Hidden layer sizes of the encoder.
    pub encoder: Vec<usize>,
    /// Hidden layer sizes of the decoder.
    pub decoder: Vec<usize>,
    /// Root for `models/`, `imgs/` and `logs/`.
    pub base_dir: PathBuf,
    /// Straight-through one-hot samples in discrete mode.
    pub hard_gumbel: bool,
    pub temperature: TemperatureConfig,
    pub seed: Option<u64>,
    pub checkpoint_format: StateDictFormat,
}

impl Default for VaeConfig {
    fn default() -> Self {
        Self {
            reparam: ReparamKind::Continuous,
            reconstruction_loss: ReconstructionLossKind::BinaryCrossEntropy,
            input_size: 784,
            latent_size: 20,
            batch_size: 100,
            learning_rate: 1e-3,
            activation: Activation::Elu,
            encoder: vec![512, 512],
            decoder: vec![512, 512],
            base_dir: PathBuf::from("."),
            hard_gumbel: false,
            temperature: TemperatureConfig::default(),
            seed: None,
            checkpoint_format: StateDictFormat::Bincode,
        }
    }
}

impl VaeConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("input_size", self.input_size),
            ("latent_size", self.latent_size),
            ("batch_size", self.batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(VaeError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if !(self.learning_rate > 0.0) || !self.learning_rate.is_finite() {
            return Err(VaeError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.encoder.contains(&0) || self.decoder.contains(&0) {
            return Err(VaeError::InvalidConfig(
                "hidden layers must have at least one unit".into(),
            ));
        }
        self.temperature.validate()
    }
}

/// Optional overrides read from the `vae` section of the layered config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaeSettings {
    pub reparam: Option<ReparamKind>,
    pub reconstruction_loss: Option<ReconstructionLossKind>,
    pub latent_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f32>,
    pub activation: Option<String>,
    pub encoder: Option<Vec<usize>>,
    pub decoder: Option<Vec<usize>>,
    pub base_dir: Option<PathBuf>,
    pub hard_gumbel: Option<bool>,
    pub temperature: Option<TemperatureConfig>,
    pub seed: Option<u64>,
    pub checkpoint_format: Option<StateDictFormat>,
    pub epochs: Option<usize>,
    pub display_step: Option<usize>,
}

impl VaeSettings {
    /// Writes every field that is set onto `config`.
    pub fn apply(&self, config: &mut VaeConfig) -> Result<()> {
        if let Some(reparam) = self.reparam {
            config.reparam = reparam;
        }
        if let Some(loss) = self.reconstruction_loss {
            config.reconstruction_loss = loss;
        }
        if let Some(latent_size) = self.latent_size {
            config.latent_size = latent_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(name) = &self.activation {
            config.activation = name
                .parse()
                .map_err(|err: st_nn::UnknownActivation| VaeError::InvalidConfig(err.to_string()))?;
        }
        if let Some(encoder) = &self.encoder {
            config.encoder = encoder.clone();
        }
        if let Some(decoder) = &self.decoder {
            config.decoder = decoder.clone();
        }
        if let Some(base_dir) = &self.base_dir {
            config.base_dir = base_dir.clone();
        }
        if let Some(hard) = self.hard_gumbel {
            config.hard_gumbel = hard;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(format) = self.checkpoint_format {
            config.checkpoint_format = format;
        }
        Ok(())
    }
}
