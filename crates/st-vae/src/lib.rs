// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Variational autoencoders on the SpiralTorch module stack.
//!
//! [`VanillaVae`] wires an encoder [`Network`], a [`Reparameterizer`]
//! (Gaussian or Gumbel-Softmax) and a decoder into one trainable model. The
//! ELBO is assembled by [`LossComposer`] and optimised with Adam.

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod loss;
pub mod model;
pub mod network;
pub mod reparam;
pub mod schedule;

pub use config::{VaeConfig, VaeSettings};
pub use context::TrainingContext;
pub use error::{Result, VaeError};
pub use identity::{format_sizing, model_identity};
pub use loss::{LossComposer, LossReport, ReconstructionLossKind};
pub use model::{EpochStats, Reconstruction, StepMetrics, TrainOptions, VanillaVae};
pub use network::Network;
pub use reparam::{
    GaussianReparameterizer, GumbelReparameterizer, ReparamCache, ReparamKind, Reparameterized,
    Reparameterizer,
};
pub use schedule::{TemperatureConfig, TemperatureSchedule, ANNEAL_EVERY};
