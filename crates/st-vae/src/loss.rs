// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{Result, VaeError};
use serde::{Deserialize, Serialize};
use st_nn::{BinaryCrossEntropyWithLogits, Loss, SquaredError};
use st_tensor::Tensor;

/// Reconstruction term of the ELBO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionLossKind {
    /// Sigmoid cross-entropy on decoder logits.
    #[default]
    BinaryCrossEntropy,
    /// `(target - output)^2` on the raw decoder output.
    SquaredError,
}

impl ReconstructionLossKind {
    pub fn name(self) -> &'static str {
        match self {
            ReconstructionLossKind::BinaryCrossEntropy => "binary_cross_entropy",
            ReconstructionLossKind::SquaredError => "squared_error",
        }
    }

    fn build(self) -> Box<dyn Loss> {
        match self {
            ReconstructionLossKind::BinaryCrossEntropy => {
                Box::new(BinaryCrossEntropyWithLogits::new())
            }
            ReconstructionLossKind::SquaredError => Box::new(SquaredError::new()),
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

fn min_max(values: &[f32]) -> (f32, f32) {
    values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Per-example losses of one batch plus their summaries.
#[derive(Clone, Debug, PartialEq)]
pub struct LossReport {
    pub reconstruction: Vec<f32>,
    pub divergence: Vec<f32>,
    /// `reconstruction + divergence`, per example.
    pub cost: Vec<f32>,
    pub reconstruction_mean: f32,
    pub divergence_mean: f32,
    pub cost_mean: f32,
    pub reconstruction_min: f32,
    pub reconstruction_max: f32,
    pub divergence_min: f32,
    pub divergence_max: f32,
}

impl LossReport {
    fn new(reconstruction: Vec<f32>, divergence: Vec<f32>) -> Self {
        let cost: Vec<f32> = reconstruction
            .iter()
            .zip(&divergence)
            .map(|(r, d)| r + d)
            .collect();
        let (reconstruction_min, reconstruction_max) = min_max(&reconstruction);
        let (divergence_min, divergence_max) = min_max(&divergence);
        Self {
            reconstruction_mean: mean(&reconstruction),
            divergence_mean: mean(&divergence),
            cost_mean: mean(&cost),
            reconstruction_min,
            reconstruction_max,
            divergence_min,
            divergence_max,
            reconstruction,
            divergence,
            cost,
        }
    }
}

/// Combines the reconstruction loss with the latent divergence.
pub struct LossComposer {
    kind: ReconstructionLossKind,
    loss: Box<dyn Loss>,
}

impl core::fmt::Debug for LossComposer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "LossComposer({})", self.kind.name())
    }
}

impl LossComposer {
    pub fn new(kind: ReconstructionLossKind) -> Self {
        Self {
            kind,
            loss: kind.build(),
        }
    }

    pub fn kind(&self) -> ReconstructionLossKind {
        self.kind
    }

    /// Scores decoder output against `target`; `divergence` holds one KL value
    /// per example.
    pub fn evaluate(
        &mut self,
        output: &Tensor,
        target: &Tensor,
        divergence: &[f32],
    ) -> Result<LossReport> {
        if divergence.len() != target.rows() {
            return Err(VaeError::ShapeMismatch {
                what: "divergence",
                expected: (target.rows(), 1),
                got: (divergence.len(), 1),
            });
        }
        let reconstruction = self.loss.per_example(output, target)?;
        Ok(LossReport::new(reconstruction, divergence.to_vec()))
    }

    /// Gradient of the batch-mean reconstruction loss with respect to `output`.
    pub fn reconstruction_gradient(&mut self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        Ok(self.loss.backward(output, target)?)
    }

    /// Weight of each example's divergence in the batch-mean cost.
    pub fn divergence_gradient(batch: usize) -> Vec<f32> {
        vec![1.0 / batch as f32; batch]
    }
}
