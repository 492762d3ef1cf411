// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{ensure_matching, Loss};
use crate::layers::sigmoid;
use crate::{PureResult, Tensor};

/// Binary cross-entropy between raw logits `x` and targets `z` in `[0, 1]`,
/// evaluated in the fused form `max(x, 0) - x z + ln(1 + exp(-|x|))`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCrossEntropyWithLogits;

impl BinaryCrossEntropyWithLogits {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn term(x: f32, z: f32) -> f32 {
        x.max(0.0) - x * z + (-x.abs()).exp().ln_1p()
    }
}

impl Loss for BinaryCrossEntropyWithLogits {
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        ensure_matching(prediction, target)?;
        let inv_batch = 1.0 / prediction.rows() as f32;
        prediction.zip_map(target, |x, z| (sigmoid(x) - z) * inv_batch)
    }

    fn per_example(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Vec<f32>> {
        ensure_matching(prediction, target)?;
        let cols = prediction.cols();
        Ok(prediction
            .data()
            .chunks(cols)
            .zip(target.data().chunks(cols))
            .map(|(x_row, z_row)| {
                x_row
                    .iter()
                    .zip(z_row)
                    .map(|(&x, &z)| Self::term(x, z))
                    .sum()
            })
            .collect())
    }
}
