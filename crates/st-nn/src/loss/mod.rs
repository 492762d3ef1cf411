// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

mod binary_cross_entropy;
mod squared_error;

use crate::{PureResult, Tensor, TensorError};

pub use binary_cross_entropy::BinaryCrossEntropyWithLogits;
pub use squared_error::SquaredError;

/// Trait implemented by differentiable losses that operate directly on
/// SpiralTorch tensors.
///
/// Element-wise terms are summed across each row, giving one value per
/// example; `forward` reports the batch mean of those sums and `backward` is
/// the gradient of that mean.
pub trait Loss {
    /// Computes the batch-mean loss as a `(1, 1)` tensor.
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        let per_example = self.per_example(prediction, target)?;
        let mean = per_example.iter().sum::<f32>() / per_example.len() as f32;
        Tensor::from_vec(1, 1, vec![mean])
    }

    /// Returns the gradient of the batch-mean loss with respect to the predictions.
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;

    /// Returns the row-summed loss of every example in the batch.
    fn per_example(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Vec<f32>>;
}

fn ensure_matching(prediction: &Tensor, target: &Tensor) -> PureResult<()> {
    if prediction.shape() != target.shape() {
        return Err(TensorError::ShapeMismatch {
            left: prediction.shape(),
            right: target.shape(),
        });
    }
    Ok(())
}
