// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{ensure_matching, Loss};
use crate::{PureResult, Tensor};

/// Squared error `(z - x)^2` summed over every feature of an example.
#[derive(Debug, Default, Clone, Copy)]
pub struct SquaredError;

impl SquaredError {
    pub fn new() -> Self {
        Self
    }
}

impl Loss for SquaredError {
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        ensure_matching(prediction, target)?;
        let scale = 2.0 / prediction.rows() as f32;
        prediction.zip_map(target, |x, z| (x - z) * scale)
    }

    fn per_example(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Vec<f32>> {
        ensure_matching(prediction, target)?;
        Ok(target.sub(prediction)?.map(|d| d * d).sum_axis1())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squared_error_forward_backward() {
        let mut loss = SquaredError::new();
        let prediction = Tensor::from_vec(2, 2, vec![0.5, -0.5, 1.0, 0.0]).unwrap();
        let target = Tensor::from_vec(2, 2, vec![0.0, 0.0, 1.5, 1.0]).unwrap();
        let per = loss.per_example(&prediction, &target).unwrap();
        assert_eq!(per, vec![0.5, 1.25]);
        let value = loss.forward(&prediction, &target).unwrap();
        assert!((value.data()[0] - 0.875).abs() < 1e-6);

        let grad = loss.backward(&prediction, &target).unwrap();
        assert_eq!(grad.data(), &[0.5, -0.5, -0.5, -1.0]);
    }
}
