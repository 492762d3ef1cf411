// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Module;
use crate::PureResult;
use st_tensor::TensorError;
use std::collections::HashMap;

/// Adam hyperparameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

impl AdamConfig {
    pub fn with_learning_rate(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
struct MomentBuf {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl MomentBuf {
    fn zeros(n: usize) -> Self {
        MomentBuf {
            m: vec![0.0; n],
            v: vec![0.0; n],
        }
    }
}

/// Adam optimizer whose moment buffers are keyed by parameter name, so one
/// instance can drive several modules as long as their names do not collide.
#[derive(Clone, Debug)]
pub struct Adam {
    config: AdamConfig,
    moments: HashMap<String, MomentBuf>,
    step: u32,
}

impl Adam {
    pub fn new(config: AdamConfig) -> PureResult<Self> {
        if !(config.learning_rate > 0.0) || !config.learning_rate.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "adam_learning_rate",
            });
        }
        if !(0.0..1.0).contains(&config.beta1) || !(0.0..1.0).contains(&config.beta2) {
            return Err(TensorError::InvalidValue { label: "adam_beta" });
        }
        Ok(Self {
            config,
            moments: HashMap::new(),
            step: 0,
        })
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u32 {
        self.step
    }

    /// Applies one bias-corrected Adam update to every parameter of `modules`
    /// that carries a gradient, then clears those gradients.
    pub fn step(&mut self, modules: &mut [&mut dyn Module]) -> PureResult<()> {
        self.step += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            eps,
        } = self.config;
        let bc1_inv = 1.0 / (1.0 - beta1.powi(self.step as i32));
        let bc2_inv = 1.0 / (1.0 - beta2.powi(self.step as i32));
        let moments = &mut self.moments;

        for module in modules.iter_mut() {
            module.visit_parameters_mut(&mut |param| {
                let Some(grad) = param.gradient().cloned() else {
                    return Ok(());
                };
                let buf = moments
                    .entry(param.name().to_string())
                    .or_insert_with(|| MomentBuf::zeros(grad.len()));
                if buf.m.len() != grad.len() {
                    return Err(TensorError::DataLength {
                        expected: buf.m.len(),
                        got: grad.len(),
                    });
                }
                let values = param.value_mut().data_mut();
                for (i, &g) in grad.data().iter().enumerate() {
                    buf.m[i] = beta1 * buf.m[i] + (1.0 - beta1) * g;
                    buf.v[i] = beta2 * buf.v[i] + (1.0 - beta2) * g * g;
                    let m_hat = buf.m[i] * bc1_inv;
                    let v_hat = buf.v[i] * bc2_inv;
                    values[i] -= learning_rate * m_hat / (v_hat.sqrt() + eps);
                }
                param.zero_gradient();
                Ok(())
            })?;
        }
        Ok(())
    }
}
