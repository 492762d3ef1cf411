// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{Result, VaeError};
use serde::{Deserialize, Serialize};

/// Number of iterations between two temperature updates.
pub const ANNEAL_EVERY: u64 = 10;

/// Exponential Gumbel-Softmax temperature decay parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub tau0: f32,
    pub anneal_rate: f32,
    pub min_temp: f32,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            tau0: 1.0,
            anneal_rate: 3e-5,
            min_temp: 0.5,
        }
    }
}

impl TemperatureConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tau0 > 0.0) || !self.tau0.is_finite() {
            return Err(VaeError::InvalidConfig(format!(
                "tau0 must be positive, got {}",
                self.tau0
            )));
        }
        if !(self.min_temp > 0.0) || !self.min_temp.is_finite() {
            return Err(VaeError::InvalidConfig(format!(
                "min_temp must be positive, got {}",
                self.min_temp
            )));
        }
        if !(self.anneal_rate >= 0.0) || !self.anneal_rate.is_finite() {
            return Err(VaeError::InvalidConfig(format!(
                "anneal_rate must be non-negative, got {}",
                self.anneal_rate
            )));
        }
        Ok(())
    }

    /// `max(tau0 * exp(-anneal_rate * iteration), min_temp)`.
    pub fn temperature_at(&self, iteration: u64) -> f32 {
        let decayed = self.tau0 as f64 * (-(self.anneal_rate as f64) * iteration as f64).exp();
        (decayed as f32).max(self.min_temp)
    }
}

/// Host-side temperature, refreshed every [`ANNEAL_EVERY`] iterations.
#[derive(Clone, Debug)]
pub struct TemperatureSchedule {
    config: TemperatureConfig,
    current: f32,
}

impl TemperatureSchedule {
    pub fn new(config: TemperatureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            current: config.tau0,
        })
    }

    pub fn config(&self) -> &TemperatureConfig {
        &self.config
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// The temperature an update at `iteration` would install, if one is due.
    pub fn due(&self, iteration: u64) -> Option<f32> {
        if iteration == 0 || iteration % ANNEAL_EVERY != 0 {
            return None;
        }
        Some(self.config.temperature_at(iteration))
    }

    /// Recomputes the temperature when `iteration` is a positive multiple of
    /// [`ANNEAL_EVERY`]. Returns the new value when an update happened.
    pub fn update(&mut self, iteration: u64) -> Option<f32> {
        let tau = self.due(iteration)?;
        self.current = tau;
        Some(tau)
    }
}
