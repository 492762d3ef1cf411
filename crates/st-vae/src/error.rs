// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_mnist::DatasetError;
use st_tensor::TensorError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, training or persisting a VAE.
///
/// Configuration variants are fatal. Nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum VaeError {
    #[error("gaussian reparameterization needs an even encoder width, got {width}")]
    OddLatentWidth { width: usize },
    #[error("gumbel-softmax temperature must be positive and finite, got {tau}")]
    NonPositiveTemperature { tau: f32 },
    #[error("invalid VAE configuration: {0}")]
    InvalidConfig(String),
    #[error("{what}: expected shape {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("{label} is not finite ({value})")]
    NumericalInstability { label: &'static str, value: f32 },
    #[error(transparent)]
    Engine(#[from] TensorError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("failed to create {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to save checkpoint {path:?}: {source}")]
    CheckpointSave {
        path: PathBuf,
        #[source]
        source: TensorError,
    },
    #[error("failed to restore checkpoint {path:?}: {source}")]
    CheckpointRestore {
        path: PathBuf,
        #[source]
        source: TensorError,
    },
}

pub type Result<T> = std::result::Result<T, VaeError>;

/// Fails with [`VaeError::NumericalInstability`] unless `value` is finite.
pub(crate) fn ensure_finite(label: &'static str, value: f32) -> Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(VaeError::NumericalInstability { label, value })
    }
}
