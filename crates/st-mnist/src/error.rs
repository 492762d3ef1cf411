// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use st_tensor::TensorError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced while loading, filtering or augmenting MNIST.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not a well-formed IDX archive.
    #[error("malformed IDX file {path:?}: {reason}")]
    InvalidIdx { path: PathBuf, reason: String },
    /// The rotation cache exists but cannot be decoded or does not fit the dataset.
    #[error("rotation cache {path:?} is unusable: {reason}")]
    Cache { path: PathBuf, reason: String },
    #[error("invalid dataset argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type Result<T> = std::result::Result<T, DatasetError>;

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}
