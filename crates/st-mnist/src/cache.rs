// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{DatasetError, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use st_tensor::Tensor;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredImages {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl StoredImages {
    fn from_tensor(tensor: &Tensor) -> Self {
        Self {
            rows: tensor.rows(),
            cols: tensor.cols(),
            data: tensor.data().to_vec(),
        }
    }

    fn into_tensor(self) -> st_tensor::PureResult<Tensor> {
        Tensor::from_vec(self.rows, self.cols, self.data)
    }
}

fn restore(stored: Option<StoredImages>) -> st_tensor::PureResult<Option<Tensor>> {
    stored.map(StoredImages::into_tensor).transpose()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredSets {
    train: Option<StoredImages>,
    validation: Option<StoredImages>,
    test: Option<StoredImages>,
}

/// Rotated train / validation / test images of one digit. `None` stands for
/// a split with no examples.
#[derive(Clone, Debug, PartialEq)]
pub struct RotatedSets {
    pub train: Option<Tensor>,
    pub validation: Option<Tensor>,
    pub test: Option<Tensor>,
}

/// Directory of rotated image sets, one file per `(digit, angle)`.
#[derive(Clone, Debug)]
pub struct RotationCache {
    base_dir: PathBuf,
}

impl RotationCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `mnist_num{digit}_angle{angle}.bin` under the base directory.
    pub fn path(&self, digit: u8, angle: i32) -> PathBuf {
        self.base_dir
            .join(format!("mnist_num{digit}_angle{angle}.bin"))
    }

    /// Loads a cached set, or `None` when nothing has been written yet.
    pub fn load(&self, digit: u8, angle: i32) -> Result<Option<RotatedSets>> {
        let path = self.path(digit, angle);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|err| DatasetError::io(&path, err))?;
        let stored: StoredSets = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_limit(bytes.len() as u64)
            .deserialize(&bytes)
            .map_err(|err| DatasetError::Cache {
                path: path.clone(),
                reason: err.to_string(),
            })?;
        Ok(Some(RotatedSets {
            train: restore(stored.train)?,
            validation: restore(stored.validation)?,
            test: restore(stored.test)?,
        }))
    }

    /// Writes a set unless a file for `(digit, angle)` already exists.
    pub fn store(&self, digit: u8, angle: i32, sets: &RotatedSets) -> Result<()> {
        let path = self.path(digit, angle);
        if path.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|err| DatasetError::io(&self.base_dir, err))?;
        let stored = StoredSets {
            train: sets.train.as_ref().map(StoredImages::from_tensor),
            validation: sets.validation.as_ref().map(StoredImages::from_tensor),
            test: sets.test.as_ref().map(StoredImages::from_tensor),
        };
        let file = File::create(&path).map_err(|err| DatasetError::io(&path, err))?;
        bincode::serialize_into(BufWriter::new(file), &stored).map_err(|err| {
            DatasetError::Cache {
                path: path.clone(),
                reason: err.to_string(),
            }
        })?;
        info!(path = %path.display(), "serialized rotated digit to disk");
        Ok(())
    }

    /// Read-through access: returns the cached set, or computes, stores and
    /// returns it.
    pub fn load_or_compute<F>(&self, digit: u8, angle: i32, compute: F) -> Result<RotatedSets>
    where
        F: FnOnce() -> Result<RotatedSets>,
    {
        if let Some(sets) = self.load(digit, angle)? {
            return Ok(sets);
        }
        let sets = compute()?;
        self.store(digit, angle, &sets)?;
        Ok(sets)
    }
}
