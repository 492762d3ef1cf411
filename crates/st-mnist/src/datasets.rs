// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{DatasetError, Result};
use crate::idx;
use crate::split::{DataSplit, ImageShape};
use spiral_config::determinism::derive_seed;
use st_tensor::Tensor;
use std::path::Path;
use tracing::info;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// Number of leading training examples held out for validation by default.
pub const DEFAULT_VALIDATION_SIZE: usize = 5000;

/// The three MNIST splits.
#[derive(Clone, Debug)]
pub struct MnistDataSets {
    pub train: DataSplit,
    pub validation: DataSplit,
    pub test: DataSplit,
}

impl MnistDataSets {
    /// Applies `f` to every split.
    pub fn try_map<F>(&self, mut f: F) -> Result<MnistDataSets>
    where
        F: FnMut(&DataSplit) -> Result<DataSplit>,
    {
        Ok(MnistDataSets {
            train: f(&self.train)?,
            validation: f(&self.validation)?,
            test: f(&self.test)?,
        })
    }

    pub fn shape(&self) -> ImageShape {
        self.train.shape()
    }
}

fn split_seed(seed: Option<u64>, component: &str) -> Option<u64> {
    seed.map(|s| derive_seed(s, component))
}

fn load_split(
    dir: &Path,
    images: &str,
    labels: &str,
    seed: Option<u64>,
) -> Result<DataSplit> {
    let image_path = dir.join(images);
    let label_path = dir.join(labels);
    let decoded = idx::read_images(&image_path)?;
    let labels = idx::read_labels(&label_path)?;
    if decoded.count != labels.len() {
        return Err(DatasetError::InvalidIdx {
            path: label_path,
            reason: format!(
                "{} labels for {} images",
                labels.len(),
                decoded.count
            ),
        });
    }
    let shape = ImageShape::new(decoded.height, decoded.width);
    let tensor = Tensor::from_vec(decoded.count, shape.len(), decoded.pixels)?;
    Ok(DataSplit::new(tensor, labels, shape, seed)?)
}

/// Reads the four standard uncompressed IDX files from `dir` and carves the
/// first `validation_size` training examples into the validation split.
pub fn read_data_sets(
    dir: impl AsRef<Path>,
    validation_size: usize,
    seed: Option<u64>,
) -> Result<MnistDataSets> {
    let dir = dir.as_ref();
    let full_train = load_split(dir, TRAIN_IMAGES, TRAIN_LABELS, None)?;
    let total = full_train.num_examples();
    if validation_size > total {
        return Err(DatasetError::InvalidArgument(format!(
            "validation size {validation_size} exceeds {total} training examples"
        )));
    }
    let mut validation = full_train.slice(0, validation_size)?;
    validation.reseed(split_seed(seed, "validation"));
    let mut train = full_train.slice(validation_size, total)?;
    train.reseed(split_seed(seed, "train"));
    let test = load_split(dir, TEST_IMAGES, TEST_LABELS, split_seed(seed, "test"))?;
    info!(
        train = train.num_examples(),
        validation = validation.num_examples(),
        test = test.num_examples(),
        dir = %dir.display(),
        "loaded MNIST"
    );
    Ok(MnistDataSets {
        train,
        validation,
        test,
    })
}
