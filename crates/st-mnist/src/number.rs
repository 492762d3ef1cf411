// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-digit and unfiltered MNIST providers.

use crate::cache::{RotatedSets, RotationCache};
use crate::datasets::MnistDataSets;
use crate::error::{DatasetError, Result};
use crate::split::{DataSplit, ImageShape};
use crate::transform;
use crate::DatasetProvider;
use st_tensor::{PureResult, Tensor};
use tracing::{debug, info};

/// Label reserved for "not the target digit" outside one-vs-all mode.
pub const OTHER_LABEL: u8 = 10;

/// View options shared by [`MnistNumber`] and [`AllMnist`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MnistOptions {
    pub one_vs_all: bool,
    pub flat: bool,
    /// Target `(height, width)` for bilinear resizing.
    pub resize: Option<(usize, usize)>,
    /// Tile the grey channel three times.
    pub rgb: bool,
}

impl Default for MnistOptions {
    fn default() -> Self {
        Self {
            one_vs_all: false,
            flat: true,
            resize: None,
            rgb: false,
        }
    }
}

fn apply_transforms(sets: MnistDataSets, options: &MnistOptions) -> Result<MnistDataSets> {
    let mut sets = sets;
    if !options.flat {
        sets.train.set_flat(false);
        sets.validation.set_flat(false);
        sets.test.set_flat(false);
    }
    if let Some((height, width)) = options.resize {
        if height == 0 || width == 0 {
            return Err(DatasetError::InvalidArgument(format!(
                "cannot resize to {height}x{width}"
            )));
        }
        sets = sets.try_map(|split| {
            let from = split.shape();
            let to = ImageShape {
                height,
                width,
                ..from
            };
            Ok(split.map_images(to, |row| {
                transform::resize_bilinear(row, &from, height, width)
            })?)
        })?;
    }
    if options.rgb {
        sets = sets.try_map(|split| {
            let from = split.shape();
            if from.channels != 1 {
                return Err(DatasetError::InvalidArgument(format!(
                    "rgb tiling expects one channel, found {}",
                    from.channels
                )));
            }
            let to = ImageShape {
                channels: 3,
                ..from
            };
            Ok(split.map_images(to, transform::gray_to_rgb)?)
        })?;
    }
    Ok(sets)
}

/// MNIST filtered down to one digit.
///
/// Outside one-vs-all mode every label in `0..=10` except the digit is
/// blacklisted; in one-vs-all mode only the "other" class `1` is.
#[derive(Clone, Debug)]
pub struct MnistNumber {
    number: u8,
    one_vs_all: bool,
    blacklist: Vec<u8>,
    sets: MnistDataSets,
}

impl MnistNumber {
    pub fn new(number: u8, mnist: &MnistDataSets, options: MnistOptions) -> Result<Self> {
        if number > 9 {
            return Err(DatasetError::InvalidArgument(format!(
                "digit must be in 0..=9, got {number}"
            )));
        }
        let blacklist: Vec<u8> = if options.one_vs_all {
            vec![1]
        } else {
            (0..=OTHER_LABEL).filter(|&label| label != number).collect()
        };
        let filtered = MnistDataSets {
            train: mnist.train.filter_labels(&blacklist),
            validation: mnist.validation.filter_labels(&blacklist),
            test: mnist.test.filter_labels(&blacklist),
        };
        let sets = apply_transforms(filtered, &options)?;
        info!(
            number,
            one_vs_all = options.one_vs_all,
            train = sets.train.num_examples(),
            test = sets.test.num_examples(),
            "filtered MNIST to a single digit"
        );
        Ok(Self {
            number,
            one_vs_all: options.one_vs_all,
            blacklist,
            sets,
        })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn blacklist(&self) -> &[u8] {
        &self.blacklist
    }

    pub fn is_one_vs_all(&self) -> bool {
        self.one_vs_all
    }

    pub fn sets(&self) -> &MnistDataSets {
        &self.sets
    }

    pub fn shape(&self) -> ImageShape {
        self.sets.shape()
    }

    /// Width of one flattened image.
    pub fn input_size(&self) -> usize {
        self.shape().len()
    }

    /// Maps a raw label onto the test labelling: `0`/`1` in one-vs-all mode,
    /// otherwise the digit itself or [`OTHER_LABEL`].
    pub fn relabel(&self, label: u8) -> u8 {
        match (self.one_vs_all, label == self.number) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => label,
            (false, false) => OTHER_LABEL,
        }
    }

    pub fn train_batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        Ok(self.sets.train.next_batch(batch_size)?)
    }

    pub fn validation_batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        Ok(self.sets.validation.next_batch(batch_size)?)
    }

    /// Collects `batch_size` test examples of the digit, relabelled.
    pub fn test_batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        let total = self.sets.test.num_examples();
        if !self.sets.test.labels().contains(&self.number) {
            return Err(DatasetError::InvalidArgument(format!(
                "test split holds no examples of digit {}",
                self.number
            )));
        }
        let mut chunks = Vec::new();
        let mut labels = Vec::with_capacity(batch_size);
        while labels.len() < batch_size {
            let (images, raw) = self.sets.test.next_batch(total)?;
            let relabelled: Vec<u8> = raw.iter().map(|&l| self.relabel(l)).collect();
            let keep: Vec<usize> = relabelled
                .iter()
                .enumerate()
                .filter(|(_, label)| !self.blacklist.contains(label))
                .map(|(index, _)| index)
                .collect();
            if keep.is_empty() {
                continue;
            }
            chunks.push(images.select_rows(&keep)?);
            labels.extend(keep.iter().map(|&i| relabelled[i]));
        }
        truncate_batch(&chunks, labels, batch_size)
    }

    /// Draws training batches until `batch_size` examples have been collected
    /// from batches that contain the digit.
    pub fn batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        if !self.sets.train.labels().contains(&self.number) {
            return Err(DatasetError::InvalidArgument(format!(
                "train split holds no examples of digit {}",
                self.number
            )));
        }
        let mut chunks = Vec::new();
        let mut labels = Vec::with_capacity(batch_size);
        while labels.len() < batch_size {
            let (images, raw) = self.sets.train.next_batch(batch_size)?;
            if raw.contains(&self.number) {
                chunks.push(images);
                labels.extend(raw);
            }
        }
        truncate_batch(&chunks, labels, batch_size)
    }

    /// Rotates every split by `angle` degrees, reading from and populating
    /// the on-disk cache.
    pub fn rotate(&mut self, angle: i32, cache: &RotationCache) -> Result<()> {
        let shape = self.shape();
        let sets = &self.sets;
        let rotated = cache.load_or_compute(self.number, angle, || {
            debug!(number = self.number, angle, "rotating digit");
            let rotate = |split: &DataSplit| -> Result<Option<Tensor>> {
                if split.num_examples() == 0 {
                    return Ok(None);
                }
                let images = split.transform_rows(shape, |row| {
                    transform::rotate(row, &shape, angle as f32)
                })?;
                Ok(Some(images))
            };
            Ok(RotatedSets {
                train: rotate(&sets.train)?,
                validation: rotate(&sets.validation)?,
                test: rotate(&sets.test)?,
            })
        })?;
        let path = cache.path(self.number, angle);
        let adopt = |split: &DataSplit, images: Option<Tensor>| -> Result<DataSplit> {
            let stale = |reason: String| DatasetError::Cache {
                path: path.clone(),
                reason,
            };
            match images {
                Some(images) => split
                    .with_images(images, shape)
                    .map_err(|err| stale(err.to_string())),
                None if split.num_examples() == 0 => Ok(split.clone()),
                None => Err(stale(format!(
                    "no cached images for {} examples",
                    split.num_examples()
                ))),
            }
        };
        self.sets = MnistDataSets {
            train: adopt(&self.sets.train, rotated.train)?,
            validation: adopt(&self.sets.validation, rotated.validation)?,
            test: adopt(&self.sets.test, rotated.test)?,
        };
        Ok(())
    }
}

fn truncate_batch(
    chunks: &[Tensor],
    mut labels: Vec<u8>,
    batch_size: usize,
) -> Result<(Tensor, Vec<u8>)> {
    let stacked = Tensor::cat_rows(chunks)?;
    labels.truncate(batch_size);
    let keep: Vec<usize> = (0..batch_size).collect();
    Ok((stacked.select_rows(&keep)?, labels))
}

impl DatasetProvider for MnistNumber {
    fn next_batch(&mut self, batch_size: usize) -> PureResult<(Tensor, Vec<u8>)> {
        self.sets.train.next_batch(batch_size)
    }

    fn num_examples(&self) -> usize {
        self.sets.train.num_examples()
    }
}

/// The unfiltered dataset with the same view options.
#[derive(Clone, Debug)]
pub struct AllMnist {
    sets: MnistDataSets,
}

impl AllMnist {
    pub fn new(mnist: &MnistDataSets, options: MnistOptions) -> Result<Self> {
        Ok(Self {
            sets: apply_transforms(mnist.clone(), &options)?,
        })
    }

    pub fn sets(&self) -> &MnistDataSets {
        &self.sets
    }

    pub fn shape(&self) -> ImageShape {
        self.sets.shape()
    }

    pub fn input_size(&self) -> usize {
        self.shape().len()
    }

    /// Size of the test split.
    pub fn test_examples(&self) -> usize {
        self.sets.test.num_examples()
    }

    pub fn train_batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        Ok(self.sets.train.next_batch(batch_size)?)
    }

    pub fn validation_batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        Ok(self.sets.validation.next_batch(batch_size)?)
    }

    pub fn test_batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        Ok(self.sets.test.next_batch(batch_size)?)
    }

    pub fn batch(&mut self, batch_size: usize) -> Result<(Tensor, Vec<u8>)> {
        self.train_batch(batch_size)
    }
}

impl DatasetProvider for AllMnist {
    fn next_batch(&mut self, batch_size: usize) -> PureResult<(Tensor, Vec<u8>)> {
        self.sets.train.next_batch(batch_size)
    }

    fn num_examples(&self) -> usize {
        self.sets.train.num_examples()
    }
}
