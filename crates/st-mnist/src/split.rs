// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::DatasetProvider;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use spiral_config::determinism;
use st_tensor::{PureResult, Tensor, TensorError};
use std::sync::Arc;

/// Logical layout of one image row.
///
/// Images always travel as flattened rows; `flat == false` only records that
/// callers asked for `[height, width(, channels)]` views.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub flat: bool,
}

impl ImageShape {
    pub const MNIST: ImageShape = ImageShape {
        height: 28,
        width: 28,
        channels: 1,
        flat: true,
    };

    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            channels: 1,
            flat: true,
        }
    }

    /// Number of values in one flattened image.
    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Axis sizes excluding the batch axis.
    pub fn dims(&self) -> Vec<usize> {
        match (self.flat, self.channels) {
            (true, _) => vec![self.len()],
            (false, 1) => vec![self.height, self.width],
            (false, c) => vec![self.height, self.width, c],
        }
    }
}

/// A view over a shared image buffer.
///
/// Filtering produces a new view holding an index list into the same
/// buffers, so relative order is preserved and nothing is copied. Batches
/// follow the classic MNIST reader policy: the order is shuffled on the first
/// call, and an epoch boundary takes the tail, reshuffles, then completes the
/// batch from the new order.
#[derive(Clone, Debug)]
pub struct DataSplit {
    images: Arc<Tensor>,
    labels: Arc<Vec<u8>>,
    indices: Arc<Vec<usize>>,
    shape: ImageShape,
    order: Vec<usize>,
    index_in_epoch: usize,
    epochs_completed: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataSplit {
    /// Wraps a full image tensor (`rows == labels.len()`).
    pub fn new(
        images: Tensor,
        labels: Vec<u8>,
        shape: ImageShape,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if images.rows() != labels.len() {
            return Err(TensorError::DataLength {
                expected: images.rows(),
                got: labels.len(),
            });
        }
        if images.cols() != shape.len() {
            return Err(TensorError::DataLength {
                expected: shape.len(),
                got: images.cols(),
            });
        }
        let indices = (0..labels.len()).collect();
        Ok(Self::from_parts(
            Arc::new(images),
            Arc::new(labels),
            Arc::new(indices),
            shape,
            determinism::rng_from_optional(seed, "st-mnist/split"),
        ))
    }

    fn from_parts(
        images: Arc<Tensor>,
        labels: Arc<Vec<u8>>,
        indices: Arc<Vec<usize>>,
        shape: ImageShape,
        rng: StdRng,
    ) -> Self {
        let order = (0..indices.len()).collect();
        Self {
            images,
            labels,
            indices,
            shape,
            order,
            index_in_epoch: 0,
            epochs_completed: 0,
            shuffle: true,
            rng,
        }
    }

    /// Disables shuffling; batches then walk the view in order.
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    pub fn num_examples(&self) -> usize {
        self.indices.len()
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    /// Returns `true` when both views read from the same image buffer.
    pub fn shares_buffer_with(&self, other: &DataSplit) -> bool {
        Arc::ptr_eq(&self.images, &other.images)
    }

    /// Labels of the view, in view order.
    pub fn labels(&self) -> Vec<u8> {
        self.indices.iter().map(|&i| self.labels[i]).collect()
    }

    /// Materialises the view's images in view order.
    pub fn images(&self) -> PureResult<Tensor> {
        self.images.select_rows(&self.indices)
    }

    /// Returns a view without any example whose label is in `blacklist`.
    pub fn filter_labels(&self, blacklist: &[u8]) -> DataSplit {
        let kept: Vec<usize> = self
            .indices
            .iter()
            .copied()
            .filter(|&i| !blacklist.contains(&self.labels[i]))
            .collect();
        Self::from_parts(
            Arc::clone(&self.images),
            Arc::clone(&self.labels),
            Arc::new(kept),
            self.shape,
            self.rng.clone(),
        )
        .with_shuffle(self.shuffle)
    }

    fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Positional sub-view `[start, end)` over the same buffer.
    pub fn slice(&self, start: usize, end: usize) -> PureResult<DataSplit> {
        if start > end || end > self.num_examples() {
            return Err(TensorError::IndexOutOfRange {
                index: end,
                len: self.num_examples(),
            });
        }
        Ok(Self::from_parts(
            Arc::clone(&self.images),
            Arc::clone(&self.labels),
            Arc::new(self.indices[start..end].to_vec()),
            self.shape,
            self.rng.clone(),
        )
        .with_shuffle(self.shuffle))
    }

    /// Re-seeds the shuffling RNG.
    pub fn reseed(&mut self, seed: Option<u64>) {
        self.rng = determinism::rng_from_optional(seed, "st-mnist/split");
    }

    /// Applies `f` to every image of the view, in view order, and stacks the
    /// results into a `(num_examples, shape.len())` tensor.
    pub fn transform_rows<F>(&self, shape: ImageShape, mut f: F) -> PureResult<Tensor>
    where
        F: FnMut(&[f32]) -> Vec<f32>,
    {
        let mut data = Vec::with_capacity(self.num_examples() * shape.len());
        for &index in self.indices.iter() {
            let row = f(self.images.row(index)?);
            if row.len() != shape.len() {
                return Err(TensorError::DataLength {
                    expected: shape.len(),
                    got: row.len(),
                });
            }
            data.extend_from_slice(&row);
        }
        Tensor::from_vec(self.num_examples(), shape.len(), data)
    }

    /// Rebuilds the view from per-image transformed rows. The result owns a
    /// fresh buffer holding only this view's examples.
    pub fn map_images<F>(&self, shape: ImageShape, f: F) -> PureResult<DataSplit>
    where
        F: FnMut(&[f32]) -> Vec<f32>,
    {
        if self.num_examples() == 0 {
            let mut empty = self.clone();
            empty.shape = shape;
            return Ok(empty);
        }
        self.with_images(self.transform_rows(shape, f)?, shape)
    }

    /// Replaces the view's images with `images`, whose rows follow view order.
    pub fn with_images(&self, images: Tensor, shape: ImageShape) -> PureResult<DataSplit> {
        if images.rows() != self.num_examples() || images.cols() != shape.len() {
            return Err(TensorError::ShapeMismatch {
                left: images.shape(),
                right: (self.num_examples(), shape.len()),
            });
        }
        Ok(Self::from_parts(
            Arc::new(images),
            Arc::new(self.labels()),
            Arc::new((0..self.num_examples()).collect()),
            shape,
            self.rng.clone(),
        )
        .with_shuffle(self.shuffle))
    }

    /// Records that images should be viewed unflattened.
    pub fn set_flat(&mut self, flat: bool) {
        self.shape.flat = flat;
    }

    fn reshuffle(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    /// Draws the next `batch_size` examples.
    pub fn next_batch(&mut self, batch_size: usize) -> PureResult<(Tensor, Vec<u8>)> {
        let total = self.num_examples();
        if total == 0 {
            return Err(TensorError::EmptyInput("DataSplit::next_batch"));
        }
        if batch_size == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: 0,
                cols: self.shape.len(),
            });
        }
        if self.epochs_completed == 0 && self.index_in_epoch == 0 {
            self.reshuffle();
        }
        let mut picked = Vec::with_capacity(batch_size);
        while picked.len() < batch_size {
            let wanted = batch_size - picked.len();
            let start = self.index_in_epoch;
            let end = (start + wanted).min(total);
            picked.extend(self.order[start..end].iter().map(|&o| self.indices[o]));
            self.index_in_epoch = end;
            if self.index_in_epoch == total && picked.len() < batch_size {
                self.epochs_completed += 1;
                self.reshuffle();
                self.index_in_epoch = 0;
            }
        }
        let labels = picked.iter().map(|&i| self.labels[i]).collect();
        Ok((self.images.select_rows(&picked)?, labels))
    }
}

impl DatasetProvider for DataSplit {
    fn next_batch(&mut self, batch_size: usize) -> PureResult<(Tensor, Vec<u8>)> {
        DataSplit::next_batch(self, batch_size)
    }

    fn num_examples(&self) -> usize {
        DataSplit::num_examples(self)
    }
}
