// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! MNIST for the VAE harness: IDX loading, split views with the classic
//! shuffling batch policy, per-digit filtering and image augmentation.

pub mod cache;
pub mod datasets;
pub mod error;
pub mod idx;
pub mod number;
pub mod split;
pub mod transform;

pub use cache::{RotatedSets, RotationCache};
pub use datasets::{read_data_sets, MnistDataSets, DEFAULT_VALIDATION_SIZE};
pub use error::{DatasetError, Result};
pub use number::{AllMnist, MnistNumber, MnistOptions, OTHER_LABEL};
pub use split::{DataSplit, ImageShape};

use st_tensor::{PureResult, Tensor};

/// Anything that can hand out labelled training batches.
pub trait DatasetProvider {
    /// Returns `batch_size` images as rows plus their labels.
    fn next_batch(&mut self, batch_size: usize) -> PureResult<(Tensor, Vec<u8>)>;

    /// Number of examples in one epoch.
    fn num_examples(&self) -> usize;
}

impl<P: DatasetProvider + ?Sized> DatasetProvider for &mut P {
    fn next_batch(&mut self, batch_size: usize) -> PureResult<(Tensor, Vec<u8>)> {
        (**self).next_batch(batch_size)
    }

    fn num_examples(&self) -> usize {
        (**self).num_examples()
    }
}
