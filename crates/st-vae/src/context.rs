// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Training state shared by every model a caller builds from it.
///
/// Clones share one global iteration counter, which counts successful
/// optimisation steps across all models.
#[derive(Clone, Debug, Default)]
pub struct TrainingContext {
    global_iteration: Arc<AtomicU64>,
}

impl TrainingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_iteration(&self) -> u64 {
        self.global_iteration.load(Ordering::Relaxed)
    }

    /// Records one successful step and returns the new global count.
    pub(crate) fn advance(&self) -> u64 {
        self.global_iteration.fetch_add(1, Ordering::Relaxed) + 1
    }
}
