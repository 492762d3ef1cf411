// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Neural module API built on top of the pure SpiralTorch tensor.
//!
//! Modules run hand-written backward passes that accumulate gradients into the
//! `Parameter`s they own; optimizers then walk those parameters.

pub mod io;
pub mod layers;
pub mod loss;
pub mod module;
pub mod optim;

pub use io::{load_state_dict, save_state_dict, StateDictFormat};
pub use layers::{sigmoid, Activation, Linear, Sequential, UnknownActivation};
pub use loss::{BinaryCrossEntropyWithLogits, Loss, SquaredError};
pub use module::{Module, Parameter};
pub use optim::{Adam, AdamConfig};

pub use st_tensor::{PureResult, Tensor, TensorError};
