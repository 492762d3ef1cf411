// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, Tensor, TensorError};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

/// On-disk encoding of a state dict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateDictFormat {
    #[default]
    Bincode,
    Json,
}

impl StateDictFormat {
    /// File extension used for checkpoints in this format.
    pub fn extension(self) -> &'static str {
        match self {
            StateDictFormat::Bincode => "ckpt",
            StateDictFormat::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl StoredTensor {
    fn from_tensor(tensor: &Tensor) -> StoredTensor {
        StoredTensor {
            rows: tensor.rows(),
            cols: tensor.cols(),
            data: tensor.data().to_vec(),
        }
    }

    fn into_tensor(self) -> PureResult<Tensor> {
        Tensor::from_vec(self.rows, self.cols, self.data)
    }
}

// BTreeMap keeps JSON checkpoints stable across runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ModuleSnapshot {
    parameters: BTreeMap<String, StoredTensor>,
}

fn snapshot_from_state(state: &HashMap<String, Tensor>) -> ModuleSnapshot {
    let parameters = state
        .iter()
        .map(|(name, tensor)| (name.clone(), StoredTensor::from_tensor(tensor)))
        .collect();
    ModuleSnapshot { parameters }
}

fn from_snapshot(snapshot: ModuleSnapshot) -> PureResult<HashMap<String, Tensor>> {
    let mut state = HashMap::with_capacity(snapshot.parameters.len());
    for (name, tensor) in snapshot.parameters {
        state.insert(name, tensor.into_tensor()?);
    }
    Ok(state)
}

fn io_error(err: std::io::Error) -> TensorError {
    TensorError::IoError {
        message: err.to_string(),
    }
}

fn serde_error(err: impl ToString) -> TensorError {
    TensorError::SerializationError {
        message: err.to_string(),
    }
}

/// Writes a state dict to `path` in the requested format.
pub fn save_state_dict<P: AsRef<Path>>(
    state: &HashMap<String, Tensor>,
    path: P,
    format: StateDictFormat,
) -> PureResult<()> {
    let snapshot = snapshot_from_state(state);
    let file = File::create(path.as_ref()).map_err(io_error)?;
    let writer = BufWriter::new(file);
    match format {
        StateDictFormat::Json => {
            serde_json::to_writer_pretty(writer, &snapshot).map_err(serde_error)?
        }
        StateDictFormat::Bincode => bincode::serialize_into(writer, &snapshot).map_err(serde_error)?,
    }
    Ok(())
}

/// Decodes a bincode snapshot. Length prefixes are bounded by the input size,
/// so a corrupt file fails instead of requesting a huge allocation.
fn decode_bincode(bytes: &[u8]) -> PureResult<ModuleSnapshot> {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(bytes.len() as u64)
        .deserialize(bytes)
        .map_err(serde_error)
}

/// Reads a state dict previously written by [`save_state_dict`].
pub fn load_state_dict<P: AsRef<Path>>(
    path: P,
    format: StateDictFormat,
) -> PureResult<HashMap<String, Tensor>> {
    let bytes = fs::read(path.as_ref()).map_err(io_error)?;
    let snapshot: ModuleSnapshot = match format {
        StateDictFormat::Json => serde_json::from_slice(&bytes).map_err(serde_error)?,
        StateDictFormat::Bincode => decode_bincode(&bytes)?,
    };
    from_snapshot(snapshot)
}
