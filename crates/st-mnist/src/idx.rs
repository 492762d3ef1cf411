// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reader for the uncompressed IDX archives MNIST ships in.

use crate::error::{DatasetError, Result};
use std::path::Path;

const IMAGE_MAGIC: u32 = 0x0000_0803;
const LABEL_MAGIC: u32 = 0x0000_0801;

/// Decoded image archive. Pixels are scaled into `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct IdxImages {
    pub count: usize,
    pub height: usize,
    pub width: usize,
    pub pixels: Vec<f32>,
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let chunk = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

fn malformed(path: &Path, reason: impl Into<String>) -> DatasetError {
    DatasetError::InvalidIdx {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Decodes an IDX3 image archive already loaded in memory. `path` is only
/// used for error reporting.
pub fn parse_images(bytes: &[u8], path: &Path) -> Result<IdxImages> {
    let magic = read_u32(bytes, 0).ok_or_else(|| malformed(path, "truncated header"))?;
    if magic != IMAGE_MAGIC {
        return Err(malformed(path, format!("unexpected magic {magic:#010x}")));
    }
    let header = |offset| read_u32(bytes, offset).ok_or_else(|| malformed(path, "truncated header"));
    let count = header(4)? as usize;
    let height = header(8)? as usize;
    let width = header(12)? as usize;
    let expected = count
        .checked_mul(height)
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| malformed(path, format!("{count}x{height}x{width} images overflow")))?;
    let body = &bytes[16..];
    if body.len() != expected {
        return Err(malformed(
            path,
            format!("expected {expected} pixel bytes, found {}", body.len()),
        ));
    }
    let pixels = body.iter().map(|&p| p as f32 / 255.0).collect();
    Ok(IdxImages {
        count,
        height,
        width,
        pixels,
    })
}

/// Decodes an IDX1 label archive already loaded in memory.
pub fn parse_labels(bytes: &[u8], path: &Path) -> Result<Vec<u8>> {
    let magic = read_u32(bytes, 0).ok_or_else(|| malformed(path, "truncated header"))?;
    if magic != LABEL_MAGIC {
        return Err(malformed(path, format!("unexpected magic {magic:#010x}")));
    }
    let count = read_u32(bytes, 4).ok_or_else(|| malformed(path, "truncated header"))? as usize;
    let body = &bytes[8..];
    if body.len() != count {
        return Err(malformed(
            path,
            format!("expected {count} labels, found {}", body.len()),
        ));
    }
    Ok(body.to_vec())
}

pub fn read_images(path: &Path) -> Result<IdxImages> {
    let bytes = std::fs::read(path).map_err(|err| DatasetError::io(path, err))?;
    parse_images(&bytes, path)
}

pub fn read_labels(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|err| DatasetError::io(path, err))?;
    parse_labels(&bytes, path)
}

/// Encodes images back into the IDX3 layout. Values are clamped to `[0, 1]`
/// and quantised to bytes.
pub fn encode_images(count: usize, height: usize, width: usize, pixels: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + pixels.len());
    out.extend_from_slice(&IMAGE_MAGIC.to_be_bytes());
    for dim in [count, height, width] {
        out.extend_from_slice(&(dim as u32).to_be_bytes());
    }
    out.extend(
        pixels
            .iter()
            .map(|&p| (p.clamp(0.0, 1.0) * 255.0).round() as u8),
    );
    out
}

/// Encodes labels into the IDX1 layout.
pub fn encode_labels(labels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + labels.len());
    out.extend_from_slice(&LABEL_MAGIC.to_be_bytes());
    out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    out.extend_from_slice(labels);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_images_and_scales_pixels() {
        let bytes = encode_images(2, 1, 2, &[0.0, 1.0, 0.5, 0.2]);
        let images = parse_images(&bytes, Path::new("mem")).unwrap();
        assert_eq!((images.count, images.height, images.width), (2, 1, 2));
        assert_eq!(images.pixels[0], 0.0);
        assert_eq!(images.pixels[1], 1.0);
        assert!((images.pixels[2] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn parses_labels() {
        let bytes = encode_labels(&[7, 2, 1]);
        assert_eq!(parse_labels(&bytes, Path::new("mem")).unwrap(), vec![7, 2, 1]);
    }

    #[test]
    fn rejects_wrong_magic_and_truncation() {
        let labels = encode_labels(&[1, 2]);
        assert!(matches!(
            parse_images(&labels, Path::new("mem")),
            Err(DatasetError::InvalidIdx { .. })
        ));
        let mut images = encode_images(2, 2, 2, &[0.0; 8]);
        images.pop();
        assert!(matches!(
            parse_images(&images, Path::new("mem")),
            Err(DatasetError::InvalidIdx { .. })
        ));
        assert!(parse_labels(&[0, 0], Path::new("mem")).is_err());
    }

    #[test]
    fn oversized_header_dimensions_are_rejected() {
        let mut bytes = IMAGE_MAGIC.to_be_bytes().to_vec();
        for _ in 0..3 {
            bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        }
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(
            parse_images(&bytes, Path::new("mem")),
            Err(DatasetError::InvalidIdx { .. })
        ));
    }
}
