// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-image augmentations on flattened, channel-interleaved rows.

use crate::split::ImageShape;

#[inline]
fn pixel(image: &[f32], shape: &ImageShape, y: isize, x: isize, channel: usize) -> f32 {
    if y < 0 || x < 0 || y as usize >= shape.height || x as usize >= shape.width {
        return 0.0;
    }
    image[(y as usize * shape.width + x as usize) * shape.channels + channel]
}

/// Bilinear sample at fractional pixel-centre coordinates; outside is zero.
fn bilinear(image: &[f32], shape: &ImageShape, y: f32, x: f32, channel: usize) -> f32 {
    let y0 = y.floor();
    let x0 = x.floor();
    let fy = y - y0;
    let fx = x - x0;
    let (y0, x0) = (y0 as isize, x0 as isize);
    let top = pixel(image, shape, y0, x0, channel) * (1.0 - fx)
        + pixel(image, shape, y0, x0 + 1, channel) * fx;
    let bottom = pixel(image, shape, y0 + 1, x0, channel) * (1.0 - fx)
        + pixel(image, shape, y0 + 1, x0 + 1, channel) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resizes one image with bilinear interpolation. Source coordinates are
/// clamped to the image so borders are replicated.
pub fn resize_bilinear(image: &[f32], from: &ImageShape, height: usize, width: usize) -> Vec<f32> {
    let channels = from.channels;
    let scale_y = from.height as f32 / height as f32;
    let scale_x = from.width as f32 / width as f32;
    let max_y = (from.height - 1) as f32;
    let max_x = (from.width - 1) as f32;
    let mut out = Vec::with_capacity(height * width * channels);
    for i in 0..height {
        let sy = ((i as f32 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
        for j in 0..width {
            let sx = ((j as f32 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
            for c in 0..channels {
                out.push(bilinear(image, from, sy, sx, c));
            }
        }
    }
    out
}

/// Tiles a single-channel image into three interleaved channels.
pub fn gray_to_rgb(image: &[f32]) -> Vec<f32> {
    image.iter().flat_map(|&v| [v, v, v]).collect()
}

/// Rotates one image counter-clockwise by `angle` degrees about its centre,
/// keeping the original size and filling uncovered pixels with zero.
pub fn rotate(image: &[f32], shape: &ImageShape, angle: f32) -> Vec<f32> {
    let (sin, cos) = angle.to_radians().sin_cos();
    let cy = (shape.height as f32 - 1.0) / 2.0;
    let cx = (shape.width as f32 - 1.0) / 2.0;
    let mut out = Vec::with_capacity(shape.len());
    for y in 0..shape.height {
        let dy = y as f32 - cy;
        for x in 0..shape.width {
            let dx = x as f32 - cx;
            let sx = cos * dx - sin * dy + cx;
            let sy = sin * dx + cos * dy + cy;
            for c in 0..shape.channels {
                out.push(bilinear(image, shape, sy, sx, c));
            }
        }
    }
    out
}
