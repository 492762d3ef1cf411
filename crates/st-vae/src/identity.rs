// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Deterministic model names derived from hyperparameters.

/// Renders layer sizes as `[a, b, c]`.
pub fn format_sizing(sizes: &[usize]) -> String {
    let inner: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
    format!("[{}]", inner.join(", "))
}

/// Renders a float the way Python's `str` does: shortest round-trip digits,
/// a trailing `.0` on integral values and scientific notation with a
/// two-digit signed exponent outside `1e-4 <= |x| < 1e16`.
pub fn format_float(value: f32) -> String {
    if value == 0.0 {
        return "0.0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    let scientific = format!("{value:e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = match exponent.parse() {
        Ok(exponent) => exponent,
        Err(_) => return scientific,
    };
    if !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }
    let plain = value.to_string();
    if plain.contains('.') {
        plain
    } else {
        format!("{plain}.0")
    }
}

/// Builds the identity used as parameter prefix and checkpoint stem.
///
/// Identical hyperparameters yield identical identities, so two such models
/// share a checkpoint file.
pub fn model_identity(
    activation: &str,
    encoder: &[usize],
    decoder: &[usize],
    learning_rate: f32,
    latent_size: usize,
) -> String {
    let raw = format!(
        "{activation}_enc{}_dec{}_learningrate{}_latent size{latent_size}",
        format_sizing(encoder),
        format_sizing(decoder),
        format_float(learning_rate),
    );
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ' ' | '{' | '}' | ':' | '\''))
        .map(|c| if c == ',' { '_' } else { c })
        .collect();
    format!("vae0_{cleaned}")
}
