// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Which file a configuration value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigLayer {
    Base,
    Site,
    Run,
}

/// A single leaf value changed by a layer while merging.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigDiff {
    pub layer: ConfigLayer,
    pub path: String,
    pub previous: Option<Value>,
    pub current: Option<Value>,
}

/// Collection of configuration layers that are merged in order.
#[derive(Clone, Debug, Default)]
pub struct ConfigLayering {
    pub base: Option<PathBuf>,
    pub site: Option<PathBuf>,
    pub run: Option<PathBuf>,
}

impl ConfigLayering {
    /// Discovers configuration files using `VAE_CONFIG_*` variables and the
    /// default `~/.spiral-vae/config` root. Files that do not exist are ignored.
    pub fn discover() -> Self {
        let root = std::env::var("VAE_CONFIG_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root());

        let base = std::env::var("VAE_CONFIG_BASE")
            .map(PathBuf::from)
            .ok()
            .or_else(|| Some(root.join("base.toml")))
            .and_then(existing_path);

        let site = std::env::var("VAE_CONFIG_SITE")
            .map(PathBuf::from)
            .ok()
            .or_else(|| Some(root.join("site.toml")))
            .and_then(existing_path);

        let run = std::env::var("VAE_CONFIG_RUN")
            .map(PathBuf::from)
            .ok()
            .or_else(|| Some(root.join("run.json")))
            .and_then(existing_path);

        ConfigLayering { base, site, run }
    }

    /// Overrides the base layer path.
    pub fn with_base<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base = Some(path.into());
        self
    }

    /// Overrides the site layer path.
    pub fn with_site<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.site = Some(path.into());
        self
    }

    /// Overrides the run layer path.
    pub fn with_run<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.run = Some(path.into());
        self
    }
}

fn existing_path(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

fn default_root() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".spiral-vae").join("config"),
        None => PathBuf::from("."),
    }
}

/// Result of merging layered configuration files.
#[derive(Clone, Debug)]
pub struct LayeredConfig {
    layering: ConfigLayering,
    value: Value,
    diffs: Vec<ConfigDiff>,
}

impl LayeredConfig {
    /// Loads the configured layers, merging base → site → run.
    pub fn load(layering: ConfigLayering) -> Result<Self, LayeredConfigError> {
        let mut value = Value::Object(Default::default());
        let mut diffs = Vec::new();

        if let Some(base_path) = layering.base.as_ref() {
            if let Some(layer) = load_toml(base_path)? {
                apply_layer(&mut value, &layer, ConfigLayer::Base, &mut diffs);
            }
        }
        if let Some(site_path) = layering.site.as_ref() {
            if let Some(layer) = load_toml(site_path)? {
                apply_layer(&mut value, &layer, ConfigLayer::Site, &mut diffs);
            }
        }
        if let Some(run_path) = layering.run.as_ref() {
            if let Some(layer) = load_json(run_path)? {
                apply_layer(&mut value, &layer, ConfigLayer::Run, &mut diffs);
            }
        }

        Ok(LayeredConfig {
            layering,
            value,
            diffs,
        })
    }

    /// Returns the merged configuration as a `serde_json::Value`.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns the layering metadata used for this configuration.
    pub fn layering(&self) -> &ConfigLayering {
        &self.layering
    }

    /// Returns every leaf that a layer set or overrode, in merge order.
    pub fn diffs(&self) -> &[ConfigDiff] {
        &self.diffs
    }

    /// Extracts a typed view of a nested configuration section. The path is
    /// expressed as a slice of keys that will be traversed in order.
    pub fn section<T>(&self, path: &[&str]) -> Result<Option<T>, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        let mut node = &self.value;
        for key in path {
            match node {
                Value::Object(map) => match map.get(*key) {
                    Some(value) => node = value,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        }
        serde_json::from_value(node.clone()).map(Some)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayeredConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn read_layer(path: &Path) -> Result<Option<String>, LayeredConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|source| LayeredConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_toml(path: &Path) -> Result<Option<Value>, LayeredConfigError> {
    let Some(text) = read_layer(path)? else {
        return Ok(None);
    };
    let value: toml::Value = toml::from_str(&text).map_err(|source| LayeredConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_value(value)
        .map(Some)
        .map_err(|source| LayeredConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn load_json(path: &Path) -> Result<Option<Value>, LayeredConfigError> {
    let Some(text) = read_layer(path)? else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| LayeredConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn apply_layer(dest: &mut Value, layer: &Value, kind: ConfigLayer, diffs: &mut Vec<ConfigDiff>) {
    let before = dest.clone();
    merge(dest, layer);
    diff(&before, dest, &mut Vec::new(), kind, diffs);
}

fn merge(dest: &mut Value, src: &Value) {
    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                match dest_map.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        dest_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (dest_slot, src_value) => {
            *dest_slot = src_value.clone();
        }
    }
}

fn diff(
    before: &Value,
    after: &Value,
    path: &mut Vec<String>,
    layer: ConfigLayer,
    out: &mut Vec<ConfigDiff>,
) {
    if before == after {
        return;
    }

    match (before, after) {
        (Value::Object(before_map), Value::Object(after_map)) => {
            let mut keys: Vec<&String> = before_map.keys().chain(after_map.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                path.push(key.clone());
                let before_child = before_map.get(key).unwrap_or(&Value::Null);
                let after_child = after_map.get(key).unwrap_or(&Value::Null);
                diff(before_child, after_child, path, layer, out);
                path.pop();
            }
        }
        _ => {
            let non_null = |value: &Value| (!value.is_null()).then(|| value.clone());
            out.push(ConfigDiff {
                layer,
                path: path.join("."),
                previous: non_null(before),
                current: non_null(after),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Section {
        latent_size: usize,
        learning_rate: f32,
    }

    #[test]
    fn merges_layers_and_reports_diffs() {
        let root = tempdir().unwrap();
        let base = root.path().join("base.toml");
        fs::write(
            &base,
            r#"
            [vae]
            latent_size = 10
            learning_rate = 0.001
            "#,
        )
        .unwrap();
        let run = root.path().join("run.json");
        fs::write(&run, r#"{ "vae": { "latent_size": 32 } }"#).unwrap();

        let layering = ConfigLayering::default().with_base(&base).with_run(&run);
        let config = LayeredConfig::load(layering).unwrap();
        let section: Section = config.section(&["vae"]).unwrap().unwrap();
        assert_eq!(
            section,
            Section {
                latent_size: 32,
                learning_rate: 0.001
            }
        );

        let overrides: Vec<_> = config
            .diffs()
            .iter()
            .filter(|d| d.layer == ConfigLayer::Run)
            .collect();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].path, "vae.latent_size");
        assert_eq!(overrides[0].previous, Some(Value::from(10)));
    }

    #[test]
    fn missing_section_is_none() {
        let config = LayeredConfig::load(ConfigLayering::default()).unwrap();
        let section: Option<Section> = config.section(&["vae"]).unwrap();
        assert!(section.is_none());
    }

    #[test]
    fn malformed_toml_is_reported() {
        let root = tempdir().unwrap();
        let base = root.path().join("base.toml");
        fs::write(&base, "[vae\nlatent_size = ").unwrap();
        let err = LayeredConfig::load(ConfigLayering::default().with_base(&base)).unwrap_err();
        assert!(matches!(err, LayeredConfigError::Toml { .. }));
    }
}
