use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::loader::ambient::{discover_runtime_dirs, AmbientProbe};

/// Root configuration structure, deserialized from `.dep-checkr/config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Which files count as modules.
    #[serde(default)]
    pub scan: ScanConfig,
    /// How references missing from the scanned directory are looked up.
    #[serde(default)]
    pub ambient: AmbientConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    /// Module file extensions, without the dot. Tried in order when probing
    /// for a dependency's file. Defaults to `["dll"]`.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Regular expressions matched against top-level file names; matches are
    /// not scanned as roots but can still satisfy dependencies.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["dll".to_string()]
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            extensions: default_extensions(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmbientConfig {
    /// When `false`, every reference not found locally is reported as missing.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directories searched, in order, before any discovered runtime.
    #[serde(default)]
    pub probe_paths: Vec<PathBuf>,
    /// Append the newest installed version of each .NET shared framework.
    #[serde(default = "default_true")]
    pub discover_runtime: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AmbientConfig {
    fn default() -> Self {
        AmbientConfig {
            enabled: true,
            probe_paths: Vec::new(),
            discover_runtime: true,
        }
    }
}

impl Config {
    /// Compile `scan.exclude`.
    pub fn exclude_patterns(&self) -> Result<Vec<Regex>> {
        self.scan
            .exclude
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid exclude pattern '{}'", p)))
            .collect()
    }

    /// Build the ambient probe described by this config.
    pub fn ambient_probe(&self) -> AmbientProbe {
        if !self.ambient.enabled {
            return AmbientProbe::disabled();
        }
        let mut dirs = self.ambient.probe_paths.clone();
        if self.ambient.discover_runtime {
            for dir in discover_runtime_dirs() {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        AmbientProbe::new(dirs, self.scan.extensions.clone())
    }
}

/// Load the configuration, searching in order:
///
/// 1. `config_override`: path passed via `--config`
/// 2. `<scan_path>/.dep-checkr/config.toml`
/// 3. `~/.config/dep-checkr/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(scan_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let local_config = scan_path.join(".dep-checkr").join("config.toml");
    if local_config.exists() {
        return read_config(&local_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config").join("dep-checkr").join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
}
