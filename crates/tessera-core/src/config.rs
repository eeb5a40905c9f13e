use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::persist::ExportOptions;

/// Context attached when the config governing a project cannot be loaded.
///
/// Attached with `anyhow::Context`, so callers can `downcast_ref` it to
/// recover the stable error code.
#[derive(Debug, thiserror::Error)]
#[error("Failed to load config for {}", project.display())]
pub struct ConfigLoadFailed {
    pub project: PathBuf,
}

impl ConfigLoadFailed {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_autosave_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            debounce_ms: default_autosave_debounce_ms(),
        }
    }
}

impl AutosaveConfig {
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_export_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_export_retry_ms")]
    pub retry_ms: u64,
    #[serde(default)]
    pub binary_output_path: Option<PathBuf>,
    #[serde(default)]
    pub live_binary_output_path: Option<PathBuf>,
    #[serde(default)]
    pub generated_output_directory: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub write_manifest: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_export_debounce_ms(),
            retry_ms: default_export_retry_ms(),
            binary_output_path: None,
            live_binary_output_path: None,
            generated_output_directory: None,
            write_manifest: default_true(),
        }
    }
}

impl ExportConfig {
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    /// Export options with relative paths resolved against `root`.
    #[must_use]
    pub fn options(&self, root: &Path) -> ExportOptions {
        let resolve = |p: &Option<PathBuf>| p.as_ref().map(|p| root.join(p));
        ExportOptions {
            binary_output_path: resolve(&self.binary_output_path),
            live_binary_output_path: resolve(&self.live_binary_output_path),
            generated_output_directory: resolve(&self.generated_output_directory),
            write_manifest: self.write_manifest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_deferred_delay_ms")]
    pub deferred_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            deferred_delay_ms: default_deferred_delay_ms(),
        }
    }
}

impl RefreshConfig {
    #[must_use]
    pub const fn deferred_delay(&self) -> Duration {
        Duration::from_millis(self.deferred_delay_ms)
    }
}

/// Path of the per-project config file.
#[must_use]
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".tessera/config.toml")
}

/// Parse a config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid TOML for
/// [`WorkspaceConfig`].
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<WorkspaceConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// User-level config at `<config dir>/tessera/config.toml`, or defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<WorkspaceConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(WorkspaceConfig::default());
    };

    let path = config_dir.join("tessera/config.toml");
    if !path.exists() {
        return Ok(WorkspaceConfig::default());
    }
    load_config_file(&path)
}

/// Config for the project rooted at `project_root`.
///
/// The project file wins; without one the user-level file applies; without
/// either, defaults.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be read or parsed.
pub fn load_workspace_config(project_root: &Path) -> Result<WorkspaceConfig> {
    let path = project_config_path(project_root);
    if path.exists() {
        return load_config_file(&path);
    }
    load_user_config()
}

const fn default_true() -> bool {
    true
}

const fn default_autosave_debounce_ms() -> u64 {
    1_500
}

const fn default_export_debounce_ms() -> u64 {
    750
}

const fn default_export_retry_ms() -> u64 {
    5_000
}

const fn default_deferred_delay_ms() -> u64 {
    120
}
