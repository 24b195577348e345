// SPDX-License-Identifier: GPL-3.0-only

//! TOML configuration
//!
//! Every key is optional. Relative paths are resolved against the directory
//! holding the configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge_sys::{
    AccessStrategyConfig, GatewayConfig, RetryPolicy, TaskRunnerConfig, powershell,
};
use bridge_types::FilesystemType;
use serde::Deserialize;
use thiserror::Error;

const APP_DIR: &str = "mount-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid configuration in {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewaySection {
    /// PowerShell binary; located on `PATH` when empty
    pub shell: String,
    pub poll_interval_ms: u64,
    pub elevated_timeout_secs: u64,
    pub process_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            shell: String::new(),
            poll_interval_ms: 250,
            elevated_timeout_secs: 120,
            process_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReachabilitySection {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReachabilitySection {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MappingSection {
    /// Reachability probing before a mapping; longer than the post-mount probe
    pub probe_attempts: u32,
    pub probe_delay_ms: u64,
    pub command_timeout_secs: u64,
    pub indirection_timeout_secs: u64,
    pub indirection_poll_ms: u64,
    /// Account the user-context task runs as; the console user when unset
    pub indirection_user: Option<String>,
}

impl Default for MappingSection {
    fn default() -> Self {
        Self {
            probe_attempts: 15,
            probe_delay_ms: 1000,
            command_timeout_secs: 30,
            indirection_timeout_secs: 30,
            indirection_poll_ms: 250,
            indirection_user: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcileSection {
    pub probe_timeout_ms: u64,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierSection {
    pub kernel_log_lines: usize,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            kernel_log_lines: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory holding `mount.ps1` and `unmount.ps1`
    pub script_dir: PathBuf,
    pub state_file: PathBuf,
    /// Daily rolling log files are written here when set
    pub log_dir: Option<PathBuf>,
    pub default_distro: Option<String>,
    pub allowed_filesystems: Vec<FilesystemType>,
    pub gateway: GatewaySection,
    pub reachability: ReachabilitySection,
    pub mapping: MappingSection,
    pub reconcile: ReconcileSection,
    pub classifier: ClassifierSection,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            script_dir: data_dir.join("scripts"),
            state_file: data_dir.join("mounts.json"),
            log_dir: None,
            default_distro: None,
            allowed_filesystems: FilesystemType::ALL.to_vec(),
            gateway: GatewaySection::default(),
            reachability: ReachabilitySection::default(),
            mapping: MappingSection::default(),
            reconcile: ReconcileSection::default(),
            classifier: ClassifierSection::default(),
        }
    }
}

impl BridgeConfig {
    /// Load from `path`, or from the default location when `None`
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!("No configuration at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        let mut config = Self::parse(&text).map_err(|reason| ConfigError::Parse {
            path: path.clone(),
            reason,
        })?;
        config.rebase_paths(&path);
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    fn rebase_paths(&mut self, path: &Path) {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        self.script_dir = join_base(base, &self.script_dir);
        self.state_file = join_base(base, &self.state_file);
        if let Some(dir) = &mut self.log_dir {
            *dir = join_base(base, dir);
        }
    }

    pub fn shell(&self) -> String {
        if self.gateway.shell.trim().is_empty() {
            powershell::find_shell()
        } else {
            self.gateway.shell.clone()
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            shell: self.shell(),
            poll_interval: Duration::from_millis(self.gateway.poll_interval_ms),
            elevated_timeout: Duration::from_secs(self.gateway.elevated_timeout_secs),
            process_timeout: Duration::from_secs(self.gateway.process_timeout_secs),
            ..GatewayConfig::new(&self.script_dir)
        }
    }

    pub fn reachability_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reachability.attempts,
            Duration::from_millis(self.reachability.delay_ms),
        )
    }

    pub fn access_config(&self) -> AccessStrategyConfig {
        AccessStrategyConfig {
            probe: RetryPolicy::new(
                self.mapping.probe_attempts,
                Duration::from_millis(self.mapping.probe_delay_ms),
            ),
            shell: self.shell(),
            command_timeout: Duration::from_secs(self.mapping.command_timeout_secs),
        }
    }

    pub fn task_runner_config(&self) -> TaskRunnerConfig {
        TaskRunnerConfig {
            shell: self.shell(),
            timeout: Duration::from_secs(self.mapping.indirection_timeout_secs),
            poll_interval: Duration::from_millis(self.mapping.indirection_poll_ms),
            user: self.mapping.indirection_user.clone(),
            ..TaskRunnerConfig::default()
        }
    }

    pub fn reconcile_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile.probe_timeout_ms)
    }
}

fn join_base(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// `%APPDATA%\mount-bridge`, `$XDG_CONFIG_HOME/mount-bridge` or `~/.config/mount-bridge`
pub fn default_data_dir() -> PathBuf {
    if let Some(appdata) = std::env::var_os("APPDATA") {
        return PathBuf::from(appdata).join(APP_DIR);
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join(APP_DIR);
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".config").join(APP_DIR);
    }
    std::env::temp_dir().join(APP_DIR)
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE)
}
