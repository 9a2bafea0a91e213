//! Configuration system for sysprobe
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete sysprobe configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Logging settings
    pub log: LogSettings,

    /// Probe and collector settings
    pub capture: CaptureSettings,

    /// Kernel task_struct layout
    pub task: TaskOffsets,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log format: text, json
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Argv capture switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgvCapture {
    /// Record the invoked path only
    #[default]
    Off,
    /// Join argv, except on WSL kernels
    On,
    /// Join argv everywhere
    Force,
}

impl ArgvCapture {
    /// Parse an environment switch value
    pub fn parse_switch(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Some(Self::Off),
            "1" | "true" | "yes" | "on" => Some(Self::On),
            "force" => Some(Self::Force),
            _ => None,
        }
    }

    /// Whether the exec probe should join argv on this kernel
    pub fn enabled(self, wsl: bool) -> bool {
        match self {
            Self::Off => false,
            Self::On => !wsl,
            Self::Force => true,
        }
    }
}

/// Probe and collector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Attach execve / execveat
    pub process: bool,

    /// Attach openat / open
    pub file: bool,

    /// Attach socket / connect
    pub network: bool,

    /// Path to the compiled eBPF object
    pub bytecode_path: Option<PathBuf>,

    /// Command-line reconstruction for process starts
    pub argv: ArgvCapture,

    /// Sleep between ring buffer drains
    pub poll_interval_ms: u64,

    /// Depth of the channel toward the consumer
    pub queue_depth: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            process: true,
            file: true,
            network: true,
            bytecode_path: None,
            argv: ArgvCapture::Off,
            poll_interval_ms: 10,
            queue_depth: 4096,
        }
    }
}

/// `task_struct` field offsets for the running kernel. Left at zero, they are
/// read from kernel BTF at load time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOffsets {
    /// offsetof(struct task_struct, real_parent)
    pub real_parent: u32,

    /// offsetof(struct task_struct, tgid)
    pub tgid: u32,
}

impl TaskOffsets {
    pub fn is_configured(&self) -> bool {
        self.real_parent != 0 && self.tgid != 0
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. SYSPROBE_CONFIG environment variable
    /// 3. $XDG_CONFIG_HOME/sysprobe/config.toml
    /// 4. /etc/sysprobe/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<CaptureConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                CaptureConfig::default()
            }
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("SYSPROBE_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("SYSPROBE_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        let path = PathBuf::from("/etc/sysprobe/config.toml");
        if path.exists() {
            return Some(path);
        }

        None
    }

    /// Per-user config file location
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sysprobe").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> ConfigResult<CaptureConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: CaptureConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Render configuration as TOML
pub fn to_toml(config: &CaptureConfig) -> ConfigResult<String> {
    Ok(toml::to_string_pretty(config)?)
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply `SYSPROBE_*` overrides, reading variables through `lookup`
pub fn apply_env_overrides<F>(config: &mut CaptureConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Log settings
    if let Some(val) = lookup("SYSPROBE_LOG_LEVEL") {
        config.log.level = val;
    }
    if let Some(val) = lookup("SYSPROBE_LOG_FORMAT") {
        config.log.format = val;
    }

    // Capture settings
    if let Some(val) = lookup("SYSPROBE_CAPTURE_PROCESS") {
        config.capture.process = parse_bool(&val).unwrap_or(config.capture.process);
    }
    if let Some(val) = lookup("SYSPROBE_CAPTURE_FILE") {
        config.capture.file = parse_bool(&val).unwrap_or(config.capture.file);
    }
    if let Some(val) = lookup("SYSPROBE_CAPTURE_NETWORK") {
        config.capture.network = parse_bool(&val).unwrap_or(config.capture.network);
    }
    if let Some(val) = lookup("SYSPROBE_CAPTURE_ARGV") {
        match ArgvCapture::parse_switch(&val) {
            Some(mode) => config.capture.argv = mode,
            None => warn!("Ignoring SYSPROBE_CAPTURE_ARGV={}", val),
        }
    }
    if let Some(val) = lookup("SYSPROBE_BYTECODE") {
        config.capture.bytecode_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("SYSPROBE_POLL_INTERVAL_MS") {
        if let Ok(ms) = val.parse() {
            config.capture.poll_interval_ms = ms;
        }
    }
    if let Some(val) = lookup("SYSPROBE_QUEUE_DEPTH") {
        if let Ok(depth) = val.parse() {
            config.capture.queue_depth = depth;
        }
    }

    // Task offsets
    if let Some(val) = lookup("SYSPROBE_TASK_REAL_PARENT_OFFSET") {
        if let Ok(offset) = val.parse() {
            config.task.real_parent = offset;
        }
    }
    if let Some(val) = lookup("SYSPROBE_TASK_TGID_OFFSET") {
        if let Ok(offset) = val.parse() {
            config.task.tgid = offset;
        }
    }
}

/// Validate configuration
pub fn validate(config: &CaptureConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.log.level.to_lowercase().as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid log level: {}. Must be one of: {:?}",
            config.log.level, valid_levels
        )));
    }

    let valid_formats = ["text", "json"];
    if !valid_formats.contains(&config.log.format.to_lowercase().as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid log format: {}. Must be one of: {:?}",
            config.log.format, valid_formats
        )));
    }

    let capture = &config.capture;
    if !(capture.process || capture.file || capture.network) {
        return Err(ConfigError::ValidationError(
            "At least one of process, file or network capture must be enabled".to_string(),
        ));
    }
    if capture.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "Poll interval cannot be 0".to_string(),
        ));
    }
    if capture.queue_depth == 0 {
        return Err(ConfigError::ValidationError(
            "Queue depth cannot be 0".to_string(),
        ));
    }

    let task = &config.task;
    if (task.real_parent == 0) != (task.tgid == 0) {
        return Err(ConfigError::ValidationError(
            "task.real_parent and task.tgid must be set together".to_string(),
        ));
    }

    Ok(())
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.log.level, "info");
        assert!(config.capture.process);
        assert!(config.capture.file);
        assert!(config.capture.network);
        assert_eq!(config.capture.argv, ArgvCapture::Off);
        assert_eq!(config.capture.poll_interval_ms, 10);
        assert!(!config.task.is_configured());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [capture]
            file = false
        "#;
        let config: CaptureConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.capture.file);
        assert!(config.capture.process);
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [log]
            level = "debug"
            format = "json"

            [capture]
            process = true
            file = false
            network = true
            bytecode_path = "/usr/lib/sysprobe/sysprobe.bpf.o"
            argv = "force"
            poll_interval_ms = 25
            queue_depth = 128

            [task]
            real_parent = 2456
            tgid = 2436
        "#;

        let config: CaptureConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert!(!config.capture.file);
        assert_eq!(
            config.capture.bytecode_path,
            Some(PathBuf::from("/usr/lib/sysprobe/sysprobe.bpf.o"))
        );
        assert_eq!(config.capture.argv, ArgvCapture::Force);
        assert_eq!(config.capture.poll_interval_ms, 25);
        assert_eq!(config.capture.queue_depth, 128);
        assert_eq!(config.task.real_parent, 2456);
        assert!(config.task.is_configured());
    }

    #[test]
    fn test_load_from_cli_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nnetwork = false\nqueue_depth = 16").unwrap();

        let config = ConfigLoader::new()
            .with_cli_path(Some(file.path().to_path_buf()))
            .load()
            .unwrap();
        assert!(!config.capture.network);
        assert_eq!(config.capture.queue_depth, 16);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nqueue_depth = 0").unwrap();

        let result = ConfigLoader::new()
            .with_cli_path(Some(file.path().to_path_buf()))
            .load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture\nprocess = ").unwrap();

        let result = load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CaptureConfig::default();
        apply_env_overrides(
            &mut config,
            env_of(&[
                ("SYSPROBE_LOG_LEVEL", "trace"),
                ("SYSPROBE_CAPTURE_FILE", "false"),
                ("SYSPROBE_CAPTURE_ARGV", "1"),
                ("SYSPROBE_BYTECODE", "/tmp/probe.o"),
                ("SYSPROBE_POLL_INTERVAL_MS", "50"),
                ("SYSPROBE_TASK_REAL_PARENT_OFFSET", "1440"),
                ("SYSPROBE_TASK_TGID_OFFSET", "1420"),
            ]),
        );

        assert_eq!(config.log.level, "trace");
        assert!(!config.capture.file);
        assert_eq!(config.capture.argv, ArgvCapture::On);
        assert_eq!(config.capture.bytecode_path, Some(PathBuf::from("/tmp/probe.o")));
        assert_eq!(config.capture.poll_interval_ms, 50);
        assert_eq!(config.task, TaskOffsets { real_parent: 1440, tgid: 1420 });
    }

    #[test]
    fn test_env_overrides_ignore_garbage() {
        let mut config = CaptureConfig::default();
        apply_env_overrides(
            &mut config,
            env_of(&[
                ("SYSPROBE_CAPTURE_PROCESS", "maybe"),
                ("SYSPROBE_CAPTURE_ARGV", "sometimes"),
                ("SYSPROBE_QUEUE_DEPTH", "-3"),
            ]),
        );
        assert_eq!(config, CaptureConfig::default());
    }

    #[test]
    fn test_argv_switch() {
        assert_eq!(ArgvCapture::parse_switch(""), Some(ArgvCapture::Off));
        assert_eq!(ArgvCapture::parse_switch("no"), Some(ArgvCapture::Off));
        assert_eq!(ArgvCapture::parse_switch(" Yes "), Some(ArgvCapture::On));
        assert_eq!(ArgvCapture::parse_switch("FORCE"), Some(ArgvCapture::Force));
        assert_eq!(ArgvCapture::parse_switch("2"), None);

        assert!(!ArgvCapture::Off.enabled(false));
        assert!(ArgvCapture::On.enabled(false));
        assert!(!ArgvCapture::On.enabled(true));
        assert!(ArgvCapture::Force.enabled(true));
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = CaptureConfig {
            log: LogSettings {
                level: "loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validation_requires_a_probe_group() {
        let config = CaptureConfig {
            capture: CaptureSettings {
                process: false,
                file: false,
                network: false,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validation_half_configured_offsets() {
        let config = CaptureConfig {
            task: TaskOffsets {
                real_parent: 2456,
                tgid: 0,
            },
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_serialize_config() {
        let toml_str = to_toml(&CaptureConfig::default()).unwrap();
        assert!(toml_str.contains("[capture]"));
        assert!(toml_str.contains("argv = \"off\""));
        assert!(toml_str.contains("[task]"));
    }
}
