//! Controller configuration.
//!
//! Loaded from a JSON file (every field optional, falling back to the
//! defaults below) and then overridden from the command line.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config_error;
use crate::errors::BfResult;

/// Which actuator transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Upload the parameter file to the mirror computer over FTP.
    Ftp,
    /// Copy the parameter file into a (usually network-mounted) directory.
    Directory,
    /// Log targets without touching the device.
    DryRun,
}

/// Transport settings for the actuator sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub kind: SinkKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Never written back out when the config is serialized.
    #[serde(skip_serializing)]
    pub password: String,
    /// Remote directory to change into before uploading.
    pub remote_directory: Option<String>,
    /// Destination for [`SinkKind::Directory`].
    pub target_directory: Option<PathBuf>,
    /// Per-operation network timeout.
    pub timeout_secs: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Ftp,
            host: "localhost".to_string(),
            port: 21,
            user: "anonymous".to_string(),
            password: String::new(),
            remote_directory: None,
            target_directory: None,
            timeout_secs: 10,
        }
    }
}

/// Bounded exponential backoff for actuator publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

/// Top-level configuration for a focus optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Directory the camera writes images into.
    pub image_directory: PathBuf,
    /// File extensions (without dot, case-insensitive) treated as images.
    pub image_extensions: Vec<String>,
    /// Whitespace-separated integer file; the first value is the focus.
    pub parameter_file_path: PathBuf,
    /// Images averaged per decision round.
    pub image_group_size: usize,
    pub step_size: i64,
    /// Half-width of the search window around the initial target.
    pub bound_margin: i64,
    /// Hard limit: targets stay within `[-global_bound, global_bound]`.
    pub global_bound: i64,
    pub convergence_tolerance: f64,
    /// Side of the square median filter applied before averaging. 1 disables.
    pub median_kernel: u32,
    pub poll_interval_ms: u64,
    /// Also measure images already present at startup.
    pub process_existing: bool,
    /// Seed for the initial direction; random when unset.
    pub seed: Option<u64>,
    /// Most recent controller events kept in memory; older ones are dropped.
    pub event_log_capacity: usize,
    pub actuator: ActuatorConfig,
    pub retry: RetryConfig,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            image_directory: PathBuf::from("images"),
            image_extensions: vec!["tiff".to_string(), "tif".to_string()],
            parameter_file_path: PathBuf::from("dm_parameters.txt"),
            image_group_size: 2,
            step_size: 1,
            bound_margin: 20,
            global_bound: 200,
            convergence_tolerance: 0.001,
            median_kernel: 5,
            poll_interval_ms: 500,
            process_existing: false,
            seed: None,
            event_log_capacity: 1_000,
            actuator: ActuatorConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl FocusConfig {
    /// Read a JSON config file. Does not validate.
    pub fn from_file(path: &Path) -> BfResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read config {}: {e}", path.display()))?;
        let config = serde_json::from_str(&content)
            .map_err(|e| config_error!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> BfResult<()> {
        if self.image_group_size == 0 {
            return Err(config_error!("image_group_size must be at least 1"));
        }
        if self.step_size <= 0 {
            return Err(config_error!("step_size must be positive, got {}", self.step_size));
        }
        if self.bound_margin < 0 {
            return Err(config_error!(
                "bound_margin must be non-negative, got {}",
                self.bound_margin
            ));
        }
        if self.global_bound <= 0 {
            return Err(config_error!(
                "global_bound must be positive, got {}",
                self.global_bound
            ));
        }
        if !self.convergence_tolerance.is_finite() || self.convergence_tolerance < 0.0 {
            return Err(config_error!(
                "convergence_tolerance must be a non-negative number, got {}",
                self.convergence_tolerance
            ));
        }
        if self.median_kernel == 0 || self.median_kernel % 2 == 0 {
            return Err(config_error!(
                "median_kernel must be odd, got {}",
                self.median_kernel
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(config_error!("poll_interval_ms must be positive"));
        }
        if self.image_extensions.is_empty() {
            return Err(config_error!("image_extensions must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error!("retry.max_attempts must be at least 1"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(config_error!(
                "retry.multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            ));
        }
        match self.actuator.kind {
            SinkKind::Ftp if self.actuator.host.trim().is_empty() => {
                Err(config_error!("actuator.host is required for the ftp sink"))
            }
            SinkKind::Directory if self.actuator.target_directory.is_none() => Err(config_error!(
                "actuator.target_directory is required for the directory sink"
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BfError;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = FocusConfig::default();
        assert_eq!(config.image_group_size, 2);
        assert_eq!(config.step_size, 1);
        assert_eq!(config.bound_margin, 20);
        assert_eq!(config.global_bound, 200);
        assert_eq!(config.convergence_tolerance, 0.001);
        config.validate().unwrap();
    }

    #[test]
    fn zero_group_size_is_a_configuration_error() {
        let config = FocusConfig {
            image_group_size: 0,
            ..FocusConfig::default()
        };
        match config.validate() {
            Err(BfError::Config(message)) => assert!(message.contains("image_group_size")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_numeric_settings() {
        let cases = [
            FocusConfig {
                step_size: 0,
                ..FocusConfig::default()
            },
            FocusConfig {
                bound_margin: -1,
                ..FocusConfig::default()
            },
            FocusConfig {
                global_bound: 0,
                ..FocusConfig::default()
            },
            FocusConfig {
                convergence_tolerance: f64::NAN,
                ..FocusConfig::default()
            },
            FocusConfig {
                median_kernel: 4,
                ..FocusConfig::default()
            },
            FocusConfig {
                poll_interval_ms: 0,
                ..FocusConfig::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "accepted {config:?}");
        }
    }

    #[test]
    fn directory_sink_needs_a_target() {
        let mut config = FocusConfig::default();
        config.actuator.kind = SinkKind::Directory;
        assert!(config.validate().is_err());

        config.actuator.target_directory = Some(PathBuf::from("/mnt/mirror"));
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"image_group_size": 4, "actuator": {{"kind": "dry_run"}}}}"#
        )
        .unwrap();

        let config = FocusConfig::from_file(file.path()).unwrap();
        assert_eq!(config.image_group_size, 4);
        assert_eq!(config.actuator.kind, SinkKind::DryRun);
        assert_eq!(config.actuator.port, 21);
        assert_eq!(config.step_size, 1);
    }

    #[test]
    fn password_is_not_serialized() {
        let mut config = FocusConfig::default();
        config.actuator.password = "secret".to_string();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
