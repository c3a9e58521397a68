//! TOML-based engine configuration.
//!
//! Holds the tunable thresholds of every fusion component:
//! - Movement stabilizer dwell time
//! - Step validator rejection thresholds
//! - Step estimator cadence heuristic
//! - Distance calculator noise floor and calibration window
//! - Session refresh and location-gap timing
//!
//! Configuration is stored at `~/.config/walktrace/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Movement state stabilizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilizerConfig {
    /// How long a candidate state must persist before it becomes stable.
    #[serde(default = "default_min_dwell_ms")]
    pub min_dwell_ms: u64,
    /// Moving classifications below this magnitude (m/s²) count as stationary.
    #[serde(default = "default_motion_floor")]
    pub motion_floor: f64,
}

/// Step count validator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_negligible_displacement_m")]
    pub negligible_displacement_m: f64,
    #[serde(default = "default_elevated_acceleration")]
    pub elevated_acceleration: f64,
    #[serde(default = "default_max_walking_speed_mps")]
    pub max_walking_speed_mps: f64,
    #[serde(default = "default_large_step_delta")]
    pub large_step_delta: i64,
    /// Number of trailing fixes handed to the validator.
    #[serde(default = "default_recent_location_count")]
    pub recent_location_count: usize,
}

/// Step estimator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default = "default_walking_base_cadence")]
    pub walking_base_cadence: f64,
    #[serde(default = "default_running_base_cadence")]
    pub running_base_cadence: f64,
    #[serde(default = "default_min_walking_cadence")]
    pub min_walking_cadence: f64,
    /// Extra steps/s per m/s² of acceleration.
    #[serde(default = "default_cadence_per_accel")]
    pub cadence_per_accel: f64,
    #[serde(default = "default_max_plausible_cadence")]
    pub max_plausible_cadence: f64,
    #[serde(default = "default_cadence_smoothing")]
    pub cadence_smoothing: f64,
    #[serde(default = "default_stationary_decay")]
    pub stationary_decay: f64,
    /// Interpolation stops this long after the last real tick.
    #[serde(default = "default_max_interpolation_ms")]
    pub max_interpolation_ms: u64,
}

/// Distance calculator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceConfig {
    #[serde(default = "default_noise_floor_m")]
    pub noise_floor_m: f64,
    #[serde(default = "default_step_length_m")]
    pub default_step_length_m: f64,
    #[serde(default = "default_min_calibration_distance_m")]
    pub min_calibration_distance_m: f64,
    #[serde(default = "default_min_calibration_steps")]
    pub min_calibration_steps: u64,
    #[serde(default = "default_calibration_smoothing")]
    pub calibration_smoothing: f64,
    #[serde(default = "default_speed_window")]
    pub speed_window: usize,
}

/// Session orchestration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Snapshot refresh period while a session is active.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// No fix for this long while walking raises a location gap.
    #[serde(default = "default_location_gap_ms")]
    pub location_gap_ms: u64,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/walktrace/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stabilizer: StabilizerConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub distance: DistanceConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

// Default functions
fn default_min_dwell_ms() -> u64 {
    1_500
}
fn default_motion_floor() -> f64 {
    0.15
}
fn default_negligible_displacement_m() -> f64 {
    3.0
}
fn default_elevated_acceleration() -> f64 {
    1.2
}
fn default_max_walking_speed_mps() -> f64 {
    7.0
}
fn default_large_step_delta() -> i64 {
    10
}
fn default_recent_location_count() -> usize {
    5
}
fn default_walking_base_cadence() -> f64 {
    1.4
}
fn default_running_base_cadence() -> f64 {
    2.4
}
fn default_min_walking_cadence() -> f64 {
    1.0
}
fn default_cadence_per_accel() -> f64 {
    0.25
}
fn default_max_plausible_cadence() -> f64 {
    3.5
}
fn default_cadence_smoothing() -> f64 {
    0.3
}
fn default_stationary_decay() -> f64 {
    0.5
}
fn default_max_interpolation_ms() -> u64 {
    3_000
}
fn default_noise_floor_m() -> f64 {
    1.0
}
fn default_step_length_m() -> f64 {
    0.7
}
fn default_min_calibration_distance_m() -> f64 {
    20.0
}
fn default_min_calibration_steps() -> u64 {
    20
}
fn default_calibration_smoothing() -> f64 {
    0.3
}
fn default_speed_window() -> usize {
    3
}
fn default_refresh_interval_ms() -> u64 {
    1_000
}
fn default_location_gap_ms() -> u64 {
    30_000
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            min_dwell_ms: default_min_dwell_ms(),
            motion_floor: default_motion_floor(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            negligible_displacement_m: default_negligible_displacement_m(),
            elevated_acceleration: default_elevated_acceleration(),
            max_walking_speed_mps: default_max_walking_speed_mps(),
            large_step_delta: default_large_step_delta(),
            recent_location_count: default_recent_location_count(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            walking_base_cadence: default_walking_base_cadence(),
            running_base_cadence: default_running_base_cadence(),
            min_walking_cadence: default_min_walking_cadence(),
            cadence_per_accel: default_cadence_per_accel(),
            max_plausible_cadence: default_max_plausible_cadence(),
            cadence_smoothing: default_cadence_smoothing(),
            stationary_decay: default_stationary_decay(),
            max_interpolation_ms: default_max_interpolation_ms(),
        }
    }
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            noise_floor_m: default_noise_floor_m(),
            default_step_length_m: default_step_length_m(),
            min_calibration_distance_m: default_min_calibration_distance_m(),
            min_calibration_steps: default_min_calibration_steps(),
            calibration_smoothing: default_calibration_smoothing(),
            speed_window: default_speed_window(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            location_gap_ms: default_location_gap_ms(),
        }
    }
}

/// Returns `~/.config/walktrace[-dev]/` based on WALKTRACE_ENV.
///
/// Set WALKTRACE_ENV=dev to use the development directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("WALKTRACE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("walktrace-dev")
    } else {
        base_dir.join("walktrace")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::NoDataDir(e.to_string()))?;
    Ok(dir)
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(n) if n.is_f64() => {
                        let parsed = value.parse::<f64>().map_err(|e| invalid(e.to_string()))?;
                        serde_json::Number::from_f64(parsed)
                            .map(serde_json::Value::Number)
                            .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                    }
                    serde_json::Value::Number(_) => {
                        let parsed = value.parse::<i64>().map_err(|e| invalid(e.to_string()))?;
                        serde_json::Value::Number(parsed.into())
                    }
                    serde_json::Value::Object(_) => {
                        return Err(invalid("cannot overwrite a whole section".into()))
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    /// Default location of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            Ok(cfg)
        }
    }

    /// Load and validate a config file at an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the resulting configuration is out of range.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, key: &str, message: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: message.to_string(),
                })
            }
        }

        let e = &self.estimator;
        check(
            e.cadence_smoothing > 0.0 && e.cadence_smoothing <= 1.0,
            "estimator.cadence_smoothing",
            "must be in (0, 1]",
        )?;
        check(
            (0.0..1.0).contains(&e.stationary_decay),
            "estimator.stationary_decay",
            "must be in [0, 1)",
        )?;
        check(
            e.max_plausible_cadence > 0.0,
            "estimator.max_plausible_cadence",
            "must be positive",
        )?;
        check(
            e.min_walking_cadence <= e.max_plausible_cadence,
            "estimator.min_walking_cadence",
            "must not exceed max_plausible_cadence",
        )?;

        let d = &self.distance;
        check(
            d.default_step_length_m > 0.0,
            "distance.default_step_length_m",
            "must be positive",
        )?;
        check(d.noise_floor_m >= 0.0, "distance.noise_floor_m", "must not be negative")?;
        check(
            d.calibration_smoothing > 0.0 && d.calibration_smoothing <= 1.0,
            "distance.calibration_smoothing",
            "must be in (0, 1]",
        )?;
        check(d.speed_window >= 2, "distance.speed_window", "must be at least 2")?;
        check(
            d.min_calibration_steps > 0,
            "distance.min_calibration_steps",
            "must be positive",
        )?;

        check(
            self.session.refresh_interval_ms > 0,
            "session.refresh_interval_ms",
            "must be positive",
        )?;
        check(
            self.validator.large_step_delta > 0,
            "validator.large_step_delta",
            "must be positive",
        )
    }
}
