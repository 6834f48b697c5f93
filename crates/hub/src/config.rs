//! TOML config file loading and validation for the initial auto-watering
//! settings. The file is optional; a missing file means defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::controller::{
    AutoWateringSettings, DURATION_RANGE, MIN_INTERVAL_RANGE, THRESHOLD_RANGE,
};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub auto_watering: AutoWateringEntry,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutoWateringEntry {
    pub threshold_percent: i64,
    pub duration_sec: i64,
    pub min_interval_sec: i64,
    pub enabled: bool,
}

impl Default for AutoWateringEntry {
    fn default() -> Self {
        let s = AutoWateringSettings::default();
        Self {
            threshold_percent: s.threshold_percent,
            duration_sec: s.duration_sec,
            min_interval_sec: s.min_interval_sec,
            enabled: s.enabled,
        }
    }
}

impl AutoWateringEntry {
    pub fn into_settings(self) -> AutoWateringSettings {
        AutoWateringSettings {
            threshold_percent: self.threshold_percent,
            duration_sec: self.duration_sec,
            min_interval_sec: self.min_interval_sec,
            enabled: self.enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let a = &self.auto_watering;

        if !THRESHOLD_RANGE.contains(&a.threshold_percent) {
            errors.push(format!(
                "auto_watering.threshold_percent {} out of range [{}, {}]",
                a.threshold_percent,
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            ));
        }
        if !DURATION_RANGE.contains(&a.duration_sec) {
            errors.push(format!(
                "auto_watering.duration_sec {} out of range [{}, {}]",
                a.duration_sec,
                DURATION_RANGE.start(),
                DURATION_RANGE.end()
            ));
        }
        if !MIN_INTERVAL_RANGE.contains(&a.min_interval_sec) {
            errors.push(format!(
                "auto_watering.min_interval_sec {} out of range [{}, {}]",
                a.min_interval_sec,
                MIN_INTERVAL_RANGE.start(),
                MIN_INTERVAL_RANGE.end()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file is not an
/// error — the defaults apply.
pub fn load(path: &str) -> Result<Config> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path, "no config file found, using defaults");
            return Ok(Config::default());
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read config: {path}")),
    };
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[auto_watering]
threshold_percent = 35
duration_sec = 15
min_interval_sec = 600
enabled = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.auto_watering.threshold_percent, 35);
        assert_eq!(config.auto_watering.duration_sec, 15);
        assert_eq!(config.auto_watering.min_interval_sec, 600);
        assert!(!config.auto_watering.enabled);
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        let defaults = AutoWateringSettings::default();
        assert_eq!(config.auto_watering.threshold_percent, defaults.threshold_percent);
        assert_eq!(config.auto_watering.enabled, defaults.enabled);
    }

    #[test]
    fn parse_partial_section_fills_in_defaults() {
        let toml_str = r#"
[auto_watering]
threshold_percent = 25
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.auto_watering.threshold_percent, 25);
        assert_eq!(
            config.auto_watering.duration_sec,
            AutoWateringSettings::default().duration_sec
        );
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn default_config_passes() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.auto_watering.threshold_percent = 101;
        assert_validation_err(&cfg, "threshold_percent");
    }

    #[test]
    fn duration_zero_rejected() {
        let mut cfg = Config::default();
        cfg.auto_watering.duration_sec = 0;
        assert_validation_err(&cfg, "duration_sec");
    }

    #[test]
    fn min_interval_too_small_rejected() {
        let mut cfg = Config::default();
        cfg.auto_watering.min_interval_sec = 30;
        assert_validation_err(&cfg, "min_interval_sec");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.auto_watering.threshold_percent = -5;
        cfg.auto_watering.duration_sec = 600;
        cfg.auto_watering.min_interval_sec = 5;

        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("threshold_percent"), "missing threshold error in: {msg}");
        assert!(msg.contains("duration_sec"), "missing duration error in: {msg}");
        assert!(msg.contains("min_interval_sec"), "missing interval error in: {msg}");
    }

    // -- Conversion -------------------------------------------------------

    #[test]
    fn into_settings_carries_all_fields() {
        let entry = AutoWateringEntry {
            threshold_percent: 50,
            duration_sec: 20,
            min_interval_sec: 120,
            enabled: false,
        };
        let s = entry.into_settings();
        assert_eq!(s.threshold_percent, 50);
        assert_eq!(s.duration_sec, 20);
        assert_eq!(s.min_interval_sec, 120);
        assert!(!s.enabled);
    }
}
