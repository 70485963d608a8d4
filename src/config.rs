//! # Configuration Module
//!
//! Startup configuration for the board: state-machine thresholds, station
//! identity, the ticker message and file locations. Configuration is read
//! once from a JSON file whose location can be overridden on the command
//! line or through the `HASSHAHYO_CONFIG` environment variable; the
//! resolved path is cached on first use.

use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "HASSHAHYO_CONFIG";
/// Configuration file used when neither the CLI nor the environment names one.
const DEFAULT_CONFIG_FILE: &str = "config.json";
/// Schedule file used when neither the CLI nor the config names one.
const DEFAULT_SCHEDULE_FILE: &str = "departures.json";

/// Represents errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file '{path}' is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(
        "threshold windows must satisfy approach >= arrival >= stop \
         (got {approach}/{arrival}/{stop})"
    )]
    ThresholdOrder {
        approach: u32,
        arrival: u32,
        stop: u32,
    },
}

/// Seconds-before-departure windows driving the per-row state machine,
/// plus the post-departure removal delays.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Thresholds {
    /// Widest window: a train inside it is "approaching".
    pub approach_before_secs: u32,
    /// Middle window: "arrived".
    pub arrival_before_secs: u32,
    /// Tightest window: "stopped".
    pub stop_before_secs: u32,
    /// How long a departed row stays on the board before removal.
    pub remove_after_secs: u32,
    /// Lead window for pass-through announcements. Accepted for config
    /// compatibility; the pass ladder keys off `approach_before_secs`.
    #[allow(dead_code)]
    pub pass_before_secs: u32,
    /// How long a passed-through row (and its platform notice) lingers.
    pub pass_remove_after_secs: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            approach_before_secs: 77,
            arrival_before_secs: 57,
            stop_before_secs: 40,
            remove_after_secs: 10,
            pass_before_secs: 20,
            pass_remove_after_secs: 10,
        }
    }
}

impl Thresholds {
    /// Validates the three-tier ladder at startup: the approach window
    /// must be the widest and the stop window the tightest.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.approach_before_secs >= self.arrival_before_secs
            && self.arrival_before_secs >= self.stop_before_secs
        {
            Ok(())
        } else {
            Err(ConfigError::ThresholdOrder {
                approach: self.approach_before_secs,
                arrival: self.arrival_before_secs,
                stop: self.stop_before_secs,
            })
        }
    }
}

/// Whole-board configuration, static for the lifetime of the process.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct BoardConfig {
    /// Station name shown in the header (現在: …). Empty hides it.
    pub station_name: String,
    /// Free-text ticker shown in the bottom banner while service is
    /// running. Empty hides the banner.
    pub ticker_message: String,
    /// Schedule file path; overridden by the CLI positional argument.
    pub schedule_path: String,
    pub thresholds: Thresholds,
}

static CONFIG_PATH_CELL: OnceCell<PathBuf> = OnceCell::new();

/// Resolves the configuration file location from the environment, caching
/// the answer on first use.
pub fn config_path() -> &'static Path {
    CONFIG_PATH_CELL
        .get_or_init(|| {
            env::var(CONFIG_ENV_VAR)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
        })
        .as_path()
}

/// Loads configuration from `path`. A missing file yields the defaults;
/// a present but unreadable or malformed file is an error.
pub fn load_config(path: &Path) -> Result<BoardConfig, ConfigError> {
    if !path.exists() {
        return Ok(BoardConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Picks the schedule file: CLI argument, then config, then the default.
pub fn resolve_schedule_path(cli_path: Option<PathBuf>, config: &BoardConfig) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }
    let configured = config.schedule_path.trim();
    if !configured.is_empty() {
        return PathBuf::from(configured);
    }
    PathBuf::from(DEFAULT_SCHEDULE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn thresholds_default_to_documented_values() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.approach_before_secs, 77);
        assert_eq!(thresholds.arrival_before_secs, 57);
        assert_eq!(thresholds.stop_before_secs, 40);
        assert_eq!(thresholds.remove_after_secs, 10);
        assert_eq!(thresholds.pass_before_secs, 20);
        assert_eq!(thresholds.pass_remove_after_secs, 10);
        assert!(thresholds.validate().is_ok());
    }

    #[test]
    fn partial_config_keeps_defaults_elsewhere() {
        let config: BoardConfig = serde_json::from_str(
            r#"{
                "station_name": "東京",
                "thresholds": {"approach_before_secs": 120}
            }"#,
        )
        .unwrap();
        assert_eq!(config.station_name, "東京");
        assert_eq!(config.thresholds.approach_before_secs, 120);
        assert_eq!(config.thresholds.arrival_before_secs, 57);
        assert!(config.ticker_message.is_empty());
    }

    #[test]
    fn unknown_config_fields_are_ignored() {
        let config: BoardConfig = serde_json::from_str(
            r#"{"ticker_message": "ようこそ", "sound": {"volume": 100}}"#,
        )
        .unwrap();
        assert_eq!(config.ticker_message, "ようこそ");
    }

    #[test]
    fn validate_rejects_inverted_ladders() {
        let thresholds = Thresholds {
            arrival_before_secs: 90,
            ..Thresholds::default()
        };
        let error = thresholds.validate().unwrap_err();
        assert!(matches!(error, ConfigError::ThresholdOrder { .. }));

        let thresholds = Thresholds {
            stop_before_secs: 60,
            ..Thresholds::default()
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn load_config_handles_missing_and_malformed_files() {
        let missing = load_config(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(missing.thresholds, Thresholds::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn schedule_path_prefers_cli_then_config() {
        let config = BoardConfig {
            schedule_path: "from_config.json".to_string(),
            ..BoardConfig::default()
        };

        let cli = resolve_schedule_path(Some(PathBuf::from("cli.json")), &config);
        assert_eq!(cli, PathBuf::from("cli.json"));

        let configured = resolve_schedule_path(None, &config);
        assert_eq!(configured, PathBuf::from("from_config.json"));

        let fallback = resolve_schedule_path(None, &BoardConfig::default());
        assert_eq!(fallback, PathBuf::from(DEFAULT_SCHEDULE_FILE));
    }
}
