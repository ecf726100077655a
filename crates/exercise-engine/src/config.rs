//! Configuration for exercise sessions.
//!
//! Settings are read from an optional `exercise.json` file. Missing files
//! yield defaults, every field is optional, and the result is validated
//! before use.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "exercise.json";

/// Default timeout for a grading round-trip in seconds.
const fn default_recording_timeout() -> u64 {
    10
}

/// Default timeout for a tutor feedback request in seconds.
const fn default_feedback_timeout() -> u64 {
    10
}

/// Default score fraction a learner needs to pass.
const fn default_pass_threshold() -> f64 {
    0.7
}

/// Default message shown when the tutor service cannot be reached.
fn default_feedback_fallback() -> String {
    "Great job completing this assessment! Keep practicing to improve your results in the next lessons.".to_string()
}

/// Default per-subscriber event buffer size.
const fn default_event_capacity() -> usize {
    100
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Seconds to wait for the grading service before marking a recording pending.
    #[serde(default = "default_recording_timeout")]
    pub recording_timeout_secs: u64,

    /// Seconds to wait for tutor feedback before falling back.
    #[serde(default = "default_feedback_timeout")]
    pub feedback_timeout_secs: u64,

    /// Minimum score fraction considered a pass.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,

    /// Static text shown when tutor feedback is unavailable.
    #[serde(default = "default_feedback_fallback")]
    pub feedback_fallback: String,

    /// Fixed seed for presentation shuffles. `None` draws from OS entropy.
    #[serde(default)]
    pub shuffle_seed: Option<u64>,

    /// Buffer size for session event subscribers.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recording_timeout_secs: default_recording_timeout(),
            feedback_timeout_secs: default_feedback_timeout(),
            pass_threshold: default_pass_threshold(),
            feedback_fallback: default_feedback_fallback(),
            shuffle_seed: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            EngineError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `exercise.json` from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ConfigParseError` if the file cannot be read or
    /// decoded, and `EngineError::ConfigValidationError` if values are out of
    /// range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(EngineError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| EngineError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.recording_timeout_secs == 0 {
            return Err(EngineError::config_validation(
                "recordingTimeoutSecs must be greater than 0",
                "Set recordingTimeoutSecs to at least 1 second in your exercise.json",
            ));
        }

        if self.feedback_timeout_secs == 0 {
            return Err(EngineError::config_validation(
                "feedbackTimeoutSecs must be greater than 0",
                "Set feedbackTimeoutSecs to at least 1 second in your exercise.json",
            ));
        }

        if !(self.pass_threshold > 0.0 && self.pass_threshold <= 1.0) {
            return Err(EngineError::config_validation(
                format!("passThreshold must be in (0, 1], got {}", self.pass_threshold),
                "Use a fraction such as 0.7 for a 70% pass mark",
            ));
        }

        if self.feedback_fallback.trim().is_empty() {
            return Err(EngineError::config_validation(
                "feedbackFallback must not be empty",
                "Provide a short message to show when tutor feedback is unavailable",
            ));
        }

        if self.event_capacity == 0 {
            return Err(EngineError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 (100 is a good default)",
            ));
        }

        Ok(())
    }

    /// Grading round-trip timeout as a [`Duration`].
    #[must_use]
    pub const fn recording_timeout(&self) -> Duration {
        Duration::from_secs(self.recording_timeout_secs)
    }

    /// Tutor feedback timeout as a [`Duration`].
    #[must_use]
    pub const fn feedback_timeout(&self) -> Duration {
        Duration::from_secs(self.feedback_timeout_secs)
    }
}
