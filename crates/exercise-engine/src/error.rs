//! Error types for the exercise engine.
//!
//! This module defines the error hierarchy for engine operations: loading
//! configuration and lessons, driving block sessions, and talking to the
//! grading and tutor collaborators.

use std::path::PathBuf;

/// A specialized `Result` type for exercise engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while running an exercise session.
///
/// Malformed authoring data is deliberately absent here: the parser degrades
/// such content to plain text or zero units and reports it as lint
/// diagnostics instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your exercise.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Lesson Loading Errors
    // ========================================================================
    /// Lesson file was not found at the specified path.
    #[error("Lesson not found: '{path}'\n\nSuggestion: Check the lesson path passed to the loader")]
    LessonNotFound {
        /// Path where the lesson was expected.
        path: PathBuf,
    },

    /// Lesson document could not be decoded.
    #[error("Invalid lesson '{lesson}': {message}\n\nSuggestion: Check that every block has an id, a known kind and a payload matching that kind")]
    LessonParseError {
        /// Lesson identifier or path.
        lesson: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Session Invariant Errors
    // ========================================================================
    /// No block with this id exists in the lesson.
    #[error("Unknown block '{block_id}'")]
    UnknownBlock {
        /// The requested block id.
        block_id: String,
    },

    /// A response does not match the units derived from the block.
    #[error("Response shape mismatch for block '{block_id}' at unit {index}: {message}")]
    ResponseShapeMismatch {
        /// Block that received the response.
        block_id: String,
        /// Offending unit index.
        index: usize,
        /// What was wrong with the value.
        message: String,
    },

    /// A submission for this block is already waiting on the grading service.
    #[error("Block '{block_id}' already has a submission in flight")]
    SubmitInFlight {
        /// The block being submitted.
        block_id: String,
    },

    /// The block has no checkable units, so there is nothing to grade.
    #[error("Block '{block_id}' has nothing to submit")]
    NothingToSubmit {
        /// The ungraded or empty block.
        block_id: String,
    },

    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `LessonNotFound` error.
    #[must_use]
    pub fn lesson_not_found(path: impl Into<PathBuf>) -> Self {
        Self::LessonNotFound { path: path.into() }
    }

    /// Creates a new `LessonParseError`.
    #[must_use]
    pub fn lesson_parse(lesson: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LessonParseError {
            lesson: lesson.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UnknownBlock` error.
    #[must_use]
    pub fn unknown_block(block_id: impl Into<String>) -> Self {
        Self::UnknownBlock {
            block_id: block_id.into(),
        }
    }

    /// Creates a new `ResponseShapeMismatch` error.
    #[must_use]
    pub fn shape_mismatch(
        block_id: impl Into<String>,
        index: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::ResponseShapeMismatch {
            block_id: block_id.into(),
            index,
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if the caller may simply try the same action again later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SubmitInFlight { .. })
    }

    /// Returns `true` if this error signals a programming error rather than
    /// a learner or network condition.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::LessonParseError { .. }
                | Self::UnknownBlock { .. }
                | Self::ResponseShapeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = EngineError::lesson_not_found("/lessons/fractions.json");
        let msg = err.to_string();
        assert!(msg.contains("Lesson not found"));
        assert!(msg.contains("/lessons/fractions.json"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = EngineError::shape_mismatch("quiz-1", 3, "expected choices, got text");
        let msg = err.to_string();
        assert!(msg.contains("quiz-1"));
        assert!(msg.contains("unit 3"));
        assert!(msg.contains("expected choices"));
    }

    #[test]
    fn test_is_transient() {
        let in_flight = EngineError::SubmitInFlight {
            block_id: "b1".to_string(),
        };
        assert!(in_flight.is_transient());

        let unknown = EngineError::unknown_block("b2");
        assert!(!unknown.is_transient());
    }

    #[test]
    fn test_is_fatal() {
        assert!(EngineError::shape_mismatch("b", 0, "bad").is_fatal());
        assert!(EngineError::config_validation("x", "y").is_fatal());

        let nothing = EngineError::NothingToSubmit {
            block_id: "intro".to_string(),
        };
        assert!(!nothing.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = EngineError::invalid_transition("locked", "answering");
        assert_eq!(
            err.to_string(),
            "Invalid state transition: cannot go from locked to answering"
        );
    }
}
