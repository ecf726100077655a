//! Attempt and lock policy.
//!
//! Attempt counts belong to the grading service. The engine holds a copy for
//! display, asks the service to count each submission, and adopts whatever
//! count comes back.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// AttemptState
// ============================================================================

/// Attempts consumed against an optional limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptState {
    /// Attempts the grading service has recorded.
    pub attempts_used: u32,
    /// Upper bound, `None` for unlimited.
    pub max_attempts: Option<u32>,
}

impl AttemptState {
    /// Creates an attempt state. A limit of zero means unlimited.
    ///
    /// # Examples
    ///
    /// ```
    /// use exercise_engine::AttemptState;
    ///
    /// assert_eq!(AttemptState::new(1, Some(0)).max_attempts, None);
    /// assert!(AttemptState::new(2, Some(2)).is_exhausted());
    /// assert!(!AttemptState::new(50, None).is_exhausted());
    /// ```
    #[must_use]
    pub fn new(attempts_used: u32, max_attempts: Option<u32>) -> Self {
        Self {
            attempts_used,
            max_attempts: max_attempts.filter(|&max| max > 0),
        }
    }

    /// Returns `true` once no further attempt is permitted.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.max_attempts
            .is_some_and(|max| self.attempts_used >= max)
    }

    /// Attempts left, `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.max_attempts
            .map(|max| max.saturating_sub(self.attempts_used))
    }

    /// Adopts the grading service's count.
    ///
    /// The service may report a lower count than held locally after an
    /// external reset; the service still wins.
    pub fn adopt(&mut self, receipt: AttemptReceipt) {
        self.attempts_used = receipt.attempts_used;
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_attempts {
            Some(max) => write!(f, "{} of {max}", self.attempts_used),
            None => write!(f, "{}", self.attempts_used),
        }
    }
}

/// Authoritative count returned by the grading service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptReceipt {
    /// Attempts recorded so far, including the one just submitted.
    pub attempts_used: u32,
}

// ============================================================================
// Block phases
// ============================================================================

/// Interaction phase of one block.
///
/// The phase transitions through these states:
/// - `Unlocked` -> `Answering` on first input
/// - `Answering` -> `Submitted` on validate
/// - From `Submitted`, once the attempt is recorded:
///   - `Retryable` (retries allowed and attempts remain)
///   - `Locked` (attempts exhausted)
///   - stays `Submitted` (retries disabled)
/// - `Retryable` -> `Unlocked` on try again
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockPhase {
    /// Ready for input, nothing entered yet.
    #[default]
    Unlocked,
    /// Learner has entered something.
    Answering,
    /// Graded; outcome is shown.
    Submitted,
    /// Graded, and the learner may try again.
    Retryable,
    /// No attempts remain. Outcome stays visible.
    Locked,
}

impl BlockPhase {
    /// Returns `true` if learner input is accepted.
    ///
    /// # Examples
    ///
    /// ```
    /// use exercise_engine::BlockPhase;
    ///
    /// assert!(BlockPhase::Unlocked.accepts_input());
    /// assert!(BlockPhase::Answering.accepts_input());
    /// assert!(!BlockPhase::Locked.accepts_input());
    /// ```
    #[must_use]
    pub const fn accepts_input(&self) -> bool {
        matches!(self, Self::Unlocked | Self::Answering)
    }

    /// Returns `true` if a grade has been produced for the current attempt.
    #[must_use]
    pub const fn has_outcome(&self) -> bool {
        matches!(self, Self::Submitted | Self::Retryable | Self::Locked)
    }

    /// Returns `true` for the phase that only an external reset leaves.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Locked)
    }

    /// Snake-case name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Answering => "answering",
            Self::Submitted => "submitted",
            Self::Retryable => "retryable",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for BlockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AttemptPolicy
// ============================================================================

/// Retry and limit settings for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptPolicy {
    /// Whether a graded block may be tried again.
    pub allow_retry: bool,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self { allow_retry: true }
    }
}

impl AttemptPolicy {
    /// Phase a block mounts in. Retry settings play no part here.
    #[must_use]
    pub fn initial_phase(attempts: &AttemptState) -> BlockPhase {
        if attempts.is_exhausted() {
            BlockPhase::Locked
        } else {
            BlockPhase::Unlocked
        }
    }

    /// Phase after the grading service has confirmed an attempt.
    #[must_use]
    pub fn after_recording(&self, attempts: &AttemptState) -> BlockPhase {
        if attempts.is_exhausted() {
            BlockPhase::Locked
        } else if self.allow_retry {
            BlockPhase::Retryable
        } else {
            BlockPhase::Submitted
        }
    }
}

// ============================================================================
// RecordingStatus
// ============================================================================

/// Durability of the latest attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordingStatus {
    /// Nothing submitted yet this attempt.
    #[default]
    Idle,
    /// Waiting on the grading service.
    InFlight,
    /// The service counted the attempt.
    Recorded,
    /// The service did not answer in time. The attempt may or may not count.
    Pending,
    /// The service refused or could not be reached.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl RecordingStatus {
    /// Returns `true` if the learner should be offered a manual re-send.
    #[must_use]
    pub const fn needs_retry(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed { .. })
    }

    /// Returns `true` while a request is outstanding.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight)
    }

    /// Snake-case status name, as serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InFlight => "in_flight",
            Self::Recorded => "recorded",
            Self::Pending => "pending",
            Self::Failed { .. } => "failed",
        }
    }
}
