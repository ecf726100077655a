//! Collaborator interfaces.
//!
//! The engine talks to three external services:
//!
//! - [`GradingService`] counts attempts and owns the authoritative count
//! - [`TutorService`] produces end-of-lesson feedback
//! - [`MediaReporter`] receives fire-and-forget media analytics
//!
//! Each is an `async_trait` object so hosts can plug in HTTP clients, while
//! the in-memory implementations here serve the CLI and tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::attempts::AttemptReceipt;

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The service could not be reached or answered with a server error.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates a `Rejected` error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Result type for collaborator calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

// ============================================================================
// Traits
// ============================================================================

/// Records graded attempts and reports attempt counts.
#[async_trait]
pub trait GradingService: Send + Sync {
    /// Records one attempt and returns the count after recording it.
    async fn record_attempt(
        &self,
        lesson_id: &str,
        block_id: &str,
        score: f64,
    ) -> ServiceResult<AttemptReceipt>;

    /// Returns the attempts already recorded for a block.
    async fn attempts_used(&self, lesson_id: &str, block_id: &str) -> ServiceResult<u32>;
}

/// Produces narrative feedback for a finished lesson.
#[async_trait]
pub trait TutorService: Send + Sync {
    /// Returns feedback text for the lesson.
    async fn get_feedback(&self, lesson_id: &str) -> ServiceResult<String>;
}

/// Receives media interaction analytics. Callers never wait on the outcome.
#[async_trait]
pub trait MediaReporter: Send + Sync {
    /// Records one interaction.
    async fn record_interaction(
        &self,
        lesson_id: &str,
        block_id: &str,
        interaction: Interaction,
    ) -> ServiceResult<()>;
}

// ============================================================================
// Media interactions
// ============================================================================

/// Media interaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Block came into view.
    View,
    /// Playback started.
    Play,
    /// Playback paused.
    Pause,
    /// Learner jumped to a position.
    Seek,
    /// Playback reached the end.
    Complete,
}

/// One media interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    /// When the interaction happened.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub event_type: InteractionKind,
    /// Playback position in seconds, for timed media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_timestamp: Option<f64>,
}

impl Interaction {
    /// Creates an interaction stamped now.
    #[must_use]
    pub fn now(event_type: InteractionKind) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            video_timestamp: None,
        }
    }

    /// Sets the playback position.
    #[must_use]
    pub fn at_position(mut self, seconds: f64) -> Self {
        self.video_timestamp = Some(seconds);
        self
    }

    /// Returns `true` if this interaction counts as the learner viewing the block.
    #[must_use]
    pub const fn counts_as_view(&self) -> bool {
        matches!(
            self.event_type,
            InteractionKind::View | InteractionKind::Play | InteractionKind::Complete
        )
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// The collaborators a lesson session talks to.
#[derive(Clone)]
pub struct Services {
    /// Attempt recording.
    pub grading: Arc<dyn GradingService>,
    /// Lesson feedback.
    pub tutor: Arc<dyn TutorService>,
    /// Media analytics.
    pub media: Arc<dyn MediaReporter>,
}

impl Services {
    /// Bundles three collaborators.
    #[must_use]
    pub fn new(
        grading: Arc<dyn GradingService>,
        tutor: Arc<dyn TutorService>,
        media: Arc<dyn MediaReporter>,
    ) -> Self {
        Self {
            grading,
            tutor,
            media,
        }
    }

    /// In-memory collaborators with the given attempt limit and no tutor.
    #[must_use]
    pub fn local(max_attempts: Option<u32>) -> Self {
        Self::new(
            Arc::new(LocalGradingService::new(max_attempts)),
            Arc::new(StaticTutor::unavailable()),
            Arc::new(LogReporter),
        )
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// One attempt accepted by [`LocalGradingService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAttempt {
    /// Lesson id.
    pub lesson_id: String,
    /// Block id.
    pub block_id: String,
    /// Score sent with the attempt.
    pub score: f64,
    /// When it was accepted.
    pub recorded_at: DateTime<Utc>,
}

/// Grading service kept in process memory.
///
/// Enforces the attempt limit the way a real backend would: an attempt past
/// the limit is rejected and not counted.
#[derive(Debug, Default)]
pub struct LocalGradingService {
    max_attempts: Option<u32>,
    counts: Mutex<HashMap<(String, String), u32>>,
    history: Mutex<Vec<RecordedAttempt>>,
}

impl LocalGradingService {
    /// Creates an empty service. A limit of zero means unlimited.
    #[must_use]
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts: max_attempts.filter(|&max| max > 0),
            ..Self::default()
        }
    }

    /// Overwrites a block's count, as an instructor reset would.
    pub async fn set_attempts(&self, lesson_id: &str, block_id: &str, attempts_used: u32) {
        info!(lesson_id, block_id, attempts_used, "Attempt count overridden");
        self.counts
            .lock()
            .await
            .insert((lesson_id.to_string(), block_id.to_string()), attempts_used);
    }

    /// Every accepted attempt, oldest first.
    pub async fn history(&self) -> Vec<RecordedAttempt> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl GradingService for LocalGradingService {
    async fn record_attempt(
        &self,
        lesson_id: &str,
        block_id: &str,
        score: f64,
    ) -> ServiceResult<AttemptReceipt> {
        let mut counts = self.counts.lock().await;
        let used = counts
            .entry((lesson_id.to_string(), block_id.to_string()))
            .or_insert(0);

        if self.max_attempts.is_some_and(|max| *used >= max) {
            return Err(ServiceError::rejected(format!(
                "no attempts left for block '{block_id}'"
            )));
        }
        *used += 1;
        let attempts_used = *used;
        drop(counts);

        self.history.lock().await.push(RecordedAttempt {
            lesson_id: lesson_id.to_string(),
            block_id: block_id.to_string(),
            score,
            recorded_at: Utc::now(),
        });
        debug!(lesson_id, block_id, score, attempts_used, "Attempt stored");
        Ok(AttemptReceipt { attempts_used })
    }

    async fn attempts_used(&self, lesson_id: &str, block_id: &str) -> ServiceResult<u32> {
        let counts = self.counts.lock().await;
        Ok(counts
            .get(&(lesson_id.to_string(), block_id.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

/// Tutor that returns a fixed text, or is unavailable.
#[derive(Debug, Clone, Default)]
pub struct StaticTutor {
    text: Option<String>,
}

impl StaticTutor {
    /// A tutor that always answers with `text`.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    /// A tutor that always fails.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl TutorService for StaticTutor {
    async fn get_feedback(&self, _lesson_id: &str) -> ServiceResult<String> {
        self.text
            .clone()
            .ok_or_else(|| ServiceError::unavailable("no tutor configured"))
    }
}

/// Media reporter that writes interactions to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl MediaReporter for LogReporter {
    async fn record_interaction(
        &self,
        lesson_id: &str,
        block_id: &str,
        interaction: Interaction,
    ) -> ServiceResult<()> {
        debug!(
            lesson_id,
            block_id,
            event_type = ?interaction.event_type,
            position = ?interaction.video_timestamp,
            "Media interaction"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_grading_counts_per_block() {
        let grading = LocalGradingService::new(None);

        let first = grading.record_attempt("l1", "q1", 0.5).await.unwrap();
        let second = grading.record_attempt("l1", "q1", 1.0).await.unwrap();
        let other = grading.record_attempt("l1", "q2", 0.0).await.unwrap();

        assert_eq!(first.attempts_used, 1);
        assert_eq!(second.attempts_used, 2);
        assert_eq!(other.attempts_used, 1);
        assert_eq!(grading.attempts_used("l1", "q1").await.unwrap(), 2);
        assert_eq!(grading.attempts_used("l2", "q1").await.unwrap(), 0);
        assert_eq!(grading.history().await.len(), 3);
    }

    #[tokio::test]
    async fn test_local_grading_enforces_limit() {
        let grading = LocalGradingService::new(Some(1));
        grading.record_attempt("l1", "q1", 1.0).await.unwrap();

        let err = grading.record_attempt("l1", "q1", 1.0).await.unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(_)), "Expected Rejected, got: {err:?}");
        assert_eq!(grading.attempts_used("l1", "q1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_attempts_resets_count() {
        let grading = LocalGradingService::new(Some(2));
        grading.record_attempt("l1", "q1", 0.0).await.unwrap();
        grading.record_attempt("l1", "q1", 0.0).await.unwrap();

        grading.set_attempts("l1", "q1", 0).await;
        let receipt = grading.record_attempt("l1", "q1", 1.0).await.unwrap();
        assert_eq!(receipt.attempts_used, 1);
    }

    #[test]
    fn test_static_tutor() {
        let tutor = StaticTutor::new("Nice work");
        let text = tokio_test::block_on(tutor.get_feedback("l1")).unwrap();
        assert_eq!(text, "Nice work");

        let err = tokio_test::block_on(StaticTutor::unavailable().get_feedback("l1")).unwrap_err();
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_interaction_serialization() {
        let interaction = Interaction::now(InteractionKind::Seek).at_position(42.5);
        let json = serde_json::to_value(&interaction).unwrap();

        assert_eq!(json["eventType"], "seek");
        assert_eq!(json["videoTimestamp"], 42.5);
        assert!(json["timestamp"].is_string());
        assert!(!interaction.counts_as_view());
        assert!(Interaction::now(InteractionKind::Play).counts_as_view());
    }
}
