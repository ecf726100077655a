//! Lessons and the lesson-level session.
//!
//! A [`LessonDefinition`] is the authored document. A [`LessonSession`]
//! mounts one [`BlockSession`] per block, routes learner actions to them, and
//! performs the service round-trips: recording attempts, fetching tutor
//! feedback and reporting media interactions.
//!
//! Every phase change is published on the session's [`EventBroadcaster`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::attempts::{AttemptState, BlockPhase, RecordingStatus};
use crate::block::BlockDefinition;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventBroadcaster, SessionEvent};
use crate::parser::{diagnose, Diagnostic};
use crate::response::ResponseValue;
use crate::scoring::GradeResult;
use crate::services::{Interaction, Services};
use crate::session::{BlockSession, BlockSnapshot};

const fn default_allow_retry() -> bool {
    true
}

// ============================================================================
// LessonDefinition
// ============================================================================

/// An authored lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDefinition {
    /// Lesson identifier, passed to every collaborator.
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Attempt limit per block, `None` or 0 for unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Whether graded blocks may be retried, unless a block overrides it.
    #[serde(default = "default_allow_retry")]
    pub allow_retry: bool,
    /// Blocks in display order.
    #[serde(default)]
    pub blocks: Vec<BlockDefinition>,
}

impl LessonDefinition {
    /// Parses a lesson from JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LessonParseError` if the document does not decode
    /// or fails validation.
    pub fn from_json(label: &str, json: &str) -> Result<Self> {
        let lesson: Self =
            serde_json::from_str(json).map_err(|e| EngineError::lesson_parse(label, e.to_string()))?;
        lesson.validate()?;
        Ok(lesson)
    }

    /// Loads a lesson from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LessonNotFound` if the file does not exist and
    /// `EngineError::LessonParseError` if it cannot be decoded.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::lesson_not_found(path));
            }
            Err(e) => return Err(e.into()),
        };
        let lesson = Self::from_json(&path.display().to_string(), &contents)?;
        debug!(path = %path.display(), blocks = lesson.blocks.len(), "Lesson loaded");
        Ok(lesson)
    }

    /// Checks structural rules that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LessonParseError` for an empty lesson id, an empty
    /// block id or a duplicated block id.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::lesson_parse("<unnamed>", "lesson id must not be empty"));
        }

        let mut seen = HashSet::new();
        for block in &self.blocks {
            if block.id.trim().is_empty() {
                return Err(EngineError::lesson_parse(&self.id, "block id must not be empty"));
            }
            if !seen.insert(block.id.as_str()) {
                return Err(EngineError::lesson_parse(
                    &self.id,
                    format!("duplicate block id '{}'", block.id),
                ));
            }
        }
        Ok(())
    }

    /// Finds a block by id.
    #[must_use]
    pub fn block(&self, block_id: &str) -> Option<&BlockDefinition> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    /// Authoring diagnostics for every block.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.blocks.iter().flat_map(diagnose).collect()
    }
}

// ============================================================================
// Lesson loading
// ============================================================================

/// Supplies lesson definitions by id.
pub trait LessonLoader: Send + Sync {
    /// Loads one lesson.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LessonNotFound` for an unknown id.
    fn load(&self, lesson_id: &str) -> Result<LessonDefinition>;
}

/// Loads `<root>/<lesson_id>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    /// Creates a loader rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LessonLoader for DirectoryLoader {
    fn load(&self, lesson_id: &str) -> Result<LessonDefinition> {
        let path = self.root.join(format!("{lesson_id}.json"));
        let lesson = LessonDefinition::load(&path)?;
        if lesson.id != lesson_id {
            warn!(
                requested = lesson_id,
                found = %lesson.id,
                "Lesson file id differs from its file name"
            );
        }
        Ok(lesson)
    }
}

// ============================================================================
// Session outputs
// ============================================================================

/// Outcome of a submit, returned even when recording failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    /// Block id.
    pub block_id: String,
    /// The local grade, always available.
    pub grade: GradeResult,
    /// Phase after the round-trip.
    pub phase: BlockPhase,
    /// Attempt count after the round-trip.
    pub attempts: AttemptState,
    /// Whether the attempt was durably recorded.
    pub recording: RecordingStatus,
}

impl SubmitOutcome {
    /// Returns `true` if the grading service counted the attempt.
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        self.recording == RecordingStatus::Recorded
    }
}

/// End-of-lesson feedback shown to the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Text to display.
    pub text: String,
    /// `true` when the static fallback replaced tutor output.
    pub degraded: bool,
}

/// Serializable view of a whole lesson session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSnapshot {
    /// Lesson id.
    pub lesson_id: String,
    /// Display title.
    pub title: String,
    /// Every block in display order.
    pub blocks: Vec<BlockSnapshot>,
    /// Aggregate score in `[0, 1]`.
    pub score: f64,
    /// Pass mark in force.
    pub pass_threshold: f64,
    /// Whether every block is settled.
    pub complete: bool,
    /// Feedback, once fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

// ============================================================================
// LessonSession
// ============================================================================

/// One learner working through one lesson.
#[derive(Debug)]
pub struct LessonSession {
    lesson_id: String,
    title: String,
    blocks: Vec<BlockSession>,
    config: EngineConfig,
    services: Services,
    events: EventBroadcaster,
    feedback: Option<Feedback>,
    completed: bool,
}

impl LessonSession {
    /// Opens a session with a fresh event broadcaster.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LessonParseError` if the lesson fails validation.
    pub async fn open(
        lesson: LessonDefinition,
        config: EngineConfig,
        services: Services,
    ) -> Result<Self> {
        let events = EventBroadcaster::new(config.event_capacity);
        Self::open_with_events(lesson, config, services, events).await
    }

    /// Opens a session that publishes on an existing broadcaster, so callers
    /// can subscribe before blocks mount.
    ///
    /// Attempt counts are read from the grading service for every scored
    /// block. A failed read mounts the block with zero used attempts; the
    /// next receipt corrects it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LessonParseError` if the lesson fails validation.
    pub async fn open_with_events(
        lesson: LessonDefinition,
        config: EngineConfig,
        services: Services,
        events: EventBroadcaster,
    ) -> Result<Self> {
        lesson.validate()?;
        let mut rng = match config.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut blocks = Vec::with_capacity(lesson.blocks.len());
        for block in lesson.blocks {
            let used = if block.kind().is_scored() {
                let read = timeout(
                    config.recording_timeout(),
                    services.grading.attempts_used(&lesson.id, &block.id),
                )
                .await;
                match read {
                    Ok(Ok(used)) => used,
                    Ok(Err(e)) => {
                        warn!(block_id = %block.id, error = %e, "Could not read attempt count");
                        0
                    }
                    Err(_) => {
                        warn!(block_id = %block.id, "Attempt count read timed out");
                        0
                    }
                }
            } else {
                0
            };

            let attempts = AttemptState::new(used, lesson.max_attempts);
            let session = BlockSession::mount(block, attempts, lesson.allow_retry, &mut rng);
            events.send(SessionEvent::block_mounted(
                session.id(),
                session.kind(),
                session.phase(),
                *session.attempts(),
            ));
            blocks.push(session);
        }

        info!(lesson_id = %lesson.id, blocks = blocks.len(), "Lesson session opened");
        Ok(Self {
            lesson_id: lesson.id,
            title: lesson.title,
            blocks,
            config,
            services,
            events,
            feedback: None,
            completed: false,
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Lesson id.
    #[must_use]
    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    /// Blocks in display order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockSession] {
        &self.blocks
    }

    /// Looks up a block.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownBlock` if no block has this id.
    pub fn block(&self, block_id: &str) -> Result<&BlockSession> {
        self.blocks
            .iter()
            .find(|b| b.id() == block_id)
            .ok_or_else(|| unknown(block_id))
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The broadcaster this session publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// The configuration in force.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Learner actions
    // ------------------------------------------------------------------------

    /// Runs an action against one block, publishing any phase change.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownBlock` for a bad id, or whatever the
    /// action returns.
    pub fn interact<T>(
        &mut self,
        block_id: &str,
        action: impl FnOnce(&mut BlockSession) -> Result<T>,
    ) -> Result<T> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.id() == block_id)
            .ok_or_else(|| unknown(block_id))?;

        let before = block.phase();
        let result = action(block);
        let after = block.phase();
        if before != after {
            self.events
                .send(SessionEvent::phase_changed(block_id, before, after));
        }
        result
    }

    /// Records input for one unit of a block.
    ///
    /// # Errors
    ///
    /// See [`BlockSession::input`].
    pub fn input(&mut self, block_id: &str, index: usize, value: ResponseValue) -> Result<()> {
        self.interact(block_id, |b| b.input(index, value))
    }

    /// Grades a block and records the attempt with the grading service.
    ///
    /// The grade is returned whether or not recording succeeds; the outcome's
    /// `recording` says which.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SubmitInFlight`, `NothingToSubmit` or
    /// `InvalidStateTransition` when the block cannot be submitted.
    pub async fn submit(&mut self, block_id: &str) -> Result<SubmitOutcome> {
        let grade = self.interact(block_id, BlockSession::begin_submit)?;
        self.events
            .send(SessionEvent::graded(block_id, grade.clone()));
        self.record(block_id, grade.score).await
    }

    /// Re-sends a failed or pending recording.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidStateTransition` unless the last
    /// recording failed or timed out.
    pub async fn retry_recording(&mut self, block_id: &str) -> Result<SubmitOutcome> {
        let score = self.interact(block_id, BlockSession::begin_rerecord)?;
        self.record(block_id, score).await
    }

    /// Clears a retryable block for another attempt.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidStateTransition` unless the block is
    /// retryable with attempts left.
    pub fn retry(&mut self, block_id: &str) -> Result<()> {
        self.interact(block_id, BlockSession::retry)
    }

    /// Applies an attempt count changed outside the engine.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownBlock` for a bad id.
    pub fn external_reset(&mut self, block_id: &str, attempts_used: u32) -> Result<()> {
        self.interact(block_id, |b| {
            b.external_reset(attempts_used);
            Ok(())
        })
    }

    /// Discards unsent input when the learner navigates away from a block.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownBlock` for a bad id.
    pub fn leave(&mut self, block_id: &str) -> Result<()> {
        self.interact(block_id, |b| {
            b.discard_unsent();
            Ok(())
        })
    }

    /// Reports a media interaction without waiting for the reporter.
    ///
    /// View, play and complete events mark the block viewed. The report
    /// itself runs on a spawned task and its failures are only logged.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownBlock` for a bad id.
    pub fn report_interaction(&mut self, block_id: &str, interaction: Interaction) -> Result<()> {
        let counts_as_view = interaction.counts_as_view();
        self.interact(block_id, |b| {
            if counts_as_view {
                b.mark_viewed();
            }
            Ok(())
        })?;

        match Handle::try_current() {
            Ok(handle) => {
                let media = Arc::clone(&self.services.media);
                let lesson_id = self.lesson_id.clone();
                let block_id = block_id.to_string();
                handle.spawn(async move {
                    if let Err(e) = media
                        .record_interaction(&lesson_id, &block_id, interaction)
                        .await
                    {
                        warn!(block_id = %block_id, error = %e, "Media interaction not reported");
                    }
                });
            }
            Err(_) => {
                debug!(block_id, "No async runtime; media interaction dropped");
            }
        }

        self.check_completion();
        Ok(())
    }

    /// Fetches tutor feedback, falling back to the configured message.
    ///
    /// Successful feedback is cached; a fallback is not, so a later call may
    /// still reach the tutor.
    pub async fn feedback(&mut self) -> Feedback {
        if let Some(feedback) = &self.feedback {
            return feedback.clone();
        }

        let reply = timeout(
            self.config.feedback_timeout(),
            self.services.tutor.get_feedback(&self.lesson_id),
        )
        .await;

        let feedback = match reply {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                let feedback = Feedback {
                    text,
                    degraded: false,
                };
                self.feedback = Some(feedback.clone());
                feedback
            }
            Ok(Ok(_)) => self.fallback("tutor returned empty feedback"),
            Ok(Err(e)) => self.fallback(&e.to_string()),
            Err(_) => self.fallback("tutor timed out"),
        };

        self.events.send(SessionEvent::feedback_ready(
            feedback.text.clone(),
            feedback.degraded,
        ));
        feedback
    }

    // ------------------------------------------------------------------------
    // Lesson state
    // ------------------------------------------------------------------------

    /// Returns `true` once every block is settled.
    ///
    /// Scored blocks settle on their first grade; ungraded blocks settle when
    /// viewed. A lesson with no blocks is never complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.blocks.is_empty() && self.blocks.iter().all(BlockSession::is_settled)
    }

    /// Mean score of the scored blocks that have a grade, or 0.0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate_score(&self) -> f64 {
        let scores: Vec<f64> = self
            .blocks
            .iter()
            .filter(|b| b.kind().is_scored())
            .filter_map(|b| b.last_grade().map(|g| g.score))
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    /// Serializable view of the session.
    #[must_use]
    pub fn snapshot(&self) -> LessonSnapshot {
        LessonSnapshot {
            lesson_id: self.lesson_id.clone(),
            title: self.title.clone(),
            blocks: self.blocks.iter().map(BlockSession::snapshot).collect(),
            score: self.aggregate_score(),
            pass_threshold: self.config.pass_threshold,
            complete: self.is_complete(),
            feedback: self.feedback.clone(),
            taken_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn record(&mut self, block_id: &str, score: f64) -> Result<SubmitOutcome> {
        let reply = timeout(
            self.config.recording_timeout(),
            self.services
                .grading
                .record_attempt(&self.lesson_id, block_id, score),
        )
        .await;

        match reply {
            Ok(Ok(receipt)) => {
                self.interact(block_id, |b| b.record_succeeded(receipt))?;
                let attempts = *self.block(block_id)?.attempts();
                self.events
                    .send(SessionEvent::attempt_recorded(block_id, attempts));
            }
            Ok(Err(e)) => {
                self.interact(block_id, |b| b.record_failed(e.to_string()))?;
                self.publish_recording_failure(block_id)?;
            }
            Err(_) => {
                self.interact(block_id, BlockSession::record_timed_out)?;
                self.publish_recording_failure(block_id)?;
            }
        }

        self.check_completion();

        let block = self.block(block_id)?;
        Ok(SubmitOutcome {
            block_id: block_id.to_string(),
            grade: block.last_grade().cloned().unwrap_or_else(GradeResult::empty),
            phase: block.phase(),
            attempts: *block.attempts(),
            recording: block.recording().clone(),
        })
    }

    fn publish_recording_failure(&self, block_id: &str) -> Result<()> {
        let recording = self.block(block_id)?.recording().clone();
        self.events
            .send(SessionEvent::recording_failed(block_id, recording));
        Ok(())
    }

    fn fallback(&self, reason: &str) -> Feedback {
        warn!(lesson_id = %self.lesson_id, reason, "Using fallback feedback");
        Feedback {
            text: self.config.feedback_fallback.clone(),
            degraded: true,
        }
    }

    fn check_completion(&mut self) {
        if self.completed || !self.is_complete() {
            return;
        }
        self.completed = true;
        let score = self.aggregate_score();
        info!(lesson_id = %self.lesson_id, score, "Lesson complete");
        self.events
            .send(SessionEvent::lesson_complete(self.lesson_id.clone(), score));
    }
}

fn unknown(block_id: &str) -> EngineError {
    error!(block_id, "Unknown block id");
    EngineError::unknown_block(block_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::attempts::AttemptReceipt;
    use crate::services::{
        GradingService, InteractionKind, LocalGradingService, LogReporter, ServiceError,
        ServiceResult, StaticTutor,
    };

    const LESSON: &str = r#"{
        "id": "geo-1",
        "title": "European capitals",
        "maxAttempts": 2,
        "blocks": [
            { "id": "intro", "kind": "description", "payload": { "text": "Welcome" } },
            { "id": "fb", "kind": "fill-in-the-blanks",
              "payload": { "text": "The [[capital]] of France is [[Paris]]." } },
            { "id": "sa", "kind": "short_answer",
              "payload": { "prompt": "Capital of Spain?", "correctAnswers": ["Madrid"] } }
        ]
    }"#;

    struct DownGrading;

    #[async_trait]
    impl GradingService for DownGrading {
        async fn record_attempt(&self, _: &str, _: &str, _: f64) -> ServiceResult<AttemptReceipt> {
            Err(ServiceError::unavailable("503"))
        }

        async fn attempts_used(&self, _: &str, _: &str) -> ServiceResult<u32> {
            Err(ServiceError::unavailable("503"))
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            shuffle_seed: Some(7),
            ..EngineConfig::default()
        }
    }

    fn lesson() -> LessonDefinition {
        LessonDefinition::from_json("test", LESSON).unwrap()
    }

    fn services_with(grading: Arc<dyn GradingService>, tutor: StaticTutor) -> Services {
        Services::new(grading, Arc::new(tutor), Arc::new(LogReporter))
    }

    // ------------------------------------------------------------------------
    // Definition tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_lesson_parses_with_defaults() {
        let lesson = lesson();
        assert_eq!(lesson.id, "geo-1");
        assert_eq!(lesson.max_attempts, Some(2));
        assert!(lesson.allow_retry);
        assert_eq!(lesson.blocks.len(), 3);
        assert!(lesson.block("sa").is_some());
        assert!(lesson.diagnostics().is_empty());
    }

    #[test]
    fn test_duplicate_block_ids_rejected() {
        let json = r#"{"id":"l","blocks":[
            {"id":"a","kind":"description","payload":{"text":"x"}},
            {"id":"a","kind":"media","payload":{"url":"v.mp4"}}
        ]}"#;
        let err = LessonDefinition::from_json("dup", json).unwrap_err();
        assert!(
            matches!(&err, EngineError::LessonParseError { message, .. } if message.contains("duplicate")),
            "Expected LessonParseError, got: {err:?}"
        );
    }

    #[test]
    fn test_bad_payload_rejected() {
        let json = r#"{"id":"l","blocks":[{"id":"q","kind":"quiz","payload":{"questions":7}}]}"#;
        let err = LessonDefinition::from_json("bad", json).unwrap_err();
        assert!(matches!(err, EngineError::LessonParseError { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = LessonDefinition::load(Path::new("/nonexistent/lesson.json")).unwrap_err();
        assert!(matches!(err, EngineError::LessonNotFound { .. }));

        let err = DirectoryLoader::new("/nonexistent").load("geo-1").unwrap_err();
        assert!(matches!(err, EngineError::LessonNotFound { .. }));
    }

    // ------------------------------------------------------------------------
    // Session tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_open_reads_attempt_counts() {
        let grading = Arc::new(LocalGradingService::new(Some(2)));
        grading.set_attempts("geo-1", "fb", 2).await;

        let session = LessonSession::open(
            lesson(),
            config(),
            services_with(grading, StaticTutor::unavailable()),
        )
        .await
        .unwrap();

        assert_eq!(session.block("fb").unwrap().phase(), BlockPhase::Locked);
        assert_eq!(session.block("sa").unwrap().phase(), BlockPhase::Unlocked);
        assert!(matches!(
            session.block("nope").unwrap_err(),
            EngineError::UnknownBlock { .. }
        ));
    }

    #[tokio::test]
    async fn test_submit_records_and_publishes() {
        let grading = Arc::new(LocalGradingService::new(Some(2)));
        let events = EventBroadcaster::new(32);
        let mut receiver = events.subscribe();
        let mut session = LessonSession::open_with_events(
            lesson(),
            config(),
            services_with(grading.clone(), StaticTutor::unavailable()),
            events,
        )
        .await
        .unwrap();

        session
            .input("fb", 0, ResponseValue::Text("capital".into()))
            .unwrap();
        let outcome = session.submit("fb").await.unwrap();

        assert!(outcome.is_recorded());
        assert!((outcome.grade.score - 0.5).abs() < f64::EPSILON);
        assert_eq!(outcome.phase, BlockPhase::Retryable);
        assert_eq!(outcome.attempts.attempts_used, 1);
        assert_eq!(grading.history().await.len(), 1);

        let mut names = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            names.push(event.event_name());
        }
        assert_eq!(
            names,
            vec![
                "block_mounted",
                "block_mounted",
                "block_mounted",
                "phase_changed",
                "phase_changed",
                "graded",
                "phase_changed",
                "attempt_recorded",
            ]
        );
    }

    #[tokio::test]
    async fn test_recording_failure_keeps_grade() {
        let mut session = LessonSession::open(
            lesson(),
            config(),
            services_with(Arc::new(DownGrading), StaticTutor::unavailable()),
        )
        .await
        .unwrap();

        session
            .input("sa", 0, ResponseValue::Text(" madrid ".into()))
            .unwrap();
        let outcome = session.submit("sa").await.unwrap();

        assert!(!outcome.is_recorded());
        assert!((outcome.grade.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.phase, BlockPhase::Submitted);
        assert_eq!(outcome.attempts.attempts_used, 0);
        assert!(matches!(outcome.recording, RecordingStatus::Failed { .. }));

        let again = session.retry_recording("sa").await.unwrap();
        assert!(matches!(again.recording, RecordingStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_feedback_fallback_and_cache() {
        let mut degraded = LessonSession::open(lesson(), config(), Services::local(None))
            .await
            .unwrap();
        let feedback = degraded.feedback().await;
        assert!(feedback.degraded);
        assert_eq!(feedback.text, config().feedback_fallback);
        assert!(degraded.snapshot().feedback.is_none());

        let mut live = LessonSession::open(
            lesson(),
            config(),
            services_with(
                Arc::new(LocalGradingService::new(None)),
                StaticTutor::new("Strong work on capitals."),
            ),
        )
        .await
        .unwrap();
        let feedback = live.feedback().await;
        assert!(!feedback.degraded);
        assert_eq!(live.feedback().await, feedback);
        assert_eq!(live.snapshot().feedback, Some(feedback));
    }

    #[tokio::test]
    async fn test_completion_and_aggregate() {
        let events = EventBroadcaster::new(64);
        let mut receiver = events.subscribe();
        let mut session =
            LessonSession::open_with_events(lesson(), config(), Services::local(Some(2)), events)
                .await
                .unwrap();

        session
            .input("fb", 1, ResponseValue::Text("Paris".into()))
            .unwrap();
        session.submit("fb").await.unwrap();
        session
            .input("sa", 0, ResponseValue::Text("Madrid".into()))
            .unwrap();
        session.submit("sa").await.unwrap();
        assert!(!session.is_complete());

        session
            .report_interaction("intro", Interaction::now(InteractionKind::View))
            .unwrap();
        assert!(session.is_complete());
        assert!((session.aggregate_score() - 0.75).abs() < f64::EPSILON);

        let mut completions = 0;
        while let Ok(event) = receiver.try_recv() {
            if let SessionEvent::LessonComplete(payload) = event {
                completions += 1;
                assert_eq!(payload.lesson_id, "geo-1");
            }
        }
        assert_eq!(completions, 1);

        let snapshot = session.snapshot();
        assert!(snapshot.complete);
        assert_eq!(snapshot.blocks.len(), 3);
        assert!((snapshot.pass_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_leave_retry_and_reset() {
        let grading = Arc::new(LocalGradingService::new(Some(2)));
        let mut session = LessonSession::open(
            lesson(),
            config(),
            services_with(grading.clone(), StaticTutor::unavailable()),
        )
        .await
        .unwrap();

        session
            .input("sa", 0, ResponseValue::Text("Barcelona".into()))
            .unwrap();
        session.leave("sa").unwrap();
        assert!(session.block("sa").unwrap().response().is_empty());
        assert!(grading.history().await.is_empty());

        session
            .input("sa", 0, ResponseValue::Text("Barcelona".into()))
            .unwrap();
        let first = session.submit("sa").await.unwrap();
        assert_eq!(first.phase, BlockPhase::Retryable);

        session.retry("sa").unwrap();
        session
            .input("sa", 0, ResponseValue::Text("Madrid".into()))
            .unwrap();
        let second = session.submit("sa").await.unwrap();
        assert_eq!(second.phase, BlockPhase::Locked);
        assert!((second.grade.score - 1.0).abs() < f64::EPSILON);

        grading.set_attempts("geo-1", "sa", 0).await;
        session.external_reset("sa", 0).unwrap();
        assert_eq!(session.block("sa").unwrap().phase(), BlockPhase::Unlocked);
        assert!(session.retry("sa").is_err());
    }
}
