//! Session events and broadcasting.
//!
//! A lesson session publishes what happens to its blocks so a renderer or a
//! recorder can follow along without polling. Events are delivered to every
//! current subscriber and are not kept for late ones.
//!
//! # Event Types
//!
//! - `block_mounted` - A block is ready, with its starting phase
//! - `phase_changed` - A block moved between phases
//! - `graded` - A block was graded locally
//! - `attempt_recorded` - The grading service counted an attempt
//! - `recording_failed` - The grading service failed or timed out
//! - `feedback_ready` - Tutor feedback is available
//! - `lesson_complete` - Every block is settled
//!
//! # Example
//!
//! ```
//! use exercise_engine::events::{EventBroadcaster, SessionEvent};
//! use exercise_engine::BlockPhase;
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(16);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(SessionEvent::phase_changed("q1", BlockPhase::Unlocked, BlockPhase::Answering));
//!
//! if let Ok(event) = receiver.recv().await {
//!     assert_eq!(event.event_name(), "phase_changed");
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::attempts::{AttemptState, BlockPhase, RecordingStatus};
use crate::block::BlockKind;
use crate::scoring::GradeResult;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `block_mounted` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMountedPayload {
    /// Block id.
    pub block_id: String,
    /// Block kind.
    pub kind: BlockKind,
    /// Phase the block starts in.
    pub phase: BlockPhase,
    /// Attempt count fetched at mount.
    pub attempts: AttemptState,
}

/// Payload for the `phase_changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChangedPayload {
    /// Block id.
    pub block_id: String,
    /// Previous phase.
    pub from: BlockPhase,
    /// New phase.
    pub to: BlockPhase,
}

/// Payload for the `graded` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedPayload {
    /// Block id.
    pub block_id: String,
    /// The local grade.
    pub grade: GradeResult,
}

/// Payload for the `attempt_recorded` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecordedPayload {
    /// Block id.
    pub block_id: String,
    /// Count adopted from the grading service.
    pub attempts: AttemptState,
}

/// Payload for the `recording_failed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFailedPayload {
    /// Block id.
    pub block_id: String,
    /// `pending` after a timeout, `failed` otherwise.
    pub recording: RecordingStatus,
}

/// Payload for the `feedback_ready` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReadyPayload {
    /// Text shown to the learner.
    pub text: String,
    /// `true` when the fallback message replaced tutor output.
    pub degraded: bool,
}

/// Payload for the `lesson_complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompletePayload {
    /// Lesson id.
    pub lesson_id: String,
    /// Aggregate score in `[0, 1]`.
    pub score: f64,
    /// When completion was detected.
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Events published by a lesson session.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A block was mounted.
    BlockMounted(BlockMountedPayload),
    /// A block changed phase.
    PhaseChanged(PhaseChangedPayload),
    /// A block was graded locally.
    Graded(GradedPayload),
    /// The grading service counted an attempt.
    AttemptRecorded(AttemptRecordedPayload),
    /// The grading service failed or timed out.
    RecordingFailed(RecordingFailedPayload),
    /// Tutor feedback is available.
    FeedbackReady(FeedbackReadyPayload),
    /// Every block is settled.
    LessonComplete(LessonCompletePayload),
}

impl SessionEvent {
    /// Creates a `BlockMounted` event.
    #[must_use]
    pub fn block_mounted(
        block_id: impl Into<String>,
        kind: BlockKind,
        phase: BlockPhase,
        attempts: AttemptState,
    ) -> Self {
        Self::BlockMounted(BlockMountedPayload {
            block_id: block_id.into(),
            kind,
            phase,
            attempts,
        })
    }

    /// Creates a `PhaseChanged` event.
    #[must_use]
    pub fn phase_changed(block_id: impl Into<String>, from: BlockPhase, to: BlockPhase) -> Self {
        Self::PhaseChanged(PhaseChangedPayload {
            block_id: block_id.into(),
            from,
            to,
        })
    }

    /// Creates a `Graded` event.
    #[must_use]
    pub fn graded(block_id: impl Into<String>, grade: GradeResult) -> Self {
        Self::Graded(GradedPayload {
            block_id: block_id.into(),
            grade,
        })
    }

    /// Creates an `AttemptRecorded` event.
    #[must_use]
    pub fn attempt_recorded(block_id: impl Into<String>, attempts: AttemptState) -> Self {
        Self::AttemptRecorded(AttemptRecordedPayload {
            block_id: block_id.into(),
            attempts,
        })
    }

    /// Creates a `RecordingFailed` event.
    #[must_use]
    pub fn recording_failed(block_id: impl Into<String>, recording: RecordingStatus) -> Self {
        Self::RecordingFailed(RecordingFailedPayload {
            block_id: block_id.into(),
            recording,
        })
    }

    /// Creates a `FeedbackReady` event.
    #[must_use]
    pub fn feedback_ready(text: impl Into<String>, degraded: bool) -> Self {
        Self::FeedbackReady(FeedbackReadyPayload {
            text: text.into(),
            degraded,
        })
    }

    /// Creates a `LessonComplete` event stamped now.
    #[must_use]
    pub fn lesson_complete(lesson_id: impl Into<String>, score: f64) -> Self {
        Self::LessonComplete(LessonCompletePayload {
            lesson_id: lesson_id.into(),
            score,
            timestamp: Utc::now(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::BlockMounted(_) => "block_mounted",
            Self::PhaseChanged(_) => "phase_changed",
            Self::Graded(_) => "graded",
            Self::AttemptRecorded(_) => "attempt_recorded",
            Self::RecordingFailed(_) => "recording_failed",
            Self::FeedbackReady(_) => "feedback_ready",
            Self::LessonComplete(_) => "lesson_complete",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Fans session events out to every subscriber.
///
/// Backed by a tokio broadcast channel. A subscriber that falls more than
/// `capacity` events behind receives `Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster with the given per-subscriber buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event, returning how many subscribers will see it.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
