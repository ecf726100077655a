//! Lesson Report Generation
//!
//! Turns a [`LessonSnapshot`] from the exercise engine into a report that can
//! be serialized to JSON for programmatic access or rendered to Markdown for
//! instructors.
//!
//! # Types
//!
//! - [`LessonReport`] - The complete report for one learner and one lesson
//! - [`ReportSummary`] - Score, pass/fail, stars and attempt totals
//! - [`BlockResult`] - Outcome of a single block
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use exercise_report::{LessonReport, ReportSummary};
//! use exercise_report::json::JsonGenerator;
//!
//! let report = LessonReport {
//!     lesson_id: "geo-1".to_string(),
//!     title: "European capitals".to_string(),
//!     summary: ReportSummary::default(),
//!     blocks: vec![],
//!     feedback: None,
//!     generated_at: chrono::Utc::now(),
//! };
//!
//! let json = JsonGenerator::new(&report).generate_pretty().unwrap();
//! assert!(json.contains("geo-1"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use exercise_engine::{BlockKind, BlockPhase, BlockSnapshot, GradeResult, LessonSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot cannot be reported on.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// LessonReport
// ============================================================================

/// Outcome report for one lesson session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonReport {
    /// Lesson id.
    pub lesson_id: String,

    /// Lesson title, empty when the lesson has none.
    pub title: String,

    /// Headline numbers.
    pub summary: ReportSummary,

    /// Per-block outcomes in display order.
    pub blocks: Vec<BlockResult>,

    /// Tutor feedback, if it was requested.
    pub feedback: Option<FeedbackNote>,

    /// When the report was built.
    pub generated_at: DateTime<Utc>,
}

impl LessonReport {
    /// Builds a report from a session snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` for a snapshot without a lesson id
    /// or with a pass threshold outside `(0, 1]`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_snapshot(snapshot: &LessonSnapshot) -> Result<Self> {
        if snapshot.lesson_id.trim().is_empty() {
            return Err(ReportError::InvalidData("lesson_id is required".to_string()));
        }
        if !(snapshot.pass_threshold > 0.0 && snapshot.pass_threshold <= 1.0) {
            return Err(ReportError::InvalidData(format!(
                "pass threshold {} is outside (0, 1]",
                snapshot.pass_threshold
            )));
        }

        let overall = GradeResult {
            score: snapshot.score,
            per_unit: Vec::new(),
        };
        let blocks: Vec<BlockResult> = snapshot.blocks.iter().map(BlockResult::from).collect();
        let scored: Vec<&BlockResult> = blocks.iter().filter(|b| b.kind.is_scored()).collect();

        let summary = ReportSummary {
            percent: overall.percent(),
            pass_mark: (snapshot.pass_threshold * 100.0).round() as u32,
            passed: overall.passed(snapshot.pass_threshold),
            stars: overall.stars(),
            complete: snapshot.complete,
            scored_blocks: scored.len(),
            graded_blocks: scored.iter().filter(|b| b.percent.is_some()).count(),
            attempts_used: scored.iter().map(|b| b.attempts_used).sum(),
            unrecorded: blocks.iter().filter(|b| b.needs_rerecord).count(),
        };

        Ok(Self {
            lesson_id: snapshot.lesson_id.clone(),
            title: snapshot.title.clone(),
            summary,
            blocks,
            feedback: snapshot.feedback.as_ref().map(|f| FeedbackNote {
                text: f.text.clone(),
                degraded: f.degraded,
            }),
            generated_at: Utc::now(),
        })
    }

    /// Serializes the report to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }

    /// Title to display, falling back to the lesson id.
    #[must_use]
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.lesson_id
        } else {
            &self.title
        }
    }
}

// ============================================================================
// ReportSummary
// ============================================================================

/// Headline numbers for a lesson.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Aggregate score as a whole percentage.
    pub percent: u32,
    /// Pass mark as a whole percentage.
    pub pass_mark: u32,
    /// Whether the aggregate reaches the pass mark.
    pub passed: bool,
    /// Star rating, 0 to 5.
    pub stars: u8,
    /// Whether every block is settled.
    pub complete: bool,
    /// Blocks that produce a grade.
    pub scored_blocks: usize,
    /// Scored blocks that have been graded.
    pub graded_blocks: usize,
    /// Attempts recorded across scored blocks.
    pub attempts_used: u32,
    /// Blocks whose last attempt is not durably recorded.
    pub unrecorded: usize,
}

// ============================================================================
// BlockResult
// ============================================================================

/// Outcome of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResult {
    /// Block id.
    pub block_id: String,
    /// Display title.
    pub title: Option<String>,
    /// Block kind.
    pub kind: BlockKind,
    /// Phase when the snapshot was taken.
    pub phase: BlockPhase,
    /// Latest grade as a percentage, `None` if never graded.
    pub percent: Option<u32>,
    /// Correct units in the latest grade.
    pub correct: usize,
    /// Checkable units in the block.
    pub units: usize,
    /// Attempts recorded by the grading service.
    pub attempts_used: u32,
    /// Attempt limit, `None` for unlimited.
    pub max_attempts: Option<u32>,
    /// Recording status name.
    pub recording: String,
    /// Whether the last attempt should be re-sent.
    pub needs_rerecord: bool,
    /// Whether the learner viewed the block.
    pub viewed: bool,
}

impl From<&BlockSnapshot> for BlockResult {
    fn from(block: &BlockSnapshot) -> Self {
        Self {
            block_id: block.block_id.clone(),
            title: block.title.clone(),
            kind: block.kind,
            phase: block.phase,
            percent: block.grade.as_ref().map(GradeResult::percent),
            correct: block.grade.as_ref().map_or(0, GradeResult::correct_count),
            units: block.unit_count,
            attempts_used: block.attempts.attempts_used,
            max_attempts: block.attempts.max_attempts,
            recording: block.recording.as_str().to_string(),
            needs_rerecord: block.recording.needs_retry(),
            viewed: block.viewed,
        }
    }
}

/// Feedback text as shown to the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackNote {
    /// Feedback text.
    pub text: String,
    /// `true` when the static fallback was shown.
    pub degraded: bool,
}
