//! Per-block session state machine.
//!
//! A [`BlockSession`] owns everything about one mounted block: its derived
//! units and layout, the learner's response, the attempt count as last
//! reported by the grading service, and the current [`BlockPhase`].
//!
//! Submitting is split in two so the caller can await the grading service
//! without holding the session: [`BlockSession::begin_submit`] grades locally
//! and marks the recording in flight, then exactly one of
//! [`record_succeeded`](BlockSession::record_succeeded),
//! [`record_failed`](BlockSession::record_failed) or
//! [`record_timed_out`](BlockSession::record_timed_out) settles it.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::attempts::{AttemptPolicy, AttemptReceipt, AttemptState, BlockPhase, RecordingStatus};
use crate::block::{BlockDefinition, BlockKind, BlockPayload};
use crate::error::{EngineError, Result};
use crate::memory::{FlipOutcome, MemoryBoard};
use crate::parser::{parse, present, CheckableUnit, Expected, Layout};
use crate::response::{ResponseState, ResponseValue};
use crate::scoring::{score, GradeResult};

/// Result of clicking on a hotspot image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HotspotHit {
    /// A region not found before.
    Found {
        /// Region index.
        region: usize,
        /// Region label.
        label: String,
    },
    /// A region the learner had already found.
    AlreadyFound {
        /// Region index.
        region: usize,
    },
    /// Outside every region.
    Miss,
}

/// Serializable view of a block session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSnapshot {
    /// Block id.
    pub block_id: String,
    /// Block kind.
    pub kind: BlockKind,
    /// Display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Current phase.
    pub phase: BlockPhase,
    /// Attempt count as last reported.
    pub attempts: AttemptState,
    /// Durability of the latest attempt.
    pub recording: RecordingStatus,
    /// Latest grade, kept across retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<GradeResult>,
    /// Number of checkable units.
    pub unit_count: usize,
    /// Whether a view or play event was reported.
    pub viewed: bool,
}

/// Interaction state of one mounted block.
#[derive(Debug, Clone)]
pub struct BlockSession {
    block: BlockDefinition,
    units: Vec<CheckableUnit>,
    layout: Layout,
    policy: AttemptPolicy,
    attempts: AttemptState,
    phase: BlockPhase,
    response: ResponseState,
    last_grade: Option<GradeResult>,
    recording: RecordingStatus,
    board: Option<MemoryBoard>,
    graded_once: bool,
    viewed: bool,
}

impl BlockSession {
    /// Mounts a block.
    ///
    /// Units are derived and the layout is shuffled once here. The block
    /// starts `Locked` if its attempts are already exhausted.
    pub fn mount<R: Rng + ?Sized>(
        block: BlockDefinition,
        attempts: AttemptState,
        default_allow_retry: bool,
        rng: &mut R,
    ) -> Self {
        let units = parse(&block.payload);
        let layout = present(&block.payload, rng);
        let board = match &layout {
            Layout::Memory { cards } => Some(MemoryBoard::new(cards.clone())),
            _ => None,
        };
        let policy = AttemptPolicy {
            allow_retry: block.allow_retry.unwrap_or(default_allow_retry),
        };
        let phase = AttemptPolicy::initial_phase(&attempts);

        info!(
            block_id = %block.id,
            kind = %block.kind(),
            units = units.len(),
            attempts = %attempts,
            phase = %phase,
            "Block mounted"
        );

        Self {
            block,
            units,
            layout,
            policy,
            attempts,
            phase,
            response: ResponseState::new(),
            last_grade: None,
            recording: RecordingStatus::Idle,
            board,
            graded_once: false,
            viewed: false,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Block id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.block.id
    }

    /// Block kind.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        self.block.kind()
    }

    /// The authored block.
    #[must_use]
    pub const fn block(&self) -> &BlockDefinition {
        &self.block
    }

    /// Derived units.
    #[must_use]
    pub fn units(&self) -> &[CheckableUnit] {
        &self.units
    }

    /// Display arrangement fixed at mount.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> BlockPhase {
        self.phase
    }

    /// Attempt count as last reported by the grading service.
    #[must_use]
    pub const fn attempts(&self) -> &AttemptState {
        &self.attempts
    }

    /// The learner's current response.
    #[must_use]
    pub const fn response(&self) -> &ResponseState {
        &self.response
    }

    /// Latest grade, if any.
    #[must_use]
    pub const fn last_grade(&self) -> Option<&GradeResult> {
        self.last_grade.as_ref()
    }

    /// Durability of the latest attempt.
    #[must_use]
    pub const fn recording(&self) -> &RecordingStatus {
        &self.recording
    }

    /// Memory board, for memory-match blocks.
    #[must_use]
    pub const fn board(&self) -> Option<&MemoryBoard> {
        self.board.as_ref()
    }

    /// Retry policy in force.
    #[must_use]
    pub const fn policy(&self) -> AttemptPolicy {
        self.policy
    }

    /// Returns `true` if validate would be accepted right now.
    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.phase == BlockPhase::Answering
            && !self.units.is_empty()
            && !self.recording.is_in_flight()
    }

    /// Returns `true` once the block no longer holds up lesson completion.
    ///
    /// Scored blocks settle on their first grade; ungraded blocks settle when
    /// viewed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        if self.kind().is_scored() {
            self.graded_once
        } else {
            self.viewed
        }
    }

    /// Serializable view of the session.
    #[must_use]
    pub fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            block_id: self.block.id.clone(),
            kind: self.kind(),
            title: self.block.title.clone(),
            phase: self.phase,
            attempts: self.attempts,
            recording: self.recording.clone(),
            grade: self.last_grade.clone(),
            unit_count: self.units.len(),
            viewed: self.viewed,
        }
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    /// Records learner input for one unit.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` when the phase does not accept input, and
    /// `ResponseShapeMismatch` when the unit does not exist or the value has
    /// the wrong shape for it.
    pub fn input(&mut self, index: usize, value: ResponseValue) -> Result<()> {
        self.ensure_accepts_input()?;
        let Some(unit) = self.units.get(index) else {
            error!(block_id = %self.block.id, unit = index, "Input for a unit that does not exist");
            return Err(EngineError::shape_mismatch(
                &self.block.id,
                index,
                format!("block has only {} units", self.units.len()),
            ));
        };
        if unit.expected.shape() != value.shape() {
            error!(
                block_id = %self.block.id,
                unit = index,
                expected = unit.expected.shape(),
                actual = value.shape(),
                "Input does not fit its unit"
            );
            return Err(EngineError::shape_mismatch(
                &self.block.id,
                index,
                format!("expected {}, got {}", unit.expected.shape(), value.shape()),
            ));
        }

        self.response.set(index, value)?;
        self.start_answering();
        Ok(())
    }

    /// Types text into a blank, short answer, or code editor.
    pub fn answer_text(&mut self, index: usize, text: impl Into<String>) -> Result<()> {
        self.input(index, ResponseValue::Text(text.into()))
    }

    /// Picks a quiz option.
    ///
    /// Multi-select questions toggle the option; other questions replace the
    /// selection with it.
    pub fn choose_option(&mut self, question: usize, option: usize) -> Result<()> {
        let multi = match self.units.get(question).map(|u| &u.expected) {
            Some(Expected::Choices { multi, .. }) => *multi,
            _ => {
                return Err(EngineError::shape_mismatch(
                    &self.block.id,
                    question,
                    "not a quiz question",
                ))
            }
        };

        let mut selected = match self.response.get(question) {
            Some(ResponseValue::Choices(current)) if multi => current.clone(),
            _ => BTreeSet::new(),
        };
        if multi && selected.contains(&option) {
            selected.remove(&option);
        } else {
            selected.insert(option);
        }
        self.input(question, ResponseValue::Choices(selected))
    }

    /// Matches a left item to an authored right item.
    pub fn match_pair(&mut self, left: usize, right_source: usize) -> Result<()> {
        let BlockPayload::Matching(payload) = &self.block.payload else {
            return Err(EngineError::shape_mismatch(&self.block.id, left, "not a matching block"));
        };
        let Some(pair) = payload.pairs.get(right_source) else {
            return Err(EngineError::shape_mismatch(
                &self.block.id,
                left,
                format!("no right item {right_source}"),
            ));
        };
        let text = pair.right.clone();
        self.input(left, ResponseValue::Text(text))
    }

    /// Sets the full ordering, given authored item indices in the learner's order.
    pub fn arrange(&mut self, order: &[usize]) -> Result<()> {
        let BlockPayload::Ordering(payload) = &self.block.payload else {
            return Err(EngineError::shape_mismatch(&self.block.id, 0, "not an ordering block"));
        };
        if order.len() != payload.items.len() {
            return Err(EngineError::shape_mismatch(
                &self.block.id,
                order.len().min(payload.items.len()),
                format!("expected {} positions, got {}", payload.items.len(), order.len()),
            ));
        }
        let mut values = Vec::with_capacity(order.len());
        for (position, &source) in order.iter().enumerate() {
            let Some(item) = payload.items.get(source) else {
                return Err(EngineError::shape_mismatch(
                    &self.block.id,
                    position,
                    format!("no item {source}"),
                ));
            };
            values.push((position, ResponseValue::Text(item.clone())));
        }
        for (position, value) in values {
            self.input(position, value)?;
        }
        Ok(())
    }

    /// Resolves a click on a hotspot image.
    pub fn click(&mut self, x: f64, y: f64) -> Result<HotspotHit> {
        self.ensure_accepts_input()?;
        let BlockPayload::Hotspot(payload) = &self.block.payload else {
            return Err(EngineError::shape_mismatch(&self.block.id, 0, "not a hotspot block"));
        };

        // Overlapping regions: the first one not yet found takes the click.
        let containing: Vec<(usize, &str)> = payload
            .regions
            .iter()
            .enumerate()
            .filter(|(_, region)| region.contains(x, y))
            .map(|(i, region)| (i, region.label.as_str()))
            .collect();

        let Some(&(first, _)) = containing.first() else {
            debug!(block_id = %self.block.id, x, y, "Hotspot miss");
            self.start_answering();
            return Ok(HotspotHit::Miss);
        };
        let Some((region, label)) = containing
            .iter()
            .find(|(i, _)| self.response.get(*i).is_none())
            .map(|&(i, label)| (i, label.to_string()))
        else {
            return Ok(HotspotHit::AlreadyFound { region: first });
        };
        self.input(region, ResponseValue::Point { x, y })?;
        Ok(HotspotHit::Found { region, label })
    }

    /// Flips a memory card.
    pub fn flip(&mut self, card: usize) -> Result<FlipOutcome> {
        self.ensure_accepts_input()?;
        let Some(board) = self.board.as_mut() else {
            return Err(EngineError::shape_mismatch(&self.block.id, 0, "not a memory block"));
        };

        let outcome = board.flip(card);
        if let FlipOutcome::Matched { pair_key } = &outcome {
            let unit = self.units.iter().find(
                |u| matches!(&u.expected, Expected::Pair { key } if key == pair_key),
            );
            if let Some(index) = unit.map(|u| u.index) {
                self.input(index, ResponseValue::Flag(true))?;
            }
        } else if outcome != FlipOutcome::Ignored {
            self.start_answering();
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Grades the response and marks the attempt as awaiting the grading
    /// service.
    ///
    /// The attempt count is left untouched until the service answers.
    pub fn begin_submit(&mut self) -> Result<GradeResult> {
        if self.recording.is_in_flight() {
            warn!(block_id = %self.block.id, "Submit rejected while another is in flight");
            return Err(EngineError::SubmitInFlight {
                block_id: self.block.id.clone(),
            });
        }
        if self.units.is_empty() {
            return Err(EngineError::NothingToSubmit {
                block_id: self.block.id.clone(),
            });
        }
        if self.phase != BlockPhase::Answering {
            return Err(EngineError::invalid_transition(self.phase, BlockPhase::Submitted));
        }

        let grade = score(
            &self.block.id,
            self.kind().scoring_rule(),
            &self.units,
            &self.response,
        )?;

        self.response.freeze();
        self.last_grade = Some(grade.clone());
        self.recording = RecordingStatus::InFlight;
        self.graded_once = true;
        self.transition(BlockPhase::Submitted);
        info!(
            block_id = %self.block.id,
            score = grade.score,
            correct = grade.correct_count(),
            total = grade.per_unit.len(),
            "Block graded"
        );
        Ok(grade)
    }

    /// Adopts the grading service's count and decides retry or lock.
    pub fn record_succeeded(&mut self, receipt: AttemptReceipt) -> Result<BlockPhase> {
        self.ensure_in_flight()?;
        self.attempts.adopt(receipt);
        self.recording = RecordingStatus::Recorded;
        let next = self.policy.after_recording(&self.attempts);
        info!(block_id = %self.block.id, attempts = %self.attempts, "Attempt recorded");
        self.transition(next);
        Ok(next)
    }

    /// Flags the attempt as not recorded. The grade stays visible.
    pub fn record_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.ensure_in_flight()?;
        let reason = reason.into();
        warn!(block_id = %self.block.id, reason = %reason, "Attempt was not recorded");
        self.recording = RecordingStatus::Failed { reason };
        Ok(())
    }

    /// Marks the recording pending after the grading service timed out.
    pub fn record_timed_out(&mut self) -> Result<()> {
        self.ensure_in_flight()?;
        warn!(block_id = %self.block.id, "Attempt recording timed out");
        self.recording = RecordingStatus::Pending;
        Ok(())
    }

    /// Starts a manual re-send of a failed or pending recording.
    ///
    /// Returns the score to send.
    pub fn begin_rerecord(&mut self) -> Result<f64> {
        if !self.recording.needs_retry() {
            return Err(EngineError::invalid_transition(
                self.recording.as_str(),
                "in_flight",
            ));
        }
        let score = self.last_grade.as_ref().map_or(0.0, |g| g.score);
        self.recording = RecordingStatus::InFlight;
        info!(block_id = %self.block.id, "Re-sending attempt recording");
        Ok(score)
    }

    // ------------------------------------------------------------------------
    // Reset paths
    // ------------------------------------------------------------------------

    /// Clears the response for another attempt.
    ///
    /// Refused unless the block is retryable with attempts to spare.
    pub fn retry(&mut self) -> Result<()> {
        if self.phase != BlockPhase::Retryable || self.attempts.is_exhausted() {
            return Err(EngineError::invalid_transition(self.phase, BlockPhase::Unlocked));
        }
        self.clear_attempt();
        self.transition(BlockPhase::Unlocked);
        Ok(())
    }

    /// Applies an attempt count changed outside the engine, such as an
    /// instructor override.
    ///
    /// A locked block whose attempts are no longer exhausted unlocks with an
    /// empty response. A block whose attempts are now exhausted locks unless
    /// a recording is in flight; the recording result settles that case.
    /// Unsubmitted input is dropped on lock, the last grade is kept.
    pub fn external_reset(&mut self, attempts_used: u32) {
        self.attempts.adopt(AttemptReceipt { attempts_used });
        info!(block_id = %self.block.id, attempts = %self.attempts, "Attempt count reset externally");

        if !self.attempts.is_exhausted() {
            if self.phase == BlockPhase::Locked {
                self.clear_attempt();
                self.transition(BlockPhase::Unlocked);
            }
            return;
        }
        if self.phase == BlockPhase::Locked || self.recording.is_in_flight() {
            return;
        }
        if !self.response.submitted {
            self.response.clear();
            if let Some(board) = self.board.as_mut() {
                board.reset();
            }
        }
        self.transition(BlockPhase::Locked);
    }

    /// Drops unsubmitted input, as when the learner navigates away.
    ///
    /// Nothing is recorded. Submitted attempts are left as they are.
    pub fn discard_unsent(&mut self) {
        if self.phase == BlockPhase::Answering {
            debug!(block_id = %self.block.id, "Discarding unsent response");
            self.response.clear();
            if let Some(board) = self.board.as_mut() {
                board.reset();
            }
            self.transition(BlockPhase::Unlocked);
        }
    }

    /// Notes that the block was viewed or played.
    pub fn mark_viewed(&mut self) {
        self.viewed = true;
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn ensure_accepts_input(&self) -> Result<()> {
        if self.phase.accepts_input() {
            Ok(())
        } else {
            Err(EngineError::invalid_transition(self.phase, BlockPhase::Answering))
        }
    }

    fn ensure_in_flight(&self) -> Result<()> {
        if self.recording.is_in_flight() {
            Ok(())
        } else {
            Err(EngineError::invalid_transition(
                self.recording.as_str(),
                "recorded",
            ))
        }
    }

    fn start_answering(&mut self) {
        if self.phase == BlockPhase::Unlocked {
            self.transition(BlockPhase::Answering);
        }
    }

    fn clear_attempt(&mut self) {
        self.response.clear();
        self.recording = RecordingStatus::Idle;
        if let Some(board) = self.board.as_mut() {
            board.reset();
        }
    }

    fn transition(&mut self, to: BlockPhase) {
        if self.phase != to {
            debug!(block_id = %self.block.id, from = %self.phase, to = %to, "Block phase changed");
            self.phase = to;
        }
    }
}
