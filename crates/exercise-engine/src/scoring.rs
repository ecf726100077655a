//! Validator and scorer.
//!
//! [`score`] is a pure function of the derived units and a response snapshot.
//! It never mutates either, so grading the same snapshot twice yields the same
//! [`GradeResult`].

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::block::ScoringRule;
use crate::error::{EngineError, Result};
use crate::parser::{CheckableUnit, Expected};
use crate::response::{ResponseState, ResponseValue};

/// Correctness of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    /// Unit index.
    pub index: usize,
    /// Whether the learner's value was accepted.
    pub correct: bool,
}

/// Result of grading one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    /// Score in `[0.0, 1.0]`.
    pub score: f64,
    /// Outcome of each unit, in unit order.
    pub per_unit: Vec<UnitOutcome>,
}

impl GradeResult {
    /// A zero score with no units.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            score: 0.0,
            per_unit: Vec::new(),
        }
    }

    /// Number of correct units.
    #[must_use]
    pub fn correct_count(&self) -> usize {
        self.per_unit.iter().filter(|u| u.correct).count()
    }

    /// Score as a whole percentage.
    ///
    /// # Examples
    ///
    /// ```
    /// use exercise_engine::GradeResult;
    ///
    /// let grade = GradeResult { score: 2.0 / 3.0, per_unit: Vec::new() };
    /// assert_eq!(grade.percent(), 67);
    /// ```
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self) -> u32 {
        (self.score.clamp(0.0, 1.0) * 100.0).round() as u32
    }

    /// Returns `true` if the rounded percentage reaches the threshold.
    #[must_use]
    pub fn passed(&self, threshold: f64) -> bool {
        f64::from(self.percent()) >= (threshold * 100.0).round()
    }

    /// Star rating out of five, one star per started 20%.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn stars(&self) -> u8 {
        self.percent().div_ceil(20).min(5) as u8
    }
}

/// Grades a response against a block's units.
///
/// Units with no recorded value count as incorrect. A value recorded for an
/// index that has no unit, or whose shape does not fit its unit, is a
/// programming error and is rejected rather than coerced.
///
/// # Examples
///
/// ```
/// use exercise_engine::{parse, score, BlockPayload, ResponseState, ResponseValue, ScoringRule};
/// use exercise_engine::block::ShortAnswerPayload;
///
/// let payload = BlockPayload::ShortAnswer(ShortAnswerPayload {
///     prompt: "Capital of France?".to_string(),
///     correct_answers: vec!["Paris".to_string(), "paris, france".to_string()],
/// });
/// let units = parse(&payload);
/// let mut response = ResponseState::new();
/// response.set(0, ResponseValue::Text("  PARIS  ".to_string())).unwrap();
///
/// let grade = score("capital", ScoringRule::Fractional, &units, &response).unwrap();
/// assert!((grade.score - 1.0).abs() < f64::EPSILON);
/// ```
#[allow(clippy::cast_precision_loss)]
pub fn score(
    block_id: &str,
    rule: ScoringRule,
    units: &[CheckableUnit],
    response: &ResponseState,
) -> Result<GradeResult> {
    if let Some(stray) = response.values.keys().find(|&&k| k >= units.len()) {
        let err = EngineError::shape_mismatch(
            block_id,
            *stray,
            format!("block has only {} units", units.len()),
        );
        error!(block_id, unit = stray, "Response references a unit that does not exist");
        return Err(err);
    }

    let mut per_unit = Vec::with_capacity(units.len());
    for unit in units {
        let correct = match response.get(unit.index) {
            None => false,
            Some(value) => check(block_id, unit, value)?,
        };
        per_unit.push(UnitOutcome {
            index: unit.index,
            correct,
        });
    }

    if per_unit.is_empty() || matches!(rule, ScoringRule::Ungraded) {
        return Ok(GradeResult {
            score: 0.0,
            per_unit,
        });
    }

    let correct = per_unit.iter().filter(|u| u.correct).count();
    let score = match rule {
        ScoringRule::AllOrNothing => {
            if correct == per_unit.len() {
                1.0
            } else {
                0.0
            }
        }
        ScoringRule::Fractional => correct as f64 / per_unit.len() as f64,
        ScoringRule::Ungraded => 0.0,
    };

    Ok(GradeResult { score, per_unit })
}

/// Checks one value against one unit.
fn check(block_id: &str, unit: &CheckableUnit, value: &ResponseValue) -> Result<bool> {
    let verdict = match (&unit.expected, value) {
        (Expected::Text { accepted }, ResponseValue::Text(given)) => {
            let given = normalize(given);
            accepted.iter().any(|a| normalize(a) == given)
        }
        (Expected::Choices { correct, multi }, ResponseValue::Choices(selected)) => {
            if *multi {
                selected == correct
            } else {
                selected.len() == 1 && selected.iter().all(|s| correct.contains(s))
            }
        }
        (Expected::Item { value: expected }, ResponseValue::Text(given)) => given == expected,
        (Expected::Region { x, y, radius }, ResponseValue::Point { x: px, y: py }) => {
            (px - x).hypot(py - y) <= *radius
        }
        (Expected::Pair { .. }, ResponseValue::Flag(matched)) => *matched,
        (Expected::Code { stub, tokens }, ResponseValue::Text(code)) => {
            code_heuristic(stub, tokens, code)
        }
        (expected, value) => {
            error!(
                block_id,
                unit = unit.index,
                expected = expected.shape(),
                actual = value.shape(),
                "Response value does not fit its unit"
            );
            return Err(EngineError::shape_mismatch(
                block_id,
                unit.index,
                format!("expected {}, got {}", expected.shape(), value.shape()),
            ));
        }
    };
    Ok(verdict)
}

/// Trims and case-folds an answer for comparison.
fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Placeholder pass/fail check for code exercises.
///
/// This is not authoritative and runs nothing. With expected tokens, the
/// submission passes if it contains any of them. Without tokens, it passes
/// if it differs from the stub once both are trimmed and is not empty.
#[must_use]
pub fn code_heuristic(stub: &str, tokens: &[String], code: &str) -> bool {
    let code = code.trim();
    if code.is_empty() {
        return false;
    }
    if tokens.is_empty() {
        code != stub.trim()
    } else {
        tokens
            .iter()
            .filter(|t| !t.is_empty())
            .any(|t| code.contains(t.as_str()))
    }
}
