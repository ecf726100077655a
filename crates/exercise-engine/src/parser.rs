//! Response parser.
//!
//! Turns a block payload into the ordered list of [`CheckableUnit`]s the
//! scorer grades against, and into the per-mount [`Layout`] a UI renders.
//!
//! Unit derivation is a pure function of the payload: the same payload always
//! yields the same units in the same order. Layouts may shuffle distractors,
//! but they draw randomness only from the RNG they are handed and never touch
//! the payload.
//!
//! Malformed authoring data never fails here. Unterminated blank markers stay
//! plain text, quiz questions without options and short answers without
//! accepted strings produce no units. [`diagnose`] reports those cases for
//! authoring tools.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{BlockDefinition, BlockPayload, Pair};

/// Matches a `[[answer]]` span. Non-greedy and confined to one line.
static BLANK_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[\[(.*?)\]\]").ok());

const BLANK_OPEN: &str = "[[";
const BLANK_CLOSE: &str = "]]";

// ============================================================================
// CheckableUnit
// ============================================================================

/// The canonical correct value for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expected {
    /// Free text matched after trimming and case folding against any entry.
    Text {
        /// Accepted answers.
        accepted: Vec<String>,
    },
    /// A quiz question's correct option indices.
    Choices {
        /// Correct indices.
        correct: BTreeSet<usize>,
        /// Whether the whole set must be selected.
        multi: bool,
    },
    /// An exact item, used for matching rights and ordering positions.
    Item {
        /// The expected item text.
        value: String,
    },
    /// A circular hotspot region in percent coordinates.
    Region {
        /// Centre x.
        x: f64,
        /// Centre y.
        y: f64,
        /// Radius.
        radius: f64,
    },
    /// A memory pair that must be matched.
    Pair {
        /// Key shared by the pair's two cards.
        key: String,
    },
    /// Placeholder code check. Never executes anything.
    Code {
        /// The editor stub.
        stub: String,
        /// Tokens any one of which passes the check.
        tokens: Vec<String>,
    },
}

impl Expected {
    /// Short name of the response shape this unit takes.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Text { .. } | Self::Item { .. } | Self::Code { .. } => "text",
            Self::Choices { .. } => "choices",
            Self::Region { .. } => "point",
            Self::Pair { .. } => "flag",
        }
    }
}

/// One independently checkable item within a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckableUnit {
    /// Position within the block.
    pub index: usize,
    /// Index of the authored element the unit came from.
    pub source: usize,
    /// Canonical answer.
    pub expected: Expected,
}

/// Derives the checkable units of a payload.
///
/// # Examples
///
/// ```
/// use exercise_engine::{parse, BlockPayload, FillBlanksPayload};
///
/// let payload = BlockPayload::FillInTheBlanks(FillBlanksPayload {
///     text: "The [[capital]] of France is [[Paris]].".to_string(),
/// });
/// assert_eq!(parse(&payload).len(), 2);
/// ```
#[must_use]
pub fn parse(payload: &BlockPayload) -> Vec<CheckableUnit> {
    let expectations: Vec<(usize, Expected)> = match payload {
        BlockPayload::Description(_) | BlockPayload::Media(_) | BlockPayload::AudioResponse(_) => {
            Vec::new()
        }
        BlockPayload::FillInTheBlanks(p) => segments(&p.text)
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Blank { unit, answer } => Some((
                    unit,
                    Expected::Text {
                        accepted: vec![answer],
                    },
                )),
                Segment::Text(_) => None,
            })
            .collect(),
        BlockPayload::Matching(p) => p
            .pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| (i, Expected::Item { value: pair.right.clone() }))
            .collect(),
        BlockPayload::Ordering(p) => p
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (i, Expected::Item { value: item.clone() }))
            .collect(),
        BlockPayload::Quiz(p) => p
            .questions
            .iter()
            .enumerate()
            .filter(|(i, q)| {
                let usable = !q.options.is_empty();
                if !usable {
                    debug!(question = i, "Skipping quiz question without options");
                }
                usable
            })
            .map(|(i, q)| {
                (
                    i,
                    Expected::Choices {
                        correct: q.correct.iter().copied().collect(),
                        multi: q.question_type.is_multi(),
                    },
                )
            })
            .collect(),
        BlockPayload::Hotspot(p) => p
            .regions
            .iter()
            .enumerate()
            .map(|(i, r)| {
                (
                    i,
                    Expected::Region {
                        x: r.x,
                        y: r.y,
                        radius: r.radius,
                    },
                )
            })
            .collect(),
        BlockPayload::MemoryMatch(p) => p
            .pairs
            .iter()
            .enumerate()
            .map(|(i, _)| (i, Expected::Pair { key: pair_key(i) }))
            .collect(),
        BlockPayload::ShortAnswer(p) => {
            if p.correct_answers.is_empty() {
                Vec::new()
            } else {
                vec![(
                    0,
                    Expected::Text {
                        accepted: p.correct_answers.clone(),
                    },
                )]
            }
        }
        BlockPayload::CodeExercise(p) => vec![(
            0,
            Expected::Code {
                stub: p.initial_code.clone(),
                tokens: p.expected_tokens.clone(),
            },
        )],
    };

    expectations
        .into_iter()
        .enumerate()
        .map(|(index, (source, expected))| CheckableUnit {
            index,
            source,
            expected,
        })
        .collect()
}

/// The key that ties a memory pair's two cards together.
///
/// Always the pair's authored index. Author ids are free text and may collide
/// with another pair's index or with each other, so they never key a pair.
#[must_use]
pub fn pair_key(index: usize) -> String {
    index.to_string()
}

// ============================================================================
// Fill-in-the-blanks segments
// ============================================================================

/// A piece of fill-in-the-blanks text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Plain text shown as-is.
    Text(String),
    /// A gap the learner fills.
    Blank {
        /// Unit index of this blank.
        unit: usize,
        /// Literal text between the markers.
        answer: String,
    },
}

/// Splits marked-up text into plain and blank segments, left to right.
///
/// Empty plain runs are omitted, so adjacent blanks produce no text segment
/// between them.
#[must_use]
pub fn segments(text: &str) -> Vec<Segment> {
    let Some(re) = BLANK_PATTERN.as_ref() else {
        return vec![Segment::Text(text.to_string())];
    };

    let mut out = Vec::new();
    let mut cursor = 0;
    for (unit, caps) in re.captures_iter(text).enumerate() {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > cursor {
            out.push(Segment::Text(text[cursor..whole.start()].to_string()));
        }
        out.push(Segment::Blank {
            unit,
            answer: inner.as_str().to_string(),
        });
        cursor = whole.end();
    }
    if cursor < text.len() {
        out.push(Segment::Text(text[cursor..].to_string()));
    }
    out
}

/// Rebuilds the authored text from its segments.
#[must_use]
pub fn reconstruct(segments: &[Segment]) -> String {
    segments.iter().fold(String::new(), |mut acc, segment| {
        match segment {
            Segment::Text(text) => acc.push_str(text),
            Segment::Blank { answer, .. } => {
                acc.push_str(BLANK_OPEN);
                acc.push_str(answer);
                acc.push_str(BLANK_CLOSE);
            }
        }
        acc
    })
}

// ============================================================================
// Layout
// ============================================================================

/// An item shown in shuffled order, remembering where it was authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffledItem {
    /// Authored index.
    pub source: usize,
    /// Display text.
    pub text: String,
}

/// A face-down memory card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCard {
    /// Card id, `pair * 2` for the left card and `pair * 2 + 1` for the right.
    pub id: usize,
    /// Key shared with the matching card.
    pub pair_key: String,
    /// Face text.
    pub text: String,
}

/// Display arrangement of a block for one mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum Layout {
    /// Rendered straight from the payload.
    Plain,
    /// Fill-in-the-blanks text split into segments.
    Blanks {
        /// Segments in reading order.
        segments: Vec<Segment>,
    },
    /// Lefts in authored order, rights shuffled.
    Matching {
        /// Left items.
        left: Vec<String>,
        /// Right items in display order.
        right: Vec<ShuffledItem>,
    },
    /// Items in display order.
    Ordering {
        /// Shuffled items.
        items: Vec<ShuffledItem>,
    },
    /// Cards in display order.
    Memory {
        /// Shuffled cards.
        cards: Vec<MemoryCard>,
    },
}

/// Builds the display arrangement of a payload using the supplied RNG.
///
/// Call once per mount and keep the result; calling again reshuffles.
pub fn present<R: Rng + ?Sized>(payload: &BlockPayload, rng: &mut R) -> Layout {
    match payload {
        BlockPayload::FillInTheBlanks(p) => Layout::Blanks {
            segments: segments(&p.text),
        },
        BlockPayload::Matching(p) => {
            let left = p.pairs.iter().map(|pair| pair.left.clone()).collect();
            let mut right: Vec<ShuffledItem> = p
                .pairs
                .iter()
                .enumerate()
                .map(|(source, pair)| ShuffledItem {
                    source,
                    text: pair.right.clone(),
                })
                .collect();
            right.shuffle(rng);
            Layout::Matching { left, right }
        }
        BlockPayload::Ordering(p) => {
            let mut items: Vec<ShuffledItem> = p
                .items
                .iter()
                .enumerate()
                .map(|(source, text)| ShuffledItem {
                    source,
                    text: text.clone(),
                })
                .collect();
            items.shuffle(rng);
            Layout::Ordering { items }
        }
        BlockPayload::MemoryMatch(p) => {
            let mut cards: Vec<MemoryCard> = p
                .pairs
                .iter()
                .enumerate()
                .flat_map(|(i, pair)| {
                    let key = pair_key(i);
                    [
                        MemoryCard {
                            id: i * 2,
                            pair_key: key.clone(),
                            text: pair.left.clone(),
                        },
                        MemoryCard {
                            id: i * 2 + 1,
                            pair_key: key,
                            text: pair.right.clone(),
                        },
                    ]
                })
                .collect();
            cards.shuffle(rng);
            Layout::Memory { cards }
        }
        BlockPayload::Description(_)
        | BlockPayload::Media(_)
        | BlockPayload::Quiz(_)
        | BlockPayload::ShortAnswer(_)
        | BlockPayload::Hotspot(_)
        | BlockPayload::CodeExercise(_)
        | BlockPayload::AudioResponse(_) => Layout::Plain,
    }
}

// ============================================================================
// Authoring diagnostics
// ============================================================================

/// How serious an authoring problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Probably unintended but still usable.
    Warning,
    /// Learners cannot answer this correctly as authored.
    Error,
}

/// An authoring problem found in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Block the problem was found in.
    pub block_id: String,
    /// Seriousness.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

/// Collects authoring problems that the parser otherwise tolerates silently.
#[must_use]
pub fn diagnose(block: &BlockDefinition) -> Vec<Diagnostic> {
    let mut found: Vec<(Severity, String)> = Vec::new();

    match &block.payload {
        BlockPayload::FillInTheBlanks(p) => {
            let segs = segments(&p.text);
            let blanks = segs
                .iter()
                .filter(|s| matches!(s, Segment::Blank { .. }))
                .count();
            if blanks == 0 {
                found.push((Severity::Error, "text contains no [[blank]] markers".to_string()));
            }
            for segment in &segs {
                match segment {
                    Segment::Text(text) if text.contains(BLANK_OPEN) => {
                        found.push((
                            Severity::Warning,
                            format!("unterminated blank marker in {text:?}"),
                        ));
                    }
                    Segment::Blank { unit, answer } if answer.trim().is_empty() => {
                        found.push((Severity::Error, format!("blank {unit} has an empty answer")));
                    }
                    Segment::Blank { unit, answer } if answer.contains(BLANK_OPEN) => {
                        found.push((
                            Severity::Warning,
                            format!("blank {unit} swallows another opening marker: {answer:?}"),
                        ));
                    }
                    _ => {}
                }
            }
        }
        BlockPayload::Quiz(p) => {
            if p.questions.is_empty() {
                found.push((Severity::Error, "quiz has no questions".to_string()));
            }
            for (i, q) in p.questions.iter().enumerate() {
                if q.options.is_empty() {
                    found.push((Severity::Error, format!("question {i} has no options")));
                    continue;
                }
                if let Some(bad) = q.correct.iter().find(|&&c| c >= q.options.len()) {
                    found.push((
                        Severity::Error,
                        format!("question {i} marks option {bad} correct but has {} options", q.options.len()),
                    ));
                }
                if q.correct.is_empty() {
                    found.push((Severity::Error, format!("question {i} has no correct option")));
                } else if !q.question_type.is_multi() && q.correct.len() > 1 {
                    found.push((
                        Severity::Warning,
                        format!("single-choice question {i} lists {} correct options", q.correct.len()),
                    ));
                }
            }
        }
        BlockPayload::Matching(p) => {
            if p.pairs.is_empty() {
                found.push((Severity::Error, "matching block has no pairs".to_string()));
            }
            found.extend(duplicate_pair_ids(&p.pairs));
        }
        BlockPayload::MemoryMatch(p) => {
            if p.pairs.is_empty() {
                found.push((Severity::Error, "memory block has no pairs".to_string()));
            }
            found.extend(duplicate_pair_ids(&p.pairs));
        }
        BlockPayload::Ordering(p) if p.items.len() < 2 => {
            found.push((Severity::Warning, "ordering block needs at least two items".to_string()));
        }
        BlockPayload::ShortAnswer(p) if p.correct_answers.is_empty() => {
            found.push((Severity::Error, "short answer lists no accepted answers".to_string()));
        }
        BlockPayload::Hotspot(p) => {
            if p.regions.is_empty() {
                found.push((Severity::Error, "hotspot has no regions".to_string()));
            }
            for (i, r) in p.regions.iter().enumerate() {
                if r.radius <= 0.0 {
                    found.push((Severity::Error, format!("region {i} has a non-positive radius")));
                }
            }
        }
        BlockPayload::CodeExercise(p)
            if p.expected_tokens.is_empty() && p.initial_code.trim().is_empty() =>
        {
            found.push((
                Severity::Warning,
                "code exercise has no stub and no expected tokens; any non-empty code passes"
                    .to_string(),
            ));
        }
        _ => {}
    }

    found
        .into_iter()
        .map(|(severity, message)| Diagnostic {
            block_id: block.id.clone(),
            severity,
            message,
        })
        .collect()
}

/// Warns once per pair id that more than one pair carries.
fn duplicate_pair_ids(pairs: &[Pair]) -> Vec<(Severity, String)> {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    pairs
        .iter()
        .enumerate()
        .filter_map(|(i, pair)| {
            let id = pair.id.as_deref()?;
            if seen.insert(id) || !reported.insert(id) {
                return None;
            }
            Some((Severity::Warning, format!("pair {i} reuses pair id {id:?}")))
        })
        .collect()
}
