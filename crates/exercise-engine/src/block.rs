//! Block schema and variant registry.
//!
//! A [`BlockDefinition`] is one authored piece of lesson content. Its kind
//! and payload are a single sum type, [`BlockPayload`], so a block can never
//! carry data shaped for a different kind. On the wire a block is a flat
//! object with a `kind` tag and a `payload` object; decoding checks that the
//! payload fits the declared kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// BlockKind
// ============================================================================

/// The closed set of block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKind {
    /// Markdown or plain-text reading material.
    Description,
    /// Video, audio or image playback.
    Media,
    /// One or more choice questions.
    Quiz,
    /// Text with `[[answer]]` gaps.
    FillInTheBlanks,
    /// Left items matched to shuffled right items.
    Matching,
    /// Items to arrange in their authored order.
    Ordering,
    /// Free-text answer checked against accepted strings.
    ShortAnswer,
    /// Regions to find on an image.
    Hotspot,
    /// Concentration-style card pairs.
    MemoryMatch,
    /// Code editor with a heuristic check.
    CodeExercise,
    /// Spoken answer, transcribed elsewhere.
    AudioResponse,
}

/// How a block kind turns unit outcomes into a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringRule {
    /// `correct / total` across units.
    Fractional,
    /// 1.0 only when every unit is satisfied, else 0.0.
    AllOrNothing,
    /// Contributes no grade.
    Ungraded,
}

impl BlockKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Description,
        Self::Media,
        Self::Quiz,
        Self::FillInTheBlanks,
        Self::Matching,
        Self::Ordering,
        Self::ShortAnswer,
        Self::Hotspot,
        Self::MemoryMatch,
        Self::CodeExercise,
        Self::AudioResponse,
    ];

    /// The canonical kebab-case name used in lesson documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Media => "media",
            Self::Quiz => "quiz",
            Self::FillInTheBlanks => "fill-in-the-blanks",
            Self::Matching => "matching",
            Self::Ordering => "ordering",
            Self::ShortAnswer => "short-answer",
            Self::Hotspot => "hotspot",
            Self::MemoryMatch => "memory-match",
            Self::CodeExercise => "code-exercise",
            Self::AudioResponse => "audio-response",
        }
    }

    /// Parses a kind name, ignoring case and treating `_` like `-`.
    ///
    /// `code` is accepted as a shorter name for `code-exercise`.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        if normalized == "code" {
            return Some(Self::CodeExercise);
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }

    /// Returns the scoring rule for this kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use exercise_engine::{BlockKind, ScoringRule};
    ///
    /// assert_eq!(BlockKind::Quiz.scoring_rule(), ScoringRule::Fractional);
    /// assert_eq!(BlockKind::Hotspot.scoring_rule(), ScoringRule::AllOrNothing);
    /// assert_eq!(BlockKind::Media.scoring_rule(), ScoringRule::Ungraded);
    /// ```
    #[must_use]
    pub const fn scoring_rule(&self) -> ScoringRule {
        match self {
            Self::Quiz | Self::FillInTheBlanks | Self::Matching | Self::Ordering | Self::ShortAnswer => {
                ScoringRule::Fractional
            }
            Self::Hotspot | Self::MemoryMatch | Self::CodeExercise => ScoringRule::AllOrNothing,
            Self::Description | Self::Media | Self::AudioResponse => ScoringRule::Ungraded,
        }
    }

    /// Returns `true` if blocks of this kind produce a grade.
    #[must_use]
    pub const fn is_scored(&self) -> bool {
        !matches!(self.scoring_rule(), ScoringRule::Ungraded)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown block kind '{s}'"))
        })
    }
}

impl Serialize for BlockKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Payload structs
// ============================================================================

/// Reading material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionPayload {
    /// Body text, usually markdown.
    #[serde(default, alias = "content")]
    pub text: String,
}

/// What a media block plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// A video stream.
    #[default]
    Video,
    /// An audio clip.
    Audio,
    /// A still image.
    Image,
}

/// Media playback block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    /// Asset location.
    #[serde(default)]
    pub url: String,
    /// Kind of media.
    #[serde(default)]
    pub media_type: MediaType,
}

/// Quiz question flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    /// Exactly one option is picked.
    #[default]
    MultipleChoice,
    /// Two options, exactly one picked.
    TrueFalse,
    /// Any number of options are picked; the set must match exactly.
    MultipleSelect,
}

impl QuestionType {
    /// Returns `true` for multi-select questions.
    #[must_use]
    pub const fn is_multi(&self) -> bool {
        matches!(self, Self::MultipleSelect)
    }
}

/// A single quiz question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    /// Optional author-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Prompt text.
    pub question: String,
    /// Option labels.
    #[serde(default)]
    pub options: Vec<String>,
    /// Indices of correct options.
    #[serde(default)]
    pub correct: Vec<usize>,
    /// Question flavour.
    #[serde(default, rename = "type")]
    pub question_type: QuestionType,
}

/// A quiz block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizPayload {
    /// Questions in display order.
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
}

/// Text with `[[answer]]` gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillBlanksPayload {
    /// The marked-up text.
    #[serde(default, alias = "content")]
    pub text: String,
}

/// A left/right pair used by matching and memory blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    /// Optional author-assigned id. Informational only; pairs are keyed by index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Left side.
    pub left: String,
    /// Right side.
    pub right: String,
}

/// Matching block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingPayload {
    /// Pairs in authored order.
    #[serde(default)]
    pub pairs: Vec<Pair>,
}

/// Ordering block. `items` is the correct sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingPayload {
    /// Items in their correct order.
    #[serde(default)]
    pub items: Vec<String>,
}

/// Short free-text answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortAnswerPayload {
    /// Question shown to the learner.
    #[serde(default, alias = "question")]
    pub prompt: String,
    /// Answers accepted after trimming and case folding.
    #[serde(default)]
    pub correct_answers: Vec<String>,
}

/// A circular region on a hotspot image, in percent of image size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotspotRegion {
    /// Optional author-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Centre x, percent of width.
    pub x: f64,
    /// Centre y, percent of height.
    pub y: f64,
    /// Radius, percent.
    pub radius: f64,
    /// Label revealed when found.
    #[serde(default)]
    pub label: String,
}

impl HotspotRegion {
    /// Returns `true` if the point lies within the region (boundary included).
    ///
    /// # Examples
    ///
    /// ```
    /// use exercise_engine::HotspotRegion;
    ///
    /// let region = HotspotRegion { x: 50.0, y: 50.0, radius: 10.0, ..Default::default() };
    /// assert!(region.contains(52.0, 48.0));
    /// assert!(!region.contains(70.0, 50.0));
    /// ```
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (x - self.x).hypot(y - self.y) <= self.radius
    }
}

/// Hotspot block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotPayload {
    /// Image to click on.
    #[serde(default)]
    pub image_url: String,
    /// Regions to find.
    #[serde(default, alias = "hotspots")]
    pub regions: Vec<HotspotRegion>,
}

/// Memory-match block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPayload {
    /// Pairs expanded into two cards each.
    #[serde(default)]
    pub pairs: Vec<Pair>,
}

/// Code exercise block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePayload {
    /// Task description.
    #[serde(default)]
    pub instructions: String,
    /// Editor language hint.
    #[serde(default)]
    pub language: String,
    /// Stub the editor starts with.
    #[serde(default)]
    pub initial_code: String,
    /// Output the author expects, shown for reference only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    /// Any one of these appearing in the submission passes the check.
    #[serde(default)]
    pub expected_tokens: Vec<String>,
}

/// Audio response block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    /// Question to answer aloud.
    #[serde(default)]
    pub prompt: String,
    /// Keywords looked for in the transcript.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Recording limit in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u32>,
}

// ============================================================================
// BlockPayload
// ============================================================================

/// Kind-specific authoring data. The variant is the block's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockPayload {
    /// See [`DescriptionPayload`].
    Description(DescriptionPayload),
    /// See [`MediaPayload`].
    Media(MediaPayload),
    /// See [`QuizPayload`].
    Quiz(QuizPayload),
    /// See [`FillBlanksPayload`].
    FillInTheBlanks(FillBlanksPayload),
    /// See [`MatchingPayload`].
    Matching(MatchingPayload),
    /// See [`OrderingPayload`].
    Ordering(OrderingPayload),
    /// See [`ShortAnswerPayload`].
    ShortAnswer(ShortAnswerPayload),
    /// See [`HotspotPayload`].
    Hotspot(HotspotPayload),
    /// See [`MemoryPayload`].
    MemoryMatch(MemoryPayload),
    /// See [`CodePayload`].
    CodeExercise(CodePayload),
    /// See [`AudioPayload`].
    AudioResponse(AudioPayload),
}

impl BlockPayload {
    /// The kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        match self {
            Self::Description(_) => BlockKind::Description,
            Self::Media(_) => BlockKind::Media,
            Self::Quiz(_) => BlockKind::Quiz,
            Self::FillInTheBlanks(_) => BlockKind::FillInTheBlanks,
            Self::Matching(_) => BlockKind::Matching,
            Self::Ordering(_) => BlockKind::Ordering,
            Self::ShortAnswer(_) => BlockKind::ShortAnswer,
            Self::Hotspot(_) => BlockKind::Hotspot,
            Self::MemoryMatch(_) => BlockKind::MemoryMatch,
            Self::CodeExercise(_) => BlockKind::CodeExercise,
            Self::AudioResponse(_) => BlockKind::AudioResponse,
        }
    }

    /// Decodes a raw JSON payload as the given kind.
    ///
    /// A missing (`null`) payload is read as an empty object, so kinds whose
    /// fields all have defaults decode to their empty form.
    pub fn decode(kind: BlockKind, value: Value) -> serde_json::Result<Self> {
        let value = if value.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            value
        };
        Ok(match kind {
            BlockKind::Description => Self::Description(serde_json::from_value(value)?),
            BlockKind::Media => Self::Media(serde_json::from_value(value)?),
            BlockKind::Quiz => Self::Quiz(serde_json::from_value(value)?),
            BlockKind::FillInTheBlanks => Self::FillInTheBlanks(serde_json::from_value(value)?),
            BlockKind::Matching => Self::Matching(serde_json::from_value(value)?),
            BlockKind::Ordering => Self::Ordering(serde_json::from_value(value)?),
            BlockKind::ShortAnswer => Self::ShortAnswer(serde_json::from_value(value)?),
            BlockKind::Hotspot => Self::Hotspot(serde_json::from_value(value)?),
            BlockKind::MemoryMatch => Self::MemoryMatch(serde_json::from_value(value)?),
            BlockKind::CodeExercise => Self::CodeExercise(serde_json::from_value(value)?),
            BlockKind::AudioResponse => Self::AudioResponse(serde_json::from_value(value)?),
        })
    }

    /// Encodes the payload back to a JSON object.
    pub fn encode(&self) -> serde_json::Result<Value> {
        match self {
            Self::Description(p) => serde_json::to_value(p),
            Self::Media(p) => serde_json::to_value(p),
            Self::Quiz(p) => serde_json::to_value(p),
            Self::FillInTheBlanks(p) => serde_json::to_value(p),
            Self::Matching(p) => serde_json::to_value(p),
            Self::Ordering(p) => serde_json::to_value(p),
            Self::ShortAnswer(p) => serde_json::to_value(p),
            Self::Hotspot(p) => serde_json::to_value(p),
            Self::MemoryMatch(p) => serde_json::to_value(p),
            Self::CodeExercise(p) => serde_json::to_value(p),
            Self::AudioResponse(p) => serde_json::to_value(p),
        }
    }
}

// ============================================================================
// BlockDefinition
// ============================================================================

/// One authored block. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlock", into = "RawBlock")]
pub struct BlockDefinition {
    /// Identifier unique within the lesson.
    pub id: String,
    /// Optional display label.
    pub title: Option<String>,
    /// Per-block override of the lesson's retry setting.
    pub allow_retry: Option<bool>,
    /// Kind-specific authoring data.
    pub payload: BlockPayload,
}

impl BlockDefinition {
    /// Creates a block with no title and no retry override.
    #[must_use]
    pub fn new(id: impl Into<String>, payload: BlockPayload) -> Self {
        Self {
            id: id.into(),
            title: None,
            allow_retry: None,
            payload,
        }
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the retry override.
    #[must_use]
    pub const fn with_allow_retry(mut self, allow_retry: bool) -> Self {
        self.allow_retry = Some(allow_retry);
        self
    }

    /// The block's kind.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        self.payload.kind()
    }
}

/// Wire form of a block: kind tag plus untyped payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    id: String,
    #[serde(alias = "type")]
    kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_retry: Option<bool>,
    #[serde(default, alias = "config")]
    payload: Value,
}

impl TryFrom<RawBlock> for BlockDefinition {
    type Error = String;

    fn try_from(raw: RawBlock) -> std::result::Result<Self, Self::Error> {
        let payload = BlockPayload::decode(raw.kind, raw.payload)
            .map_err(|e| format!("block '{}' has an invalid {} payload: {e}", raw.id, raw.kind))?;
        Ok(Self {
            id: raw.id,
            title: raw.title,
            allow_retry: raw.allow_retry,
            payload,
        })
    }
}

impl From<BlockDefinition> for RawBlock {
    fn from(block: BlockDefinition) -> Self {
        let kind = block.kind();
        Self {
            payload: block.payload.encode().unwrap_or_default(),
            id: block.id,
            kind,
            title: block.title,
            allow_retry: block.allow_retry,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------------
    // BlockKind tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_block_kind_names_round_trip() {
        for kind in BlockKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            let back: BlockKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
        assert_eq!(
            serde_json::to_string(&BlockKind::FillInTheBlanks).unwrap(),
            r#""fill-in-the-blanks""#
        );
    }

    #[test]
    fn test_block_kind_lenient_parsing() {
        let kind: BlockKind = serde_json::from_str(r#""Memory_Match""#).unwrap();
        assert_eq!(kind, BlockKind::MemoryMatch);

        let kind: BlockKind = serde_json::from_str(r#""code""#).unwrap();
        assert_eq!(kind, BlockKind::CodeExercise);

        let err = serde_json::from_str::<BlockKind>(r#""crossword""#).unwrap_err();
        assert!(err.to_string().contains("unknown block kind 'crossword'"));
    }

    #[test]
    fn test_scored_kinds() {
        let scored: Vec<_> = BlockKind::ALL.into_iter().filter(BlockKind::is_scored).collect();
        assert_eq!(scored.len(), 8);
        assert!(!BlockKind::AudioResponse.is_scored());
        assert!(!BlockKind::Description.is_scored());
    }

    // ------------------------------------------------------------------------
    // BlockDefinition serde tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_block_definition_deserialization() {
        let json = r#"{
            "id": "q1",
            "kind": "quiz",
            "title": "Capitals",
            "payload": {
                "questions": [
                    {"question": "Capital of France?", "options": ["Paris", "Rome"], "correct": [0]}
                ]
            }
        }"#;
        let block: BlockDefinition = serde_json::from_str(json).unwrap();

        assert_eq!(block.id, "q1");
        assert_eq!(block.kind(), BlockKind::Quiz);
        assert_eq!(block.title.as_deref(), Some("Capitals"));
        let BlockPayload::Quiz(quiz) = &block.payload else {
            unreachable!("decoded as {:?}", block.kind());
        };
        assert_eq!(quiz.questions[0].question_type, QuestionType::MultipleChoice);
        assert_eq!(quiz.questions[0].correct, vec![0]);
    }

    #[test]
    fn test_block_definition_accepts_type_and_config_keys() {
        let json = r#"{
            "id": "fb",
            "type": "fill-in-the-blanks",
            "allowRetry": false,
            "config": {"content": "Rust is [[fast]]."}
        }"#;
        let block: BlockDefinition = serde_json::from_str(json).unwrap();

        assert_eq!(block.allow_retry, Some(false));
        assert_eq!(
            block.payload,
            BlockPayload::FillInTheBlanks(FillBlanksPayload {
                text: "Rust is [[fast]].".to_string()
            })
        );
    }

    #[test]
    fn test_block_definition_rejects_payload_of_wrong_shape() {
        let json = r#"{"id": "m", "kind": "matching", "payload": {"pairs": "nope"}}"#;
        let err = serde_json::from_str::<BlockDefinition>(json).unwrap_err();
        assert!(err.to_string().contains("invalid matching payload"));
    }

    #[test]
    fn test_block_definition_missing_payload_uses_defaults() {
        let block: BlockDefinition =
            serde_json::from_str(r#"{"id": "intro", "kind": "description"}"#).unwrap();
        assert_eq!(
            block.payload,
            BlockPayload::Description(DescriptionPayload::default())
        );
    }

    #[test]
    fn test_block_definition_serialization_round_trip() {
        let block = BlockDefinition::new(
            "hs",
            BlockPayload::Hotspot(HotspotPayload {
                image_url: "map.png".to_string(),
                regions: vec![HotspotRegion {
                    id: None,
                    x: 10.0,
                    y: 20.0,
                    radius: 5.0,
                    label: "Lake".to_string(),
                }],
            }),
        )
        .with_title("Find the lake");

        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""kind":"hotspot""#));
        assert!(json.contains(r#""imageUrl":"map.png""#));
        assert!(!json.contains("allowRetry"));

        let back: BlockDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_hotspot_region_boundary_is_inside() {
        let region = HotspotRegion {
            x: 0.0,
            y: 0.0,
            radius: 5.0,
            ..Default::default()
        };
        assert!(region.contains(3.0, 4.0));
        assert!(!region.contains(3.0, 4.1));
    }
}
