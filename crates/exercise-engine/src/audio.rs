//! Keyword coverage for audio responses.
//!
//! Audio-response blocks are ungraded. Coverage is informational feedback:
//! which of the author's keywords appear in the learner's transcript.

use serde::{Deserialize, Serialize};

use crate::block::AudioPayload;

/// Which keywords a transcript mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordCoverage {
    /// Keywords found, in authored order.
    pub found: Vec<String>,
    /// Keywords not found, in authored order.
    pub missing: Vec<String>,
    /// `found / total`, or 1.0 when no keywords are configured.
    pub coverage: f64,
}

impl KeywordCoverage {
    /// Coverage as a whole percentage.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self) -> u32 {
        (self.coverage * 100.0).round() as u32
    }
}

/// Checks a transcript for the payload's keywords, ignoring case.
///
/// Returns `None` for a blank transcript, which is not a response at all.
///
/// # Examples
///
/// ```
/// use exercise_engine::audio::keyword_coverage;
/// use exercise_engine::block::AudioPayload;
///
/// let payload = AudioPayload {
///     keywords: vec!["photosynthesis".into(), "sunlight".into()],
///     ..Default::default()
/// };
/// let coverage = keyword_coverage(&payload, "Plants use SUNLIGHT to grow").unwrap();
/// assert_eq!(coverage.percent(), 50);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn keyword_coverage(payload: &AudioPayload, transcript: &str) -> Option<KeywordCoverage> {
    if transcript.trim().is_empty() {
        return None;
    }
    let haystack = transcript.to_lowercase();
    let (found, missing): (Vec<String>, Vec<String>) = payload
        .keywords
        .iter()
        .cloned()
        .partition(|k| haystack.contains(&k.to_lowercase()));

    let coverage = if payload.keywords.is_empty() {
        1.0
    } else {
        found.len() as f64 / payload.keywords.len() as f64
    };
    Some(KeywordCoverage {
        found,
        missing,
        coverage,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload(keywords: &[&str]) -> AudioPayload {
        AudioPayload {
            prompt: "Explain".to_string(),
            keywords: keywords.iter().map(ToString::to_string).collect(),
            time_limit_secs: Some(60),
        }
    }

    #[test]
    fn test_partial_coverage() {
        let coverage = keyword_coverage(
            &payload(&["mitochondria", "energy", "ATP"]),
            "The mitochondria make energy for the cell",
        )
        .unwrap();

        assert_eq!(coverage.found, vec!["mitochondria", "energy"]);
        assert_eq!(coverage.missing, vec!["ATP"]);
        assert_eq!(coverage.percent(), 67);
    }

    #[test]
    fn test_no_keywords_is_full_coverage() {
        let coverage = keyword_coverage(&payload(&[]), "anything").unwrap();
        assert!((coverage.coverage - 1.0).abs() < f64::EPSILON);
        assert_eq!(coverage.percent(), 100);
    }

    #[test]
    fn test_blank_transcript() {
        assert!(keyword_coverage(&payload(&["x"]), "  \n ").is_none());
    }
}
