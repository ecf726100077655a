//! Learner response capture.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// One learner input for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResponseValue {
    /// Typed text, a picked matching item, an ordering position or code.
    Text(String),
    /// Selected quiz option indices.
    Choices(BTreeSet<usize>),
    /// A click position in percent coordinates.
    Point {
        /// Horizontal position.
        x: f64,
        /// Vertical position.
        y: f64,
    },
    /// A boolean outcome, such as a matched memory pair.
    Flag(bool),
}

impl ResponseValue {
    /// Short name of this value's shape, comparable with
    /// [`Expected::shape`](crate::parser::Expected::shape).
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Choices(_) => "choices",
            Self::Point { .. } => "point",
            Self::Flag(_) => "flag",
        }
    }
}

/// A learner's in-progress answer to one block.
///
/// Created empty when the block mounts, mutable until submitted, then frozen
/// until the next retry clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseState {
    /// Unit index to learner input.
    pub values: BTreeMap<usize, ResponseValue>,
    /// Whether the response has been submitted for grading.
    pub submitted: bool,
}

impl ResponseState {
    /// Creates an empty, unsubmitted response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records input for a unit, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidStateTransition` once the response is
    /// submitted.
    pub fn set(&mut self, index: usize, value: ResponseValue) -> Result<()> {
        if self.submitted {
            return Err(EngineError::invalid_transition("submitted", "answering"));
        }
        self.values.insert(index, value);
        Ok(())
    }

    /// Removes input for a unit.
    pub fn unset(&mut self, index: usize) -> Result<()> {
        if self.submitted {
            return Err(EngineError::invalid_transition("submitted", "answering"));
        }
        self.values.remove(&index);
        Ok(())
    }

    /// Returns the value recorded for a unit.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ResponseValue> {
        self.values.get(&index)
    }

    /// Returns `true` if nothing has been entered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Freezes the response.
    pub fn freeze(&mut self) {
        self.submitted = true;
    }

    /// Discards every value and unfreezes.
    pub fn clear(&mut self) {
        self.values.clear();
        self.submitted = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut response = ResponseState::new();
        assert!(response.is_empty());

        response.set(0, ResponseValue::Text("Paris".into())).unwrap();
        response.set(0, ResponseValue::Text("Lyon".into())).unwrap();
        assert_eq!(response.get(0), Some(&ResponseValue::Text("Lyon".into())));
        assert_eq!(response.values.len(), 1);

        response.unset(0).unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_frozen_response_rejects_input() {
        let mut response = ResponseState::new();
        response.set(1, ResponseValue::Flag(true)).unwrap();
        response.freeze();

        let err = response.set(1, ResponseValue::Flag(false)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
        assert!(response.unset(1).is_err());
        assert_eq!(response.get(1), Some(&ResponseValue::Flag(true)));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut response = ResponseState::new();
        response
            .set(0, ResponseValue::Choices(BTreeSet::from([1, 2])))
            .unwrap();
        response.freeze();
        response.clear();

        assert_eq!(response, ResponseState::default());
        assert!(response.set(0, ResponseValue::Flag(true)).is_ok());
    }

    #[test]
    fn test_response_value_serialization() {
        let json = serde_json::to_string(&ResponseValue::Point { x: 1.5, y: 2.0 }).unwrap();
        assert_eq!(json, r#"{"type":"point","value":{"x":1.5,"y":2.0}}"#);

        let value: ResponseValue =
            serde_json::from_str(r#"{"type":"choices","value":[2,0]}"#).unwrap();
        assert_eq!(value, ResponseValue::Choices(BTreeSet::from([0, 2])));
    }
}
