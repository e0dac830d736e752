use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binary accuracy judgement. Stored on disk as the integer `0` or `1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Accuracy {
    Incorrect,
    Correct,
}

impl Accuracy {
    pub fn as_u8(self) -> u8 {
        match self {
            Accuracy::Incorrect => 0,
            Accuracy::Correct => 1,
        }
    }

    /// Maps the `0` / `1` scoring keys onto a judgement.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '0' => Some(Accuracy::Incorrect),
            '1' => Some(Accuracy::Correct),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Accuracy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Accuracy::Incorrect),
            1 => Ok(Accuracy::Correct),
            other => Err(format!("accuracy must be 0 or 1, got {other}")),
        }
    }
}

impl From<Accuracy> for u8 {
    fn from(value: Accuracy) -> Self {
        value.as_u8()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    #[serde(default)]
    pub accuracy: Option<Accuracy>,
    #[serde(default)]
    pub note: String,
    pub scored_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn is_scored(&self) -> bool {
        self.accuracy.is_some()
    }

    /// Applies `patch` on top of this record; untouched fields keep their value.
    pub fn merge(&mut self, patch: ScorePatch, now: DateTime<Utc>) {
        if let Some(accuracy) = patch.accuracy {
            self.accuracy = Some(accuracy);
        }
        if let Some(note) = patch.note {
            self.note = note;
        }
        self.scored_at = now;
    }
}

/// Partial score write. `None` fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScorePatch {
    pub accuracy: Option<Accuracy>,
    pub note: Option<String>,
}

impl ScorePatch {
    pub fn accuracy(accuracy: Accuracy) -> Self {
        Self {
            accuracy: Some(accuracy),
            note: None,
        }
    }

    pub fn note(note: impl Into<String>) -> Self {
        Self {
            accuracy: None,
            note: Some(note.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accuracy.is_none() && self.note.as_deref().map_or(true, str::is_empty)
    }
}

/// Composite lookup key for one (participant, item index) cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScoreKey {
    pub participant_key: String,
    pub item_index: u32,
}

impl ScoreKey {
    pub fn new(participant_key: impl Into<String>, item_index: u32) -> Self {
        Self {
            participant_key: participant_key.into(),
            item_index,
        }
    }
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.participant_key, self.item_index)
    }
}

impl FromStr for ScoreKey {
    type Err = anyhow::Error;

    // The item index never contains '_', so the last underscore is the separator.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (participant_key, index) = value
            .rsplit_once('_')
            .ok_or_else(|| anyhow!("score key '{value}' has no item index"))?;
        if participant_key.is_empty() {
            bail!("score key '{value}' has no participant");
        }
        let item_index = index
            .parse::<u32>()
            .map_err(|err| anyhow!("score key '{value}' has invalid item index: {err}"))?;
        Ok(Self::new(participant_key, item_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Accuracy::Correct).unwrap(), "1");
        assert_eq!(
            serde_json::from_str::<Accuracy>("0").unwrap(),
            Accuracy::Incorrect
        );
        assert!(serde_json::from_str::<Accuracy>("2").is_err());
    }

    #[test]
    fn score_key_splits_on_last_underscore() {
        let key: ScoreKey = "immediate:p_12_7".parse().unwrap();
        assert_eq!(key.participant_key, "immediate:p_12");
        assert_eq!(key.item_index, 7);
        assert_eq!(key.to_string(), "immediate:p_12_7");
    }

    #[test]
    fn malformed_score_keys_are_rejected() {
        assert!("immediate:12".parse::<ScoreKey>().is_err());
        assert!("_3".parse::<ScoreKey>().is_err());
        assert!("immediate:12_x".parse::<ScoreKey>().is_err());
    }

    #[test]
    fn record_without_accuracy_deserializes() {
        let record: ScoreRecord = serde_json::from_str(
            r#"{"accuracy":null,"note":"unclear","scoredAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(!record.is_scored());
        assert_eq!(record.note, "unclear");
    }

    #[test]
    fn blank_patch_is_empty() {
        assert!(ScorePatch::default().is_empty());
        assert!(ScorePatch::note("").is_empty());
        assert!(!ScorePatch::note("x").is_empty());
        assert!(!ScorePatch::accuracy(Accuracy::Incorrect).is_empty());
    }
}
