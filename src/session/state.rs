use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::log_warn;
use crate::models::{ScorePatch, ScoreRecord};

use super::{
    scores::ScoreStore,
    traversal::{Cursor, Grid},
};

const ENABLE_LOGS: bool = true;

/// One rater's scoring assignment for one dataset, exactly as it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub rater_id: String,
    pub dataset_id: String,
    #[serde(default, deserialize_with = "lenient_keys")]
    pub assigned_participants: Vec<String>,
    #[serde(default, deserialize_with = "lenient_index")]
    pub current_participant_index: usize,
    #[serde(default, deserialize_with = "lenient_index")]
    pub current_item_index: usize,
    #[serde(default, deserialize_with = "lenient_scores")]
    pub scores: ScoreStore,
    /// Export acknowledgements; an entry is never removed or overwritten.
    #[serde(default, deserialize_with = "lenient_exports")]
    pub exported_participants: BTreeMap<String, DateTime<Utc>>,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub last_saved: DateTime<Utc>,
}

impl SessionState {
    pub fn new(
        rater_id: String,
        dataset_id: String,
        assigned_participants: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            rater_id,
            dataset_id,
            assigned_participants,
            current_participant_index: 0,
            current_item_index: 0,
            scores: ScoreStore::new(),
            exported_participants: BTreeMap::new(),
            last_saved: now,
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.current_participant_index, self.current_item_index)
    }

    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.current_participant_index = cursor.participant;
        self.current_item_index = cursor.item;
    }

    /// Pulls a resumed cursor back into the assignment. Returns true if it moved.
    pub fn clamp_cursor(&mut self, grid: Grid) -> bool {
        let stored = self.cursor();
        let clamped = grid.clamp(stored);
        if clamped == stored {
            return false;
        }

        log_warn!(
            "Stored cursor ({}, {}) outside {}x{} assignment for {}/{}; clamped to ({}, {})",
            stored.participant,
            stored.item,
            grid.participants,
            grid.items,
            self.rater_id,
            self.dataset_id,
            clamped.participant,
            clamped.item
        );
        self.set_cursor(clamped);
        true
    }

    pub fn score(&self, participant_key: &str, item_index: u32) -> Option<&ScoreRecord> {
        self.scores.get(participant_key, item_index)
    }

    pub fn set_score(
        &mut self,
        participant_key: &str,
        item_index: u32,
        patch: ScorePatch,
        now: DateTime<Utc>,
    ) -> bool {
        self.scores.set(participant_key, item_index, patch, now)
    }

    pub fn participant_scored_count(&self, participant_key: &str, item_count: usize) -> usize {
        self.scores.count_scored(participant_key, item_count)
    }

    pub fn is_participant_complete(&self, participant_key: &str, item_count: usize) -> bool {
        self.scores.is_complete(participant_key, item_count)
    }

    pub fn assigned_scored_count(&self, item_count: usize) -> usize {
        self.scores
            .assigned_scored_count(&self.assigned_participants, item_count)
    }

    /// Sets the export latch for `participant_key`. Returns false if it was already set.
    pub fn mark_exported(&mut self, participant_key: &str, now: DateTime<Utc>) -> bool {
        if self.exported_participants.contains_key(participant_key) {
            return false;
        }
        self.exported_participants
            .insert(participant_key.to_string(), now);
        true
    }

    pub fn has_been_exported(&self, participant_key: &str) -> bool {
        self.exported_participants.contains_key(participant_key)
    }
}

/// Accepts any JSON number (or null) for a cursor index; negatives become 0.
fn lenient_index<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let index = match value {
        Some(serde_json::Value::Number(number)) => {
            if let Some(unsigned) = number.as_u64() {
                usize::try_from(unsigned).unwrap_or(usize::MAX)
            } else if let Some(float) = number.as_f64().filter(|f| f.is_finite() && *f > 0.0) {
                float.floor() as usize
            } else {
                0
            }
        }
        Some(other) if !other.is_null() => {
            log_warn!("Ignoring non-numeric stored cursor index {other}");
            0
        }
        _ => 0,
    };
    Ok(index)
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Keeps the string entries of the assignment list.
fn lenient_keys<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let keys = match value {
        Some(serde_json::Value::Array(entries)) => entries
            .into_iter()
            .filter_map(|entry| match entry {
                serde_json::Value::String(key) => Some(key),
                other => {
                    log_warn!("Dropping non-string assigned participant {other}");
                    None
                }
            })
            .collect(),
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(other) => {
            log_warn!("Ignoring stored assignment that is not a list: {other}");
            Vec::new()
        }
    };
    Ok(keys)
}

/// A missing, null or non-object score map loads as an empty store.
fn lenient_scores<'de, D>(deserializer: D) -> Result<ScoreStore, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let store = match value {
        Some(value @ serde_json::Value::Object(_)) => {
            ScoreStore::deserialize(value).unwrap_or_else(|err| {
                log_warn!("Ignoring unreadable stored scores: {err}");
                ScoreStore::new()
            })
        }
        Some(serde_json::Value::Null) | None => ScoreStore::new(),
        Some(other) => {
            log_warn!("Ignoring stored scores that are not an object: {other}");
            ScoreStore::new()
        }
    };
    Ok(store)
}

/// Drops export acknowledgements whose timestamp does not parse.
fn lenient_exports<'de, D>(deserializer: D) -> Result<BTreeMap<String, DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let mut exports = BTreeMap::new();
    match value {
        Some(serde_json::Value::Object(entries)) => {
            for (key, raw) in entries {
                match parse_timestamp(&raw) {
                    Some(at) => {
                        exports.insert(key, at);
                    }
                    None => log_warn!("Dropping export acknowledgement for {key}: {raw}"),
                }
            }
        }
        Some(serde_json::Value::Null) | None => {}
        Some(other) => log_warn!("Ignoring stored export map that is not an object: {other}"),
    }
    Ok(exports)
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(raw) => parse_timestamp(&raw).unwrap_or_else(|| {
            log_warn!("Unreadable lastSaved {raw}; using the current time");
            Utc::now()
        }),
        None => Utc::now(),
    })
}
