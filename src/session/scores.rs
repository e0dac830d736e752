use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::log_warn;
use crate::models::{ScoreKey, ScorePatch, ScoreRecord};

const ENABLE_LOGS: bool = true;

/// Per-(participant, item index) score records for one session.
///
/// Serialized as a JSON object keyed by `"<participantKey>_<itemIndex>"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreStore {
    records: BTreeMap<ScoreKey, ScoreRecord>,
}

impl ScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, participant_key: &str, item_index: u32) -> Option<&ScoreRecord> {
        self.records.get(&ScoreKey::new(participant_key, item_index))
    }

    /// Merges `patch` into the record for the cell and stamps `scored_at`.
    ///
    /// An empty patch never creates a record. Returns whether anything was written.
    pub fn set(
        &mut self,
        participant_key: &str,
        item_index: u32,
        patch: ScorePatch,
        now: DateTime<Utc>,
    ) -> bool {
        let key = ScoreKey::new(participant_key, item_index);
        match self.records.get_mut(&key) {
            Some(existing) => {
                existing.merge(patch, now);
                true
            }
            None if patch.is_empty() => false,
            None => {
                let mut record = ScoreRecord {
                    accuracy: None,
                    note: String::new(),
                    scored_at: now,
                };
                record.merge(patch, now);
                self.records.insert(key, record);
                true
            }
        }
    }

    /// Counts item indices `1..=item_count` whose record carries an accuracy.
    ///
    /// Assumes template indices are exactly `1..=item_count`.
    pub fn count_scored(&self, participant_key: &str, item_count: usize) -> usize {
        (1..=item_count)
            .filter_map(|index| u32::try_from(index).ok())
            .filter(|&index| {
                self.get(participant_key, index)
                    .map_or(false, ScoreRecord::is_scored)
            })
            .count()
    }

    pub fn is_complete(&self, participant_key: &str, item_count: usize) -> bool {
        self.count_scored(participant_key, item_count) == item_count
    }

    pub fn assigned_scored_count<'a, I>(&self, participant_keys: I, item_count: usize) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        participant_keys
            .into_iter()
            .map(|key| self.count_scored(key, item_count))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScoreKey, &ScoreRecord)> {
        self.records.iter()
    }
}

impl Serialize for ScoreStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.records
                .iter()
                .map(|(key, record)| (key.to_string(), record)),
        )
    }
}

impl<'de> Deserialize<'de> for ScoreStore {
    /// Malformed entries are dropped so one bad cell cannot sink a whole session.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut records = BTreeMap::new();

        for (raw_key, raw_record) in raw {
            let key = match raw_key.parse::<ScoreKey>() {
                Ok(key) => key,
                Err(err) => {
                    log_warn!("Dropping stored score with malformed key: {err}");
                    continue;
                }
            };

            match serde_json::from_value::<ScoreRecord>(raw_record) {
                Ok(record) => {
                    records.insert(key, record);
                }
                Err(err) => {
                    log_warn!("Dropping malformed stored score {raw_key}: {err}");
                }
            }
        }

        Ok(Self { records })
    }
}
