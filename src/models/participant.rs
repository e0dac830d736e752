use serde::{Deserialize, Serialize};

/// Builds the composite key that identifies a participant across datasets.
pub fn participant_key(timing: &str, id: &str) -> String {
    format!("{timing}:{id}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub key: String,
    pub timing: String,
    pub source_dataset_id: String,
    pub source_dataset_label: String,
    pub audio_root: String,
    pub audio_extension: String,
    pub session_dir: String,
    pub available_slides: Vec<u32>,
}

impl Participant {
    /// Numeric participant id, used for ordering the combined dataset.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub label: String,
    pub timing: String,
    pub participants: Vec<Participant>,
}

impl Dataset {
    pub fn participant_keys(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.key.clone()).collect()
    }
}
