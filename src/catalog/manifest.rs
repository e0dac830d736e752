//! On-disk layout of `participants.json`, as produced by the data prep step.

use serde::{Deserialize, Deserializer, Serialize};

use crate::models::Item;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringRule {
    pub accuracy_values: Vec<u8>,
    pub partial_credit: bool,
    pub rule: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default)]
    pub audio_extension: Option<String>,
    #[serde(default)]
    pub skip_slides: Vec<u32>,
    #[serde(default)]
    pub scoring: Option<ScoringRule>,
    #[serde(default)]
    pub trial_template: Vec<Item>,
    #[serde(default)]
    pub datasets: Vec<ManifestDataset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDataset {
    pub id: String,
    pub label: String,
    pub timing: String,
    pub audio_root: String,
    #[serde(default)]
    pub audio_extension: Option<String>,
    #[serde(default)]
    pub participants: Vec<ManifestParticipant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestParticipant {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub session_dir: String,
    #[serde(default)]
    pub available_slides: Vec<u32>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}
