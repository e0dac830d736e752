use chrono::SecondsFormat;
use serde::Serialize;

use crate::{
    catalog::Catalog,
    models::{Dataset, Item, Participant},
    session::SessionState,
};

pub const EXPORT_HEADERS: [&str; 18] = [
    "rater_id",
    "dataset_id",
    "dataset_label",
    "timing",
    "participant_id",
    "participant_key",
    "session_dir",
    "item_index",
    "slide",
    "trial",
    "task",
    "item",
    "item_order_in_trial",
    "item_order_in_slide",
    "audio_file",
    "accuracy",
    "note",
    "scored_at",
];

/// One scored (or still empty) cell, flattened for a spreadsheet.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportRow {
    pub rater_id: String,
    pub dataset_id: String,
    pub dataset_label: String,
    pub timing: String,
    pub participant_id: String,
    pub participant_key: String,
    pub session_dir: String,
    pub item_index: u32,
    pub slide: u32,
    pub trial: u32,
    pub task: String,
    pub item: String,
    pub item_order_in_trial: u32,
    pub item_order_in_slide: u32,
    pub audio_file: String,
    pub accuracy: String,
    pub note: String,
    pub scored_at: String,
}

impl ExportRow {
    /// Field values in [`EXPORT_HEADERS`] order.
    pub fn fields(&self) -> [String; 18] {
        [
            self.rater_id.clone(),
            self.dataset_id.clone(),
            self.dataset_label.clone(),
            self.timing.clone(),
            self.participant_id.clone(),
            self.participant_key.clone(),
            self.session_dir.clone(),
            self.item_index.to_string(),
            self.slide.to_string(),
            self.trial.to_string(),
            self.task.clone(),
            self.item.clone(),
            self.item_order_in_trial.to_string(),
            self.item_order_in_slide.to_string(),
            self.audio_file.clone(),
            self.accuracy.clone(),
            self.note.clone(),
            self.scored_at.clone(),
        ]
    }
}

/// One row per item for `participant`, in trial-template order.
pub fn build_rows(
    state: &SessionState,
    participant: &Participant,
    dataset: &Dataset,
    items: &[Item],
    catalog: &Catalog,
) -> Vec<ExportRow> {
    items
        .iter()
        .map(|item| {
            let score = state.score(&participant.key, item.index);
            ExportRow {
                rater_id: state.rater_id.clone(),
                dataset_id: dataset.id.clone(),
                dataset_label: dataset.label.clone(),
                timing: participant.timing.clone(),
                participant_id: participant.id.clone(),
                participant_key: participant.key.clone(),
                session_dir: participant.session_dir.clone(),
                item_index: item.index,
                slide: item.slide,
                trial: item.trial,
                task: item.task.clone(),
                item: item.item.clone(),
                item_order_in_trial: item.item_order_in_trial,
                item_order_in_slide: item.item_order_in_slide,
                audio_file: catalog.audio_file_name(participant, item.slide),
                accuracy: score
                    .and_then(|s| s.accuracy)
                    .map(|a| a.as_u8().to_string())
                    .unwrap_or_default(),
                note: score.map(|s| s.note.clone()).unwrap_or_default(),
                scored_at: score
                    .map(|s| s.scored_at.to_rfc3339_opts(SecondsFormat::Millis, true))
                    .unwrap_or_default(),
            }
        })
        .collect()
}
