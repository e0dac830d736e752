//! Conditions surfaced to the rater. Storage hiccups during scoring are not
//! among them: those are logged and absorbed by the persistence layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a rater id is required")]
    MissingRater,

    #[error("unknown dataset '{0}'")]
    UnknownDataset(String),

    #[error(
        "no participants available for scoring in '{dataset_id}' \
         ({participants} participants, {items} items resolved)"
    )]
    EmptyAssignment {
        dataset_id: String,
        participants: usize,
        items: usize,
    },

    #[error("no saved session for rater '{rater_id}' in dataset '{dataset_id}'")]
    NoSavedSession { rater_id: String, dataset_id: String },

    #[error("no active scoring session")]
    NoActiveSession,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
