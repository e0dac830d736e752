use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{Dataset, Item, Participant};

use super::{controller::Progress, traversal::Cursor};

/// Notifications published by the controller for the front-end and the
/// export prompt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Navigated {
        cursor: Cursor,
        participant_key: String,
        item_index: u32,
        progress: Progress,
    },
    #[serde(rename_all = "camelCase")]
    ScoreChanged { cursor: Cursor, progress: Progress },
    /// Raised once per participant when the rater moves on from it fully
    /// scored and it has not been exported yet.
    #[serde(rename_all = "camelCase")]
    ParticipantCompleted {
        participant: Participant,
        dataset: Dataset,
        items: Vec<Item>,
    },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
