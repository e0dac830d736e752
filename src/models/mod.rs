pub mod item;
pub mod participant;
pub mod score;

pub use item::Item;
pub use participant::{participant_key, Dataset, Participant};
pub use score::{Accuracy, ScoreKey, ScorePatch, ScoreRecord};
