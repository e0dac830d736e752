use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::{
    db::Database,
    models::{ScorePatch, ScoreRecord},
    settings::ScorerSettings,
};

use super::{
    debounce::SaveDebouncer,
    state::SessionState,
    traversal::{Cursor, Grid},
};

pub fn storage_key(namespace: &str, rater_id: &str, dataset_id: &str) -> String {
    format!("{namespace}_{rater_id}_{dataset_id}")
}

pub(super) async fn write_state(db: &Database, key: &str, state: &SessionState) -> Result<()> {
    let payload = serde_json::to_string(state).context("failed to serialize session state")?;
    db.put_session_payload(key, payload, state.last_saved).await
}

/// Opens and creates sessions under one storage namespace.
#[derive(Clone)]
pub struct SessionStorage {
    db: Database,
    namespace: String,
    save_debounce: Duration,
}

impl SessionStorage {
    pub fn new(db: Database, settings: &ScorerSettings) -> Self {
        Self {
            db,
            namespace: settings.storage_namespace.clone(),
            save_debounce: settings.save_debounce(),
        }
    }

    /// Starts a fresh session, replacing whatever was stored for the pair.
    ///
    /// The first write happens before this returns.
    pub async fn create(
        &self,
        rater_id: &str,
        dataset_id: &str,
        participant_keys: Vec<String>,
    ) -> PersistentSession {
        let state = SessionState::new(
            rater_id.to_string(),
            dataset_id.to_string(),
            participant_keys,
            Utc::now(),
        );
        let mut session = self.attach(state);
        session.save().await;
        info!(
            "Created session {} with {} participants",
            session.storage_key(),
            session.state().assigned_participants.len()
        );
        session
    }

    /// Reads the stored session for the pair. Any failure is logged and yields `None`.
    pub async fn load(&self, rater_id: &str, dataset_id: &str) -> Option<PersistentSession> {
        let key = storage_key(&self.namespace, rater_id, dataset_id);
        let stored = match self.db.get_session_payload(&key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(err) => {
                error!("Failed to read session {key}: {err:#}");
                return None;
            }
        };

        match serde_json::from_str::<SessionState>(&stored.payload) {
            Ok(state) => {
                debug!("Loaded session {key}");
                Some(self.attach(state))
            }
            Err(err) => {
                error!("Failed to load state for {key}: {err}");
                None
            }
        }
    }

    /// Every readable session in this namespace, most recently saved first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionState>> {
        let prefix = format!("{}_", self.namespace);
        let stored = self.db.list_session_payloads(&prefix).await?;

        let mut sessions: Vec<SessionState> = stored
            .into_iter()
            .filter_map(|row| match serde_json::from_str(&row.payload) {
                Ok(state) => Some(state),
                Err(err) => {
                    warn!("Skipping unreadable session {}: {err}", row.storage_key);
                    None
                }
            })
            .collect();
        sessions.sort_by(|a, b| b.last_saved.cmp(&a.last_saved));
        Ok(sessions)
    }

    fn attach(&self, state: SessionState) -> PersistentSession {
        PersistentSession {
            storage_key: storage_key(&self.namespace, &state.rater_id, &state.dataset_id),
            db: self.db.clone(),
            debouncer: SaveDebouncer::new(self.db.clone(), self.save_debounce),
            state,
        }
    }
}

/// A `SessionState` bound to its storage slot.
///
/// Mutators update memory immediately and schedule a debounced write.
pub struct PersistentSession {
    state: SessionState,
    storage_key: String,
    db: Database,
    debouncer: SaveDebouncer,
}

impl PersistentSession {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn has_pending_save(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Writes the full state now. Failures are logged, never returned.
    pub async fn save(&mut self) -> bool {
        self.state.last_saved = Utc::now();
        match write_state(&self.db, &self.storage_key, &self.state).await {
            Ok(()) => true,
            Err(err) => {
                error!("Failed to save session {}: {err:#}", self.storage_key);
                false
            }
        }
    }

    pub fn debounced_save(&mut self) {
        self.debouncer
            .schedule(self.storage_key.clone(), self.state.clone());
    }

    /// Replaces any pending debounced write with an immediate one.
    pub async fn flush(&mut self) -> bool {
        self.debouncer.settle().await;
        self.save().await
    }

    pub fn set_position(&mut self, cursor: Cursor) {
        self.state.set_cursor(cursor);
        self.debounced_save();
    }

    pub fn clamp_cursor(&mut self, grid: Grid) {
        if self.state.clamp_cursor(grid) {
            self.debounced_save();
        }
    }

    pub fn score(&self, participant_key: &str, item_index: u32) -> Option<&ScoreRecord> {
        self.state.score(participant_key, item_index)
    }

    pub fn set_score(&mut self, participant_key: &str, item_index: u32, patch: ScorePatch) -> bool {
        let written = self
            .state
            .set_score(participant_key, item_index, patch, Utc::now());
        if written {
            self.debounced_save();
        }
        written
    }

    pub fn mark_participant_exported(&mut self, participant_key: &str) -> bool {
        let marked = self.state.mark_exported(participant_key, Utc::now());
        if marked {
            self.debounced_save();
        }
        marked
    }

    pub fn has_participant_been_exported(&self, participant_key: &str) -> bool {
        self.state.has_been_exported(participant_key)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::models::Accuracy;

    fn storage(dir: &TempDir, debounce_ms: u64) -> SessionStorage {
        let db = Database::new(dir.path().join("scorer.sqlite3")).unwrap();
        let settings = ScorerSettings {
            save_debounce_ms: debounce_ms,
            ..ScorerSettings::default()
        };
        SessionStorage::new(db, &settings)
    }

    fn keys() -> Vec<String> {
        vec!["immediate:1".into(), "immediate:2".into()]
    }

    #[test]
    fn storage_key_joins_namespace_rater_and_dataset() {
        assert_eq!(
            storage_key("nonwordScorer", "rater7", "all"),
            "nonwordScorer_rater7_all"
        );
    }

    #[tokio::test]
    async fn create_is_durable_immediately() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);
        storage.create("r1", "immediate", keys()).await;

        let loaded = storage.load("r1", "immediate").await.unwrap();
        assert_eq!(loaded.state().assigned_participants, keys());
        assert_eq!(loaded.state().cursor(), Cursor::new(0, 0));
    }

    #[tokio::test]
    async fn create_overwrites_the_previous_session_for_the_pair() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);

        let mut first = storage.create("r1", "immediate", keys()).await;
        first.set_score("immediate:1", 1, ScorePatch::accuracy(Accuracy::Correct));
        first.flush().await;

        storage
            .create("r1", "immediate", vec!["immediate:2".into()])
            .await;
        let loaded = storage.load("r1", "immediate").await.unwrap();
        assert_eq!(loaded.state().assigned_participants, vec!["immediate:2"]);
        assert!(loaded.state().scores.is_empty());
    }

    #[tokio::test]
    async fn load_of_unknown_pair_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);
        assert!(storage.load("nobody", "all").await.is_none());
    }

    #[tokio::test]
    async fn corrupt_payload_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("scorer.sqlite3")).unwrap();
        let storage = SessionStorage::new(db.clone(), &ScorerSettings::default());
        db.put_session_payload("nonwordScorer_r1_all", "{ nope".into(), Utc::now())
            .await
            .unwrap();
        assert!(storage.load("r1", "all").await.is_none());
    }

    #[tokio::test]
    async fn damaged_side_fields_do_not_lose_the_scores() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("scorer.sqlite3")).unwrap();
        let storage = SessionStorage::new(db.clone(), &ScorerSettings::default());
        let payload = r#"{
            "raterId": "r1",
            "datasetId": "all",
            "assignedParticipants": ["immediate:1", 42],
            "currentParticipantIndex": 0,
            "currentItemIndex": 1,
            "scores": {"immediate:1_2": {"accuracy": 0, "note": "slurred", "scoredAt": "2024-05-01T10:00:00Z"}},
            "exportedParticipants": {"immediate:1": true},
            "lastSaved": "yesterday"
        }"#;
        db.put_session_payload("nonwordScorer_r1_all", payload.into(), Utc::now())
            .await
            .unwrap();

        let loaded = storage.load("r1", "all").await.unwrap();
        assert_eq!(loaded.state().assigned_participants, vec!["immediate:1"]);
        assert_eq!(loaded.score("immediate:1", 2).unwrap().note, "slurred");
        assert!(!loaded.has_participant_been_exported("immediate:1"));
    }

    #[tokio::test]
    async fn mutations_are_in_memory_before_they_are_durable() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 300);

        let mut session = storage.create("r1", "immediate", keys()).await;
        session.set_position(Cursor::new(1, 2));
        session.set_score("immediate:2", 3, ScorePatch::accuracy(Accuracy::Incorrect));

        assert_eq!(session.state().cursor(), Cursor::new(1, 2));
        assert!(session.has_pending_save());
        let on_disk = storage.load("r1", "immediate").await.unwrap();
        assert_eq!(on_disk.state().cursor(), Cursor::new(0, 0));

        tokio::time::sleep(Duration::from_millis(900)).await;
        let on_disk = storage.load("r1", "immediate").await.unwrap();
        assert_eq!(on_disk.state().cursor(), Cursor::new(1, 2));
        assert_eq!(
            on_disk.score("immediate:2", 3).unwrap().accuracy,
            Some(Accuracy::Incorrect)
        );
    }

    #[tokio::test]
    async fn rescheduling_keeps_only_the_latest_snapshot() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 100);

        let mut session = storage.create("r1", "immediate", keys()).await;
        for item in 0..5 {
            session.set_position(Cursor::new(0, item));
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!session.has_pending_save());
        let on_disk = storage.load("r1", "immediate").await.unwrap();
        assert_eq!(on_disk.state().cursor(), Cursor::new(0, 4));
    }

    #[tokio::test]
    async fn flush_writes_without_waiting() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);

        let mut session = storage.create("r1", "immediate", keys()).await;
        session.set_score("immediate:1", 2, ScorePatch::note("clipped audio"));
        assert!(session.flush().await);
        assert!(!session.has_pending_save());
        assert!(session.flush().await);

        let on_disk = storage.load("r1", "immediate").await.unwrap();
        assert_eq!(on_disk.score("immediate:1", 2).unwrap().note, "clipped audio");
    }

    #[tokio::test]
    async fn empty_score_write_schedules_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);

        let mut session = storage.create("r1", "immediate", keys()).await;
        assert!(!session.set_score("immediate:1", 1, ScorePatch::default()));
        assert!(!session.has_pending_save());
        assert!(session.score("immediate:1", 1).is_none());
    }

    #[tokio::test]
    async fn listing_returns_sessions_in_the_namespace() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);
        storage.create("r1", "immediate", keys()).await;
        storage.create("r2", "delayed", keys()).await;

        let listed = storage.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].rater_id, "r2");
    }

    #[tokio::test]
    async fn export_latch_survives_reload() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10_000);

        let mut session = storage.create("r1", "immediate", keys()).await;
        assert!(session.mark_participant_exported("immediate:1"));
        assert!(!session.mark_participant_exported("immediate:1"));
        session.flush().await;

        let loaded = storage.load("r1", "immediate").await.unwrap();
        assert!(loaded.has_participant_been_exported("immediate:1"));
        assert!(!loaded.has_participant_been_exported("immediate:2"));
    }
}
