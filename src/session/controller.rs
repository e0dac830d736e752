use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::{
    catalog::Catalog,
    models::{Accuracy, Dataset, Item, Participant, ScorePatch, ScoreRecord},
};

use super::{
    errors::SessionError,
    events::{EventSender, SessionEvent},
    state::SessionState,
    store::{PersistentSession, SessionStorage},
    traversal::{self, Cursor, Grid},
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ControllerPhase {
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub scored: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.scored as f64 / self.total as f64 * 100.0
        }
    }
}

/// What the setup screen shows before offering to resume.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSummary {
    pub rater_id: String,
    pub dataset_id: String,
    pub assigned: usize,
    pub scored: usize,
    pub last_saved: DateTime<Utc>,
}

/// The rater's not-yet-committed edit for the item under the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ScoreDraft {
    accuracy: Option<Accuracy>,
    note: String,
}

impl ScoreDraft {
    fn from_record(record: Option<&ScoreRecord>) -> Self {
        record.map_or_else(Self::default, |record| Self {
            accuracy: record.accuracy,
            note: record.note.clone(),
        })
    }
}

struct ActiveSession {
    session: PersistentSession,
    dataset: Dataset,
    participants: Vec<Participant>,
    items: Vec<Item>,
    cursor: Cursor,
    draft: ScoreDraft,
}

impl ActiveSession {
    fn grid(&self) -> Grid {
        Grid::new(self.participants.len(), self.items.len())
    }

    fn cell(&self, cursor: Cursor) -> (&str, u32) {
        (
            self.participants[cursor.participant].key.as_str(),
            self.items[cursor.item].index,
        )
    }

    fn is_scored(&self, cursor: Cursor) -> bool {
        let (participant_key, item_index) = self.cell(cursor);
        self.session
            .score(participant_key, item_index)
            .map_or(false, ScoreRecord::is_scored)
    }

    fn progress(&self) -> Progress {
        let item_count = self.items.len();
        let scored = self
            .participants
            .iter()
            .map(|p| self.session.state().participant_scored_count(&p.key, item_count))
            .sum();
        Progress {
            scored,
            total: self.participants.len() * item_count,
        }
    }

    /// Writes the draft into the score store if it differs from what is stored.
    fn commit_draft(&mut self) -> bool {
        let note = self.draft.note.trim().to_string();
        if self.draft.accuracy.is_none() && note.is_empty() {
            return false;
        }

        let (participant_key, item_index) = self.cell(self.cursor);
        let participant_key = participant_key.to_string();
        let unchanged = self
            .session
            .score(&participant_key, item_index)
            .map_or(false, |stored| {
                stored.accuracy == self.draft.accuracy && stored.note == note
            });
        if unchanged {
            return false;
        }

        self.session.set_score(
            &participant_key,
            item_index,
            ScorePatch {
                accuracy: self.draft.accuracy,
                note: Some(note),
            },
        )
    }

    fn move_to(&mut self, cursor: Cursor, events: &EventSender) {
        self.cursor = cursor;
        self.session.set_position(cursor);

        let (participant_key, item_index) = self.cell(cursor);
        let participant_key = participant_key.to_string();
        self.draft = ScoreDraft::from_record(self.session.score(&participant_key, item_index));

        let _ = events.send(SessionEvent::Navigated {
            cursor,
            participant_key,
            item_index,
            progress: self.progress(),
        });
    }
}

/// Completion prompts already raised during this run.
struct CompletionSignals {
    events: EventSender,
    prompted: HashSet<String>,
}

impl CompletionSignals {
    fn check(&mut self, active: &ActiveSession, participant_index: usize) {
        let Some(participant) = active.participants.get(participant_index) else {
            return;
        };
        let state = active.session.state();
        if !state.is_participant_complete(&participant.key, active.items.len()) {
            return;
        }
        if state.has_been_exported(&participant.key) {
            debug!("Participant {} complete but already exported", participant.key);
            return;
        }
        if !self.prompted.insert(participant.key.clone()) {
            return;
        }

        info!("Participant {} fully scored", participant.key);
        let _ = self.events.send(SessionEvent::ParticipantCompleted {
            participant: participant.clone(),
            dataset: active.dataset.clone(),
            items: active.items.clone(),
        });
    }
}

/// Position in `resolved` of the assigned participant at `assigned_index`, or
/// of the next one that resolved when it did not.
fn resolved_index(assigned: &[String], resolved: &[Participant], assigned_index: usize) -> usize {
    let end = assigned_index.min(assigned.len());
    assigned[..end]
        .iter()
        .filter(|key| resolved.iter().any(|p| &p.key == *key))
        .count()
}

/// Drives one rater's pass over the participant × item grid.
///
/// Every movement commits the pending draft first, then persists the new
/// cursor and publishes a [`SessionEvent::Navigated`].
pub struct SessionController {
    storage: SessionStorage,
    catalog: Arc<Catalog>,
    active: Option<ActiveSession>,
    signals: CompletionSignals,
}

impl SessionController {
    pub fn new(storage: SessionStorage, catalog: Arc<Catalog>, events: EventSender) -> Self {
        Self {
            storage,
            catalog,
            active: None,
            signals: CompletionSignals {
                events,
                prompted: HashSet::new(),
            },
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        if self.active.is_some() {
            ControllerPhase::Active
        } else {
            ControllerPhase::Idle
        }
    }

    pub async fn saved_summary(&self, rater_id: &str, dataset_id: &str) -> Option<ResumeSummary> {
        let session = self.storage.load(rater_id, dataset_id).await?;
        let state = session.state();
        Some(ResumeSummary {
            rater_id: state.rater_id.clone(),
            dataset_id: state.dataset_id.clone(),
            assigned: state.assigned_participants.len(),
            scored: state.assigned_scored_count(self.catalog.trial_template().len()),
            last_saved: state.last_saved,
        })
    }

    /// Creates a fresh session (replacing any stored one) and enters it.
    pub async fn start(
        &mut self,
        rater_id: &str,
        dataset_id: &str,
        participant_keys: Vec<String>,
    ) -> Result<Cursor, SessionError> {
        let rater_id = rater_id.trim();
        if rater_id.is_empty() {
            return Err(SessionError::MissingRater);
        }

        let (dataset, participants, items) = self.resolve(dataset_id, &participant_keys)?;
        self.return_to_setup().await;

        let session = self
            .storage
            .create(rater_id, dataset_id, participant_keys)
            .await;
        Ok(self.enter(session, dataset, participants, items))
    }

    /// Reopens the stored session for the pair at its saved cursor.
    pub async fn resume(&mut self, rater_id: &str, dataset_id: &str) -> Result<Cursor, SessionError> {
        let rater_id = rater_id.trim();
        if rater_id.is_empty() {
            return Err(SessionError::MissingRater);
        }

        // Flush first: the active session may be the one being reopened.
        self.return_to_setup().await;

        let mut session = self
            .storage
            .load(rater_id, dataset_id)
            .await
            .ok_or_else(|| SessionError::NoSavedSession {
                rater_id: rater_id.to_string(),
                dataset_id: dataset_id.to_string(),
            })?;

        let (dataset, participants, items) =
            self.resolve(dataset_id, &session.state().assigned_participants)?;

        // The stored index counts assigned keys; keys gone from the manifest
        // were dropped by `resolve`, so translate before clamping.
        let stored = session.state().cursor();
        let participant =
            resolved_index(&session.state().assigned_participants, &participants, stored.participant);
        if participant != stored.participant {
            debug!(
                "Resumed participant index {} maps to {} after unresolved keys",
                stored.participant, participant
            );
            session.set_position(Cursor::new(participant, stored.item));
        }

        Ok(self.enter(session, dataset, participants, items))
    }

    /// Commits the draft, writes the session out and goes back to Idle.
    pub async fn return_to_setup(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.commit_draft();
            active.session.flush().await;
            info!("Left session {}", active.session.storage_key());
        }
    }

    fn resolve(
        &self,
        dataset_id: &str,
        participant_keys: &[String],
    ) -> Result<(Dataset, Vec<Participant>, Vec<Item>), SessionError> {
        let dataset = self
            .catalog
            .dataset(dataset_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDataset(dataset_id.to_string()))?;
        let items = self.catalog.trial_template().to_vec();
        let participants: Vec<Participant> = participant_keys
            .iter()
            .filter_map(|key| self.catalog.participant_by_key(key).cloned())
            .collect();

        if participants.is_empty() || items.is_empty() {
            return Err(SessionError::EmptyAssignment {
                dataset_id: dataset_id.to_string(),
                participants: participants.len(),
                items: items.len(),
            });
        }
        if participants.len() < participant_keys.len() {
            debug!(
                "{} assigned participants are missing from the manifest",
                participant_keys.len() - participants.len()
            );
        }

        Ok((dataset, participants, items))
    }

    fn enter(
        &mut self,
        mut session: PersistentSession,
        dataset: Dataset,
        participants: Vec<Participant>,
        items: Vec<Item>,
    ) -> Cursor {
        let grid = Grid::new(participants.len(), items.len());
        session.clamp_cursor(grid);
        let cursor = session.state().cursor();

        info!(
            "Scoring {} ({} participants x {} items) from ({}, {})",
            session.storage_key(),
            participants.len(),
            items.len(),
            cursor.participant,
            cursor.item
        );

        let mut active = ActiveSession {
            session,
            dataset,
            participants,
            items,
            cursor,
            draft: ScoreDraft::default(),
        };
        active.move_to(cursor, &self.signals.events);
        self.active = Some(active);
        cursor
    }

    fn parts(&mut self) -> Result<(&mut ActiveSession, &mut CompletionSignals), SessionError> {
        match self.active.as_mut() {
            Some(active) => Ok((active, &mut self.signals)),
            None => Err(SessionError::NoActiveSession),
        }
    }

    fn active_session(&self) -> Result<&ActiveSession, SessionError> {
        self.active.as_ref().ok_or(SessionError::NoActiveSession)
    }

    pub fn next_item(&mut self) -> Result<Cursor, SessionError> {
        let (active, signals) = self.parts()?;
        active.commit_draft();

        let from = active.cursor;
        let grid = active.grid();
        if traversal::departs_participant(grid, from) {
            signals.check(active, from.participant);
        }

        let to = traversal::advance_item(grid, from);
        if to != from {
            active.move_to(to, &signals.events);
        }
        Ok(active.cursor)
    }

    pub fn prev_item(&mut self) -> Result<Cursor, SessionError> {
        let (active, signals) = self.parts()?;
        active.commit_draft();

        let from = active.cursor;
        let to = traversal::retreat_item(active.grid(), from);
        if to != from {
            active.move_to(to, &signals.events);
        }
        Ok(active.cursor)
    }

    pub fn next_participant(&mut self) -> Result<Cursor, SessionError> {
        let (active, signals) = self.parts()?;
        active.commit_draft();

        let from = active.cursor;
        signals.check(active, from.participant);

        let to = traversal::advance_participant(active.grid(), from);
        if to != from {
            active.move_to(to, &signals.events);
        }
        Ok(active.cursor)
    }

    pub fn prev_participant(&mut self) -> Result<Cursor, SessionError> {
        let (active, signals) = self.parts()?;
        active.commit_draft();

        let from = active.cursor;
        let to = traversal::retreat_participant(active.grid(), from);
        if to != from {
            active.move_to(to, &signals.events);
        }
        Ok(active.cursor)
    }

    /// Moves to the nearest item without an accuracy, searching forward and
    /// wrapping once. Returns `None` (cursor unchanged) when everything is scored.
    pub fn jump_to_unscored(&mut self) -> Result<Option<Cursor>, SessionError> {
        let (active, signals) = self.parts()?;
        active.commit_draft();

        let found =
            traversal::find_nearest_unscored(active.grid(), active.cursor, |c| active.is_scored(c));
        if let Some(to) = found {
            active.move_to(to, &signals.events);
        }
        Ok(found)
    }

    /// Jumps straight to `cursor`, clamped into the assignment.
    pub fn navigate(&mut self, cursor: Cursor) -> Result<Cursor, SessionError> {
        let (active, signals) = self.parts()?;
        active.commit_draft();

        let to = active.grid().clamp(cursor);
        active.move_to(to, &signals.events);
        Ok(to)
    }

    pub fn set_accuracy(&mut self, accuracy: Accuracy) -> Result<Progress, SessionError> {
        let (active, signals) = self.parts()?;
        active.draft.accuracy = Some(accuracy);
        Ok(Self::commit_and_report(active, signals))
    }

    pub fn edit_note(&mut self, note: &str) -> Result<Progress, SessionError> {
        let (active, signals) = self.parts()?;
        active.draft.note = note.to_string();
        Ok(Self::commit_and_report(active, signals))
    }

    /// `'0'` / `'1'` score the current item; any other key is ignored.
    pub fn score_by_key(&mut self, key: char) -> Result<Option<Progress>, SessionError> {
        match Accuracy::from_key(key) {
            Some(accuracy) => self.set_accuracy(accuracy).map(Some),
            None => Ok(None),
        }
    }

    fn commit_and_report(active: &mut ActiveSession, signals: &CompletionSignals) -> Progress {
        let changed = active.commit_draft();
        let progress = active.progress();
        if changed {
            let _ = signals.events.send(SessionEvent::ScoreChanged {
                cursor: active.cursor,
                progress,
            });
        }
        progress
    }

    /// Sets the export latch; the export collaborator's only way back in.
    pub fn mark_participant_exported(&mut self, participant_key: &str) -> Result<bool, SessionError> {
        let (active, _) = self.parts()?;
        let marked = active.session.mark_participant_exported(participant_key);
        if marked {
            info!("Participant {participant_key} marked as exported");
        }
        Ok(marked)
    }

    pub fn progress(&self) -> Result<Progress, SessionError> {
        Ok(self.active_session()?.progress())
    }

    pub fn cursor(&self) -> Result<Cursor, SessionError> {
        Ok(self.active_session()?.cursor)
    }

    pub fn current_participant(&self) -> Result<&Participant, SessionError> {
        let active = self.active_session()?;
        Ok(&active.participants[active.cursor.participant])
    }

    pub fn current_item(&self) -> Result<&Item, SessionError> {
        let active = self.active_session()?;
        Ok(&active.items[active.cursor.item])
    }

    pub fn current_score(&self) -> Result<Option<&ScoreRecord>, SessionError> {
        let active = self.active_session()?;
        let (participant_key, item_index) = active.cell(active.cursor);
        Ok(active.session.score(participant_key, item_index))
    }

    pub fn state(&self) -> Result<&SessionState, SessionError> {
        Ok(self.active_session()?.session.state())
    }

    pub fn dataset(&self) -> Result<&Dataset, SessionError> {
        Ok(&self.active_session()?.dataset)
    }

    pub fn participants(&self) -> Result<&[Participant], SessionError> {
        Ok(&self.active_session()?.participants)
    }

    pub fn items(&self) -> Result<&[Item], SessionError> {
        Ok(&self.active_session()?.items)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        catalog::tests::sample_catalog,
        db::Database,
        session::events::{self, EventReceiver},
        settings::ScorerSettings,
    };

    const FIRST: &str = "immediate:2";
    const SECOND: &str = "immediate:10";

    struct Harness {
        _dir: TempDir,
        storage: SessionStorage,
        controller: SessionController,
        events: EventReceiver,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("scorer.sqlite3")).unwrap();
        let settings = ScorerSettings {
            save_debounce_ms: 10_000,
            ..ScorerSettings::default()
        };
        let storage = SessionStorage::new(db, &settings);
        let (tx, rx) = events::channel();
        let controller = SessionController::new(storage.clone(), Arc::new(sample_catalog()), tx);
        Harness {
            _dir: dir,
            storage,
            controller,
            events: rx,
        }
    }

    fn assignment() -> Vec<String> {
        vec![FIRST.to_string(), SECOND.to_string()]
    }

    fn drain(rx: &mut EventReceiver) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn completions(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::ParticipantCompleted { participant, .. } => {
                    Some(participant.key.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn score_whole_participant(controller: &mut SessionController) {
        for _ in 0..3 {
            controller.set_accuracy(Accuracy::Correct).unwrap();
            if controller.cursor().unwrap().item < 2 {
                controller.next_item().unwrap();
            }
        }
    }

    #[tokio::test]
    async fn starting_enters_active_at_the_origin() {
        let mut h = harness();
        assert_eq!(h.controller.phase(), ControllerPhase::Idle);

        let cursor = h.controller.start("r1", "immediate", assignment()).await.unwrap();
        assert_eq!(cursor, Cursor::new(0, 0));
        assert_eq!(h.controller.phase(), ControllerPhase::Active);
        assert_eq!(h.controller.current_participant().unwrap().key, FIRST);
        assert_eq!(h.controller.current_item().unwrap().index, 1);

        let events = drain(&mut h.events);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Navigated { cursor, .. }] if *cursor == Cursor::new(0, 0)
        ));
    }

    #[tokio::test]
    async fn setup_problems_are_reported_before_activation() {
        let mut h = harness();
        assert!(matches!(
            h.controller.start("  ", "immediate", assignment()).await,
            Err(SessionError::MissingRater)
        ));
        assert!(matches!(
            h.controller.start("r1", "nope", assignment()).await,
            Err(SessionError::UnknownDataset(_))
        ));
        assert!(matches!(
            h.controller
                .start("r1", "immediate", vec!["immediate:404".into()])
                .await,
            Err(SessionError::EmptyAssignment { participants: 0, .. })
        ));
        assert!(matches!(
            h.controller.resume("r1", "immediate").await,
            Err(SessionError::NoSavedSession { .. })
        ));
        assert_eq!(h.controller.phase(), ControllerPhase::Idle);
        assert!(h.storage.load("r1", "immediate").await.is_none());
    }

    #[tokio::test]
    async fn navigation_while_idle_is_rejected() {
        let mut h = harness();
        assert!(matches!(h.controller.next_item(), Err(SessionError::NoActiveSession)));
        assert!(matches!(
            h.controller.set_accuracy(Accuracy::Correct),
            Err(SessionError::NoActiveSession)
        ));
        assert!(h.controller.progress().is_err());
    }

    #[tokio::test]
    async fn advancing_rolls_into_the_next_participant() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();

        h.controller.set_accuracy(Accuracy::Correct).unwrap();
        h.controller.next_item().unwrap();
        h.controller.next_item().unwrap();
        let cursor = h.controller.next_item().unwrap();
        assert_eq!(cursor, Cursor::new(1, 0));

        assert_eq!(h.controller.prev_item().unwrap(), Cursor::new(0, 2));
        assert_eq!(h.controller.state().unwrap().cursor(), Cursor::new(0, 2));
    }

    #[tokio::test]
    async fn ends_of_the_assignment_do_not_move() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        drain(&mut h.events);

        assert_eq!(h.controller.prev_item().unwrap(), Cursor::new(0, 0));
        assert_eq!(h.controller.prev_participant().unwrap(), Cursor::new(0, 0));
        h.controller.navigate(Cursor::new(1, 2)).unwrap();
        drain(&mut h.events);
        assert_eq!(h.controller.next_item().unwrap(), Cursor::new(1, 2));
        assert_eq!(h.controller.next_participant().unwrap(), Cursor::new(1, 2));
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn pending_note_is_committed_before_moving() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();

        h.controller.edit_note("  partial onset  ").unwrap();
        h.controller.next_participant().unwrap();

        let state = h.controller.state().unwrap();
        let record = state.score(FIRST, 1).unwrap();
        assert_eq!(record.note, "partial onset");
        assert_eq!(record.accuracy, None);
    }

    #[tokio::test]
    async fn note_edits_keep_the_accuracy() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();

        h.controller.score_by_key('1').unwrap();
        h.controller.edit_note("x").unwrap();
        assert_eq!(h.controller.score_by_key('z').unwrap(), None);

        let record = h.controller.current_score().unwrap().unwrap();
        assert_eq!(record.accuracy, Some(Accuracy::Correct));
        assert_eq!(record.note, "x");
    }

    #[tokio::test]
    async fn visiting_items_without_editing_writes_nothing() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        for _ in 0..5 {
            h.controller.next_item().unwrap();
        }
        assert!(h.controller.state().unwrap().scores.is_empty());
    }

    #[tokio::test]
    async fn progress_counts_scored_cells() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        assert_eq!(h.controller.progress().unwrap(), Progress { scored: 0, total: 6 });

        let progress = h.controller.set_accuracy(Accuracy::Incorrect).unwrap();
        assert_eq!(progress.scored, 1);
        h.controller.edit_note("only a note").unwrap();
        h.controller.next_item().unwrap();
        h.controller.edit_note("note without accuracy").unwrap();

        let progress = h.controller.progress().unwrap();
        assert_eq!(progress, Progress { scored: 1, total: 6 });
        assert!((progress.percent() - 100.0 / 6.0).abs() < 1e-9);

        let events = drain(&mut h.events);
        let changes = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::ScoreChanged { .. }))
            .count();
        assert_eq!(changes, 3);
    }

    #[tokio::test]
    async fn completing_a_participant_signals_once() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();

        score_whole_participant(&mut h.controller);
        assert!(completions(&drain(&mut h.events)).is_empty());

        assert_eq!(h.controller.next_item().unwrap(), Cursor::new(1, 0));
        assert_eq!(completions(&drain(&mut h.events)), vec![FIRST]);

        h.controller.prev_item().unwrap();
        h.controller.next_item().unwrap();
        h.controller.prev_participant().unwrap();
        h.controller.next_participant().unwrap();
        assert!(completions(&drain(&mut h.events)).is_empty());
    }

    #[tokio::test]
    async fn incomplete_participant_does_not_signal() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();

        h.controller.set_accuracy(Accuracy::Correct).unwrap();
        h.controller.next_participant().unwrap();
        assert!(completions(&drain(&mut h.events)).is_empty());
    }

    #[tokio::test]
    async fn last_participant_signals_even_without_moving() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        h.controller.navigate(Cursor::new(1, 0)).unwrap();

        score_whole_participant(&mut h.controller);
        assert_eq!(h.controller.next_item().unwrap(), Cursor::new(1, 2));
        assert_eq!(completions(&drain(&mut h.events)), vec![SECOND]);
    }

    #[tokio::test]
    async fn exported_participants_never_signal_again() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        assert!(h.controller.mark_participant_exported(FIRST).unwrap());

        score_whole_participant(&mut h.controller);
        h.controller.next_participant().unwrap();
        assert!(completions(&drain(&mut h.events)).is_empty());

        h.controller.prev_participant().unwrap();
        h.controller.set_accuracy(Accuracy::Incorrect).unwrap();
        h.controller.next_participant().unwrap();
        assert!(completions(&drain(&mut h.events)).is_empty());
        assert!(!h.controller.mark_participant_exported(FIRST).unwrap());
    }

    #[tokio::test]
    async fn jump_finds_the_next_gap_and_wraps() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();

        h.controller.set_accuracy(Accuracy::Correct).unwrap();
        assert_eq!(h.controller.jump_to_unscored().unwrap(), Some(Cursor::new(0, 1)));

        h.controller.navigate(Cursor::new(1, 2)).unwrap();
        h.controller.set_accuracy(Accuracy::Correct).unwrap();
        assert_eq!(h.controller.jump_to_unscored().unwrap(), Some(Cursor::new(0, 1)));
    }

    #[tokio::test]
    async fn jump_on_a_fully_scored_assignment_stays_put() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        score_whole_participant(&mut h.controller);
        h.controller.next_item().unwrap();
        score_whole_participant(&mut h.controller);

        let before = h.controller.cursor().unwrap();
        drain(&mut h.events);
        assert_eq!(h.controller.jump_to_unscored().unwrap(), None);
        assert_eq!(h.controller.cursor().unwrap(), before);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn leaving_flushes_and_resuming_restores_the_cursor() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        h.controller.navigate(Cursor::new(1, 1)).unwrap();
        h.controller.set_accuracy(Accuracy::Incorrect).unwrap();
        h.controller.return_to_setup().await;
        assert_eq!(h.controller.phase(), ControllerPhase::Idle);

        let summary = h.controller.saved_summary("r1", "immediate").await.unwrap();
        assert_eq!(summary.assigned, 2);
        assert_eq!(summary.scored, 1);

        let cursor = h.controller.resume("r1", "immediate").await.unwrap();
        assert_eq!(cursor, Cursor::new(1, 1));
        assert_eq!(
            h.controller.current_score().unwrap().unwrap().accuracy,
            Some(Accuracy::Incorrect)
        );
    }

    #[tokio::test]
    async fn resume_clamps_a_stale_cursor() {
        let mut h = harness();
        let mut session = h.storage.create("r1", "immediate", assignment()).await;
        session.set_position(Cursor::new(7, 40));
        session.flush().await;

        let cursor = h.controller.resume("r1", "immediate").await.unwrap();
        assert_eq!(cursor, Cursor::new(1, 2));
    }

    #[tokio::test]
    async fn resume_keeps_the_participant_when_earlier_keys_vanish() {
        let mut h = harness();
        let assigned = vec![
            "immediate:404".to_string(),
            FIRST.to_string(),
            "delayed:404".to_string(),
            SECOND.to_string(),
        ];
        let mut session = h.storage.create("r1", "immediate", assigned).await;
        session.set_position(Cursor::new(3, 1));
        session.flush().await;

        let cursor = h.controller.resume("r1", "immediate").await.unwrap();
        assert_eq!(cursor, Cursor::new(1, 1));
        assert_eq!(h.controller.current_participant().unwrap().key, SECOND);
    }

    #[test]
    fn unresolved_assigned_index_moves_to_the_next_resolved_participant() {
        let catalog = sample_catalog();
        let resolved = vec![
            catalog.participant_by_key(FIRST).unwrap().clone(),
            catalog.participant_by_key(SECOND).unwrap().clone(),
        ];
        let assigned: Vec<String> = ["immediate:404", FIRST, "gone:1", SECOND]
            .iter()
            .map(|k| k.to_string())
            .collect();

        assert_eq!(resolved_index(&assigned, &resolved, 0), 0);
        assert_eq!(resolved_index(&assigned, &resolved, 1), 0);
        assert_eq!(resolved_index(&assigned, &resolved, 2), 1);
        assert_eq!(resolved_index(&assigned, &resolved, 3), 1);
        assert_eq!(resolved_index(&assigned, &resolved, 9), 2);
    }

    #[tokio::test]
    async fn restarting_replaces_the_stored_session() {
        let mut h = harness();
        h.controller.start("r1", "immediate", assignment()).await.unwrap();
        h.controller.set_accuracy(Accuracy::Correct).unwrap();

        h.controller
            .start("r1", "immediate", vec![SECOND.to_string()])
            .await
            .unwrap();
        assert!(h.controller.state().unwrap().scores.is_empty());
        assert_eq!(h.controller.participants().unwrap().len(), 1);
    }
}
