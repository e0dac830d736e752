//! CSV export of scored cells.
//!
//! The exporter only writes files. Setting a participant's export latch is
//! the caller's job, through [`SessionController::mark_participant_exported`].
//!
//! [`SessionController::mark_participant_exported`]: crate::session::SessionController::mark_participant_exported

pub mod csv;
pub mod rows;

use std::{
    fs,
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::{
    catalog::Catalog,
    log_info,
    models::{Dataset, Item, Participant},
    session::SessionState,
};

pub use rows::{build_rows, ExportRow, EXPORT_HEADERS};

const ENABLE_LOGS: bool = true;

/// Replaces anything outside `[A-Za-z0-9_-]` so the value is filename-safe.
pub fn safe_name(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn file_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%S").to_string()
}

pub struct Exporter {
    export_dir: PathBuf,
}

impl Exporter {
    pub fn new(export_dir: PathBuf) -> Self {
        Self { export_dir }
    }

    /// Writes one participant's rows and returns the file path.
    pub fn export_participant(
        &self,
        state: &SessionState,
        participant: &Participant,
        dataset: &Dataset,
        items: &[Item],
        catalog: &Catalog,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let rows = build_rows(state, participant, dataset, items, catalog);
        let file_name = format!(
            "nonword_scoring_{}_{}_{}_{}_{}.csv",
            safe_name(&state.rater_id),
            safe_name(&dataset.id),
            safe_name(&participant.id),
            safe_name(&participant.timing),
            file_timestamp(now)
        );
        let path = self.write(&file_name, &rows)?;
        log_info!(
            "Exported participant {} ({} rows) to {}",
            participant.key,
            rows.len(),
            path.display()
        );
        Ok(path)
    }

    /// Writes every given participant into one file. Leaves export latches alone.
    pub fn export_selected(
        &self,
        state: &SessionState,
        participants: &[Participant],
        dataset: &Dataset,
        items: &[Item],
        catalog: &Catalog,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let rows: Vec<ExportRow> = participants
            .iter()
            .flat_map(|participant| build_rows(state, participant, dataset, items, catalog))
            .collect();
        let file_name = format!(
            "nonword_scoring_{}_{}_{}.csv",
            safe_name(&state.rater_id),
            safe_name(&dataset.id),
            file_timestamp(now)
        );
        let path = self.write(&file_name, &rows)?;
        log_info!(
            "Exported {} participants ({} rows) to {}",
            participants.len(),
            rows.len(),
            path.display()
        );
        Ok(path)
    }

    fn write(&self, file_name: &str, rows: &[ExportRow]) -> Result<PathBuf> {
        fs::create_dir_all(&self.export_dir).with_context(|| {
            format!("failed to create export dir {}", self.export_dir.display())
        })?;
        let path = self.export_dir.join(file_name);
        fs::write(&path, csv::render(rows))
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
