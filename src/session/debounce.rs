use std::time::Duration;

use chrono::Utc;
use log::{debug, error};
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::db::Database;

use super::{state::SessionState, store::write_state};

struct PendingSave {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Coalesces bursts of session mutations into a single write.
///
/// Every `schedule` call supersedes the previous one: the earlier task is
/// cancelled while still waiting and a fresh quiet interval starts. Once a
/// task has begun writing it is left to finish so the DB never sees half a
/// request.
pub struct SaveDebouncer {
    db: Database,
    quiet: Duration,
    pending: Option<PendingSave>,
}

impl SaveDebouncer {
    pub fn new(db: Database, quiet: Duration) -> Self {
        Self {
            db,
            quiet,
            pending: None,
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, storage_key: String, snapshot: SessionState) {
        self.cancel();

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let db = self.db.clone();
        let quiet = self.quiet;

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Debounced save for {storage_key} superseded");
                    return;
                }
                _ = time::sleep(quiet) => {}
            }

            let mut snapshot = snapshot;
            snapshot.last_saved = Utc::now();
            if let Err(err) = write_state(&db, &storage_key, &snapshot).await {
                error!("Failed to save session {storage_key}: {err:#}");
            }
        });

        self.pending = Some(PendingSave {
            cancel_token,
            handle,
        });
    }

    /// Drops the pending write if it has not started yet.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_token.cancel();
        }
    }

    /// Cancels the pending write and waits for one already in progress to land.
    pub async fn settle(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_token.cancel();
            if let Err(err) = pending.handle.await {
                error!("Debounced save task failed: {err}");
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map_or(false, |pending| !pending.handle.is_finished())
    }
}
