use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{helpers::parse_datetime, Database};

/// Raw session row: the storage key and its serialized state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub storage_key: String,
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

fn row_to_stored_session(row: &Row) -> Result<StoredSession> {
    let updated_at: String = row.get("updated_at")?;

    Ok(StoredSession {
        storage_key: row.get("storage_key")?,
        payload: row.get("payload")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// Writes the payload for `storage_key`, replacing any earlier value.
    pub async fn put_session_payload(
        &self,
        storage_key: &str,
        payload: String,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let storage_key = storage_key.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO session_store (storage_key, payload, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(storage_key) DO UPDATE SET
                     payload = excluded.payload,
                     updated_at = excluded.updated_at",
                params![storage_key, payload, updated_at.to_rfc3339()],
            )
            .with_context(|| format!("failed to write session {storage_key}"))?;
            Ok(())
        })
        .await
    }

    pub async fn get_session_payload(&self, storage_key: &str) -> Result<Option<StoredSession>> {
        let storage_key = storage_key.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT storage_key, payload, updated_at
                 FROM session_store
                 WHERE storage_key = ?1",
            )?;

            let raw = stmt
                .query_row(params![storage_key], |row| {
                    Ok((
                        row.get::<_, String>("storage_key")?,
                        row.get::<_, String>("payload")?,
                        row.get::<_, String>("updated_at")?,
                    ))
                })
                .optional()?;

            raw.map(|(storage_key, payload, updated_at)| {
                Ok(StoredSession {
                    storage_key,
                    payload,
                    updated_at: parse_datetime(&updated_at, "updated_at")?,
                })
            })
            .transpose()
        })
        .await
    }

    /// All rows whose key starts with `prefix`, most recently written first.
    pub async fn list_session_payloads(&self, prefix: &str) -> Result<Vec<StoredSession>> {
        let prefix = prefix.to_string();
        self.execute(move |conn| {
            // substr() instead of LIKE: keys contain '_', which LIKE treats as a wildcard.
            let mut stmt = conn.prepare(
                "SELECT storage_key, payload, updated_at
                 FROM session_store
                 WHERE substr(storage_key, 1, length(?1)) = ?1
                 ORDER BY updated_at DESC",
            )?;

            let mut rows = stmt.query(params![prefix])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_stored_session(row)?);
            }

            Ok(sessions)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open(dir: &TempDir) -> Database {
        Database::new(dir.path().join("scorer.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn payload_upsert_replaces_previous_value() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.put_session_payload("ns_r1_all", "{\"v\":1}".into(), Utc::now())
            .await
            .unwrap();
        db.put_session_payload("ns_r1_all", "{\"v\":2}".into(), Utc::now())
            .await
            .unwrap();

        let stored = db.get_session_payload("ns_r1_all").await.unwrap().unwrap();
        assert_eq!(stored.payload, "{\"v\":2}");
        assert!(db.get_session_payload("ns_r2_all").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_filters_on_literal_prefix() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.put_session_payload("ns_r1_all", "{}".into(), Utc::now())
            .await
            .unwrap();
        db.put_session_payload("nsXr1_all", "{}".into(), Utc::now())
            .await
            .unwrap();
        db.put_session_payload("other_r1_all", "{}".into(), Utc::now())
            .await
            .unwrap();

        let listed = db.list_session_payloads("ns_").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|s| s.storage_key.as_str()).collect();
        assert_eq!(keys, vec!["ns_r1_all"]);
    }

    #[tokio::test]
    async fn data_survives_reopening() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.put_session_payload("ns_r1_all", "{}".into(), Utc::now())
                .await
                .unwrap();
        }
        let db = open(&dir);
        assert!(db.get_session_payload("ns_r1_all").await.unwrap().is_some());
    }
}
