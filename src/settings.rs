use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::log_warn;

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScorerSettings {
    /// Prefix of every session storage key.
    pub storage_namespace: String,
    /// Quiet interval before a burst of edits is written to disk.
    pub save_debounce_ms: u64,
    /// Relative paths resolve against the data directory.
    pub export_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            storage_namespace: "nonwordScorer".into(),
            save_debounce_ms: 400,
            export_dir: PathBuf::from("exports"),
            manifest_path: PathBuf::from("data/participants.json"),
        }
    }
}

impl ScorerSettings {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScorerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                ScorerSettings::default()
            })
        } else {
            ScorerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> ScorerSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: ScorerSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &ScorerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.current();
        assert_eq!(settings.storage_namespace, "nonwordScorer");
        assert_eq!(settings.save_debounce(), Duration::from_millis(400));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"save_debounce_ms": 50}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().current();
        assert_eq!(settings.save_debounce_ms, 50);
        assert_eq!(settings.export_dir, PathBuf::from("exports"));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(
            SettingsStore::new(path).unwrap().current(),
            ScorerSettings::default()
        );
    }

    #[test]
    fn updates_are_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.current();
        settings.storage_namespace = "pilot".into();
        store.update(settings).unwrap();

        let reloaded = SettingsStore::new(path).unwrap().current();
        assert_eq!(reloaded.storage_namespace, "pilot");
    }
}
