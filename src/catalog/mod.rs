//! Read-only view of the datasets, participants and trial template.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use log::info;

use crate::models::{participant_key, Dataset, Item, Participant};

pub mod manifest;

pub use manifest::{Manifest, ScoringRule};

pub const ALL_DATASET_ID: &str = "all";
const ALL_DATASET_LABEL: &str = "All (Immediate + Delayed)";
const DEFAULT_AUDIO_EXTENSION: &str = "mp3";

#[derive(Debug, Clone)]
pub struct Catalog {
    version: Option<String>,
    skip_slides: Vec<u32>,
    scoring: Option<ScoringRule>,
    trial_template: Vec<Item>,
    datasets: Vec<Dataset>,
    participants_by_key: HashMap<String, Participant>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to load manifest {}", path.display()))?;
        let catalog = Self::from_json(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        info!(
            "Loaded manifest {}: {} datasets, {} template items",
            path.display(),
            catalog.datasets.len(),
            catalog.trial_template.len()
        );
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json)?;
        Ok(Self::from_manifest(manifest))
    }

    pub fn from_manifest(manifest: Manifest) -> Self {
        let default_extension = manifest
            .audio_extension
            .clone()
            .unwrap_or_else(|| DEFAULT_AUDIO_EXTENSION.to_string());

        let mut participants_by_key = HashMap::new();
        let base_datasets: Vec<Dataset> = manifest
            .datasets
            .into_iter()
            .map(|ds| {
                let extension = ds
                    .audio_extension
                    .clone()
                    .unwrap_or_else(|| default_extension.clone());
                let participants: Vec<Participant> = ds
                    .participants
                    .into_iter()
                    .map(|p| Participant {
                        key: participant_key(&ds.timing, &p.id),
                        id: p.id,
                        timing: ds.timing.clone(),
                        source_dataset_id: ds.id.clone(),
                        source_dataset_label: ds.label.clone(),
                        audio_root: ds.audio_root.clone(),
                        audio_extension: extension.clone(),
                        session_dir: p.session_dir,
                        available_slides: p.available_slides,
                    })
                    .collect();

                for participant in &participants {
                    participants_by_key.insert(participant.key.clone(), participant.clone());
                }

                Dataset {
                    id: ds.id,
                    label: ds.label,
                    timing: ds.timing,
                    participants,
                }
            })
            .collect();

        let mut everyone: Vec<Participant> = base_datasets
            .iter()
            .flat_map(|ds| ds.participants.iter().cloned())
            .collect();
        everyone.sort_by(|a, b| {
            let na = a.numeric_id().unwrap_or(u64::MAX);
            let nb = b.numeric_id().unwrap_or(u64::MAX);
            na.cmp(&nb)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.timing.cmp(&b.timing))
        });

        let mut datasets = Vec::with_capacity(base_datasets.len() + 1);
        datasets.push(Dataset {
            id: ALL_DATASET_ID.to_string(),
            label: ALL_DATASET_LABEL.to_string(),
            timing: "mixed".to_string(),
            participants: everyone,
        });
        datasets.extend(base_datasets);

        Self {
            version: manifest.version,
            skip_slides: manifest.skip_slides,
            scoring: manifest.scoring,
            trial_template: manifest.trial_template,
            datasets,
            participants_by_key,
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn dataset(&self, dataset_id: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|ds| ds.id == dataset_id)
    }

    pub fn trial_template(&self) -> &[Item] {
        &self.trial_template
    }

    pub fn skip_slides(&self) -> &[u32] {
        &self.skip_slides
    }

    pub fn scoring_rule(&self) -> Option<&ScoringRule> {
        self.scoring.as_ref()
    }

    pub fn participant_by_key(&self, key: &str) -> Option<&Participant> {
        self.participants_by_key.get(key)
    }

    /// `<sessionDir>_slideNN.<ext>`
    pub fn audio_file_name(&self, participant: &Participant, slide: u32) -> String {
        format!(
            "{}_slide{:02}.{}",
            participant.session_dir, slide, participant.audio_extension
        )
    }

    pub fn audio_url(&self, participant: &Participant, slide: u32) -> String {
        format!(
            "{}/{}/{}",
            participant.audio_root,
            participant.session_dir,
            self.audio_file_name(participant, slide)
        )
    }
}
