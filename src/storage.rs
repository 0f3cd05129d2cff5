//! JSON file persistence of feature state.
//!
//! Snapshots are a flat keyed structure (feature id → snapshot) holding
//! enough to reconstruct phase, task statuses, and accumulated answers
//! after a restart. Saves are whole-file rewrites; the store is small.

use crate::feature::Feature;
use crate::phase::Phase;
use crate::task::TaskStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted form of a feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub branch: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tech_stack: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub constraints: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSnapshot>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub answers: HashMap<String, String>,
}

/// Persisted form of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub spec: String,
    pub status: TaskStatus,
    pub branch: String,
    pub agent_name: String,
    pub is_parallel: bool,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
}

impl FeatureSnapshot {
    pub fn of(feature: &Feature) -> Self {
        Self {
            id: feature.id.clone(),
            name: feature.name.clone(),
            description: feature.description.clone(),
            branch: feature.branch.clone(),
            phase: feature.phase,
            tech_stack: feature.tech_stack.clone(),
            constraints: feature.constraints.clone(),
            created_at: feature.created_at,
            updated_at: feature.updated_at,
            tasks: feature
                .tasks
                .iter()
                .map(|t| TaskSnapshot {
                    id: t.id.clone(),
                    spec: t.spec.clone(),
                    status: t.status,
                    branch: t.branch.clone(),
                    agent_name: t.agent_name.clone(),
                    is_parallel: t.is_parallel,
                    attempt: t.attempt,
                    feature_id: t.feature_id.clone(),
                })
                .collect(),
            answers: feature.answers.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    features: HashMap<String, FeatureSnapshot>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// File-backed snapshot store.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// Open the store, loading existing data if the file exists.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read storage file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse storage file {}", path.display()))?
        } else {
            StoreData::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    /// Persist a feature snapshot.
    pub fn save_feature(&self, snapshot: FeatureSnapshot) -> Result<()> {
        let mut data = self.lock();
        data.features.insert(snapshot.id.clone(), snapshot);
        data.updated_at = Some(Utc::now());
        self.flush(&data)
    }

    /// Load a single feature snapshot.
    pub fn load_feature(&self, id: &str) -> Option<FeatureSnapshot> {
        self.lock().features.get(id).cloned()
    }

    /// Load every feature snapshot.
    pub fn load_all(&self) -> Vec<FeatureSnapshot> {
        self.lock().features.values().cloned().collect()
    }

    /// Remove a feature snapshot.
    pub fn delete_feature(&self, id: &str) -> Result<()> {
        let mut data = self.lock();
        data.features.remove(id);
        data.updated_at = Some(Utc::now());
        self.flush(&data)
    }

    fn flush(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(data).context("failed to serialize storage")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write storage file {}", self.path.display()))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot(id: &str) -> FeatureSnapshot {
        let feature = Feature::new(id, "User Auth", "Build auth");
        FeatureSnapshot::of(&feature)
    }

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("features.json")).unwrap();
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.json");

        let store = FileStore::open(&path).unwrap();
        store.save_feature(snapshot("aaaa1111")).unwrap();
        store.save_feature(snapshot("bbbb2222")).unwrap();
        drop(store);

        let reloaded = FileStore::open(&path).unwrap();
        assert_eq!(reloaded.load_all().len(), 2);
        let snap = reloaded.load_feature("aaaa1111").unwrap();
        assert_eq!(snap.name, "User Auth");
        assert_eq!(snap.phase, Phase::Idle);
    }

    #[test]
    fn test_delete_feature() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("features.json")).unwrap();
        store.save_feature(snapshot("aaaa1111")).unwrap();
        store.delete_feature("aaaa1111").unwrap();
        assert!(store.load_feature("aaaa1111").is_none());
    }

    #[test]
    fn test_snapshot_captures_tasks_and_answers() {
        use crate::task::Task;
        use std::time::Duration;

        let mut feature = Feature::new("aaaa1111", "Auth", "desc");
        let mut task = Task::new("do it", "claude-code", Duration::from_secs(5));
        task.feature_id = Some(feature.id.clone());
        task.is_parallel = true;
        feature.set_tasks(vec![task]);
        feature.answers.insert("Q1".into(), "postgres".into());

        let snap = FeatureSnapshot::of(&feature);
        assert_eq!(snap.tasks.len(), 1);
        assert!(snap.tasks[0].is_parallel);
        assert_eq!(snap.answers["Q1"], "postgres");

        let json = serde_json::to_string(&snap).unwrap();
        let back: FeatureSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tasks[0].id, snap.tasks[0].id);
    }

    #[test]
    fn test_open_corrupt_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.json");
        std::fs::write(&path, "{ corrupt").unwrap();
        assert!(FileStore::open(&path).is_err());
    }
}
