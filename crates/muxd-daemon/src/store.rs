//! File-backed session store
//!
//! All records live in one JSON array at `<home>/sessions.json`, rewritten on
//! every save through a temp file and a rename.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use muxd_core::{SessionRecord, SessionStore};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const SESSIONS_FILE_NAME: &str = "sessions.json";

pub struct JsonSessionStore {
    path: PathBuf,
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl JsonSessionStore {
    /// Load `path` if it exists. Closed records are dropped; nothing reads
    /// them back.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if !content.trim().is_empty() {
                let stored: Vec<SessionRecord> = serde_json::from_str(&content)
                    .with_context(|| format!("invalid session file {}", path.display()))?;
                records = stored
                    .into_iter()
                    .filter(SessionRecord::is_active)
                    .map(|r| (r.id.clone(), r))
                    .collect();
            }
            info!(path = %path.display(), active = records.len(), "Session records loaded");
        }
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }
}

fn sorted(records: &HashMap<String, SessionRecord>) -> Vec<SessionRecord> {
    let mut all: Vec<SessionRecord> = records.values().cloned().collect();
    all.sort_by_key(|r| r.created_at);
    all
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        // held across the write so concurrent saves land in order
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record.clone());
        let json = serde_json::to_string_pretty(&sorted(&records))?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        debug!(session_id = %record.id, status = record.status.as_str(), "Session record saved");
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<SessionRecord>> {
        Ok(sorted(&*self.records.lock().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxd_core::{MuxTarget, SessionStatus};

    fn record(id: &str, created_at: i64, status: SessionStatus) -> SessionRecord {
        SessionRecord {
            id: id.into(),
            name: id.into(),
            owner: "chat-1".into(),
            target: MuxTarget::session(format!("muxd-{}", id)),
            status,
            workdir: PathBuf::from("/work"),
            created_at,
            last_activity_at: created_at,
            context_ids: vec![],
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join(SESSIONS_FILE_NAME);

        let store = JsonSessionStore::open(&path).unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        store.save(&record("b", 2, SessionStatus::Active)).await.unwrap();
        store.save(&record("a", 1, SessionStatus::Active)).await.unwrap();
        store.save(&record("c", 3, SessionStatus::Active)).await.unwrap();
        store.save(&record("c", 3, SessionStatus::Closed)).await.unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 3);
        drop(store);

        let reopened = JsonSessionStore::open(&path).unwrap();
        let ids: Vec<String> = reopened
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSIONS_FILE_NAME);
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonSessionStore::open(&path).is_err());

        std::fs::write(&path, "  \n").unwrap();
        assert!(JsonSessionStore::open(&path).is_ok());
    }
}
