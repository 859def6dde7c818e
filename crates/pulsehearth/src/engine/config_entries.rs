//! Persistent store of configured integration instances.
//!
//! Entries live in a single pretty-printed JSON file. Runtime state (loaded,
//! failed, waiting for re-auth) is kept in memory only.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

pub type EntryMap = serde_json::Map<String, serde_json::Value>;

const STORAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryState {
    #[default]
    NotLoaded,
    Loaded,
    SetupError,
    ReauthRequired,
}

/// How the entry's current credentials were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntrySource {
    #[default]
    User,
    Reauth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,

    /// Prevents configuring the same account twice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub data: EntryMap,

    #[serde(default)]
    pub options: EntryMap,

    #[serde(default)]
    pub source: EntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip)]
    pub state: EntryState,

    /// Explanation for failed states (not persisted)
    #[serde(skip)]
    pub reason: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>, data: EntryMap) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            unique_id: None,
            data,
            options: EntryMap::new(),
            source: EntrySource::User,
            state: EntryState::NotLoaded,
            reason: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("config entry not found: {0}")]
    NotFound(String),

    #[error("{domain} is already configured for {unique_id}")]
    AlreadyConfigured { domain: String, unique_id: String },

    #[error("failed to access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config entry file '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntries {
    version: u32,
    entries: Vec<ConfigEntry>,
}

/// Config entries keyed by entry id.
///
/// Every change that reaches disk holds `save_lock` from the in-memory edit
/// through the rename, so the file always matches the latest edit. A failed
/// save undoes the edit.
pub struct ConfigEntries {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, ConfigEntry>>,
    save_lock: tokio::sync::Mutex<()>,
}

impl ConfigEntries {
    /// Open the store at `path`. A missing file is an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, EntryError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let stored: StoredEntries =
                    serde_json::from_slice(&bytes).map_err(|source| EntryError::Json {
                        path: path.clone(),
                        source,
                    })?;
                info!(
                    "Loaded {} config entries from {}",
                    stored.entries.len(),
                    path.display()
                );
                stored
                    .entries
                    .into_iter()
                    .map(|e| (e.entry_id.clone(), e))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config entries at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(source) => return Err(EntryError::Io { path, source }),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            save_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Write all entries, replacing the file atomically. Callers hold `save_lock`.
    async fn save(&self) -> Result<(), EntryError> {
        let stored = StoredEntries {
            version: STORAGE_VERSION,
            entries: self.all(),
        };
        let json = serde_json::to_vec_pretty(&stored).map_err(|source| EntryError::Json {
            path: self.path.clone(),
            source,
        })?;

        let io_err = |source| EntryError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        debug!("Saved {} config entries", stored.entries.len());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ConfigEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.lock().get(entry_id).cloned()
    }

    /// All entries, oldest first
    pub fn all(&self) -> Vec<ConfigEntry> {
        self.lock().values().cloned().collect()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.lock()
            .values()
            .find(|e| e.domain == domain && e.unique_id.as_deref() == Some(unique_id))
            .cloned()
    }

    pub async fn add(&self, entry: ConfigEntry) -> Result<ConfigEntry, EntryError> {
        let _saving = self.save_lock.lock().await;
        {
            let mut entries = self.lock();
            if let Some(unique_id) = &entry.unique_id {
                let duplicate = entries
                    .values()
                    .any(|e| e.domain == entry.domain && e.unique_id.as_ref() == Some(unique_id));
                if duplicate {
                    return Err(EntryError::AlreadyConfigured {
                        domain: entry.domain.clone(),
                        unique_id: unique_id.clone(),
                    });
                }
            }
            entries.insert(entry.entry_id.clone(), entry.clone());
        }
        if let Err(e) = self.save().await {
            self.lock().remove(&entry.entry_id);
            return Err(e);
        }

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Replace credentials after a successful re-auth.
    pub async fn update_data(
        &self,
        entry_id: &str,
        data: EntryMap,
        source: EntrySource,
    ) -> Result<ConfigEntry, EntryError> {
        let _saving = self.save_lock.lock().await;
        let (previous, updated) = self.modify(entry_id, |entry| {
            entry.data = data;
            entry.source = source;
        })?;
        if let Err(e) = self.save().await {
            self.restore(previous);
            return Err(e);
        }
        Ok(updated)
    }

    pub async fn update_options(
        &self,
        entry_id: &str,
        options: EntryMap,
    ) -> Result<ConfigEntry, EntryError> {
        let _saving = self.save_lock.lock().await;
        let (previous, updated) = self.modify(entry_id, |entry| entry.options = options)?;
        if let Err(e) = self.save().await {
            self.restore(previous);
            return Err(e);
        }
        Ok(updated)
    }

    pub async fn remove(&self, entry_id: &str) -> Result<ConfigEntry, EntryError> {
        let _saving = self.save_lock.lock().await;
        let removed = self
            .lock()
            .remove(entry_id)
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        if let Err(e) = self.save().await {
            self.lock().insert(removed.entry_id.clone(), removed);
            return Err(e);
        }

        info!(
            "Removed config entry: {} ({}) [{}]",
            removed.title, removed.domain, entry_id
        );
        Ok(removed)
    }

    /// Record the runtime state of an entry. Unknown ids are ignored.
    pub fn set_state(&self, entry_id: &str, state: EntryState, reason: Option<String>) {
        if let Some(entry) = self.lock().get_mut(entry_id) {
            debug!("[{}] Entry state {} -> {}", entry_id, entry.state, state);
            entry.state = state;
            entry.reason = reason;
        }
    }

    /// Apply `f` to an entry, returning it as it was before and after.
    fn modify(
        &self,
        entry_id: &str,
        f: impl FnOnce(&mut ConfigEntry),
    ) -> Result<(ConfigEntry, ConfigEntry), EntryError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        let previous = entry.clone();
        f(entry);
        entry.modified_at = Utc::now();
        Ok((previous, entry.clone()))
    }

    /// Put back the persisted fields of an entry, leaving its runtime state alone.
    fn restore(&self, previous: ConfigEntry) {
        if let Some(entry) = self.lock().get_mut(&previous.entry_id) {
            entry.data = previous.data;
            entry.options = previous.options;
            entry.source = previous.source;
            entry.modified_at = previous.modified_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(username: &str) -> EntryMap {
        json!({"username": username, "password": "secret"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config_entries.json");

        let store = ConfigEntries::load(&path).await.unwrap();
        assert!(store.all().is_empty());

        let entry = store
            .add(ConfigEntry::new("adtpulse", "ADT: Site 160301z", data("a@b.c")).with_unique_id("160301z"))
            .await
            .unwrap();
        store.set_state(&entry.entry_id, EntryState::Loaded, None);

        let reopened = ConfigEntries::load(&path).await.unwrap();
        let loaded = reopened.get(&entry.entry_id).unwrap();
        assert_eq!(loaded.title, "ADT: Site 160301z");
        assert_eq!(loaded.unique_id.as_deref(), Some("160301z"));
        assert_eq!(loaded.data["username"], "a@b.c");
        // Runtime state is not persisted
        assert_eq!(loaded.state, EntryState::NotLoaded);
    }

    #[tokio::test]
    async fn test_duplicate_unique_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigEntries::load(dir.path().join("entries.json"))
            .await
            .unwrap();

        store
            .add(ConfigEntry::new("adtpulse", "first", data("a")).with_unique_id("160301z"))
            .await
            .unwrap();
        let err = store
            .add(ConfigEntry::new("adtpulse", "second", data("b")).with_unique_id("160301z"))
            .await
            .unwrap_err();
        assert!(matches!(err, EntryError::AlreadyConfigured { .. }));

        // Same unique id under another domain is fine
        store
            .add(ConfigEntry::new("other", "third", data("c")).with_unique_id("160301z"))
            .await
            .unwrap();
        assert_eq!(store.all().len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigEntries::load(dir.path().join("entries.json"))
            .await
            .unwrap();
        let entry = store
            .add(ConfigEntry::new("adtpulse", "site", data("old")))
            .await
            .unwrap();

        let updated = store
            .update_data(&entry.entry_id, data("new"), EntrySource::Reauth)
            .await
            .unwrap();
        assert_eq!(updated.data["username"], "new");
        assert_eq!(updated.source, EntrySource::Reauth);

        let options = json!({"relogin_interval": 60}).as_object().cloned().unwrap();
        store
            .update_options(&entry.entry_id, options)
            .await
            .unwrap();
        assert_eq!(
            store.get(&entry.entry_id).unwrap().options["relogin_interval"],
            60
        );

        store.remove(&entry.entry_id).await.unwrap();
        assert!(store.get(&entry.entry_id).is_none());
        assert!(matches!(
            store.remove(&entry.entry_id).await,
            Err(EntryError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let store = std::sync::Arc::new(ConfigEntries::load(&path).await.unwrap());

        let mut ids = Vec::new();
        for i in 0..8 {
            let entry = store
                .add(ConfigEntry::new("adtpulse", format!("site {}", i), data("a")))
                .await
                .unwrap();
            ids.push(entry.entry_id);
        }

        let mut tasks = Vec::new();
        for round in 0..50 {
            for id in &ids {
                let store = store.clone();
                let id = id.clone();
                tasks.push(tokio::spawn(async move {
                    let options = json!({"scan_interval": round}).as_object().cloned().unwrap();
                    store.update_options(&id, options).await
                }));
            }
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = ConfigEntries::load(&path).await.unwrap();
        for id in &ids {
            assert_eq!(
                reopened.get(id).unwrap().options,
                store.get(id).unwrap().options
            );
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory_and_disk_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let store = ConfigEntries::load(&path).await.unwrap();
        let entry = store
            .add(ConfigEntry::new("adtpulse", "site", data("old")))
            .await
            .unwrap();
        store.set_state(&entry.entry_id, EntryState::Loaded, None);

        // A directory in place of the file makes every rename fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let options = json!({"scan_interval": 5}).as_object().cloned().unwrap();
        let err = store
            .update_options(&entry.entry_id, options)
            .await
            .unwrap_err();
        assert!(matches!(err, EntryError::Io { .. }));

        let err = store
            .update_data(&entry.entry_id, data("new"), EntrySource::Reauth)
            .await
            .unwrap_err();
        assert!(matches!(err, EntryError::Io { .. }));

        let current = store.get(&entry.entry_id).unwrap();
        assert!(current.options.is_empty());
        assert_eq!(current.data["username"], "old");
        assert_eq!(current.source, EntrySource::User);
        assert_eq!(current.state, EntryState::Loaded);

        let added = ConfigEntry::new("adtpulse", "other", data("b"));
        let added_id = added.entry_id.clone();
        assert!(store.add(added).await.is_err());
        assert!(store.get(&added_id).is_none());

        assert!(store.remove(&entry.entry_id).await.is_err());
        assert!(store.get(&entry.entry_id).is_some());
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = ConfigEntries::load(&path).await.err().unwrap();
        assert!(matches!(err, EntryError::Json { .. }));
    }
}
