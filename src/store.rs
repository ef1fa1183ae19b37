use crate::output::OutputLine;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

pub const HISTORY_KEY: &str = "history";
pub const OUTPUT_KEY: &str = "output";

/// History is truncated to the most recent 100 entries on persistence.
pub const HISTORY_LIMIT: usize = 100;
/// The transcript is truncated to the most recent 200 lines on persistence.
pub const OUTPUT_LIMIT: usize = 200;

/// Session-scoped key-value store. Implementations survive reloads (or not,
/// for the ephemeral store); the adapter above them treats every write as
/// best-effort.
pub trait KvStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str);
}

/// File-backed store: one JSON object per session file.
pub struct FileKvStore {
    path: PathBuf,
}

impl FileKvStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("failed to create state directory")?;
        }
        Ok(Self { path })
    }

    fn read_map(&self) -> HashMap<String, Value> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn write_map(&self, map: &HashMap<String, Value>) -> Result<()> {
        let content = serde_json::to_string(map)?;
        fs::write(&self.path, content).context("failed to write state file")?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.read_map().get(key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_map();
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_map(&map)
    }

    fn remove(&self, key: &str) {
        let mut map = self.read_map();
        if map.remove(key).is_some() {
            if let Err(err) = self.write_map(&map) {
                warn!("failed to remove state key {key}: {err:#}");
            }
        }
    }
}

/// In-memory store for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryKvStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Ok(mut map) = self.map.lock() {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) {
        if let Ok(mut map) = self.map.lock() {
            map.remove(key);
        }
    }
}

impl<S: KvStore> KvStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }
}

/// Bounded save/restore of command history and transcript. Writes are
/// best-effort: a quota or I/O failure is logged and swallowed, never
/// surfaced to the user or retried.
pub struct StateStore {
    kv: Box<dyn KvStore>,
}

impl StateStore {
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn load_history(&self) -> Vec<String> {
        self.kv
            .get(HISTORY_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn load_output(&self) -> Vec<OutputLine> {
        self.kv
            .get(OUTPUT_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save_history(&self, entries: &[String]) {
        let start = entries.len().saturating_sub(HISTORY_LIMIT);
        self.persist(HISTORY_KEY, &entries[start..]);
    }

    pub fn save_output(&self, lines: &[OutputLine]) {
        let start = lines.len().saturating_sub(OUTPUT_LIMIT);
        self.persist(OUTPUT_KEY, &lines[start..]);
    }

    fn persist<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to serialize {key}: {err}");
                return;
            }
        };
        if let Err(err) = self.kv.set(key, &raw) {
            warn!("failed to persist {key}: {err:#}");
        }
    }

    /// Remove both persisted keys.
    pub fn clear(&self) {
        self.kv.remove(HISTORY_KEY);
        self.kv.remove(OUTPUT_KEY);
    }

    #[cfg(test)]
    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputLine, SegmentKind};

    #[test]
    fn test_history_is_bounded_on_save() {
        let store = StateStore::new(Box::new(MemoryKvStore::new()));
        let entries: Vec<String> = (0..150).map(|i| format!("echo {i}")).collect();
        store.save_history(&entries);

        let restored = store.load_history();
        assert_eq!(restored.len(), HISTORY_LIMIT);
        assert_eq!(restored.first().unwrap(), "echo 50");
        assert_eq!(restored.last().unwrap(), "echo 149");
    }

    #[test]
    fn test_output_is_bounded_on_save() {
        let store = StateStore::new(Box::new(MemoryKvStore::new()));
        let lines: Vec<OutputLine> = (0..250)
            .map(|i| OutputLine::plain(format!("line {i}"), SegmentKind::Normal))
            .collect();
        store.save_output(&lines);

        let restored = store.load_output();
        assert_eq!(restored.len(), OUTPUT_LIMIT);
        assert_eq!(restored.first().unwrap().flatten(), "line 50");
    }

    #[test]
    fn test_bounds_are_independent() {
        let store = StateStore::new(Box::new(MemoryKvStore::new()));
        let entries: Vec<String> = (0..150).map(|i| i.to_string()).collect();
        store.save_history(&entries);
        store.save_output(&[OutputLine::plain("only line", SegmentKind::Info)]);

        assert_eq!(store.load_history().len(), HISTORY_LIMIT);
        assert_eq!(store.load_output().len(), 1);
    }

    #[test]
    fn test_clear_removes_keys() {
        let store = StateStore::new(Box::new(MemoryKvStore::new()));
        store.save_history(&["list jobs".to_string()]);
        store.save_output(&[OutputLine::plain("x", SegmentKind::Normal)]);
        store.clear();

        assert!(store.kv().get(HISTORY_KEY).is_none());
        assert!(store.kv().get(OUTPUT_KEY).is_none());
        assert!(store.load_history().is_empty());
        assert!(store.load_output().is_empty());
    }

    #[test]
    fn test_corrupt_state_loads_empty() {
        let kv = MemoryKvStore::new();
        kv.set(HISTORY_KEY, "{not json").unwrap();
        let store = StateStore::new(Box::new(kv));
        assert!(store.load_history().is_empty());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileKvStore::new(path.clone()).unwrap();
        store.set(HISTORY_KEY, "[\"count all\"]").unwrap();
        store.set(OUTPUT_KEY, "[]").unwrap();

        // A fresh handle sees the same contents.
        let reopened = FileKvStore::new(path).unwrap();
        assert_eq!(reopened.get(HISTORY_KEY).unwrap(), "[\"count all\"]");

        reopened.remove(HISTORY_KEY);
        assert!(reopened.get(HISTORY_KEY).is_none());
        assert_eq!(reopened.get(OUTPUT_KEY).unwrap(), "[]");
    }
}
