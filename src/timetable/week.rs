//! Current academic week, persisted in the config file.
//!
//! The counter only moves forward within a process. It is stored under the
//! `current_week` key of the main config file; other keys are preserved.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{info, warn};

const WEEK_KEY: &str = "current_week";

/// Errors while reading or writing the persisted week.
#[derive(Debug)]
pub enum StateError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Write { path: PathBuf, source: std::io::Error },
    /// The file is JSON but not an object, or holds a non-positive week.
    Invalid { path: PathBuf, reason: String },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "failed to read '{}': {}", path.display(), source),
            Self::Parse { path, source } => write!(f, "failed to parse '{}': {}", path.display(), source),
            Self::Write { path, source } => write!(f, "failed to write '{}': {}", path.display(), source),
            Self::Invalid { path, reason } => write!(f, "invalid state in '{}': {}", path.display(), reason),
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid { .. } => None,
        }
    }
}

/// Process-wide week counter. Single writer (the rollover job), many readers.
#[derive(Debug)]
pub struct WeekCounter {
    current: RwLock<u32>,
    path: Option<PathBuf>,
    /// Serializes access to the backing file; readers of `current` never wait on it.
    file: Mutex<()>,
}

impl WeekCounter {
    /// Counter backed by `path`, starting at `initial` (clamped to at least 1).
    pub fn persisted<P: AsRef<Path>>(initial: u32, path: P) -> Self {
        Self {
            current: RwLock::new(initial.max(1)),
            path: Some(path.as_ref().to_path_buf()),
            file: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn in_memory(initial: u32) -> Self {
        Self {
            current: RwLock::new(initial.max(1)),
            path: None,
            file: Mutex::new(()),
        }
    }

    pub fn current(&self) -> u32 {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to the next week and persists it. The in-memory value advances
    /// even if the write fails.
    pub async fn advance(&self) -> Result<u32, StateError> {
        let week = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *guard += 1;
            *guard
        };
        if let Some(path) = &self.path {
            let _file = self.file.lock().await;
            // a later advance may have landed while waiting for the file
            write_week(path, self.current().max(week)).await?;
        }
        Ok(week)
    }

    /// Adopts a larger week written to the file by someone else. Smaller values
    /// are ignored. Returns the new week when it changed.
    pub async fn refresh(&self) -> Result<Option<u32>, StateError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let stored = {
            let _file = self.file.lock().await;
            read_week(path).await?
        };
        let Some(stored) = stored else {
            return Ok(None);
        };

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if stored > *guard {
            info!("Adopting current_week {} from {:?} (was {})", stored, path, *guard);
            *guard = stored;
            Ok(Some(stored))
        } else {
            if stored < *guard {
                warn!("Ignoring current_week {} in {:?}: counter is already at {}", stored, path, *guard);
            }
            Ok(None)
        }
    }
}

async fn read_object(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>, StateError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| StateError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| StateError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StateError::Invalid {
            path: path.to_path_buf(),
            reason: "top level is not an object".into(),
        }),
    }
}

async fn read_week(path: &Path) -> Result<Option<u32>, StateError> {
    let map = read_object(path).await?;
    match map.get(WEEK_KEY) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|w| *w >= 1)
            .and_then(|w| u32::try_from(w).ok())
            .map(Some)
            .ok_or_else(|| StateError::Invalid {
                path: path.to_path_buf(),
                reason: format!("{WEEK_KEY} is {v}"),
            }),
    }
}

/// Rewrites only the week key, through a temp file and rename.
async fn write_week(path: &Path, week: u32) -> Result<(), StateError> {
    let mut map = read_object(path).await?;
    map.insert(WEEK_KEY.to_string(), serde_json::Value::from(week));

    let json = serde_json::to_string_pretty(&serde_json::Value::Object(map)).map_err(|e| {
        StateError::Parse {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await.map_err(|e| StateError::Write {
        path: tmp.clone(),
        source: e,
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| StateError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config_file(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn stored(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_advance_persists_and_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, r#"{"token": "abc", "current_week": 5, "webhook_urls": ["u"]}"#);
        let counter = WeekCounter::persisted(5, &path);

        assert_eq!(counter.advance().await.unwrap(), 6);
        assert_eq!(counter.current(), 6);

        let json = stored(&path);
        assert_eq!(json["current_week"], 6);
        assert_eq!(json["token"], "abc");
        assert_eq!(json["webhook_urls"][0], "u");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_advance_adds_missing_key() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, r#"{"token": "abc"}"#);
        let counter = WeekCounter::persisted(1, &path);
        counter.advance().await.unwrap();
        assert_eq!(stored(&path)["current_week"], 2);
    }

    #[tokio::test]
    async fn test_advance_write_failure_still_advances() {
        let counter = WeekCounter::persisted(3, "/nonexistent/dir/config.json");
        assert!(counter.advance().await.is_err());
        assert_eq!(counter.current(), 4);
    }

    #[tokio::test]
    async fn test_readers_see_new_week_while_file_is_busy() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, r#"{"token": "abc", "current_week": 5}"#);
        let counter = Arc::new(WeekCounter::persisted(5, &path));

        let file = counter.file.lock().await;
        let task = tokio::spawn({
            let counter = counter.clone();
            async move { counter.advance().await }
        });
        for _ in 0..10 {
            if counter.current() == 6 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(counter.current(), 6);
        assert_eq!(stored(&path)["current_week"], 5);

        drop(file);
        assert_eq!(task.await.unwrap().unwrap(), 6);
        assert_eq!(stored(&path)["current_week"], 6);
    }

    #[test]
    fn test_initial_is_at_least_one() {
        assert_eq!(WeekCounter::in_memory(0).current(), 1);
    }

    #[tokio::test]
    async fn test_refresh_only_moves_forward() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, r#"{"current_week": 4}"#);
        let counter = WeekCounter::persisted(4, &path);

        assert_eq!(counter.refresh().await.unwrap(), None);

        std::fs::write(&path, r#"{"current_week": 7}"#).unwrap();
        assert_eq!(counter.refresh().await.unwrap(), Some(7));
        assert_eq!(counter.current(), 7);

        std::fs::write(&path, r#"{"current_week": 2}"#).unwrap();
        assert_eq!(counter.refresh().await.unwrap(), None);
        assert_eq!(counter.current(), 7);

        std::fs::write(&path, r#"{"current_week": 0}"#).unwrap();
        assert!(matches!(counter.refresh().await, Err(StateError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_in_memory_refresh_is_noop() {
        let counter = WeekCounter::in_memory(2);
        assert_eq!(counter.refresh().await.unwrap(), None);
        assert_eq!(counter.advance().await.unwrap(), 3);
    }
}
