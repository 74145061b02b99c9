//! In-memory course set with atomic reload.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info};

use crate::timetable::course::{self, CourseError, CourseRecord};

/// Errors for the course file as a whole.
#[derive(Debug)]
pub enum LoadError {
    ReadFile { path: PathBuf, source: std::io::Error },
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// The store was built in memory and has no file to reload from.
    NoSource,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read course file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "course file '{}' is not a JSON list: {}", path.display(), source)
            }
            Self::NoSource => write!(f, "course store has no backing file"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::NoSource => None,
        }
    }
}

/// An entry that failed validation.
#[derive(Debug)]
pub struct RejectedCourse {
    pub index: usize,
    /// Name from the entry, or a placeholder when it has none.
    pub name: String,
    pub error: CourseError,
}

/// Outcome of reading a course list.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub rejected: Vec<RejectedCourse>,
}

/// Validates every entry of a JSON course list. Bad entries are reported, not fatal.
pub fn parse_course_list(json: &str) -> Result<(Vec<CourseRecord>, Vec<RejectedCourse>), serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let mut courses = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let name = entry
            .get("name")
            .or_else(|| entry.get("course_name"))
            .and_then(|v| v.as_str())
            .unwrap_or("未知课程")
            .to_string();
        match course::parse_course(entry) {
            Ok(record) => courses.push(record),
            Err(error) => rejected.push(RejectedCourse { index, name, error }),
        }
    }
    Ok((courses, rejected))
}

/// Holds the current course set. Readers get a snapshot; reloads swap the whole set.
#[derive(Debug)]
pub struct CourseStore {
    courses: RwLock<Arc<Vec<CourseRecord>>>,
    source: Option<PathBuf>,
}

impl CourseStore {
    #[cfg(test)]
    pub fn new(courses: Vec<CourseRecord>) -> Self {
        Self {
            courses: RwLock::new(Arc::new(courses)),
            source: None,
        }
    }

    /// Loads the store from a JSON course file.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<(Self, LoadReport), LoadError> {
        let store = Self {
            courses: RwLock::new(Arc::new(Vec::new())),
            source: Some(path.as_ref().to_path_buf()),
        };
        let report = store.reload().await?;
        Ok((store, report))
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Re-reads the backing file. On error the current set is kept.
    pub async fn reload(&self) -> Result<LoadReport, LoadError> {
        let path = self.source.as_ref().ok_or(LoadError::NoSource)?;
        let json = tokio::fs::read_to_string(path).await.map_err(|e| LoadError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let (courses, rejected) = parse_course_list(&json).map_err(|e| LoadError::ParseJson {
            path: path.clone(),
            source: e,
        })?;

        for r in &rejected {
            error!("Skipping course #{} '{}': {}", r.index, r.name, r.error);
        }
        let report = LoadReport {
            loaded: courses.len(),
            rejected,
        };
        self.replace(courses);
        info!("📚 Loaded {} course(s) from {:?}", report.loaded, path);
        Ok(report)
    }

    pub fn replace(&self, courses: Vec<CourseRecord>) {
        let mut guard = self.courses.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(courses);
    }

    pub fn snapshot(&self) -> Arc<Vec<CourseRecord>> {
        self.courses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Courses meeting on `day_of_week` during `week`, in file order.
    pub fn courses_on(&self, week: u32, day_of_week: u8) -> Vec<CourseRecord> {
        self.snapshot()
            .iter()
            .filter(|c| c.is_active_in(week) && c.meets_on(day_of_week))
            .cloned()
            .collect()
    }

    /// Courses of `week` grouped by weekday; days without courses are absent.
    pub fn courses_in_week(&self, week: u32) -> BTreeMap<u8, Vec<CourseRecord>> {
        let snapshot = self.snapshot();
        let mut by_day: BTreeMap<u8, Vec<CourseRecord>> = BTreeMap::new();
        for c in snapshot.iter().filter(|c| c.is_active_in(week)) {
            by_day.entry(c.day_of_week).or_default().push(c.clone());
        }
        by_day
    }
}
