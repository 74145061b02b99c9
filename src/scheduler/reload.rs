//! Picks up edits to the course file and the persisted week while running.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::scheduler::{ReminderScheduler, RescheduleReport};
use crate::timetable::{CourseStore, WeekCounter};

pub struct CourseWatcher {
    store: Arc<CourseStore>,
    week: Arc<WeekCounter>,
    scheduler: Arc<ReminderScheduler>,
    path: Option<PathBuf>,
    last_modified: Option<SystemTime>,
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.and_then(|m| m.modified()).ok()
}

impl CourseWatcher {
    pub async fn new(store: Arc<CourseStore>, week: Arc<WeekCounter>, scheduler: Arc<ReminderScheduler>) -> Self {
        let path = store.source().map(|p| p.to_path_buf());
        let last_modified = match path.as_deref() {
            Some(p) => modified(p).await,
            None => None,
        };
        Self {
            store,
            week,
            scheduler,
            path,
            last_modified,
        }
    }

    /// One polling round. Returns the reschedule outcome when the course file
    /// changed and was reloaded.
    pub async fn poll(&mut self) -> Option<RescheduleReport> {
        match self.week.refresh().await {
            Ok(Some(week)) => info!("📅 Week counter now {}", week),
            Ok(None) => {}
            Err(e) => warn!("Could not re-read current week: {}", e),
        }

        let path = self.path.as_ref()?;
        let stamp = modified(path).await;
        if stamp.is_none() || stamp == self.last_modified {
            return None;
        }
        self.last_modified = stamp;

        match self.store.reload().await {
            Ok(load) => {
                info!(
                    "📚 Reloaded {} course(s) from {:?} ({} rejected)",
                    load.loaded,
                    path,
                    load.rejected.len()
                );
                let report = self.scheduler.reschedule().await;
                info!(
                    "Jobs: {} added, {} updated, {} removed, {} skipped",
                    report.added.len(),
                    report.updated.len(),
                    report.removed.len(),
                    report.skipped.len()
                );
                Some(report)
            }
            Err(e) => {
                // Keep serving the previous course set.
                error!("Failed to reload courses from {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn spawn(mut self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                self.poll().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::notify::RecordingSink;
    use crate::scheduler::ReminderSettings;
    use std::fs::File;
    use tempfile::TempDir;

    const ONE_COURSE: &str = r#"[{"name": "数学", "start_time": "10:00", "end_time": "11:35",
        "day_of_week": 3, "start_week": 1, "end_week": 16}]"#;
    const TWO_COURSES: &str = r#"[{"name": "数学", "start_time": "10:00", "end_time": "11:35",
        "day_of_week": 3, "start_week": 1, "end_week": 16},
        {"name": "体育", "start_time": "16:00", "end_time": "17:35",
        "day_of_week": 5, "start_week": 1, "end_week": 16}]"#;

    fn touch(path: &Path, content: &str, offset_secs: u64) {
        std::fs::write(path, content).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    struct Fixture {
        _dir: TempDir,
        courses: PathBuf,
        config: PathBuf,
        week: Arc<WeekCounter>,
        scheduler: Arc<ReminderScheduler>,
        watcher: CourseWatcher,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let courses = dir.path().join("courses.json");
        let config = dir.path().join("config.json");
        touch(&courses, ONE_COURSE, 0);
        std::fs::write(&config, r#"{"token": "t", "current_week": 3}"#).unwrap();

        let (store, _) = CourseStore::open(&courses).await.unwrap();
        let store = Arc::new(store);
        let week = Arc::new(WeekCounter::persisted(3, &config));
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            week.clone(),
            Arc::new(FixedClock::at(2024, 9, 4, 8, 0)),
            Arc::new(RecordingSink::default()),
            ReminderSettings {
                lead_minutes: 30,
                recipient: "@all".into(),
                salutation: None,
            },
        ));
        scheduler.reschedule().await;
        let watcher = CourseWatcher::new(store, week.clone(), scheduler.clone()).await;
        Fixture {
            _dir: dir,
            courses,
            config,
            week,
            scheduler,
            watcher,
        }
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_reloaded() {
        let mut f = fixture().await;
        assert!(f.watcher.poll().await.is_none());
    }

    #[tokio::test]
    async fn test_changed_file_reschedules() {
        let mut f = fixture().await;
        touch(&f.courses, TWO_COURSES, 10);

        let report = f.watcher.poll().await.unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.updated.len(), 1);
        assert_eq!(f.scheduler.jobs().await.len(), 2);

        // same stamp again: nothing to do
        assert!(f.watcher.poll().await.is_none());
    }

    #[tokio::test]
    async fn test_broken_file_keeps_previous_jobs() {
        let mut f = fixture().await;
        touch(&f.courses, "not json", 10);

        assert!(f.watcher.poll().await.is_none());
        assert_eq!(f.scheduler.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_adopts_larger_week_from_config() {
        let mut f = fixture().await;
        std::fs::write(&f.config, r#"{"token": "t", "current_week": 7}"#).unwrap();
        f.watcher.poll().await;
        assert_eq!(f.week.current(), 7);

        std::fs::write(&f.config, r#"{"token": "t", "current_week": 2}"#).unwrap();
        f.watcher.poll().await;
        assert_eq!(f.week.current(), 7);
    }
}
