//! Recurring course reminders plus the Monday week rollover.
//!
//! Jobs live in a registry keyed by [`JobId`]. The run loop sleeps until the
//! earliest next fire, runs the rollover inline, then hands each due reminder
//! to its own task so a slow send never holds up other jobs.

pub mod job;
pub mod reload;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::notify::NotificationSink;
use crate::timetable::{render, CourseStore, WeekCounter};

pub use job::{plan_jobs, JobId, ReminderJob};
pub use reload::CourseWatcher;

/// Upper bound on one sleep of the run loop, so clock jumps are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ReminderSettings {
    pub lead_minutes: u32,
    pub recipient: String,
    pub salutation: Option<String>,
}

#[derive(Debug, Clone)]
enum JobKind {
    Rollover,
    Reminder(ReminderJob),
}

struct ScheduledJob {
    kind: JobKind,
    cron: String,
    schedule: Schedule,
    next: Option<DateTime<Tz>>,
}

/// Snapshot of one registered job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub cron: String,
    pub next: Option<DateTime<Tz>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RescheduleReport {
    pub added: Vec<JobId>,
    pub updated: Vec<JobId>,
    pub removed: Vec<JobId>,
    pub skipped: Vec<JobId>,
}

pub struct ReminderScheduler {
    store: Arc<CourseStore>,
    week: Arc<WeekCounter>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    settings: ReminderSettings,
    jobs: Mutex<BTreeMap<JobId, ScheduledJob>>,
    changed: Notify,
    shutdown: Notify,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<CourseStore>,
        week: Arc<WeekCounter>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            store,
            week,
            clock,
            sink,
            settings,
            jobs: Mutex::new(BTreeMap::new()),
            changed: Notify::new(),
            shutdown: Notify::new(),
        }
    }

    pub async fn install_week_rollover(&self) {
        let schedule = match Schedule::from_str(job::ROLLOVER_CRON) {
            Ok(s) => s,
            Err(e) => {
                error!("Invalid rollover cron {:?}: {}", job::ROLLOVER_CRON, e);
                return;
            }
        };
        let next = schedule.after(&self.clock.now()).next();
        self.jobs.lock().await.insert(
            JobId::rollover(),
            ScheduledJob {
                kind: JobKind::Rollover,
                cron: job::ROLLOVER_CRON.to_string(),
                schedule,
                next,
            },
        );
        info!("📅 Week rollover scheduled, next at {:?}", next);
        self.changed.notify_one();
    }

    /// Re-derives reminder jobs from the current course set. Existing jobs are
    /// updated in place, new ones added and jobs of vanished courses removed.
    pub async fn reschedule(&self) -> RescheduleReport {
        let courses = self.store.snapshot();
        let planned = plan_jobs(&courses, self.settings.lead_minutes);
        let now = self.clock.now();
        let mut report = RescheduleReport::default();

        let mut jobs = self.jobs.lock().await;
        let stale: Vec<JobId> = jobs
            .iter()
            .filter(|(id, job)| matches!(job.kind, JobKind::Reminder(_)) && !planned.contains_key(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            jobs.remove(&id);
            info!("🗑️ Removed reminder job {}", id);
            report.removed.push(id);
        }

        for (id, planned_job) in planned {
            let cron = planned_job.cron_expr();
            let schedule = match Schedule::from_str(&cron) {
                Ok(s) => s,
                Err(e) => {
                    error!("Skipping {}: invalid cron {:?}: {}", id, cron, e);
                    report.skipped.push(id);
                    continue;
                }
            };

            match jobs.get_mut(&id) {
                Some(existing) => {
                    if existing.cron != cron {
                        existing.next = schedule.after(&now).next();
                        info!("🔁 Updated reminder job {} to {:?}", id, cron);
                    }
                    existing.kind = JobKind::Reminder(planned_job);
                    existing.cron = cron;
                    existing.schedule = schedule;
                    report.updated.push(id);
                }
                None => {
                    let next = schedule.after(&now).next();
                    info!("⏰ Added reminder job {} ({:?}), next at {:?}", id, cron, next);
                    jobs.insert(
                        id.clone(),
                        ScheduledJob {
                            kind: JobKind::Reminder(planned_job),
                            cron,
                            schedule,
                            next,
                        },
                    );
                    report.added.push(id);
                }
            }
        }
        drop(jobs);

        self.changed.notify_one();
        report
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|(id, job)| JobInfo {
                id: id.clone(),
                name: match &job.kind {
                    JobKind::Rollover => "week rollover".to_string(),
                    JobKind::Reminder(r) => r.name.clone(),
                },
                cron: job.cron.clone(),
                next: job.next,
            })
            .collect()
    }

    /// Fires every job due at `now`. The rollover completes before any reminder
    /// task is spawned; the returned handles belong to the reminder sends.
    pub async fn fire_due(&self, now: DateTime<Tz>) -> Vec<JoinHandle<()>> {
        let mut rollover_due = false;
        let mut reminders = Vec::new();
        {
            let mut jobs = self.jobs.lock().await;
            for job in jobs.values_mut() {
                let Some(scheduled_at) = job.next else { continue };
                if scheduled_at > now {
                    continue;
                }
                job.next = job.schedule.after(&now).next();
                match &job.kind {
                    JobKind::Rollover => rollover_due = true,
                    JobKind::Reminder(r) => reminders.push((r.clone(), scheduled_at)),
                }
            }
        }

        if rollover_due {
            self.roll_week().await;
        }

        reminders
            .into_iter()
            .map(|(job, scheduled_at)| {
                let week = self.week.clone();
                let sink = self.sink.clone();
                let settings = self.settings.clone();
                tokio::spawn(async move {
                    deliver_reminder(&job, scheduled_at, &week, sink.as_ref(), &settings).await;
                })
            })
            .collect()
    }

    async fn roll_week(&self) {
        match self.week.advance().await {
            Ok(week) => info!("📅 Academic week advanced to {}", week),
            Err(e) => error!(
                "Academic week advanced to {} but could not be saved: {}",
                self.week.current(),
                e
            ),
        }
    }

    async fn next_wakeup(&self) -> Option<DateTime<Tz>> {
        self.jobs.lock().await.values().filter_map(|j| j.next).min()
    }

    /// Runs until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: Arc<Self>) {
        info!("⏱️ Scheduler started");
        loop {
            let now = self.clock.now();
            // Sends continue on their own; nothing here waits for them.
            drop(self.fire_due(now).await);

            let sleep_for = match self.next_wakeup().await {
                Some(next) => (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO).min(MAX_SLEEP),
                None => MAX_SLEEP,
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.changed.notified() => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!("Scheduler stopped");
    }

    /// Stops the run loop. In-flight sends are left to finish.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

async fn deliver_reminder(
    job: &ReminderJob,
    scheduled_at: DateTime<Tz>,
    week: &WeekCounter,
    sink: &dyn NotificationSink,
    settings: &ReminderSettings,
) {
    let current_week = week.current();
    let session = match job.session_at(&scheduled_at, current_week) {
        Ok(s) => s,
        Err(reason) => {
            info!("Skipping {} at {}: {}", job.id, scheduled_at, reason);
            return;
        }
    };

    let text = render::reminder(session, settings.salutation.as_deref());
    match sink.send(&settings.recipient, &text).await {
        Ok(()) => info!("🔔 Sent reminder for {} to {}", job.name, settings.recipient),
        Err(e) => warn!("Failed to send reminder for {}: {}", job.name, e),
    }
}
