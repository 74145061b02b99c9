//! Turning course records into recurring reminder jobs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike};
use chrono_tz::Tz;

use crate::timetable::CourseRecord;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// The weekly rollover fires at this local hour on Mondays.
pub const ROLLOVER_HOUR: u32 = 1;
pub const ROLLOVER_CRON: &str = "0 0 1 * * Mon *";

const CRON_DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Time of day at which a reminder fires, relative to the class day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderTime {
    pub hour: u32,
    pub minute: u32,
    /// 0 for the class day itself, -1 when the lead reaches into the day before.
    pub day_offset: i64,
}

pub fn reminder_time(start: NaiveTime, lead_minutes: u32) -> ReminderTime {
    let minutes = i64::from(start.hour() * 60 + start.minute()) - i64::from(lead_minutes);
    let of_day = minutes.rem_euclid(MINUTES_PER_DAY);
    ReminderTime {
        hour: (of_day / 60) as u32,
        minute: (of_day % 60) as u32,
        day_offset: minutes.div_euclid(MINUTES_PER_DAY),
    }
}

/// Shifts a 1..=7 weekday by `offset` days, wrapping around the week.
fn shift_weekday(day_of_week: u8, offset: i64) -> u8 {
    ((i64::from(day_of_week) - 1 + offset).rem_euclid(7) + 1) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(String);

impl JobId {
    /// Stable across reloads: derived from the course name and start time only.
    pub fn reminder(name: &str, start: NaiveTime) -> Self {
        Self(format!("reminder_{}_{}", name.replace(' ', "_"), start.format("%H_%M")))
    }

    pub fn rollover() -> Self {
        Self("week_rollover".to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// All sessions of one course that start at the same time, reminded by one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderJob {
    pub id: JobId,
    pub name: String,
    pub time: ReminderTime,
    pub sessions: Vec<CourseRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No session of this course meets on the class day.
    NoSessionThatDay { day_of_week: u8 },
    /// A session meets that day but not in this academic week.
    OutsideWeeks { week: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSessionThatDay { day_of_week } => write!(f, "no session on weekday {day_of_week}"),
            Self::OutsideWeeks { week } => write!(f, "not scheduled in week {week}"),
        }
    }
}

impl ReminderJob {
    /// Weekdays (1 = Monday) on which the trigger itself fires.
    pub fn fire_days(&self) -> BTreeSet<u8> {
        self.sessions
            .iter()
            .map(|s| shift_weekday(s.day_of_week, self.time.day_offset))
            .collect()
    }

    /// 7-field expression (sec min hour day month weekday year) for the `cron` crate.
    pub fn cron_expr(&self) -> String {
        let days: Vec<&str> = self
            .fire_days()
            .iter()
            .map(|d| CRON_DAYS[usize::from(*d - 1)])
            .collect();
        format!("0 {} {} * * {} *", self.time.minute, self.time.hour, days.join(","))
    }

    /// Picks the session a trigger at `fired_at` is for, re-checking weekday and
    /// week range against the counter value read at fire time.
    pub fn session_at(&self, fired_at: &DateTime<Tz>, current_week: u32) -> Result<&CourseRecord, SkipReason> {
        let class_date = fired_at.date_naive() - Duration::days(self.time.day_offset);
        let day_of_week = class_date.weekday().number_from_monday() as u8;
        let week = academic_week(class_date, fired_at, current_week);

        let mut meets_that_day = false;
        for session in self.sessions.iter().filter(|s| s.meets_on(day_of_week)) {
            meets_that_day = true;
            if session.is_active_in(week) {
                return Ok(session);
            }
        }
        if meets_that_day {
            Err(SkipReason::OutsideWeeks { week })
        } else {
            Err(SkipReason::NoSessionThatDay { day_of_week })
        }
    }
}

/// Week number of `class_date`, given the counter value at `fired_at`.
///
/// The counter only rolls at Monday 01:00, so a trigger before that instant
/// for a class in the following ISO week still sees last week's number.
fn academic_week(class_date: NaiveDate, fired_at: &DateTime<Tz>, current_week: u32) -> u32 {
    let counter_date = (fired_at.naive_local() - Duration::hours(i64::from(ROLLOVER_HOUR))).date();
    if class_date.iso_week() != counter_date.iso_week() && class_date > counter_date {
        current_week + 1
    } else {
        current_week
    }
}

/// Groups courses into jobs by (name, start time), keeping input order within a job.
pub fn plan_jobs(courses: &[CourseRecord], lead_minutes: u32) -> BTreeMap<JobId, ReminderJob> {
    let mut jobs: BTreeMap<JobId, ReminderJob> = BTreeMap::new();
    for course in courses {
        let id = JobId::reminder(&course.name, course.start_time);
        jobs.entry(id.clone())
            .or_insert_with(|| ReminderJob {
                id,
                name: course.name.clone(),
                time: reminder_time(course.start_time, lead_minutes),
                sessions: Vec::new(),
            })
            .sessions
            .push(course.clone());
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::shanghai;
    use crate::timetable::course::course;
    use std::str::FromStr;

    fn at(hh: u32, mm: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hh, mm, 0).unwrap()
    }

    #[test]
    fn test_reminder_time_same_hour() {
        assert_eq!(
            reminder_time(at(9, 0), 30),
            ReminderTime { hour: 8, minute: 30, day_offset: 0 }
        );
        assert_eq!(
            reminder_time(at(8, 0), 30),
            ReminderTime { hour: 7, minute: 30, day_offset: 0 }
        );
    }

    #[test]
    fn test_reminder_time_wraps_midnight() {
        assert_eq!(
            reminder_time(at(0, 15), 30),
            ReminderTime { hour: 23, minute: 45, day_offset: -1 }
        );
    }

    #[test]
    fn test_reminder_time_long_leads() {
        assert_eq!(
            reminder_time(at(8, 0), 90),
            ReminderTime { hour: 6, minute: 30, day_offset: 0 }
        );
        assert_eq!(
            reminder_time(at(10, 5), 1440),
            ReminderTime { hour: 10, minute: 5, day_offset: -1 }
        );
        assert_eq!(
            reminder_time(at(10, 5), 0),
            ReminderTime { hour: 10, minute: 5, day_offset: 0 }
        );
    }

    #[test]
    fn test_job_id_is_deterministic() {
        assert_eq!(JobId::reminder("高等 数学", at(8, 0)).to_string(), "reminder_高等_数学_08_00");
        assert_eq!(JobId::reminder("高等 数学", at(8, 0)), JobId::reminder("高等 数学", at(8, 0)));
        assert_ne!(JobId::reminder("高等 数学", at(8, 0)), JobId::reminder("高等 数学", at(10, 0)));
    }

    #[test]
    fn test_plan_groups_sessions_by_name_and_start() {
        let courses = vec![
            course("英语", 1, "08:00", "09:35", (1, 8)),
            course("英语", 3, "08:00", "09:35", (1, 16)),
            course("英语", 5, "14:00", "15:35", (1, 16)),
            course("体育", 2, "08:00", "09:35", (1, 16)),
        ];
        let jobs = plan_jobs(&courses, 30);
        assert_eq!(jobs.len(), 3);

        let morning = &jobs[&JobId::reminder("英语", at(8, 0))];
        assert_eq!(morning.sessions.len(), 2);
        assert_eq!(morning.cron_expr(), "0 30 7 * * Mon,Wed *");
    }

    #[test]
    fn test_cron_shifts_weekday_before_midnight() {
        let courses = vec![
            course("夜课", 2, "00:15", "01:00", (1, 16)),
            course("夜课", 1, "00:15", "01:00", (1, 16)),
        ];
        let jobs = plan_jobs(&courses, 30);
        let job = jobs.values().next().unwrap();
        // Monday's session fires on Sunday evening
        assert_eq!(job.fire_days().into_iter().collect::<Vec<_>>(), vec![1, 7]);
        assert_eq!(job.cron_expr(), "0 45 23 * * Mon,Sun *");
        assert!(cron::Schedule::from_str(&job.cron_expr()).is_ok());
    }

    #[test]
    fn test_session_at_checks_day_and_week() {
        let courses = vec![
            course("英语", 1, "08:00", "09:35", (1, 8)),
            course("英语", 3, "08:00", "09:35", (1, 16)),
        ];
        let job = plan_jobs(&courses, 30).into_values().next().unwrap();

        // 2024-09-02 is a Monday, 09-04 a Wednesday, 09-05 a Thursday
        let monday = shanghai(2024, 9, 2, 7, 30);
        let wednesday = shanghai(2024, 9, 4, 7, 30);
        let thursday = shanghai(2024, 9, 5, 7, 30);

        assert_eq!(job.session_at(&monday, 3).unwrap().day_of_week, 1);
        assert_eq!(job.session_at(&monday, 10), Err(SkipReason::OutsideWeeks { week: 10 }));
        assert_eq!(job.session_at(&wednesday, 10).unwrap().day_of_week, 3);
        assert_eq!(
            job.session_at(&thursday, 3),
            Err(SkipReason::NoSessionThatDay { day_of_week: 4 })
        );
    }

    #[test]
    fn test_session_at_across_week_boundary() {
        let job = plan_jobs(&[course("夜课", 1, "00:15", "01:00", (2, 2))], 30)
            .into_values()
            .next()
            .unwrap();

        // Sunday 23:45 of week 1 reminds of Monday's class in week 2
        let sunday = shanghai(2024, 9, 8, 23, 45);
        assert_eq!(job.session_at(&sunday, 1).unwrap().day_of_week, 1);
        assert!(job.session_at(&sunday, 2).is_err());
    }

    #[test]
    fn test_academic_week_before_rollover() {
        let monday = NaiveDate::from_ymd_opt(2024, 9, 9).unwrap();
        // before 01:00 the counter still holds last week's number
        assert_eq!(academic_week(monday, &shanghai(2024, 9, 9, 0, 0), 5), 6);
        assert_eq!(academic_week(monday, &shanghai(2024, 9, 9, 1, 0), 6), 6);
        assert_eq!(academic_week(monday, &shanghai(2024, 9, 9, 8, 30), 6), 6);
    }
}
