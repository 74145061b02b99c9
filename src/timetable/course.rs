//! Timetable entries and their validation.

use std::fmt;

use chrono::NaiveTime;
use serde::Deserialize;

const TIME_FORMAT: &str = "%H:%M";

/// Errors for a single course entry. The entry is skipped, its siblings are not.
#[derive(Debug)]
pub enum CourseError {
    /// Entry is not an object of the expected shape.
    Shape(serde_json::Error),
    MissingField(&'static str),
    InvalidTime { field: &'static str, value: String },
    InvalidDay(i64),
    InvalidWeeks { start: i64, end: i64 },
    /// `start_time` is not before `end_time`.
    EmptyTimeRange { start: NaiveTime, end: NaiveTime },
}

impl fmt::Display for CourseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape(e) => write!(f, "malformed course entry: {e}"),
            Self::MissingField(name) => write!(f, "missing field '{name}'"),
            Self::InvalidTime { field, value } => {
                write!(f, "{field} '{value}' is not a HH:MM time")
            }
            Self::InvalidDay(day) => write!(f, "day_of_week {day} is outside 1..=7"),
            Self::InvalidWeeks { start, end } => {
                write!(f, "week range {start}-{end} is invalid")
            }
            Self::EmptyTimeRange { start, end } => write!(
                f,
                "start_time {} is not before end_time {}",
                start.format(TIME_FORMAT),
                end.format(TIME_FORMAT)
            ),
        }
    }
}

impl std::error::Error for CourseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shape(e) => Some(e),
            _ => None,
        }
    }
}

/// One weekly session of a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRecord {
    pub name: String,
    pub teacher: String,
    pub location: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// 1 = Monday .. 7 = Sunday
    pub day_of_week: u8,
    pub start_week: u32,
    pub end_week: u32,
}

impl CourseRecord {
    pub fn is_active_in(&self, week: u32) -> bool {
        self.start_week <= week && week <= self.end_week
    }

    pub fn meets_on(&self, day_of_week: u8) -> bool {
        self.day_of_week == day_of_week
    }

    pub fn start(&self) -> String {
        self.start_time.format(TIME_FORMAT).to_string()
    }

    pub fn end(&self) -> String {
        self.end_time.format(TIME_FORMAT).to_string()
    }
}

/// Course entry as found on disk. Scraped files use `course_name` / `instructor_name`.
#[derive(Deserialize)]
struct RawCourse {
    #[serde(alias = "course_name")]
    name: Option<String>,
    #[serde(alias = "instructor_name")]
    teacher: Option<String>,
    location: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    day_of_week: Option<i64>,
    start_week: Option<i64>,
    end_week: Option<i64>,
}

fn parse_time(field: &'static str, value: Option<String>) -> Result<NaiveTime, CourseError> {
    let value = value.ok_or(CourseError::MissingField(field))?;
    let trimmed = value.trim();
    if trimmed.split(':').count() != 2 {
        return Err(CourseError::InvalidTime { field, value });
    }
    NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
        .map_err(|_| CourseError::InvalidTime { field, value })
}

/// Validates one JSON entry into a [`CourseRecord`].
pub fn parse_course(entry: serde_json::Value) -> Result<CourseRecord, CourseError> {
    let raw: RawCourse = serde_json::from_value(entry).map_err(CourseError::Shape)?;

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or(CourseError::MissingField("name"))?;
    let start_time = parse_time("start_time", raw.start_time)?;
    let end_time = parse_time("end_time", raw.end_time)?;
    if start_time >= end_time {
        return Err(CourseError::EmptyTimeRange {
            start: start_time,
            end: end_time,
        });
    }

    let day = raw.day_of_week.ok_or(CourseError::MissingField("day_of_week"))?;
    if !(1..=7).contains(&day) {
        return Err(CourseError::InvalidDay(day));
    }

    let start_week = raw.start_week.ok_or(CourseError::MissingField("start_week"))?;
    let end_week = raw.end_week.ok_or(CourseError::MissingField("end_week"))?;
    if start_week < 1 || start_week > end_week || end_week > i64::from(u32::MAX) {
        return Err(CourseError::InvalidWeeks {
            start: start_week,
            end: end_week,
        });
    }

    Ok(CourseRecord {
        name: name.trim().to_string(),
        teacher: raw.teacher.unwrap_or_default(),
        location: raw.location.unwrap_or_default(),
        start_time,
        end_time,
        day_of_week: day as u8,
        start_week: start_week as u32,
        end_week: end_week as u32,
    })
}

#[cfg(test)]
pub(crate) fn course(name: &str, day: u8, start: &str, end: &str, weeks: (u32, u32)) -> CourseRecord {
    CourseRecord {
        name: name.to_string(),
        teacher: format!("{name}老师"),
        location: "博学楼101".to_string(),
        start_time: NaiveTime::parse_from_str(start, TIME_FORMAT).unwrap(),
        end_time: NaiveTime::parse_from_str(end, TIME_FORMAT).unwrap(),
        day_of_week: day,
        start_week: weeks.0,
        end_week: weeks.1,
    }
}
