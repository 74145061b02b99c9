//! User-facing texts built from course data.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::timetable::course::CourseRecord;

const WEEKDAY_LABELS: [&str; 7] = ["周一", "周二", "周三", "周四", "周五", "周六", "周日"];
const WEEKDAY_NAMES: [&str; 7] = ["一", "二", "三", "四", "五", "六", "日"];

/// "周一" .. "周日" for 1..=7.
pub fn weekday_label(day_of_week: u8) -> &'static str {
    WEEKDAY_LABELS[(day_of_week.clamp(1, 7) - 1) as usize]
}

fn address(salutation: Option<&str>) -> String {
    match salutation {
        Some(s) if !s.is_empty() => format!("{s}，"),
        _ => String::new(),
    }
}

/// Numbered list, one block per course.
pub fn course_list(courses: &[CourseRecord]) -> String {
    let mut out = String::new();
    for (i, c) in courses.iter().enumerate() {
        let _ = write!(
            out,
            "{}.{}\n    课程时间：{}~{}\n    位置：{}\n    老师：{}\n",
            i + 1,
            c.name,
            c.start(),
            c.end(),
            c.location,
            c.teacher
        );
    }
    out
}

/// Reply for a single-day query such as "今天" or "周三".
pub fn day_schedule(label: &str, courses: &[CourseRecord]) -> String {
    if courses.is_empty() {
        return format!("{label}没有课程哦！");
    }
    format!("{label}有以下课程：\n{}", course_list(courses))
}

/// Reply for a whole-week query; `label` is "本周" or "下周".
pub fn week_schedule(label: &str, week: u32, by_day: &BTreeMap<u8, Vec<CourseRecord>>) -> String {
    if by_day.is_empty() {
        return format!("{label}没有课程哦！");
    }
    let mut out = format!("{label}(第{week}周)有以下课程：\n");
    for (day, courses) in by_day {
        let _ = write!(out, "【{}】有以下课程：\n{}", weekday_label(*day), course_list(courses));
    }
    out
}

pub fn reminder(course: &CourseRecord, salutation: Option<&str>) -> String {
    format!(
        "{}您有一门课即将开始：\n\
         - 课程名称：{}\n\
         - 上课时间：{} - {}\n\
         - 上课地点：{}\n\
         - 任课教师：{}\n\n\
         请及时参加课程，祝学习愉快！",
        address(salutation),
        course.name,
        course.start(),
        course.end(),
        course.location,
        course.teacher
    )
}

pub fn startup_notice(salutation: Option<&str>, week: u32, lead_minutes: u32, course_count: usize) -> String {
    format!(
        "{}您的课程管家已上线！\n\
         当前周数：{week}\n\
         提前提醒分钟数：{lead_minutes}\n\
         已加载 {course_count} 门课程\n\
         请耐心等待课程提醒消息，竭诚为您服务！",
        address(salutation)
    )
}

/// Every loaded course grouped by weekday, regardless of week range.
pub fn course_digest(courses: &[CourseRecord]) -> String {
    let mut out = String::from("载入的课程数据如下：\n");
    for day in 1..=7u8 {
        let _ = write!(out, "{}\n星期{}\n", "——".repeat(7), WEEKDAY_NAMES[(day - 1) as usize]);
        let mut any = false;
        for c in courses.iter().filter(|c| c.meets_on(day)) {
            let _ = write!(
                out,
                "{}\n课程名称：{}\n上课周数：{} - {}\n上课时间：{} - {}\n上课地点：{}\n任课教师：{}\n",
                "-".repeat(30),
                c.name,
                c.start_week,
                c.end_week,
                c.start(),
                c.end(),
                c.location,
                c.teacher
            );
            any = true;
        }
        if !any {
            out.push_str("无课程\n");
        }
    }
    out
}
