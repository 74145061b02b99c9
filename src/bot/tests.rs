//! Scenario tests for the command set over a real course store.
//!
//! Run with: cargo test bot

use std::sync::Arc;

use super::*;
use crate::channel::Envelope;
use crate::clock::{shanghai, FixedClock};
use crate::timetable::course::course;
use crate::timetable::{CourseRecord, CourseStore, WeekCounter};

struct Fixture {
    dispatcher: Dispatcher,
    week: Arc<WeekCounter>,
    clock: Arc<FixedClock>,
}

/// 2024-09-04 is a Wednesday.
fn fixture(courses: Vec<CourseRecord>, week: u32) -> Fixture {
    let store = Arc::new(CourseStore::new(courses));
    let week = Arc::new(WeekCounter::in_memory(week));
    let clock = Arc::new(FixedClock::at(2024, 9, 4, 9, 0));
    let dispatcher = build_dispatcher(Timetable::new(store, week.clone(), clock.clone()));
    Fixture { dispatcher, week, clock }
}

fn ask(f: &Fixture, text: &str) -> Option<String> {
    let envelope = Envelope {
        to_user: "ww-corp".into(),
        from_user: "JiYuan".into(),
        msg_type: "text".into(),
        content: text.into(),
    };
    f.dispatcher.dispatch(text, &envelope)
}

fn wednesday_course() -> CourseRecord {
    CourseRecord {
        name: "数据结构".into(),
        teacher: "王老师".into(),
        location: "理科楼204".into(),
        ..course("数据结构", 3, "10:00", "11:35", (1, 16))
    }
}

// =============================================================================
// GREETING AND HELP
// =============================================================================

mod greeting_and_help {
    use super::*;

    #[test]
    fn test_greeting_uses_sender() {
        let f = fixture(vec![], 1);
        assert_eq!(ask(&f, "你好呀").unwrap(), "你好, JiYuan!");
    }

    #[test]
    fn test_help_lists_all_keywords_in_order() {
        let f = fixture(vec![], 1);
        let help = ask(&f, "帮助").unwrap();
        assert!(help.starts_with("目前支持的命令有：\n"));

        let listed: Vec<&str> = help.lines().skip(1).map(str::trim).collect();
        assert_eq!(
            listed,
            vec![
                "你好", "帮助", "今天", "明天", "本周", "下周", "周一", "周二", "周三", "周四",
                "周五", "周六", "周日"
            ]
        );
    }

    #[test]
    fn test_unknown_text_is_silent() {
        let f = fixture(vec![wednesday_course()], 1);
        assert_eq!(ask(&f, "随便说点什么"), None);
    }

    #[test]
    fn test_greeting_beats_later_keywords() {
        let f = fixture(vec![wednesday_course()], 1);
        assert_eq!(ask(&f, "今天你好").unwrap(), "你好, JiYuan!");
    }
}

// =============================================================================
// WEEKDAY QUERIES
// =============================================================================

mod weekday_queries {
    use super::*;

    #[test]
    fn test_wednesday_lists_single_course() {
        let f = fixture(vec![wednesday_course()], 1);
        let reply = ask(&f, "周三").unwrap();
        assert_eq!(
            reply,
            "周三有以下课程：\n1.数据结构\n    课程时间：10:00~11:35\n    位置：理科楼204\n    老师：王老师\n"
        );
        assert_eq!(reply.matches("课程时间").count(), 1);
    }

    #[test]
    fn test_wednesday_outside_week_range() {
        let f = fixture(vec![wednesday_course()], 17);
        assert_eq!(ask(&f, "周三").unwrap(), "周三没有课程哦！");
    }

    #[test]
    fn test_other_weekday_is_empty() {
        let f = fixture(vec![wednesday_course()], 1);
        assert_eq!(ask(&f, "周四有课吗").unwrap(), "周四没有课程哦！");
    }

    #[tokio::test]
    async fn test_week_read_at_query_time() {
        let f = fixture(vec![wednesday_course()], 16);
        assert!(ask(&f, "周三").unwrap().contains("数据结构"));
        f.week.advance().await.unwrap();
        assert_eq!(ask(&f, "周三").unwrap(), "周三没有课程哦！");
    }
}

// =============================================================================
// RELATIVE DAY QUERIES
// =============================================================================

mod relative_queries {
    use super::*;

    #[test]
    fn test_today_uses_clock_weekday() {
        let f = fixture(vec![wednesday_course()], 1);
        assert!(ask(&f, "今天").unwrap().starts_with("今天有以下课程：\n1.数据结构"));

        f.clock.set(shanghai(2024, 9, 5, 9, 0));
        assert_eq!(ask(&f, "今天").unwrap(), "今天没有课程哦！");
    }

    #[test]
    fn test_tomorrow_same_week() {
        let f = fixture(vec![wednesday_course()], 1);
        f.clock.set(shanghai(2024, 9, 3, 20, 0)); // Tuesday
        assert!(ask(&f, "明天").unwrap().starts_with("明天有以下课程："));
    }

    #[test]
    fn test_tomorrow_from_sunday_uses_next_week() {
        let monday = course("英语", 1, "08:00", "09:35", (2, 2));
        let f = fixture(vec![monday], 1);
        f.clock.set(shanghai(2024, 9, 8, 21, 0)); // Sunday of week 1
        assert!(ask(&f, "明天").unwrap().contains("1.英语"));

        f.clock.set(shanghai(2024, 9, 2, 7, 0)); // Monday of week 1
        assert_eq!(ask(&f, "明天").unwrap(), "明天没有课程哦！");
    }
}

// =============================================================================
// WEEK QUERIES
// =============================================================================

mod week_queries {
    use super::*;

    fn courses() -> Vec<CourseRecord> {
        vec![
            course("体育", 5, "16:00", "17:35", (1, 16)),
            course("英语", 1, "08:00", "09:35", (1, 8)),
            wednesday_course(),
            course("选修课", 2, "19:00", "20:35", (9, 16)),
        ]
    }

    #[test]
    fn test_this_week_groups_by_weekday() {
        let f = fixture(courses(), 8);
        let reply = ask(&f, "本周").unwrap();
        assert!(reply.starts_with("本周(第8周)有以下课程：\n【周一】有以下课程：\n1.英语"));
        assert!(reply.contains("【周三】"));
        assert!(reply.contains("【周五】"));
        assert!(!reply.contains("【周二】"));
    }

    #[test]
    fn test_next_week_is_current_plus_one() {
        let f = fixture(courses(), 8);
        let reply = ask(&f, "下周").unwrap();
        assert!(reply.starts_with("下周(第9周)有以下课程："));
        assert!(reply.contains("【周二】有以下课程：\n1.选修课"));
        assert!(!reply.contains("英语"));
    }

    #[test]
    fn test_empty_week() {
        let f = fixture(courses(), 20);
        assert_eq!(ask(&f, "本周").unwrap(), "本周没有课程哦！");
        assert_eq!(ask(&f, "下周").unwrap(), "下周没有课程哦！");
    }
}
