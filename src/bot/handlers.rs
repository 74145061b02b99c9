//! Built-in commands: greeting, help and timetable queries.

use std::sync::Arc;

use chrono::Datelike;

use crate::bot::dispatcher::{Dispatcher, Request};
use crate::clock::Clock;
use crate::timetable::render;
use crate::timetable::{CourseStore, WeekCounter};

/// Timetable queries. Week and weekday are read fresh on every call.
#[derive(Clone)]
pub struct Timetable {
    store: Arc<CourseStore>,
    week: Arc<WeekCounter>,
    clock: Arc<dyn Clock>,
}

impl Timetable {
    pub fn new(store: Arc<CourseStore>, week: Arc<WeekCounter>, clock: Arc<dyn Clock>) -> Self {
        Self { store, week, clock }
    }

    fn today_number(&self) -> u8 {
        self.clock.now().weekday().number_from_monday() as u8
    }

    pub fn today(&self) -> String {
        let day = self.today_number();
        render::day_schedule("今天", &self.store.courses_on(self.week.current(), day))
    }

    /// Tomorrow's courses; from Sunday that is Monday of the next week.
    pub fn tomorrow(&self) -> String {
        let today = self.today_number();
        let mut week = self.week.current();
        let day = if today == 7 {
            week += 1;
            1
        } else {
            today + 1
        };
        render::day_schedule("明天", &self.store.courses_on(week, day))
    }

    pub fn this_week(&self) -> String {
        let week = self.week.current();
        render::week_schedule("本周", week, &self.store.courses_in_week(week))
    }

    pub fn next_week(&self) -> String {
        let week = self.week.current() + 1;
        render::week_schedule("下周", week, &self.store.courses_in_week(week))
    }

    /// Courses on the given weekday of the current week.
    pub fn weekday(&self, day_of_week: u8) -> String {
        render::day_schedule(
            render::weekday_label(day_of_week),
            &self.store.courses_on(self.week.current(), day_of_week),
        )
    }
}

fn greeting(req: &Request<'_>) -> Option<String> {
    Some(format!("你好, {}!", req.envelope.from_user))
}

fn help(req: &Request<'_>) -> Option<String> {
    let mut text = String::from("目前支持的命令有：\n");
    for keyword in req.keywords {
        text.push_str("     ");
        text.push_str(keyword);
        text.push('\n');
    }
    Some(text)
}

/// The bot's command set, in matching order.
pub fn build_dispatcher(timetable: Timetable) -> Dispatcher {
    let mut dispatcher = Dispatcher::new()
        .register("你好", greeting)
        .register("帮助", help);

    let t = timetable.clone();
    dispatcher = dispatcher.register("今天", move |_| Some(t.today()));
    let t = timetable.clone();
    dispatcher = dispatcher.register("明天", move |_| Some(t.tomorrow()));
    let t = timetable.clone();
    dispatcher = dispatcher.register("本周", move |_| Some(t.this_week()));
    let t = timetable.clone();
    dispatcher = dispatcher.register("下周", move |_| Some(t.next_week()));

    for day in 1..=7u8 {
        let t = timetable.clone();
        dispatcher = dispatcher.register(render::weekday_label(day), move |_| Some(t.weekday(day)));
    }
    dispatcher
}
