//! Wall clock in the configured time zone.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Source of "now" for everything that depends on the calendar weekday.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
}

/// The system clock, viewed through a fixed time zone.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

#[cfg(test)]
pub use fixed::{shanghai, FixedClock};


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_system_clock_uses_zone() {
        let clock = SystemClock::new(chrono_tz::Asia::Shanghai);
        let now = clock.now();
        assert_eq!(now.timezone(), chrono_tz::Asia::Shanghai);
    }

    #[test]
    fn test_fixed_clock() {
        // 2024-09-04 is a Wednesday
        let clock = FixedClock::at(2024, 9, 4, 7, 30);
        let now = clock.now();
        assert_eq!(now.weekday().number_from_monday(), 3);
        assert_eq!((now.hour(), now.minute()), (7, 30));

        clock.set(shanghai(2024, 9, 8, 23, 0));
        assert_eq!(clock.now().weekday().number_from_monday(), 7);
    }
}
