//! Working-hours window evaluated in a fixed UTC offset.
use chrono::{DateTime, FixedOffset, Timelike, Utc};

use crate::config::Schedule;

/// Which submissions are eligible for the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Only submissions flagged priority.
    PriorityOnly,
    /// Oldest eligible submission regardless of priority.
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    offset: FixedOffset,
    start_hour: u32,
    end_hour: u32,
}

impl WorkingHours {
    pub fn new(offset: FixedOffset, start_hour: u32, end_hour: u32) -> Self {
        Self {
            offset,
            start_hour,
            end_hour,
        }
    }

    pub fn from_config(schedule: &Schedule) -> Self {
        Self::new(
            schedule.offset(),
            schedule.working_hours_start,
            schedule.working_hours_end,
        )
    }

    /// True when `now` falls in `[start_hour, end_hour)` local time.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.offset).hour();
        hour >= self.start_hour && hour < self.end_hour
    }

    pub fn selection(&self, now: DateTime<Utc>) -> Selection {
        if self.contains(now) {
            Selection::PriorityOnly
        } else {
            Selection::Fifo
        }
    }

    /// Timestamp rendered for spreadsheet cells in local time.
    pub fn format_local(&self, ts: DateTime<Utc>) -> String {
        ts.with_timezone(&self.offset)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bangkok_hours() -> WorkingHours {
        WorkingHours::new(FixedOffset::east_opt(7 * 3600).unwrap(), 7, 17)
    }

    #[test]
    fn window_is_evaluated_in_local_time() {
        let hours = bangkok_hours();
        // 01:00 UTC is 08:00 local
        let morning = Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap();
        assert!(hours.contains(morning));
        assert_eq!(hours.selection(morning), Selection::PriorityOnly);

        // 23:30 UTC is 06:30 local the next day
        let early = Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap();
        assert!(!hours.contains(early));
        assert_eq!(hours.selection(early), Selection::Fifo);
    }

    #[test]
    fn end_hour_is_exclusive() {
        let hours = bangkok_hours();
        let last_minute = Utc.with_ymd_and_hms(2024, 3, 4, 9, 59, 59).unwrap();
        let closing = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        assert!(hours.contains(last_minute));
        assert!(!hours.contains(closing));
    }

    #[test]
    fn format_local_applies_offset() {
        let hours = bangkok_hours();
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 20, 15, 0).unwrap();
        assert_eq!(hours.format_local(ts), "2024-03-05 03:15:00");
    }
}
