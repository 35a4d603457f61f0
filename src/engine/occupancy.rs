use chrono::{DateTime, Datelike, NaiveDate, Weekday};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, SharedCalendar};

const MS_PER_DAY: Ms = 24 * MS_PER_HOUR;

/// Business day bounds, UTC.
const OPEN_HOUR: u32 = 9;
const CLOSE_HOUR: u32 = 17;
const HOURS_PER_WORKDAY: f64 = (CLOSE_HOUR - OPEN_HOUR) as f64;

/// Calendar date (UTC) of a millisecond timestamp.
pub(super) fn utc_date(ms: Ms) -> NaiveDate {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

fn is_workday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn hour_ms(date: NaiveDate, hour: u32) -> Ms {
    date.and_hms_opt(hour, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0)
}

/// Milliseconds of `span` that fall inside weekday business hours,
/// walking it one calendar day at a time.
fn business_overlap_ms(span: &Span) -> Ms {
    let mut total = 0;
    let mut day = utc_date(span.start);
    let last = utc_date(span.end - 1);
    while day <= last {
        if is_workday(day) {
            let window = Span::new(hour_ms(day, OPEN_HOUR), hour_ms(day, CLOSE_HOUR));
            if let Some(clipped) = span.clip(&window) {
                total += clipped.duration_ms();
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    total
}

/// Weekdays in the half-open day range `[from, to)`.
fn workdays_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = from;
    while day < to {
        if is_workday(day) {
            count += 1;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    count
}

impl Engine {
    fn report_window(&self, window_days: i64) -> Result<Span, EngineError> {
        if window_days <= 0 {
            return Err(EngineError::Validation("report window must be positive"));
        }
        if window_days > MAX_REPORT_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("report window too wide"));
        }
        let now = self.now();
        Ok(Span::new(now - window_days * MS_PER_DAY, now))
    }

    /// Occupancy over the trailing `window_days`: how much of the business
    /// week's bookable time was actually reserved, across active spaces.
    ///
    /// Bookings count whenever they overlap the window and are not
    /// canceled; reserved time only accrues inside business hours.
    pub async fn occupancy_report(
        &self,
        window_days: i64,
    ) -> Result<OccupancyReport, EngineError> {
        let window = self.report_window(window_days)?;
        let total_spaces = self.directory.list_active().await.len();

        // Snapshot the Arcs; holding the map iterator across an await
        // would block writers on the same shard.
        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();

        let mut total_bookings = 0usize;
        let mut reserved_ms: Ms = 0;
        for cal in calendars {
            let guard = cal.read().await;
            for b in guard.overlapping(&window) {
                if !b.status.is_active() {
                    continue;
                }
                total_bookings += 1;
                if let Some(clipped) = b.span.clip(&window) {
                    reserved_ms += business_overlap_ms(&clipped);
                }
            }
        }

        let workdays = workdays_between(utc_date(window.start), utc_date(window.end));
        let reserved_hours = reserved_ms as f64 / MS_PER_HOUR as f64;
        let capacity_hours = total_spaces as f64 * HOURS_PER_WORKDAY * workdays as f64;
        let occupancy_rate = if capacity_hours > 0.0 {
            (reserved_hours / capacity_hours).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(OccupancyReport {
            total_spaces,
            total_bookings,
            reserved_hours,
            workdays,
            occupancy_rate,
        })
    }

    /// The `limit` most-booked spaces over the trailing window, by count
    /// of active bookings, ties broken by space id. Delisted spaces still
    /// rank on their history; their name falls back to the id.
    pub async fn top_spaces(
        &self,
        window_days: i64,
        limit: usize,
    ) -> Result<Vec<SpaceUsage>, EngineError> {
        if limit == 0 {
            return Err(EngineError::Validation("ranking limit must be positive"));
        }
        let window = self.report_window(window_days)?;

        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();

        let mut counts: Vec<(Ulid, usize)> = Vec::new();
        for cal in calendars {
            let guard = cal.read().await;
            let n = guard
                .overlapping(&window)
                .filter(|b| b.status.is_active())
                .count();
            if n > 0 {
                counts.push((guard.space_id, n));
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(limit);

        let mut usage = Vec::with_capacity(counts.len());
        for (space_id, bookings) in counts {
            let name = match self.directory.find(space_id).await {
                Some(s) => s.name,
                None => space_id.to_string(),
            };
            usage.push(SpaceUsage {
                space_id,
                name,
                bookings,
            });
        }
        Ok(usage)
    }
}
