//! Time sources and the policy calendar.
//!
//! All time-sensitive logic reads "now" through the `Clock` trait so that
//! window arithmetic is testable, and all week/month boundary math goes
//! through `PolicyCalendar`, which carries the configured reset timezone
//! instead of a hardcoded offset.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time. The only clock used outside tests and dry-runs.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and maintenance dry-runs.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap() = t;
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Owns all purchase-window boundary arithmetic.
///
/// Months and ISO weeks are identified in one configured timezone for every
/// user, so a bundle's reset happens at the same instant worldwide.
#[derive(Debug, Clone, Copy)]
pub struct PolicyCalendar {
    tz: FixedOffset,
}

impl PolicyCalendar {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }

    /// Build from an offset in minutes east of UTC (e.g. +480 for UTC+8).
    pub fn from_offset_minutes(minutes: i32) -> LedgerResult<Self> {
        FixedOffset::east_opt(minutes * 60)
            .map(Self::new)
            .ok_or_else(|| LedgerError::Validation(format!("invalid UTC offset: {minutes} minutes")))
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    /// Calendar month identity `(year, month)` of an instant, in the
    /// configured timezone.
    pub fn month_key(&self, t: DateTime<Utc>) -> (i32, u32) {
        let local = t.with_timezone(&self.tz);
        (local.year(), local.month())
    }

    /// ISO week identity `(iso_year, iso_week)` of an instant, Monday-start,
    /// in the configured timezone.
    pub fn iso_week_key(&self, t: DateTime<Utc>) -> (i32, u32) {
        let week = t.with_timezone(&self.tz).date_naive().iso_week();
        (week.year(), week.week())
    }

    /// First instant of the calendar month after the one containing `t`.
    pub fn start_of_next_month(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let (year, month) = self.month_key(t);
        let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        // Day 1 of a valid (year, month) always exists.
        let naive = NaiveDate::from_ymd_opt(ny, nm, 1)
            .expect("first of month")
            .and_hms_opt(0, 0, 0)
            .expect("midnight");
        self.local_to_utc(naive)
    }

    /// Midnight of the Monday after the ISO week containing `t`.
    pub fn start_of_next_iso_week(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = t.with_timezone(&self.tz).date_naive();
        let days_into_week = local_date.weekday().num_days_from_monday() as i64;
        let next_monday = local_date + Duration::days(7 - days_into_week);
        let naive = next_monday.and_hms_opt(0, 0, 0).expect("midnight");
        self.local_to_utc(naive)
    }

    fn local_to_utc(&self, naive: chrono::NaiveDateTime) -> DateTime<Utc> {
        // A fixed offset has no gaps or folds, so this is always a single instant.
        self.tz
            .from_local_datetime(&naive)
            .single()
            .expect("fixed-offset local time is unambiguous")
            .with_timezone(&Utc)
    }
}
