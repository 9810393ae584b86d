//! Weekly window arithmetic.
//!
//! Everything here is a pure function of a reference instant. Days are
//! numbered 0=Monday..6=Sunday, matching the persisted settings.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use std::fmt;

/// Gap left between the last chime and the next window start.
pub const CHIME_GUARD_SECS: i64 = 10;

/// Seconds between consecutive chime instants.
pub const CHIME_STEP_SECS: u32 = 10;

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Map a 0=Monday..6=Sunday index to a weekday.
pub fn weekday_from_index(index: u8) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn day_name(day: Weekday) -> &'static str {
    DAY_NAMES[day.num_days_from_monday() as usize]
}

/// Parse a time string in HH:MM or HH:MM:SS format.
pub fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("Invalid time '{}'. Expected HH:MM or HH:MM:SS", s))
}

// ── Weekly instant ───────────────────────────────────────────────────────────

/// A (weekday, time-of-day) pair that recurs every seven days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeeklyInstant {
    pub day: Weekday,
    pub time: NaiveTime,
}

impl WeeklyInstant {
    pub fn new(day: Weekday, time: NaiveTime) -> Self {
        WeeklyInstant { day, time }
    }

    fn days_from(&self, from: Weekday) -> i64 {
        let delta = self.day.num_days_from_monday() as i64 - from.num_days_from_monday() as i64;
        delta.rem_euclid(7)
    }

    /// The most recent occurrence at or before `now`.
    pub fn at_or_before(&self, now: NaiveDateTime) -> NaiveDateTime {
        let back = (7 - self.days_from(now.weekday())) % 7;
        let candidate = (now.date() - Duration::days(back)).and_time(self.time);
        if candidate > now {
            candidate - Duration::days(7)
        } else {
            candidate
        }
    }

    /// The first occurrence at or after `now`.
    pub fn at_or_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let ahead = self.days_from(now.weekday());
        let candidate = (now.date() + Duration::days(ahead)).and_time(self.time);
        if candidate < now {
            candidate + Duration::days(7)
        } else {
            candidate
        }
    }
}

impl fmt::Display for WeeklyInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", day_name(self.day), self.time.format("%H:%M:%S"))
    }
}

// ── Window ───────────────────────────────────────────────────────────────────

/// Where `now` falls relative to the weekly window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// Inside the window, which closes at `until`.
    OnAir { until: NaiveDateTime },
    /// Outside the window, which next opens at `next_start`.
    OffAir { next_start: NaiveDateTime },
}

/// Weekly on-air window. The end may fall earlier in the week than the start,
/// in which case the window wraps across the week boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: WeeklyInstant,
    pub end: WeeklyInstant,
}

impl ScheduleWindow {
    pub fn new(start: WeeklyInstant, end: WeeklyInstant) -> Self {
        ScheduleWindow { start, end }
    }

    pub fn last_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.start.at_or_before(now)
    }

    /// The end that closes the window opened at `last_start(now)`.
    pub fn following_finish(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.end.at_or_after(self.last_start(now))
    }

    pub fn is_open(&self, now: NaiveDateTime) -> bool {
        now < self.following_finish(now)
    }

    pub fn next_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.start.at_or_after(now)
    }

    pub fn evaluate(&self, now: NaiveDateTime) -> WindowPhase {
        let until = self.following_finish(now);
        if now < until {
            WindowPhase::OnAir { until }
        } else {
            WindowPhase::OffAir {
                next_start: self.next_start(now),
            }
        }
    }
}

impl fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.start, self.end)
    }
}

// ── Chimes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChimeKind {
    /// On the minute.
    Long,
    /// At :10, :20, :30, :40 and :50.
    Short,
}

impl ChimeKind {
    pub fn at(instant: NaiveDateTime) -> Self {
        if instant.second() == 0 {
            ChimeKind::Long
        } else {
            ChimeKind::Short
        }
    }
}

impl fmt::Display for ChimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChimeKind::Long => write!(f, "long"),
            ChimeKind::Short => write!(f, "short"),
        }
    }
}

/// Chimes every ten seconds, valid strictly before `cutoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChimeSchedule {
    pub cutoff: NaiveDateTime,
}

impl ChimeSchedule {
    /// Chimes leading up to a window opening at `next_start`.
    pub fn before(next_start: NaiveDateTime) -> Self {
        ChimeSchedule {
            cutoff: next_start - Duration::seconds(CHIME_GUARD_SECS),
        }
    }

    pub fn is_active(&self, instant: NaiveDateTime) -> bool {
        instant < self.cutoff
    }

    /// First chime slot at or after `from`, ignoring the cutoff.
    pub fn slot_at_or_after(from: NaiveDateTime) -> NaiveDateTime {
        let on_boundary = from.second() % CHIME_STEP_SECS == 0 && from.nanosecond() == 0;
        if on_boundary {
            return from;
        }
        let truncated = from
            .with_nanosecond(0)
            .and_then(|t| t.with_second(from.second() - from.second() % CHIME_STEP_SECS))
            .unwrap_or(from);
        truncated + Duration::seconds(CHIME_STEP_SECS as i64)
    }

    /// The first occurrence of each of the six per-minute offsets at or after
    /// `from`, in time order. Slots at or past the cutoff are left out.
    pub fn first_slots(&self, from: NaiveDateTime) -> Vec<(NaiveDateTime, ChimeKind)> {
        self.instants(from)
            .take(60 / CHIME_STEP_SECS as usize)
            .map(|t| (t, ChimeKind::at(t)))
            .collect()
    }

    /// Every chime instant from `from` up to the cutoff.
    pub fn instants(&self, from: NaiveDateTime) -> impl Iterator<Item = NaiveDateTime> + '_ {
        let first = Self::slot_at_or_after(from);
        std::iter::successors(Some(first), |t| {
            Some(*t + Duration::seconds(CHIME_STEP_SECS as i64))
        })
        .take_while(|t| self.is_active(*t))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
