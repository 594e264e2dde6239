//! Market Hours Gate
//!
//! Pure predicate deciding whether live polling should run at a given
//! instant. The window (timezone, trading weekdays, session times and the
//! holiday calendar) is configuration loaded once at startup; the gate never
//! reads the wall clock itself.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Default exchange timezone.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Trading session definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketHoursWindow {
    timezone: Tz,
    trading_days: HashSet<Weekday>,
    open: NaiveTime,
    close: NaiveTime,
    holidays: BTreeSet<NaiveDate>,
}

impl Default for MarketHoursWindow {
    /// US equities regular session: Mon–Fri 09:30–16:00 New York, no holidays.
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            trading_days: [
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ]
            .into_iter()
            .collect(),
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            holidays: BTreeSet::new(),
        }
    }
}

impl MarketHoursWindow {
    /// Replace the timezone session times are evaluated in.
    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Replace the session open/close local times.
    #[must_use]
    pub fn with_session(mut self, open: NaiveTime, close: NaiveTime) -> Self {
        self.open = open;
        self.close = close;
        self
    }

    /// Replace the trading weekdays.
    #[must_use]
    pub fn with_trading_days(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.trading_days = days.into_iter().collect();
        self
    }

    /// Replace the holiday calendar.
    #[must_use]
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays = holidays.into_iter().collect();
        self
    }

    /// Exchange timezone.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Session open, local time.
    #[must_use]
    pub const fn open(&self) -> NaiveTime {
        self.open
    }

    /// Session close, local time.
    #[must_use]
    pub const fn close(&self) -> NaiveTime {
        self.close
    }

    /// Configured holiday dates.
    #[must_use]
    pub const fn holidays(&self) -> &BTreeSet<NaiveDate> {
        &self.holidays
    }

    /// Whether the weekday is a trading day.
    #[must_use]
    pub fn is_trading_day(&self, day: Weekday) -> bool {
        self.trading_days.contains(&day)
    }
}

/// Answers whether the market is open at an injected instant.
#[derive(Debug, Clone, Default)]
pub struct MarketHoursGate {
    window: MarketHoursWindow,
}

impl MarketHoursGate {
    /// Create a gate over a window.
    #[must_use]
    pub const fn new(window: MarketHoursWindow) -> Self {
        Self { window }
    }

    /// The window this gate evaluates.
    #[must_use]
    pub const fn window(&self) -> &MarketHoursWindow {
        &self.window
    }

    /// Whether live polling is allowed at `now`.
    ///
    /// Closed on non-trading weekdays, on holidays, and outside the
    /// half-open session range `[open, close)` in exchange local time.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.window.timezone);

        if !self.window.is_trading_day(local.weekday()) {
            return false;
        }

        if self.window.holidays.contains(&local.date_naive()) {
            return false;
        }

        let time = local.time();
        time >= self.window.open && time < self.window.close
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    /// Build a UTC instant from New York local wall time.
    fn ny(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        DEFAULT_TIMEZONE
            .with_ymd_and_hms(y, m, d, hh, mm, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    // 2026-10-19 is a Monday.
    #[test_case(ny(2026, 10, 19, 9, 29), false ; "one minute before open")]
    #[test_case(ny(2026, 10, 19, 9, 30), true ; "at open")]
    #[test_case(ny(2026, 10, 19, 12, 0), true ; "midday")]
    #[test_case(ny(2026, 10, 19, 15, 59), true ; "last minute")]
    #[test_case(ny(2026, 10, 19, 16, 0), false ; "at close")]
    #[test_case(ny(2026, 10, 19, 20, 0), false ; "evening")]
    #[test_case(ny(2026, 10, 17, 12, 0), false ; "saturday")]
    #[test_case(ny(2026, 10, 18, 12, 0), false ; "sunday")]
    fn default_window(now: DateTime<Utc>, expected: bool) {
        assert_eq!(MarketHoursGate::default().is_open(now), expected);
    }

    #[test]
    fn holiday_is_closed_all_day() {
        let thanksgiving = NaiveDate::from_ymd_opt(2026, 11, 26).unwrap();
        let gate = MarketHoursGate::new(MarketHoursWindow::default().with_holidays([thanksgiving]));

        assert!(!gate.is_open(ny(2026, 11, 26, 11, 0)));
        assert!(gate.is_open(ny(2026, 11, 27, 11, 0)));
    }

    #[test]
    fn holiday_uses_exchange_local_date() {
        // 2026-11-27 01:00 UTC is still 26 November in New York.
        let thanksgiving = NaiveDate::from_ymd_opt(2026, 11, 26).unwrap();
        let gate = MarketHoursGate::new(
            MarketHoursWindow::default()
                .with_holidays([thanksgiving])
                .with_session(NaiveTime::MIN, NaiveTime::from_hms_opt(23, 59, 59).unwrap()),
        );

        let late_utc = Utc.with_ymd_and_hms(2026, 11, 27, 1, 0, 0).unwrap();
        assert!(!gate.is_open(late_utc));
    }

    #[test]
    fn custom_session_and_timezone() {
        let window = MarketHoursWindow::default()
            .with_timezone(chrono_tz::Europe::London)
            .with_session(
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(16, 30, 0).unwrap(),
            );
        let gate = MarketHoursGate::new(window);

        // 08:15 London on a Monday, before New York opens.
        let now = chrono_tz::Europe::London
            .with_ymd_and_hms(2026, 10, 19, 8, 15, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc);
        assert!(gate.is_open(now));
    }

    #[test]
    fn custom_trading_days() {
        let gate = MarketHoursGate::new(
            MarketHoursWindow::default().with_trading_days([Weekday::Sat]),
        );

        assert!(gate.is_open(ny(2026, 10, 17, 12, 0)));
        assert!(!gate.is_open(ny(2026, 10, 19, 12, 0)));
    }

    #[test]
    fn gate_is_deterministic_for_same_instant() {
        let gate = MarketHoursGate::default();
        let now = ny(2026, 10, 20, 10, 0);
        assert_eq!(gate.is_open(now), gate.is_open(now));
    }
}
