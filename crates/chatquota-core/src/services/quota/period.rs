//! Quota period arithmetic
//!
//! Windows are shifted on the local wall clock: "3 hours after 1:30 AM" on a
//! DST change day is 4:30 AM local, and a month after Jan 31 is the last day
//! of February. Every function here is pure; callers pass the instant.

use chrono::{DateTime, Days, LocalResult, Months, NaiveDateTime, TimeDelta, TimeZone};

use super::types::{PeriodUnit, QuotaDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// The instant one window after `at`
///
/// Returns `None` for unlimited/disabled descriptors, and for unrecognized
/// units or zero-length periods (which are logged).
pub fn advance<Tz: TimeZone>(at: &DateTime<Tz>, descriptor: &QuotaDescriptor) -> Option<DateTime<Tz>> {
    shift(at, descriptor, Direction::Forward)
}

/// The instant one window before `at`
pub fn retreat<Tz: TimeZone>(at: &DateTime<Tz>, descriptor: &QuotaDescriptor) -> Option<DateTime<Tz>> {
    shift(at, descriptor, Direction::Backward)
}

/// [`advance`] on epoch milliseconds
pub fn advance_millis<Tz: TimeZone>(tz: &Tz, at_ms: i64, descriptor: &QuotaDescriptor) -> Option<i64> {
    let at = from_millis(tz, at_ms)?;
    advance(&at, descriptor).map(|dt| dt.timestamp_millis())
}

/// [`retreat`] on epoch milliseconds
pub fn retreat_millis<Tz: TimeZone>(tz: &Tz, at_ms: i64, descriptor: &QuotaDescriptor) -> Option<i64> {
    let at = from_millis(tz, at_ms)?;
    retreat(&at, descriptor).map(|dt| dt.timestamp_millis())
}

/// Epoch milliseconds as a zoned datetime, `None` when out of range
pub fn from_millis<Tz: TimeZone>(tz: &Tz, ms: i64) -> Option<DateTime<Tz>> {
    tz.timestamp_millis_opt(ms).single()
}

fn shift<Tz: TimeZone>(
    at: &DateTime<Tz>,
    descriptor: &QuotaDescriptor,
    direction: Direction,
) -> Option<DateTime<Tz>> {
    match descriptor.period_unit {
        PeriodUnit::Unlimited | PeriodUnit::Disabled => return None,
        PeriodUnit::Unrecognized => {
            log::warn!(
                "[quota:period] Unrecognized period unit for limit '{}'",
                descriptor.display_limit
            );
            return None;
        }
        _ => {}
    }

    let amount = descriptor.period_amount;
    if amount == 0 {
        log::warn!(
            "[quota:period] Zero-length {} period for limit '{}'",
            descriptor.period_unit,
            descriptor.display_limit
        );
        return None;
    }

    let naive = at.naive_local();
    let shifted = match (descriptor.period_unit, direction) {
        (PeriodUnit::Hour, Direction::Forward) => {
            naive.checked_add_signed(TimeDelta::try_hours(amount as i64)?)
        }
        (PeriodUnit::Hour, Direction::Backward) => {
            naive.checked_sub_signed(TimeDelta::try_hours(amount as i64)?)
        }
        (PeriodUnit::Day, Direction::Forward) => naive.checked_add_days(Days::new(amount as u64)),
        (PeriodUnit::Day, Direction::Backward) => naive.checked_sub_days(Days::new(amount as u64)),
        (PeriodUnit::Week, Direction::Forward) => {
            naive.checked_add_days(Days::new(amount as u64 * 7))
        }
        (PeriodUnit::Week, Direction::Backward) => {
            naive.checked_sub_days(Days::new(amount as u64 * 7))
        }
        (PeriodUnit::Month, Direction::Forward) => naive.checked_add_months(Months::new(amount)),
        (PeriodUnit::Month, Direction::Backward) => naive.checked_sub_months(Months::new(amount)),
        _ => None,
    }?;

    resolve_local(&at.timezone(), &shifted)
}

/// Map a wall-clock time back onto the zone
///
/// Ambiguous times (clocks going back) take the earlier instant; times that
/// fall into a DST gap move forward by an hour, as a wall clock would.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: &NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => {
            let skipped = naive.checked_add_signed(TimeDelta::try_hours(1)?)?;
            tz.from_local_datetime(&skipped).earliest()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc};
    use chrono_tz::America::New_York;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_advance_hours() {
        let d = QuotaDescriptor::every(80, 3, PeriodUnit::Hour);
        let next = advance(&utc(2025, 5, 10, 22, 15), &d).unwrap();
        assert_eq!(next, utc(2025, 5, 11, 1, 15));
    }

    #[test]
    fn test_advance_days_and_weeks() {
        let day = QuotaDescriptor::every(10, 1, PeriodUnit::Day);
        assert_eq!(advance(&utc(2025, 2, 28, 9, 0), &day).unwrap(), utc(2025, 3, 1, 9, 0));

        let week = QuotaDescriptor::every(100, 1, PeriodUnit::Week);
        assert_eq!(advance(&utc(2025, 5, 12, 0, 0), &week).unwrap(), utc(2025, 5, 19, 0, 0));

        let two_weeks = QuotaDescriptor::every(100, 2, PeriodUnit::Week);
        assert_eq!(advance(&utc(2025, 5, 12, 0, 0), &two_weeks).unwrap(), utc(2025, 5, 26, 0, 0));
    }

    #[test]
    fn test_advance_month_clamps_day() {
        let month = QuotaDescriptor::every(25, 1, PeriodUnit::Month);
        let next = advance(&utc(2025, 1, 31, 12, 0), &month).unwrap();
        assert_eq!((next.month(), next.day()), (2, 28));

        let leap = advance(&utc(2024, 1, 31, 12, 0), &month).unwrap();
        assert_eq!((leap.month(), leap.day()), (2, 29));
    }

    #[test]
    fn test_advance_k_times_equals_k_periods() {
        let d = QuotaDescriptor::every(80, 3, PeriodUnit::Hour);
        let start = utc(2025, 5, 10, 8, 0);
        let mut at = start;
        for _ in 0..9 {
            at = advance(&at, &d).unwrap();
        }
        assert_eq!(at, start + TimeDelta::hours(27));

        let week = QuotaDescriptor::every(100, 1, PeriodUnit::Week);
        let mut at = start;
        for _ in 0..4 {
            at = advance(&at, &week).unwrap();
        }
        assert_eq!(at, start + TimeDelta::days(28));
    }

    #[test]
    fn test_retreat_inverts_advance() {
        let d = QuotaDescriptor::every(10, 5, PeriodUnit::Hour);
        let t = utc(2025, 5, 10, 12, 0);
        assert_eq!(retreat(&t, &d).unwrap(), utc(2025, 5, 10, 7, 0));
        assert_eq!(retreat(&advance(&t, &d).unwrap(), &d).unwrap(), t);
    }

    #[test]
    fn test_unbounded_units_are_terminal() {
        let t = utc(2025, 5, 10, 12, 0);
        assert!(advance(&t, &QuotaDescriptor::unlimited()).is_none());
        assert!(advance(&t, &QuotaDescriptor::disabled()).is_none());
        assert!(retreat(&t, &QuotaDescriptor::unlimited()).is_none());
    }

    #[test]
    fn test_unrecognized_unit_and_zero_amount() {
        let t = utc(2025, 5, 10, 12, 0);
        let odd = QuotaDescriptor {
            count: 5,
            period_amount: 1,
            period_unit: PeriodUnit::Unrecognized,
            display_limit: "5 / fortnight".to_string(),
        };
        assert!(advance(&t, &odd).is_none());

        let zero = QuotaDescriptor::every(5, 0, PeriodUnit::Day);
        assert!(advance(&t, &zero).is_none());
    }

    #[test]
    fn test_fixed_offset_keeps_wall_clock() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let at = tz.with_ymd_and_hms(2025, 5, 10, 23, 30, 0).unwrap();
        let d = QuotaDescriptor::every(10, 1, PeriodUnit::Day);
        let next = advance(&at, &d).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (11, 23, 30));
    }

    // America/New_York 2025: clocks jump 02:00 -> 03:00 on Mar 9
    // and fall back 02:00 -> 01:00 on Nov 2.
    fn new_york(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<chrono_tz::Tz> {
        New_York
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .earliest()
            .unwrap()
    }

    #[test]
    fn test_hours_into_dst_gap_move_forward() {
        let d = QuotaDescriptor::every(80, 2, PeriodUnit::Hour);
        let at = new_york(2025, 3, 9, 0, 30);
        let next = advance(&at, &d).unwrap();

        // 02:30 does not exist that night
        assert_eq!((next.hour(), next.minute()), (3, 30));
        assert_eq!(next.offset().fix().local_minus_utc(), -4 * 3600);
        assert_eq!(next.timestamp_millis() - at.timestamp_millis(), 2 * 3_600_000);
    }

    #[test]
    fn test_hours_into_dst_fold_take_earlier() {
        let d = QuotaDescriptor::every(80, 1, PeriodUnit::Hour);
        let at = new_york(2025, 11, 2, 0, 30);
        let next = advance(&at, &d).unwrap();

        assert_eq!((next.hour(), next.minute()), (1, 30));
        assert_eq!(next.offset().fix().local_minus_utc(), -4 * 3600);
        assert_eq!(next.timestamp_millis() - at.timestamp_millis(), 3_600_000);
    }

    #[test]
    fn test_days_across_dst_keep_wall_clock() {
        let day = QuotaDescriptor::every(10, 1, PeriodUnit::Day);

        let spring = new_york(2025, 3, 8, 9, 0);
        let next = advance(&spring, &day).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (9, 9, 0));
        assert_eq!(next.timestamp_millis() - spring.timestamp_millis(), 23 * 3_600_000);

        let autumn = new_york(2025, 11, 2, 9, 0);
        let prev = retreat(&autumn, &day).unwrap();
        assert_eq!((prev.day(), prev.hour(), prev.minute()), (1, 9, 0));
        assert_eq!(autumn.timestamp_millis() - prev.timestamp_millis(), 25 * 3_600_000);
    }

    #[test]
    fn test_resolve_local_gap_and_fold() {
        let gap = NaiveDate::from_ymd_opt(2025, 3, 9)
            .and_then(|d| d.and_hms_opt(2, 15, 0))
            .unwrap();
        let resolved = resolve_local(&New_York, &gap).unwrap();
        assert_eq!((resolved.hour(), resolved.minute()), (3, 15));

        let fold = NaiveDate::from_ymd_opt(2025, 11, 2)
            .and_then(|d| d.and_hms_opt(1, 15, 0))
            .unwrap();
        let resolved = resolve_local(&New_York, &fold).unwrap();
        assert_eq!(resolved.offset().fix().local_minus_utc(), -4 * 3600);
    }

    #[test]
    fn test_millis_helpers() {
        let d = QuotaDescriptor::every(80, 3, PeriodUnit::Hour);
        let t = utc(2025, 5, 10, 12, 0).timestamp_millis();
        assert_eq!(advance_millis(&Utc, t, &d), Some(t + 3 * 3_600_000));
        assert_eq!(retreat_millis(&Utc, t, &d), Some(t - 3 * 3_600_000));
        assert!(from_millis(&Utc, i64::MAX).is_none());
    }
}
