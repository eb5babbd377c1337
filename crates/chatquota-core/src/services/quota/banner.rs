//! Banner text parsing
//!
//! Turns the free-form limit banners shown by the chat UI into [`Signal`]s.
//! Typical inputs:
//!
//! ```text
//! You've hit the limit for o3. You can use it again after it resets May 19, 2025.
//! You've reached your GPT-4o usage cap. Try again in 2 hours and 15 minutes.
//! You have 5 responses from o4-mini-high remaining. Limit resets at 4:30 PM.
//! ```
//!
//! Text that cannot be classified, or that names no model, yields `None`.
//! Nothing is guessed.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone};
use regex::Regex;

use super::matcher;
use super::period::{self, resolve_local};
use super::plans::LimitTable;
use super::types::{PeriodUnit, QuotaDescriptor, Signal, StatedWindow};

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bresets?\s+(?:on\s+)?(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})",
    )
    .expect("DATE_RE is a compile-time constant")
});

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}):(\d{2})\s*([ap])\.?\s?m\b")
        .expect("CLOCK_RE is a compile-time constant")
});

static HOURS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(?:hours?|hrs?)\b(?:,?\s*(?:and\s+)?(\d+)\s*(?:minutes?|mins?)\b)?")
        .expect("HOURS_RE is a compile-time constant")
});

static MINUTES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(?:minutes?|mins?)\b").expect("MINUTES_RE is a compile-time constant")
});

static MODEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(gpt-\d[\w.\-]*(?:\s+mini)?|o\d(?:-(?:mini|high|pro|preview))*|deep[ -]research)\b",
    )
        .expect("MODEL_RE is a compile-time constant")
});

static REMAINING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:remaining|left)\b").expect("REMAINING_RE is a compile-time constant")
});

static RESET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:resets?|until|refresh(?:es)?|renews?|available again)\b|\bin\s+\d")
        .expect("RESET_RE is a compile-time constant")
});

static CAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bhit\s+(?:the|your|a)\b.*?\blimit\b|\breached\b.*?\b(?:limit|cap)\b|\brate[\s-]limit|\busage\s+cap\b|\blimit\s+reached\b",
    )
    .expect("CAP_RE is a compile-time constant")
});

/// What kind of banner a text is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    /// The cap was reached; the counter restarts
    LimitHit,
    /// A few messages remain; the counter is kept
    Warning,
}

/// Classify banner text
///
/// Remaining-count phrasing together with reset phrasing is a warning
/// ("3 messages left until 5:00 PM"). Otherwise cap-reached phrasing is a
/// limit hit. Anything else is not a banner.
pub fn classify(text: &str) -> Option<BannerKind> {
    if REMAINING_RE.is_match(text) && RESET_RE.is_match(text) {
        Some(BannerKind::Warning)
    } else if CAP_RE.is_match(text) {
        Some(BannerKind::LimitHit)
    } else {
        None
    }
}

/// First model name mentioned in the text, lower-cased
pub fn extract_model(text: &str) -> Option<String> {
    MODEL_RE.captures(text).map(|caps| {
        caps[1]
            .trim_end_matches(['.', '-', ','])
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase()
    })
}

/// Parse a banner into a signal
///
/// The model named in the text wins over `model_hint` (the model currently
/// shown in the UI). `limits` is the active plan's table; it decides which
/// reset phrasings apply and supplies the fallback window length.
pub fn parse_banner<Tz: TimeZone>(
    text: &str,
    model_hint: Option<&str>,
    limits: &LimitTable,
    now: &DateTime<Tz>,
) -> Option<Signal> {
    let Some(kind) = classify(text) else {
        log::debug!("[quota:banner] Ignoring unclassified text: {:.80}", text);
        return None;
    };

    let Some(model) = extract_model(text).or_else(|| {
        model_hint
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
    }) else {
        log::debug!("[quota:banner] No model in {:?} banner", kind);
        return None;
    };

    let descriptor = matcher::resolve(&model, limits);
    let Some(window) = parse_reset_window(text, descriptor, now) else {
        log::debug!(
            "[quota:banner] No reset time for '{}' and no bounded limit to fall back on",
            model
        );
        return None;
    };

    log::debug!(
        "[quota:banner] {:?} for '{}': start={:?} until={:?}",
        kind,
        model,
        window.start,
        window.until
    );

    Some(match kind {
        BannerKind::LimitHit => Signal::LimitHit {
            model,
            window,
            reset_count: true,
        },
        BannerKind::Warning => Signal::Warning { model, window },
    })
}

/// Work out the window a banner states
///
/// First match wins: a calendar date (weekly limits only), a clock time, a
/// relative duration, then one period from now for bounded limits.
pub fn parse_reset_window<Tz: TimeZone>(
    text: &str,
    descriptor: Option<&QuotaDescriptor>,
    now: &DateTime<Tz>,
) -> Option<StatedWindow> {
    let now_ms = now.timestamp_millis();

    if let Some(d) = descriptor.filter(|d| d.period_unit == PeriodUnit::Week) {
        if let Some(window) = parse_calendar_date(text, d, now) {
            return Some(window);
        }
    }

    if let Some(until) = parse_clock_time(text, now) {
        return Some(StatedWindow {
            start: Some(now_ms),
            until: Some(until.timestamp_millis()),
        });
    }

    if let Some(duration) = parse_relative_duration(text) {
        let until = now.clone().checked_add_signed(duration)?;
        return Some(StatedWindow {
            start: Some(now_ms),
            until: Some(until.timestamp_millis()),
        });
    }

    let descriptor = descriptor.filter(|d| d.is_bounded())?;
    let until = period::advance(now, descriptor)?;
    Some(StatedWindow {
        start: Some(now_ms),
        until: Some(until.timestamp_millis()),
    })
}

/// "resets May 19, 2025" on a weekly limit
///
/// The window is taken to end at the last millisecond of that day and to
/// have started `period_amount` weeks earlier at midnight.
fn parse_calendar_date<Tz: TimeZone>(
    text: &str,
    descriptor: &QuotaDescriptor,
    now: &DateTime<Tz>,
) -> Option<StatedWindow> {
    let caps = DATE_RE.captures(text)?;
    let month = month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    let tz = now.timezone();
    let end = resolve_local(&tz, &date.and_hms_milli_opt(23, 59, 59, 999)?)?;
    if end <= *now {
        log::debug!("[quota:banner] Reset date {} is not in the future", date);
        return None;
    }

    let start_date = date.checked_sub_days(chrono::Days::new(descriptor.period_amount as u64 * 7))?;
    let start = resolve_local(&tz, &start_date.and_hms_opt(0, 0, 0)?)?;

    Some(StatedWindow {
        start: Some(start.timestamp_millis()),
        until: Some(end.timestamp_millis()),
    })
}

/// "4:30 PM": today, or tomorrow when that time has already passed
fn parse_clock_time<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let caps = CLOCK_RE.captures(text)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }
    let pm = caps[3].eq_ignore_ascii_case("p");
    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };

    let tz = now.timezone();
    let today = now.date_naive().and_hms_opt(hour24, minute, 0)?;
    let candidate = resolve_local(&tz, &today)?;
    if candidate > *now {
        return Some(candidate);
    }
    let tomorrow = today.checked_add_days(chrono::Days::new(1))?;
    resolve_local(&tz, &tomorrow)
}

/// "2 hours and 15 minutes", "3 hours", "45 minutes"
fn parse_relative_duration(text: &str) -> Option<TimeDelta> {
    if let Some(caps) = HOURS_RE.captures(text) {
        let hours: i64 = caps[1].parse().ok()?;
        let minutes: i64 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse::<i64>()).ok()?;
        return TimeDelta::try_hours(hours)?.checked_add(&TimeDelta::try_minutes(minutes)?);
    }
    let caps = MINUTES_RE.captures(text)?;
    let minutes: i64 = caps[1].parse().ok()?;
    TimeDelta::try_minutes(minutes)
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quota::plans::limits_for;
    use crate::services::quota::types::PlanId;
    use chrono::{Timelike, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn millis(dt: DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("You've hit the limit for o3."),
            Some(BannerKind::LimitHit)
        );
        assert_eq!(
            classify("You've reached your GPT-4o usage limit."),
            Some(BannerKind::LimitHit)
        );
        assert_eq!(
            classify("You have 5 responses remaining. Resets at 4:30 PM."),
            Some(BannerKind::Warning)
        );
        assert_eq!(
            classify("3 messages left before you hit the limit, until 5:00 PM"),
            Some(BannerKind::Warning)
        );
        assert_eq!(classify("Rate limit exceeded"), Some(BannerKind::LimitHit));
        assert_eq!(classify("You have 5 responses remaining"), None);
        assert_eq!(classify("Welcome back!"), None);
    }

    #[test]
    fn test_extract_model() {
        assert_eq!(extract_model("You've hit the limit for o3."), Some("o3".to_string()));
        assert_eq!(
            extract_model("You've reached your GPT-4o usage cap."),
            Some("gpt-4o".to_string())
        );
        assert_eq!(
            extract_model("5 responses from o4-mini-high remaining"),
            Some("o4-mini-high".to_string())
        );
        assert_eq!(extract_model("You've hit the limit."), None);
    }

    #[test]
    fn test_extract_model_spaced_mini() {
        assert_eq!(
            extract_model("You've hit the GPT-4o mini usage limit."),
            Some("gpt-4o-mini".to_string())
        );
        assert_eq!(
            extract_model("Limit reached for GPT-4o\nmini"),
            Some("gpt-4o-mini".to_string())
        );
        assert_eq!(extract_model("Deep Research resets soon"), Some("deep-research".to_string()));
        // "mini" must be a whole word
        assert_eq!(
            extract_model("GPT-4o minimum wait applies"),
            Some("gpt-4o".to_string())
        );

        let plus = limits_for(&PlanId::Plus);
        let model = extract_model("You've hit the GPT-4o mini usage limit.").unwrap();
        assert_eq!(
            matcher::resolve(&model, &plus),
            matcher::resolve("gpt-4o-mini", &plus)
        );
    }

    #[test]
    fn test_scenario_weekly_calendar_date() {
        let plus = limits_for(&PlanId::Plus);
        let now = at(2025, 5, 10, 14, 0);
        let signal = parse_banner(
            "You've hit the limit for o3. You can use it again after it resets May 19, 2025.",
            None,
            &plus,
            &now,
        )
        .unwrap();

        let expected_end = Utc
            .with_ymd_and_hms(2025, 5, 19, 23, 59, 59)
            .unwrap()
            .with_nanosecond(999_000_000)
            .unwrap();
        match signal {
            Signal::LimitHit {
                model,
                window,
                reset_count,
            } => {
                assert_eq!(model, "o3");
                assert!(reset_count);
                assert_eq!(window.until, Some(millis(expected_end)));
                assert_eq!(window.start, Some(millis(at(2025, 5, 12, 0, 0))));
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_calendar_date_ignored_for_non_weekly_model() {
        let plus = limits_for(&PlanId::Plus);
        let now = at(2025, 5, 10, 14, 0);
        // gpt-4o is 3-hourly: the date is skipped and the fallback applies
        let signal = parse_banner("You've hit the limit for GPT-4o, it resets May 19, 2025", None, &plus, &now)
            .unwrap();
        let Signal::LimitHit { window, .. } = signal else {
            panic!("expected limit hit");
        };
        assert_eq!(window.until, Some(millis(at(2025, 5, 10, 17, 0))));
    }

    #[test]
    fn test_past_calendar_date_falls_through() {
        let plus = limits_for(&PlanId::Plus);
        let now = at(2025, 5, 20, 9, 0);
        let window = parse_reset_window("resets May 19, 2025", plus.get("o3"), &now).unwrap();
        // falls back to one week from now
        assert_eq!(window.until, Some(millis(at(2025, 5, 27, 9, 0))));
        assert_eq!(window.start, Some(millis(now)));
    }

    #[test]
    fn test_clock_time_later_today() {
        let now = at(2025, 5, 10, 14, 0);
        let window = parse_reset_window("Limit resets at 4:30 PM.", None, &now).unwrap();
        assert_eq!(window.until, Some(millis(at(2025, 5, 10, 16, 30))));
        assert_eq!(window.start, Some(millis(now)));
    }

    #[test]
    fn test_clock_time_already_passed_is_tomorrow() {
        let now = at(2025, 5, 10, 18, 0);
        let window = parse_reset_window("available again at 9:05 am", None, &now).unwrap();
        assert_eq!(window.until, Some(millis(at(2025, 5, 11, 9, 5))));
    }

    #[test]
    fn test_clock_time_midnight_and_noon() {
        let now = at(2025, 5, 10, 11, 0);
        let noon = parse_reset_window("until 12:00 PM", None, &now).unwrap();
        assert_eq!(noon.until, Some(millis(at(2025, 5, 10, 12, 0))));
        let midnight = parse_reset_window("until 12:15 AM", None, &now).unwrap();
        assert_eq!(midnight.until, Some(millis(at(2025, 5, 11, 0, 15))));
    }

    #[test]
    fn test_relative_hours_exact() {
        let now = at(2025, 5, 10, 14, 7);
        let window = parse_reset_window("in 3 hours", None, &now).unwrap();
        assert_eq!(window.until, Some(millis(now) + 3 * 3_600_000));
        assert_eq!(window.start, Some(millis(now)));
    }

    #[test]
    fn test_relative_hours_and_minutes() {
        let now = at(2025, 5, 10, 14, 0);
        let window = parse_reset_window("Try again in 2 hours and 15 minutes.", None, &now).unwrap();
        assert_eq!(window.until, Some(millis(at(2025, 5, 10, 16, 15))));

        let minutes = parse_reset_window("Try again in 45 minutes", None, &now).unwrap();
        assert_eq!(minutes.until, Some(millis(at(2025, 5, 10, 14, 45))));
    }

    #[test]
    fn test_fallback_to_descriptor_period() {
        let free = limits_for(&PlanId::Free);
        let now = at(2025, 5, 10, 14, 0);
        let window = parse_reset_window("You've hit the limit", free.get("gpt-4o"), &now).unwrap();
        assert_eq!(window.until, Some(millis(at(2025, 5, 10, 19, 0))));
    }

    #[test]
    fn test_no_window_without_bounded_descriptor() {
        let now = at(2025, 5, 10, 14, 0);
        assert!(parse_reset_window("You've hit the limit", None, &now).is_none());
        let unlimited = QuotaDescriptor::unlimited();
        assert!(parse_reset_window("You've hit the limit", Some(&unlimited), &now).is_none());
    }

    #[test]
    fn test_warning_banner_uses_hint() {
        let plus = limits_for(&PlanId::Plus);
        let now = at(2025, 5, 10, 14, 0);
        let signal = parse_banner(
            "You have 5 responses remaining. Limit resets at 4:30 PM.",
            Some("o4-mini"),
            &plus,
            &now,
        )
        .unwrap();
        match signal {
            Signal::Warning { model, window } => {
                assert_eq!(model, "o4-mini");
                assert_eq!(window.until, Some(millis(at(2025, 5, 10, 16, 30))));
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_text_model_beats_hint() {
        let plus = limits_for(&PlanId::Plus);
        let now = at(2025, 5, 10, 14, 0);
        let signal = parse_banner("You've hit the limit for o3. Try again in 3 hours", Some("gpt-4o"), &plus, &now)
            .unwrap();
        assert_eq!(signal.model(), "o3");
    }

    #[test]
    fn test_unparseable_text_is_dropped() {
        let plus = limits_for(&PlanId::Plus);
        let now = at(2025, 5, 10, 14, 0);
        assert!(parse_banner("Hello there", Some("o3"), &plus, &now).is_none());
        // classified, but no model anywhere
        assert!(parse_banner("You've hit the limit. Try again in 2 hours", None, &plus, &now).is_none());
        // classified with a model, but nothing to derive a window from
        assert!(parse_banner("You've hit the limit", Some("mystery-model"), &plus, &now).is_none());
    }
}
