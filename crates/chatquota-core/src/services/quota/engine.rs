//! Quota window reconciliation
//!
//! The reconciler is the only code that decides what a model's
//! [`UsageRecord`] looks like next. It merges three kinds of input:
//!
//! - explicit signals (limit banners, warnings, manual overrides)
//! - `roll_forward`: speculative repair of a window whose start has gone
//!   stale while no banner was seen
//! - `expire`: hard reset once a known window end has passed
//!
//! Every entry point computes a full replacement record from the current
//! one and never touches storage. When any instant cannot be computed the
//! call fails with [`QuotaError`] and the caller keeps the old record.
//!
//! ```text
//!   Unknown ──first signal──▶ ActiveWindow ──limit hit / expiry / rollover──┐
//!                                  ▲                                       │
//!                                  └───────────────────────────────────────┘
//! ```

use chrono::TimeZone;

use super::counter::QuotaError;
use super::period;
use super::types::{QuotaDescriptor, Signal, StatedWindow, UsageRecord};

/// Upper bound on periods stepped through in one `roll_forward` call
const MAX_ROLL_STEPS: u32 = 10_000;

/// Outcome of a speculative reconciliation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpdate {
    /// Nothing to change
    Unchanged,
    /// The record should be replaced
    Replaced(UsageRecord),
}

impl RecordUpdate {
    pub fn is_changed(&self) -> bool {
        matches!(self, RecordUpdate::Replaced(_))
    }

    /// The record after this update
    pub fn applied_to(self, current: UsageRecord) -> UsageRecord {
        match self {
            RecordUpdate::Unchanged => current,
            RecordUpdate::Replaced(record) => record,
        }
    }
}

/// Window arithmetic bound to a time zone
///
/// Instants are epoch milliseconds; the zone is only used to shift them on
/// the local calendar.
#[derive(Debug, Clone)]
pub struct Reconciler<Tz: TimeZone> {
    tz: Tz,
}

impl<Tz: TimeZone> Reconciler<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    fn advance(&self, model: &str, at: i64, descriptor: &QuotaDescriptor) -> Result<i64, QuotaError> {
        period::advance_millis(&self.tz, at, descriptor).ok_or_else(|| QuotaError::InvalidInstant {
            model: model.to_string(),
            detail: format!("cannot advance {} by '{}'", at, descriptor.display_limit),
        })
    }

    fn retreat(&self, model: &str, at: i64, descriptor: &QuotaDescriptor) -> Result<i64, QuotaError> {
        period::retreat_millis(&self.tz, at, descriptor).ok_or_else(|| QuotaError::InvalidInstant {
            model: model.to_string(),
            detail: format!("cannot retreat {} by '{}'", at, descriptor.display_limit),
        })
    }

    /// A brand-new window starting at `now`
    ///
    /// Untracked models get a bare counter, unlimited/disabled models a start
    /// with no end.
    pub fn fresh(
        &self,
        model: &str,
        descriptor: Option<&QuotaDescriptor>,
        now: i64,
    ) -> Result<UsageRecord, QuotaError> {
        match descriptor {
            None => Ok(UsageRecord::raw(0)),
            Some(d) if !d.is_bounded() => Ok(UsageRecord::with_window(0, now, None)),
            Some(d) => {
                let end = self.advance(model, now, d)?;
                Ok(UsageRecord::with_window(0, now, Some(end)))
            }
        }
    }

    /// Merge a parsed or user-entered signal into the model's record
    pub fn apply_signal(
        &self,
        signal: &Signal,
        current: Option<&UsageRecord>,
        descriptor: Option<&QuotaDescriptor>,
        now: i64,
    ) -> Result<UsageRecord, QuotaError> {
        let model = signal.model();
        let current_count = current.map_or(0, |r| r.count);

        let record = match signal {
            Signal::LimitHit {
                window,
                reset_count,
                ..
            } => {
                let count = if *reset_count { 0 } else { current_count };
                self.restate_window(model, count, window, current, descriptor, now)?
            }
            Signal::Warning { window, .. } => {
                self.restate_window(model, current_count, window, current, descriptor, now)?
            }
            Signal::ManualOverride { count, until, .. } => match descriptor {
                Some(d) if d.is_bounded() => {
                    let start = self.retreat(model, *until, d)?;
                    UsageRecord::with_window(*count, start, Some(*until))
                }
                _ => {
                    let base = match current {
                        Some(record) => *record,
                        None => self.fresh(model, descriptor, now)?,
                    };
                    UsageRecord {
                        count: *count,
                        ..base
                    }
                }
            },
        };

        check_window(model, &record)?;
        log::debug!(
            "[quota:engine] {} for '{}': count {} -> {}, window {:?}..{:?}",
            signal.kind(),
            model,
            current_count,
            record.count,
            record.window_start,
            record.window_end
        );
        Ok(record)
    }

    fn restate_window(
        &self,
        model: &str,
        count: u32,
        window: &StatedWindow,
        current: Option<&UsageRecord>,
        descriptor: Option<&QuotaDescriptor>,
        now: i64,
    ) -> Result<UsageRecord, QuotaError> {
        match descriptor {
            // untracked: count only, no window management
            None => Ok(UsageRecord {
                count,
                ..current.copied().unwrap_or_default()
            }),
            Some(d) if !d.is_bounded() => Ok(UsageRecord::with_window(
                count,
                window.start.unwrap_or(now),
                None,
            )),
            Some(d) => {
                let start = window.start.unwrap_or(now);
                let end = match window.until {
                    Some(until) => until,
                    None => self.advance(model, start, d)?,
                };
                Ok(UsageRecord::with_window(count, start, Some(end)))
            }
        }
    }

    /// Speculatively move a stale window start forward
    ///
    /// Starting one period after `window_start`, steps forward while the
    /// candidate is before both `now` and `window_end`. A known end that the
    /// stepping reaches wins and nothing changes. Otherwise a candidate that
    /// lies strictly between the old start and `now` opens a new window with
    /// a zero count. A missing end never compares as reached, so end-less
    /// windows roll one period per call.
    pub fn roll_forward(
        &self,
        model: &str,
        current: &UsageRecord,
        descriptor: Option<&QuotaDescriptor>,
        now: i64,
    ) -> Result<RecordUpdate, QuotaError> {
        let Some(d) = descriptor.filter(|d| d.is_bounded()) else {
            return Ok(RecordUpdate::Unchanged);
        };
        let Some(start) = current.window_start else {
            return Ok(RecordUpdate::Unchanged);
        };
        let end = current.window_end;
        let before_end = |t: i64| end.is_some_and(|e| t < e);

        let mut candidate = self.advance(model, start, d)?;
        let mut steps = 0;
        while candidate < now && before_end(candidate) {
            candidate = self.advance(model, candidate, d)?;
            steps += 1;
            if steps > MAX_ROLL_STEPS {
                return Err(QuotaError::InvalidInstant {
                    model: model.to_string(),
                    detail: format!("no rollover boundary within {} periods", MAX_ROLL_STEPS),
                });
            }
        }

        if let Some(e) = end {
            if candidate >= e && e > start {
                return Ok(RecordUpdate::Unchanged);
            }
        }

        if candidate > start && candidate < now {
            let next_end = self.advance(model, candidate, d)?;
            log::info!(
                "[quota:engine] Rolled '{}' forward: window {} -> {} (count {} reset)",
                model,
                start,
                candidate,
                current.count
            );
            return Ok(RecordUpdate::Replaced(UsageRecord::with_window(
                0,
                candidate,
                Some(next_end),
            )));
        }

        Ok(RecordUpdate::Unchanged)
    }

    /// Close a window whose end has passed
    ///
    /// The new window starts at `now`, not at the old end: chaining from a
    /// stale end would never catch up.
    pub fn expire(
        &self,
        model: &str,
        current: &UsageRecord,
        descriptor: Option<&QuotaDescriptor>,
        now: i64,
    ) -> Result<RecordUpdate, QuotaError> {
        let Some(d) = descriptor.filter(|d| d.is_bounded()) else {
            return Ok(RecordUpdate::Unchanged);
        };
        let Some(end) = current.window_end else {
            return Ok(RecordUpdate::Unchanged);
        };
        if now <= end {
            return Ok(RecordUpdate::Unchanged);
        }

        let next_end = self.advance(model, now, d)?;
        log::info!(
            "[quota:engine] Window for '{}' expired at {}; new window {}..{}",
            model,
            end,
            now,
            next_end
        );
        Ok(RecordUpdate::Replaced(UsageRecord::with_window(
            0,
            now,
            Some(next_end),
        )))
    }

    /// Full sweep step: repair the start, then close the window if it ended
    pub fn sweep(
        &self,
        model: &str,
        current: &UsageRecord,
        descriptor: Option<&QuotaDescriptor>,
        now: i64,
    ) -> Result<RecordUpdate, QuotaError> {
        let rolled = self.roll_forward(model, current, descriptor, now)?;
        let after_roll = rolled.applied_to(*current);
        match self.expire(model, &after_roll, descriptor, now)? {
            RecordUpdate::Unchanged => Ok(rolled),
            expired => Ok(expired),
        }
    }

    /// Count one sent message
    ///
    /// An ended window is expired first so the message lands in the new one.
    /// A bounded model whose record has no window yet gets one.
    pub fn record_usage(
        &self,
        model: &str,
        current: Option<&UsageRecord>,
        descriptor: Option<&QuotaDescriptor>,
        now: i64,
    ) -> Result<UsageRecord, QuotaError> {
        let base = match current {
            None => self.fresh(model, descriptor, now)?,
            Some(record) if record.window_start.is_none() && descriptor.is_some() => UsageRecord {
                count: record.count,
                ..self.fresh(model, descriptor, now)?
            },
            Some(record) => self.expire(model, record, descriptor, now)?.applied_to(*record),
        };
        Ok(UsageRecord {
            count: base.count.saturating_add(1),
            ..base
        })
    }
}

fn check_window(model: &str, record: &UsageRecord) -> Result<(), QuotaError> {
    if record.is_consistent() {
        Ok(())
    } else {
        Err(QuotaError::InvalidWindow {
            model: model.to_string(),
            start: record.window_start,
            end: record.window_end,
        })
    }
}
