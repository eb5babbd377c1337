//! Quota tracking types
//!
//! Plans, quota descriptors, per-model usage records and the signals that
//! move them.

use serde::{Deserialize, Serialize};

// ============================================================================
// Plan Types
// ============================================================================

/// Subscription plan of the signed-in account
///
/// Only `Free` and `Plus` have limit tables. Anything else is carried
/// verbatim so it can be persisted and shown, but resolves to no limits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlanId {
    #[default]
    Free,
    Plus,
    Other(String),
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanId::Free => write!(f, "free"),
            PlanId::Plus => write!(f, "plus"),
            PlanId::Other(name) => write!(f, "{}", name),
        }
    }
}

impl From<String> for PlanId {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "free" => PlanId::Free,
            "plus" => PlanId::Plus,
            _ => PlanId::Other(s),
        }
    }
}

impl From<&str> for PlanId {
    fn from(s: &str) -> Self {
        PlanId::from(s.to_string())
    }
}

impl From<PlanId> for String {
    fn from(plan: PlanId) -> Self {
        plan.to_string()
    }
}

// ============================================================================
// Period Types
// ============================================================================

/// Unit of a quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodUnit {
    Hour,
    Day,
    Week,
    Month,
    /// No cap is enforced
    Unlimited,
    /// Model is not available on this plan (cap is zero)
    #[serde(rename = "none")]
    Disabled,
    /// A unit string this build does not understand
    #[serde(other)]
    Unrecognized,
}

impl PeriodUnit {
    /// Whether windows of this unit can be advanced
    pub fn is_bounded(&self) -> bool {
        matches!(
            self,
            PeriodUnit::Hour | PeriodUnit::Day | PeriodUnit::Week | PeriodUnit::Month
        )
    }
}

impl std::fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodUnit::Hour => write!(f, "hour"),
            PeriodUnit::Day => write!(f, "day"),
            PeriodUnit::Week => write!(f, "week"),
            PeriodUnit::Month => write!(f, "month"),
            PeriodUnit::Unlimited => write!(f, "unlimited"),
            PeriodUnit::Disabled => write!(f, "none"),
            PeriodUnit::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

impl std::str::FromStr for PeriodUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" | "hours" => Ok(PeriodUnit::Hour),
            "day" | "days" => Ok(PeriodUnit::Day),
            "week" | "weeks" => Ok(PeriodUnit::Week),
            "month" | "months" => Ok(PeriodUnit::Month),
            "unlimited" => Ok(PeriodUnit::Unlimited),
            "none" | "disabled" => Ok(PeriodUnit::Disabled),
            _ => Err(format!("Unknown period unit: {}", s)),
        }
    }
}

// ============================================================================
// Quota Descriptor
// ============================================================================

/// How many messages a model allows per window, and how long the window is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDescriptor {
    /// Messages allowed per window
    pub count: u32,
    /// Number of `period_unit`s per window (0 when unbounded)
    pub period_amount: u32,
    pub period_unit: PeriodUnit,
    /// Human label such as "80 / 3 hours"
    pub display_limit: String,
}

impl QuotaDescriptor {
    /// A bounded descriptor: `count` messages every `amount` `unit`s
    pub fn every(count: u32, amount: u32, unit: PeriodUnit) -> Self {
        let plural = if amount == 1 { "" } else { "s" };
        let display_limit = if amount == 1 {
            format!("{} / {}", count, unit)
        } else {
            format!("{} / {} {}{}", count, amount, unit, plural)
        };
        Self {
            count,
            period_amount: amount,
            period_unit: unit,
            display_limit,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            count: 0,
            period_amount: 0,
            period_unit: PeriodUnit::Unlimited,
            display_limit: "Unlimited".to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            count: 0,
            period_amount: 0,
            period_unit: PeriodUnit::Disabled,
            display_limit: "Not available".to_string(),
        }
    }

    /// Whether windows are managed for this descriptor
    pub fn is_bounded(&self) -> bool {
        self.period_unit.is_bounded()
    }
}

// ============================================================================
// Usage Record
// ============================================================================

/// Usage of one model in its current window
///
/// Instants are epoch milliseconds. Window fields are only populated for
/// models with a known descriptor: bounded models carry both, unlimited or
/// disabled models carry only the start, untracked models carry neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub count: u32,
    pub window_start: Option<i64>,
    pub window_end: Option<i64>,
}

impl UsageRecord {
    /// A record that only counts, with no window
    pub fn raw(count: u32) -> Self {
        Self {
            count,
            window_start: None,
            window_end: None,
        }
    }

    pub fn with_window(count: u32, start: i64, end: Option<i64>) -> Self {
        Self {
            count,
            window_start: Some(start),
            window_end: end,
        }
    }

    /// `window_end`, when present, lies strictly after `window_start`
    pub fn is_consistent(&self) -> bool {
        match (self.window_start, self.window_end) {
            (Some(start), Some(end)) => end > start,
            (None, Some(_)) => false,
            _ => true,
        }
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Window boundaries stated (or implied) by an observed signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatedWindow {
    /// Derived start; `None` means "when the signal was observed"
    pub start: Option<i64>,
    /// Stated end; `None` means "one period after the start"
    pub until: Option<i64>,
}

/// A normalized fact about one model's window
///
/// Signals are produced by the banner parser or a manual override, consumed
/// once by the reconciler and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The cap was reached
    LimitHit {
        model: String,
        window: StatedWindow,
        reset_count: bool,
    },
    /// Close to the cap; only the window bookkeeping moves
    Warning { model: String, window: StatedWindow },
    /// User-entered count and reset time
    ManualOverride {
        model: String,
        count: u32,
        until: i64,
    },
}

impl Signal {
    pub fn model(&self) -> &str {
        match self {
            Signal::LimitHit { model, .. }
            | Signal::Warning { model, .. }
            | Signal::ManualOverride { model, .. } => model,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Signal::LimitHit { .. } => "limit_hit",
            Signal::Warning { .. } => "warning",
            Signal::ManualOverride { .. } => "manual_override",
        }
    }
}

// ============================================================================
// Alert Level
// ============================================================================

/// Alert level for quota usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Normal usage, no alert
    Normal,
    /// Usage is approaching limit (e.g., >80%)
    Warning,
    /// Usage is at or near limit (e.g., >95%)
    Critical,
}

impl AlertLevel {
    /// Determine alert level based on usage percentage and thresholds
    pub fn from_usage(used_percent: f64, warning_threshold: f64, critical_threshold: f64) -> Self {
        if used_percent >= critical_threshold {
            AlertLevel::Critical
        } else if used_percent >= warning_threshold {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Normal => write!(f, "normal"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Default warning threshold (percentage)
pub const DEFAULT_WARNING_THRESHOLD: f64 = 80.0;

/// Default critical threshold (percentage)
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 95.0;

// ============================================================================
// Usage View
// ============================================================================

/// A record joined with its descriptor, ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageView {
    pub model: String,
    /// `None` when the tracker could not be reached
    pub record: Option<UsageRecord>,
    pub descriptor: Option<QuotaDescriptor>,
}

impl UsageView {
    pub fn new(
        model: impl Into<String>,
        record: UsageRecord,
        descriptor: Option<QuotaDescriptor>,
    ) -> Self {
        Self {
            model: model.into(),
            record: Some(record),
            descriptor,
        }
    }

    /// Sentinel shown when the store is unreachable
    pub fn unknown(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            record: None,
            descriptor: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.record.is_none()
    }

    /// Messages left in the window, for bounded descriptors
    pub fn remaining(&self) -> Option<u32> {
        let record = self.record?;
        let descriptor = self.descriptor.as_ref().filter(|d| d.is_bounded())?;
        Some(descriptor.count.saturating_sub(record.count))
    }

    pub fn used_percent(&self) -> Option<f64> {
        let record = self.record?;
        let descriptor = self.descriptor.as_ref().filter(|d| d.is_bounded())?;
        if descriptor.count == 0 {
            return Some(100.0);
        }
        Some(record.count as f64 * 100.0 / descriptor.count as f64)
    }

    pub fn alert_level(&self) -> AlertLevel {
        self.alert_level_with(DEFAULT_WARNING_THRESHOLD, DEFAULT_CRITICAL_THRESHOLD)
    }

    /// Alert level against custom percentage thresholds; an exhausted
    /// window is always critical
    pub fn alert_level_with(&self, warning_threshold: f64, critical_threshold: f64) -> AlertLevel {
        match (self.used_percent(), self.remaining()) {
            (_, Some(0)) => AlertLevel::Critical,
            (Some(percent), _) => {
                AlertLevel::from_usage(percent, warning_threshold, critical_threshold)
            }
            _ => AlertLevel::Normal,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
