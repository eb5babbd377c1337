//! Plan limit tables
//!
//! Built-in message caps per plan. The numbers mirror what the chat service
//! advertised at the time of writing and drift over time, so they can be
//! replaced per plan from `TrackerConfig::limit_overrides`.
//!
//! Order matters: the matcher falls back to substring matching in declared
//! order, so longer model names are listed before their prefixes
//! (`gpt-4o-mini` before `gpt-4o`, `o4-mini-high` before `o4-mini`).

use serde::{Deserialize, Serialize};

use super::types::{PeriodUnit, PlanId, QuotaDescriptor};

/// One pattern in a limit table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitEntry {
    /// Lower-case model-name pattern
    pub pattern: String,
    #[serde(flatten)]
    pub descriptor: QuotaDescriptor,
}

/// Ordered mapping from model pattern to descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitTable {
    entries: Vec<LimitEntry>,
}

impl LimitTable {
    pub fn new(entries: Vec<LimitEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in declared order
    pub fn entries(&self) -> &[LimitEntry] {
        &self.entries
    }

    /// Copy with every pattern trimmed and lower-cased, as the matcher expects
    pub fn normalized(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|e| LimitEntry {
                pattern: e.pattern.trim().to_lowercase(),
                descriptor: e.descriptor.clone(),
            })
            .collect();
        Self { entries }
    }

    /// Descriptor for an exact pattern
    pub fn get(&self, pattern: &str) -> Option<&QuotaDescriptor> {
        self.entries
            .iter()
            .find(|e| e.pattern == pattern)
            .map(|e| &e.descriptor)
    }

    fn push(mut self, pattern: &str, descriptor: QuotaDescriptor) -> Self {
        self.entries.push(LimitEntry {
            pattern: pattern.to_string(),
            descriptor,
        });
        self
    }
}

/// Built-in limit table for a plan
///
/// Unknown plans get an empty table, which leaves every model untracked.
pub fn limits_for(plan: &PlanId) -> LimitTable {
    match plan {
        PlanId::Free => free_limits(),
        PlanId::Plus => plus_limits(),
        PlanId::Other(name) => {
            log::debug!("[quota:plans] No limit table for plan '{}'", name);
            LimitTable::default()
        }
    }
}

fn free_limits() -> LimitTable {
    LimitTable::default()
        .push("gpt-4o-mini", QuotaDescriptor::unlimited())
        .push("gpt-4.1-mini", QuotaDescriptor::unlimited())
        .push("gpt-4o", QuotaDescriptor::every(10, 5, PeriodUnit::Hour))
        .push("o4-mini-high", QuotaDescriptor::disabled())
        .push("o4-mini", QuotaDescriptor::every(10, 1, PeriodUnit::Day))
        .push("gpt-4.5", QuotaDescriptor::disabled())
        .push("o3", QuotaDescriptor::disabled())
}

fn plus_limits() -> LimitTable {
    LimitTable::default()
        .push("gpt-4o-mini", QuotaDescriptor::unlimited())
        .push("gpt-4.1-mini", QuotaDescriptor::unlimited())
        .push("gpt-4o", QuotaDescriptor::every(80, 3, PeriodUnit::Hour))
        .push("gpt-4.1", QuotaDescriptor::every(80, 3, PeriodUnit::Hour))
        .push("gpt-4.5", QuotaDescriptor::every(50, 1, PeriodUnit::Week))
        .push("o4-mini-high", QuotaDescriptor::every(100, 1, PeriodUnit::Day))
        .push("o4-mini", QuotaDescriptor::every(300, 1, PeriodUnit::Day))
        .push("o3-pro", QuotaDescriptor::disabled())
        .push("o3", QuotaDescriptor::every(100, 1, PeriodUnit::Week))
        .push("deep-research", QuotaDescriptor::every(25, 1, PeriodUnit::Month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_lowercases_patterns() {
        let table = LimitTable::default()
            .push(" O4-Mini-High ", QuotaDescriptor::every(100, 1, PeriodUnit::Day))
            .push("o3", QuotaDescriptor::every(100, 1, PeriodUnit::Week))
            .normalized();
        let patterns: Vec<_> = table.entries().iter().map(|e| e.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["o4-mini-high", "o3"]);
    }

    #[test]
    fn test_known_plans_have_limits() {
        assert!(!limits_for(&PlanId::Free).is_empty());
        assert!(!limits_for(&PlanId::Plus).is_empty());
    }

    #[test]
    fn test_unknown_plan_is_empty() {
        let table = limits_for(&PlanId::Other("team".to_string()));
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_plus_o3_is_weekly() {
        let table = limits_for(&PlanId::Plus);
        let o3 = table.get("o3").unwrap();
        assert_eq!(o3.period_unit, PeriodUnit::Week);
        assert_eq!(o3.period_amount, 1);
    }

    #[test]
    fn test_free_gpt_4o_mini_is_unlimited() {
        let table = limits_for(&PlanId::Free);
        assert_eq!(
            table.get("gpt-4o-mini").unwrap().period_unit,
            PeriodUnit::Unlimited
        );
    }

    #[test]
    fn test_longer_patterns_precede_prefixes() {
        for table in [limits_for(&PlanId::Free), limits_for(&PlanId::Plus)] {
            let patterns: Vec<&str> = table.entries().iter().map(|e| e.pattern.as_str()).collect();
            for (i, shorter) in patterns.iter().enumerate() {
                for longer in &patterns[i + 1..] {
                    assert!(
                        !longer.contains(shorter),
                        "{} is listed after its prefix {}",
                        longer,
                        shorter
                    );
                }
            }
        }
    }

    #[test]
    fn test_limit_table_json_shape() {
        let json = r#"[
            {"pattern": "o3", "count": 50, "period_amount": 1, "period_unit": "week", "display_limit": "50 / week"},
            {"pattern": "gpt-4o", "count": 0, "period_amount": 0, "period_unit": "unlimited", "display_limit": "Unlimited"}
        ]"#;
        let table: LimitTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.entries()[0].pattern, "o3");
        assert_eq!(table.get("o3").unwrap().count, 50);
    }
}
