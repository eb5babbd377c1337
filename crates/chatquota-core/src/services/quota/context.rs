//! Tracker context
//!
//! Everything reconciliation needs besides the stored records: the active
//! plan, its limit table and the model the UI currently shows. Owned by the
//! `UsageTracker` and passed explicitly; nothing here is global.

use super::matcher;
use super::plans::LimitTable;
use super::types::{PlanId, QuotaDescriptor};

#[derive(Debug, Clone, Default)]
pub struct QuotaContext {
    plan: PlanId,
    limits: LimitTable,
    current_model: Option<String>,
}

impl QuotaContext {
    pub fn new(plan: PlanId, limits: LimitTable) -> Self {
        Self {
            plan,
            limits,
            current_model: None,
        }
    }

    pub fn plan(&self) -> &PlanId {
        &self.plan
    }

    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    /// Switch plan and limit table together
    pub fn set_plan(&mut self, plan: PlanId, limits: LimitTable) {
        self.plan = plan;
        self.limits = limits;
    }

    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    pub fn set_current_model(&mut self, model: Option<String>) {
        self.current_model = model;
    }

    /// Descriptor for a raw model name under the active plan
    pub fn descriptor_for(&self, model: &str) -> Option<&QuotaDescriptor> {
        matcher::resolve(model, &self.limits)
    }
}

/// Storage key for a raw model name
///
/// Keys keep the caller's case; only surrounding whitespace is dropped.
/// Case-insensitive lookup is the matcher's job, not the key's.
pub fn model_key(raw: &str) -> String {
    raw.trim().to_string()
}
