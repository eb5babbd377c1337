//! Plan commands
//!
//! Show or switch the subscription plan and list its limits.

use anyhow::Result;
use chatquota_core::services::quota::LimitEntry;
use chatquota_core::PlanId;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{print_output, print_single, print_success, print_warning};

#[derive(Subcommand)]
pub enum PlanAction {
    /// Show the active plan
    Show,

    /// Switch plan (free, plus, ...)
    Set {
        /// Plan id
        plan: String,
    },

    /// List model limits for a plan
    Limits {
        /// Plan id (defaults to the active plan)
        #[arg(long)]
        plan: Option<String>,
    },
}

/// Plan row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "Plan")]
    pub plan: String,
    #[tabled(rename = "Limited Models")]
    pub models: usize,
}

/// Limit row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct LimitRow {
    #[tabled(rename = "Pattern")]
    pub pattern: String,
    #[tabled(rename = "Limit")]
    pub limit: String,
    #[tabled(rename = "Period")]
    pub period: String,
}

impl From<&LimitEntry> for LimitRow {
    fn from(entry: &LimitEntry) -> Self {
        let d = &entry.descriptor;
        let period = if d.is_bounded() {
            format!("{} {}", d.period_amount, d.period_unit)
        } else {
            d.period_unit.to_string()
        };
        Self {
            pattern: entry.pattern.clone(),
            limit: d.display_limit.clone(),
            period,
        }
    }
}

pub async fn execute(ctx: &mut Context, action: PlanAction) -> Result<()> {
    match action {
        PlanAction::Show => {
            let row = PlanRow {
                plan: ctx.tracker.plan().to_string(),
                models: ctx.tracker.context().limits().len(),
            };
            print_single(&row, ctx.format)
        }
        PlanAction::Set { plan } => {
            let plan = PlanId::from(plan);
            if let PlanId::Other(name) = &plan {
                if !ctx.tracker.config().limit_overrides.contains_key(name.as_str()) {
                    print_warning(&format!("Plan '{}' has no limits; models will only be counted", name));
                }
            }
            ctx.tracker.set_plan(plan.clone()).await?;
            print_success(&format!("Plan set to {}", plan), ctx.quiet);
            Ok(())
        }
        PlanAction::Limits { plan } => {
            let plan = plan.map(PlanId::from).unwrap_or_else(|| ctx.tracker.plan().clone());
            let limits = ctx.tracker.config().limits_for(&plan);
            let rows: Vec<LimitRow> = limits.entries().iter().map(LimitRow::from).collect();
            print_output(&rows, ctx.format)
        }
    }
}
