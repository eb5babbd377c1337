//! Status command
//!
//! Shows counts, limits and windows for tracked models.

use anyhow::Result;
use chatquota_core::{TrackerConfig, UsageView};
use serde::Serialize;
use tabled::Tabled;

use super::{format_instant, Context};
use crate::output::{print_info, print_output, print_single};

/// Usage row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct UsageRow {
    #[tabled(rename = "Model")]
    pub model: String,
    #[tabled(rename = "Used")]
    pub used: String,
    #[tabled(rename = "Limit")]
    pub limit: String,
    #[tabled(rename = "Left")]
    pub remaining: String,
    #[tabled(rename = "Window Start")]
    pub window_start: String,
    #[tabled(rename = "Resets")]
    pub resets: String,
    #[tabled(rename = "Level")]
    pub level: String,
}

impl UsageRow {
    /// Row for `view`, levelled against the configured thresholds
    pub fn new(view: &UsageView, config: &TrackerConfig) -> Self {
        let record = view.record;
        Self {
            model: view.model.clone(),
            used: record.map_or_else(|| "?".to_string(), |r| r.count.to_string()),
            limit: view
                .descriptor
                .as_ref()
                .map_or_else(|| "untracked".to_string(), |d| d.display_limit.clone()),
            remaining: view
                .remaining()
                .map_or_else(|| "-".to_string(), |n| n.to_string()),
            window_start: format_instant(record.and_then(|r| r.window_start)),
            resets: format_instant(record.and_then(|r| r.window_end)),
            level: if view.is_unknown() {
                "unknown".to_string()
            } else {
                config.alert_level(view).to_string()
            },
        }
    }
}

pub async fn execute(ctx: &Context, model: Option<String>) -> Result<()> {
    match model {
        Some(model) => {
            let view = ctx.tracker.get_usage(&model).await?;
            print_single(&UsageRow::new(&view, ctx.tracker.config()), ctx.format)?;
        }
        None => {
            print_info(&format!("Plan: {}", ctx.tracker.plan()), ctx.quiet);
            let rows: Vec<UsageRow> = ctx
                .tracker
                .usage_overview()
                .await?
                .iter()
                .map(|view| UsageRow::new(view, ctx.tracker.config()))
                .collect();
            print_output(&rows, ctx.format)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatquota_core::{PeriodUnit, QuotaDescriptor, UsageRecord};

    #[test]
    fn test_row_for_bounded_model() {
        let view = UsageView::new(
            "o3",
            UsageRecord::raw(97),
            Some(QuotaDescriptor::every(100, 1, PeriodUnit::Week)),
        );
        let row = UsageRow::new(&view, &TrackerConfig::default());
        assert_eq!(row.used, "97");
        assert_eq!(row.limit, "100 / week");
        assert_eq!(row.remaining, "3");
        assert_eq!(row.resets, "-");
        assert_eq!(row.level, "critical");
    }

    #[test]
    fn test_row_for_untracked_and_unknown() {
        let config = TrackerConfig::default();
        let untracked = UsageRow::new(&UsageView::new("mystery", UsageRecord::raw(4), None), &config);
        assert_eq!(untracked.limit, "untracked");
        assert_eq!(untracked.remaining, "-");
        assert_eq!(untracked.level, "normal");

        let unknown = UsageRow::new(&UsageView::unknown("o3"), &config);
        assert_eq!(unknown.used, "?");
        assert_eq!(unknown.level, "unknown");
    }
}
