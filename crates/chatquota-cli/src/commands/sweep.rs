//! Sweep commands
//!
//! One-shot reconciliation and the long-running watch loop.

use anyhow::Result;
use chatquota_core::{SweepKind, SweepReport, SweepScheduler};
use serde::Serialize;
use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;

use super::status::UsageRow;
use super::Context;
use crate::output::{print_info, print_output, print_single, print_success, print_warning};

/// Sweep report row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct SweepRow {
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Examined")]
    pub examined: usize,
    #[tabled(rename = "Changed")]
    pub changed: String,
    #[tabled(rename = "Failed")]
    pub failed: String,
}

impl From<&SweepReport> for SweepRow {
    fn from(report: &SweepReport) -> Self {
        let join = |models: &[String]| {
            if models.is_empty() {
                "-".to_string()
            } else {
                models.join(", ")
            }
        };
        Self {
            kind: report.kind.to_string(),
            examined: report.examined,
            changed: join(&report.changed),
            failed: join(&report.failed),
        }
    }
}

pub async fn execute(ctx: &Context, full: bool) -> Result<()> {
    let kind = if full { SweepKind::Full } else { SweepKind::Light };
    let report = ctx.tracker.sweep(kind).await?;
    print_single(&SweepRow::from(&report), ctx.format)
}

/// Run scheduled sweeps and print every changed record until Ctrl-C
pub async fn watch(ctx: Context) -> Result<()> {
    let Context {
        db,
        tracker,
        format,
        quiet,
    } = ctx;

    let config = tracker.config().clone();
    let sweep_config = config.sweep_config();
    let (handle, task) = tracker.spawn();
    let mut events = handle.subscribe();

    let mut scheduler = SweepScheduler::new(sweep_config);
    scheduler.start(handle.clone()).await;
    print_info(
        &format!(
            "Sweeping every {}s (full every {} ticks), Ctrl-C to stop",
            sweep_config.tick_secs, sweep_config.full_sweep_every
        ),
        quiet,
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("[cli:watch] Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(changed) => {
                    let mut rows = Vec::with_capacity(changed.models.len());
                    for model in &changed.models {
                        let view = handle.usage_or_unknown(model).await;
                        rows.push(UsageRow::new(&view, &config));
                    }
                    print_output(&rows, format)?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[cli:watch] Missed {} change notifications", skipped);
                    print_warning(&format!("Missed {} updates; run `chatquota status`", skipped));
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.stop().await;
    let status = scheduler.status().await;
    handle.shutdown().await;
    if let Err(e) = task.await {
        log::error!("[cli:watch] Tracker task panicked: {}", e);
    }
    db.pool.close().await;

    print_success(
        &format!("Stopped after {} sweeps", status.sweeps_run),
        quiet,
    );
    Ok(())
}
