//! Recording commands
//!
//! Feed banners, sent messages and manual corrections to the tracker.

use anyhow::{bail, Context as _, Result};
use chrono::DateTime;

use super::status::UsageRow;
use super::Context;
use crate::output::{print_info, print_single, print_success};

const MINUTE_MS: i64 = 60_000;

pub async fn banner(ctx: &Context, text: String, model: Option<String>) -> Result<()> {
    match ctx.tracker.banner_observed(&text, model.as_deref()).await? {
        Some(model) => {
            print_success(&format!("Applied banner to {}", model), ctx.quiet);
            let view = ctx.tracker.get_usage(&model).await?;
            print_single(&UsageRow::new(&view, ctx.tracker.config()), ctx.format)?;
        }
        None => print_info("No quota signal recognized", ctx.quiet),
    }
    Ok(())
}

pub async fn used(ctx: &Context, model: String, times: u32) -> Result<()> {
    let mut last = None;
    for _ in 0..times {
        last = ctx.tracker.api_call_completed(Some(&model)).await?;
    }

    match last {
        Some((key, _)) => {
            let view = ctx.tracker.get_usage(&key).await?;
            print_single(&UsageRow::new(&view, ctx.tracker.config()), ctx.format)?;
        }
        None => print_info("Nothing counted", ctx.quiet),
    }
    Ok(())
}

pub async fn manual_override(ctx: &Context, model: String, count: u32, until: String) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let until = parse_until(&until, now)?;

    let record = ctx.tracker.set_manual_override(&model, count, until).await?;
    print_success(
        &format!("{} set to {} until {}", model, record.count, super::format_instant(Some(until))),
        ctx.quiet,
    );
    let view = ctx.tracker.get_usage(&model).await?;
    print_single(&UsageRow::new(&view, ctx.tracker.config()), ctx.format)
}

pub async fn reset(ctx: &Context) -> Result<()> {
    let count = ctx.tracker.reset_all().await?;
    print_success(&format!("Reset {} counters", count), ctx.quiet);
    Ok(())
}

/// Parse a reset time: RFC 3339, or `+N` followed by `m`, `h` or `d`
fn parse_until(input: &str, now_ms: i64) -> Result<i64> {
    let input = input.trim();
    if let Some(relative) = input.strip_prefix('+') {
        let Some((split, unit)) = relative.char_indices().last() else {
            bail!("Invalid relative time '{}', expected e.g. +3h", input);
        };
        let amount: i64 = relative[..split]
            .parse()
            .with_context(|| format!("Invalid amount in '{}'", input))?;
        let minutes_per_unit = match unit {
            'm' => 1,
            'h' => 60,
            'd' => 60 * 24,
            _ => bail!("Invalid unit in '{}', use m, h or d", input),
        };
        return amount
            .checked_mul(minutes_per_unit * MINUTE_MS)
            .and_then(|offset| now_ms.checked_add(offset))
            .with_context(|| format!("Reset time '{}' is out of range", input));
    }

    let parsed = DateTime::parse_from_rfc3339(input)
        .with_context(|| format!("Invalid reset time '{}'", input))?;
    Ok(parsed.timestamp_millis())
}
