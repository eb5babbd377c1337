//! Model name matching
//!
//! Model names come from page text ("ChatGPT o3", "GPT-4o", "o4-mini-high")
//! and rarely match a table pattern verbatim.

use super::plans::LimitTable;
use super::types::QuotaDescriptor;

/// Resolve a raw model name to its descriptor
///
/// Tries, in order: exact match, exact lower-case match, then the first
/// pattern (in table order) that contains or is contained in the lower-case
/// name. Substring matches therefore depend on table order; see
/// [`super::plans`] for how the built-in tables are ordered.
pub fn resolve<'a>(raw_model: &str, table: &'a LimitTable) -> Option<&'a QuotaDescriptor> {
    let raw = raw_model.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(descriptor) = table.get(raw) {
        return Some(descriptor);
    }

    let lower = raw.to_lowercase();
    if let Some(descriptor) = table.get(&lower) {
        return Some(descriptor);
    }

    table
        .entries()
        .iter()
        .find(|entry| lower.contains(&entry.pattern) || entry.pattern.contains(&lower))
        .map(|entry| &entry.descriptor)
}
