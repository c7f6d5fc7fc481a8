//! Item filters applied to node blocks after mapping.
//!
//! The archive gateway filters items itself, the node returns everything in the block so the
//! same selection is applied here. Blocks are never dropped, only their items.
mod log;
mod state_diff;
mod trace;
mod transaction;

use crate::model::{CanonicalBlock, DataRequest};

/// A request that selects items of type `T`.
pub trait ItemFilter<T> {
    fn matches(&self, item: &T) -> bool;
}

/// Keeps the items matched by at least one of `filters`.
fn retain_matching<T, F: ItemFilter<T>>(items: &mut Vec<T>, filters: &[F]) {
    items.retain(|item| filters.iter().any(|f| f.matches(item)));
}

fn matches_any<T: PartialEq>(values: &[T], value: Option<&T>) -> bool {
    if values.is_empty() {
        return true;
    }
    match value {
        None => false,
        Some(value) => values.contains(value),
    }
}

/// Removes the items that are not selected by `request`.
pub fn apply_item_filters(block: &mut CanonicalBlock, request: &DataRequest) {
    retain_matching(&mut block.transactions, &request.transactions);
    retain_matching(&mut block.logs, &request.logs);
    retain_matching(&mut block.traces, &request.traces);
    retain_matching(&mut block.state_diffs, &request.state_diffs);
}
