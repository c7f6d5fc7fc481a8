use crate::model::{StateDiff, StateDiffRequest};

use super::{matches_any, ItemFilter};

impl ItemFilter<StateDiff> for StateDiffRequest {
    fn matches(&self, diff: &StateDiff) -> bool {
        matches_any(&self.address, Some(&diff.address)) && matches_any(&self.key, Some(&diff.key))
    }
}
