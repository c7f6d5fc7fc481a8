use crate::model::{Log, LogRequest};

use super::{matches_any, ItemFilter};

impl ItemFilter<Log> for LogRequest {
    fn matches(&self, log: &Log) -> bool {
        let topics = log.topics.as_deref().unwrap_or_default();

        matches_any(&self.address, log.address.as_ref())
            && matches_any(&self.topic0, topics.first())
            && matches_any(&self.topic1, topics.get(1))
            && matches_any(&self.topic2, topics.get(2))
            && matches_any(&self.topic3, topics.get(3))
    }
}
