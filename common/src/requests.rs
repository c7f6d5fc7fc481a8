use error_stack::{Result, ResultExt};

use crate::{
    core::HasHeight,
    range::{InvalidRangeError, RangeRequest},
};

/// Maps block heights to the request that applies to them.
///
/// Requests are sorted by height and must not overlap. Gaps between requests are allowed.
#[derive(Debug, Clone)]
pub struct RequestsTracker<R> {
    requests: Vec<RangeRequest<R>>,
}

/// A run of consecutive blocks that share the same request.
#[derive(Debug)]
pub struct RequestSplit<'a, R, B> {
    pub request: Option<&'a R>,
    pub blocks: Vec<B>,
}

impl<R> RequestsTracker<R> {
    pub fn new(mut requests: Vec<RangeRequest<R>>) -> Result<Self, InvalidRangeError> {
        requests.sort_by_key(|r| r.range.from);

        for request in requests.iter() {
            request.range.validate()?;
        }

        for pair in requests.windows(2) {
            if pair[0].range.end() >= pair[1].range.from {
                return Err(InvalidRangeError)
                    .attach_printable("requests overlap")
                    .attach_printable_lazy(|| format!("first: {}", pair[0].range))
                    .attach_printable_lazy(|| format!("second: {}", pair[1].range));
            }
        }

        Ok(Self { requests })
    }

    pub fn into_requests(self) -> Vec<RangeRequest<R>> {
        self.requests
    }

    pub fn get_request_at(&self, height: u64) -> Option<&RangeRequest<R>> {
        let index = self
            .requests
            .partition_point(|r| r.range.end() < height);
        self.requests
            .get(index)
            .filter(|r| r.range.contains(height))
    }

    /// Returns true if any request covers a height strictly above `height`.
    pub fn has_requests_after(&self, height: u64) -> bool {
        self.requests
            .last()
            .map(|r| r.range.end() > height)
            .unwrap_or(false)
    }

    /// Partitions an ascending run of blocks into maximal sub-runs that share the same
    /// applicable request.
    pub fn split_blocks<B: HasHeight>(&self, blocks: Vec<B>) -> Vec<RequestSplit<'_, R, B>> {
        let mut splits: Vec<RequestSplit<'_, R, B>> = Vec::new();
        let mut current_index: Option<Option<usize>> = None;

        for block in blocks {
            let height = block.height();
            let index = self
                .requests
                .iter()
                .position(|r| r.range.contains(height));

            match splits.last_mut() {
                Some(split) if current_index == Some(index) => split.blocks.push(block),
                _ => {
                    current_index = Some(index);
                    splits.push(RequestSplit {
                        request: index.map(|i| &self.requests[i].request),
                        blocks: vec![block],
                    });
                }
            }
        }

        splits
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        core::HasHeight,
        range::{BlockRange, RangeRequest},
    };

    use super::RequestsTracker;

    struct TestBlock(u64);

    impl HasHeight for TestBlock {
        fn height(&self) -> u64 {
            self.0
        }
    }

    fn tracker() -> RequestsTracker<&'static str> {
        RequestsTracker::new(vec![
            RangeRequest::new(BlockRange::new(20, None), "b"),
            RangeRequest::new(BlockRange::new(0, 9), "a"),
        ])
        .unwrap()
    }

    #[test]
    fn test_get_request_at() {
        let tracker = tracker();
        assert_eq!(tracker.get_request_at(0).unwrap().request, "a");
        assert_eq!(tracker.get_request_at(9).unwrap().request, "a");
        assert!(tracker.get_request_at(10).is_none());
        assert!(tracker.get_request_at(19).is_none());
        assert_eq!(tracker.get_request_at(20).unwrap().request, "b");
        assert_eq!(tracker.get_request_at(u64::MAX).unwrap().request, "b");
    }

    #[test]
    fn test_has_requests_after() {
        let tracker = RequestsTracker::new(vec![RangeRequest::new(BlockRange::new(0, 9), ())])
            .unwrap();
        assert!(tracker.has_requests_after(8));
        assert!(!tracker.has_requests_after(9));

        let open = super::tests::tracker();
        assert!(open.has_requests_after(1_000_000));
    }

    #[test]
    fn test_overlapping_requests_are_rejected() {
        let result = RequestsTracker::new(vec![
            RangeRequest::new(BlockRange::new(0, 10), ()),
            RangeRequest::new(BlockRange::new(10, 20), ()),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_split_blocks() {
        let tracker = tracker();
        let blocks = (7..=21).map(TestBlock).collect::<Vec<_>>();
        let splits = tracker.split_blocks(blocks);

        let summary = splits
            .iter()
            .map(|s| {
                (
                    s.request.copied(),
                    s.blocks.first().unwrap().0,
                    s.blocks.last().unwrap().0,
                )
            })
            .collect::<Vec<_>>();

        assert_eq!(
            summary,
            vec![(Some("a"), 7, 9), (None, 10, 19), (Some("b"), 20, 21)]
        );
    }
}
