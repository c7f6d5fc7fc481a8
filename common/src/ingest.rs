use std::future::Future;

use async_stream::try_stream;
use error_stack::{Report, Result, ResultExt};
use futures::Stream;
use tracing::debug;

use crate::{
    core::HasHeight,
    height::{HeightProvider, PollingHeightTracker},
    range::{Batch, DataSplit, FiniteRange, RangeRequest},
};

#[derive(Debug)]
pub enum IngestError {
    /// Failed to fetch the chain height.
    Height,
    /// Failed to query blocks.
    Query,
    /// The query made no progress.
    EmptyResponse,
}

/// Sequentially queries splits covering `requests`.
///
/// Each query covers the remaining part of the current request up to the chain height. The
/// query can return fewer blocks than asked for: the next query starts after the last block
/// returned, so the query must return at least one block.
pub fn archive_ingest<P, R, B, Q, Fut, C>(
    mut tracker: PollingHeightTracker<P>,
    requests: Vec<RangeRequest<R>>,
    query: Q,
    stop_on_head: bool,
) -> impl Stream<Item = Result<Batch<B>, IngestError>>
where
    P: HeightProvider,
    R: Clone,
    B: HasHeight,
    Q: Fn(DataSplit<R>) -> Fut,
    Fut: Future<Output = Result<Vec<B>, C>>,
    C: error_stack::Context,
{
    try_stream! {
        let mut height = tracker
            .get_height()
            .await
            .change_context(IngestError::Height)?;

        'requests: for request in requests {
            let mut from = request.range.from;
            let end = request.range.end();

            while from <= end {
                if height < from {
                    if stop_on_head {
                        height = tracker.get_height().await.change_context(IngestError::Height)?;
                        if height < from {
                            debug!(height, from, "reached chain head");
                            break 'requests;
                        }
                    } else {
                        height = tracker.wait(from).await.change_context(IngestError::Height)?;
                    }
                }

                let split = DataSplit {
                    range: FiniteRange::new(from, end.min(height)),
                    request: request.request.clone(),
                };
                let range = split.range;

                let blocks = query(split)
                    .await
                    .change_context(IngestError::Query)
                    .attach_printable_lazy(|| format!("range: {range}"))?;

                let last_height = blocks
                    .last()
                    .map(HasHeight::height)
                    .filter(|last| *last >= from)
                    .ok_or_else(|| Report::new(IngestError::EmptyResponse))
                    .attach_printable_lazy(|| format!("range: {range}"))?;

                height = height.max(last_height);

                yield Batch::new(blocks, last_height == height);

                let Some(next) = last_height.checked_add(1) else {
                    break 'requests;
                };
                from = next;
            }
        }
    }
}

impl error_stack::Context for IngestError {}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Height => write!(f, "ingest error: failed to get chain height"),
            IngestError::Query => write!(f, "ingest error: failed to query blocks"),
            IngestError::EmptyResponse => write!(f, "ingest error: query returned no blocks"),
        }
    }
}
