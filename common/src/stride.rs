use async_stream::try_stream;
use error_stack::Result;
use futures::Stream;
use tracing::debug;

use crate::{
    height::{HeightProvider, PollingHeightTracker},
    range::{DataSplit, FiniteRange, RangeRequest},
};

/// A split to fetch, together with the chain height observed when it was generated.
#[derive(Debug, Clone, PartialEq)]
pub struct Stride<R> {
    pub split: DataSplit<R>,
    pub chain_height: u64,
}

impl<R> Stride<R> {
    /// True if the stride ends at the observed chain height.
    pub fn is_head(&self) -> bool {
        self.split.range.to == self.chain_height
    }
}

/// Generates strides of at most `stride_size` blocks covering `requests`.
///
/// Strides never go beyond the height returned by the tracker. If `stop_on_head` is true the
/// stream ends once the requests are covered up to the current height, otherwise it waits
/// for the chain to grow until all requests are covered.
pub fn generate_fetch_strides<P, R>(
    mut tracker: PollingHeightTracker<P>,
    requests: Vec<RangeRequest<R>>,
    stride_size: u64,
    stop_on_head: bool,
) -> impl Stream<Item = Result<Stride<R>, P::Error>>
where
    P: HeightProvider,
    R: Clone,
{
    let stride_size = stride_size.max(1);

    try_stream! {
        let mut height = tracker.get_height().await?;

        'requests: for request in requests {
            let mut from = request.range.from;
            let end = request.range.end();

            while from <= end {
                if height < from {
                    if stop_on_head {
                        height = tracker.get_height().await?;
                        if height < from {
                            debug!(height, from, "reached chain head");
                            break 'requests;
                        }
                    } else {
                        height = tracker.wait(from).await?;
                    }
                }

                let to = end
                    .min(from.saturating_add(stride_size - 1))
                    .min(height);

                yield Stride {
                    split: DataSplit {
                        range: FiniteRange::new(from, to),
                        request: request.request.clone(),
                    },
                    chain_height: height,
                };

                let Some(next) = to.checked_add(1) else {
                    break 'requests;
                };
                from = next;
            }
        }
    }
}
