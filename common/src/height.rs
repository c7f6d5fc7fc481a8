use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use error_stack::Result;
use futures::Stream;

/// Source of the current chain height.
#[async_trait]
pub trait HeightProvider: Send + Sync {
    type Error: error_stack::Context;

    /// Returns the most recent height.
    async fn get_height(&self) -> Result<u64, Self::Error>;
}

/// Caches the last height returned by a [HeightProvider] and polls it at a fixed interval.
pub struct PollingHeightTracker<P: HeightProvider> {
    provider: P,
    poll_interval: Duration,
    last_height: Option<u64>,
}

impl<P: HeightProvider> PollingHeightTracker<P> {
    pub fn new(provider: P, poll_interval: Duration) -> Self {
        Self {
            provider,
            poll_interval,
            last_height: None,
        }
    }

    /// Refreshes the height from the provider.
    pub async fn get_height(&mut self) -> Result<u64, P::Error> {
        let height = self.provider.get_height().await?;
        self.last_height = Some(height);
        Ok(height)
    }

    /// Polls the provider until the height is at least `height`.
    pub async fn wait(&mut self, height: u64) -> Result<u64, P::Error> {
        if let Some(last_height) = self.last_height {
            if last_height >= height {
                return Ok(last_height);
            }
        }

        loop {
            let current = self.get_height().await?;
            if current >= height {
                return Ok(current);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Returns a stream of height changes.
///
/// The stream starts at the first height at or above `from` and then yields every time the
/// height increases. Heights are never repeated.
pub fn height_updates<P>(
    mut tracker: PollingHeightTracker<P>,
    from: u64,
) -> impl Stream<Item = Result<u64, P::Error>>
where
    P: HeightProvider,
{
    try_stream! {
        let mut next = from;
        loop {
            let height = tracker.wait(next).await?;
            yield height;
            next = height + 1;
        }
    }
}
