use std::{future::Future, sync::Arc, time::Duration};

use async_stream::try_stream;
use async_trait::async_trait;
use error_stack::{Report, ResultExt};
use evm_source_common::{
    height::{HeightProvider, PollingHeightTracker},
    ingest::archive_ingest,
    source::BatchStream,
    Batch, DataSource, DataSplit, Hash, RangeRequest, RequestsTracker,
};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{DataSourceError, Result},
    model::{CanonicalBlock, DataRequest},
    rpc::navigator::to_hash,
};

use super::{
    client::{ArchiveClientError, ArchiveHttpClient},
    gateway::{GatewayBlock, GatewayQuery},
    mapping::map_gateway_block,
};

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// How often to poll the gateway height while waiting for new blocks.
    pub poll_interval: Duration,
    /// Pauses between retries of a failed query. The last value is repeated forever.
    pub retry_schedule: Vec<Duration>,
    /// Timeout of a single gateway request.
    pub timeout: Duration,
}

/// Data source backed by an archive gateway.
#[derive(Clone)]
pub struct ArchiveDataSource {
    inner: Arc<ArchiveDataSourceInner>,
}

struct ArchiveDataSourceInner {
    client: ArchiveHttpClient,
    options: ArchiveOptions,
}

/// Height of the last block indexed by the gateway.
#[derive(Clone)]
pub struct ArchiveHeight {
    source: ArchiveDataSource,
}

impl ArchiveDataSource {
    pub fn new(url: Url, options: ArchiveOptions) -> Result<Self> {
        let client = ArchiveHttpClient::new(url, options.timeout)
            .change_context(DataSourceError::Configuration)?;

        let inner = ArchiveDataSourceInner { client, options };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.inner.options
    }

    pub async fn get_height(&self) -> Result<u64> {
        let text = self
            .inner
            .client
            .get_text("height")
            .await
            .change_context(DataSourceError::Archive)?;

        text.trim()
            .parse::<u64>()
            .change_context(DataSourceError::Protocol)
            .attach_printable_lazy(|| format!("invalid gateway height: {text}"))
    }

    /// Runs `query` against the worker serving its first block.
    ///
    /// Retryable failures are retried following the retry schedule, without limit.
    pub async fn query(&self, query: &GatewayQuery) -> Result<Vec<GatewayBlock>> {
        let schedule = &self.inner.options.retry_schedule;
        let mut attempt = 0;

        loop {
            let err = match self.query_worker(query).await {
                Ok(blocks) => return Ok(blocks),
                Err(err) => err,
            };

            if !err.current_context().is_retryable() {
                return Err(err)
                    .change_context(DataSourceError::Archive)
                    .attach_printable_lazy(|| format!("query: {}", query_json(query)));
            }

            let pause = schedule
                .get(attempt)
                .or_else(|| schedule.last())
                .copied()
                .unwrap_or_default();
            attempt += 1;

            warn!(
                attempt,
                ?pause,
                from = query.from_block,
                to = query.to_block,
                error = %err.current_context(),
                "archive query failed, retrying"
            );
            tokio::time::sleep(pause).await;
        }
    }

    async fn query_worker(
        &self,
        query: &GatewayQuery,
    ) -> error_stack::Result<Vec<GatewayBlock>, ArchiveClientError> {
        let worker = self
            .inner
            .client
            .get_text(&format!("{}/worker", query.from_block))
            .await?;
        let worker = worker.trim();

        debug!(%worker, from = query.from_block, to = query.to_block, "querying archive worker");

        self.inner.client.post_json(worker, query).await
    }

    async fn query_split(&self, split: DataSplit<DataRequest>) -> Result<Vec<CanonicalBlock>> {
        let query = GatewayQuery::new(split.range, &split.request);
        let blocks = self.query(&query).await?;

        Ok(blocks
            .into_iter()
            .map(|block| map_gateway_block(block, &split.request.fields))
            .collect())
    }

    /// Streams finalized batches from the gateway.
    pub fn finalized_blocks(
        &self,
        requests: Vec<RangeRequest<DataRequest>>,
        stop_on_head: bool,
    ) -> impl Stream<Item = Result<Batch<CanonicalBlock>>> + Send + 'static {
        let source = self.clone();

        try_stream! {
            let requests = RequestsTracker::new(requests)
                .change_context(DataSourceError::Configuration)
                .attach_printable("invalid block requests")?
                .into_requests();

            info!(
                requests = requests.len(),
                gateway = %source.inner.client.base_url(),
                "streaming finalized blocks from archive"
            );

            let tracker = PollingHeightTracker::new(
                ArchiveHeight { source: source.clone() },
                source.inner.options.poll_interval,
            );

            let querier = source.clone();
            let query = move |split: DataSplit<DataRequest>| {
                let source = querier.clone();
                async move { source.query_split(split).await }
            };

            let mut batches = Box::pin(archive_ingest(tracker, requests, query, stop_on_head));

            while let Some(batch) = batches.next().await {
                yield batch.change_context(DataSourceError::Archive)?;
            }
        }
    }
}

fn query_json(query: &GatewayQuery) -> String {
    serde_json::to_string(query).unwrap_or_else(|err| format!("<{err}>"))
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            retry_schedule: vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
            ],
            timeout: Duration::from_secs(60),
        }
    }
}

impl ArchiveOptions {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry_schedule(mut self, retry_schedule: Vec<Duration>) -> Self {
        self.retry_schedule = retry_schedule;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl DataSource for ArchiveDataSource {
    type Block = CanonicalBlock;
    type Request = DataRequest;
    type Error = DataSourceError;

    fn get_finalized_height(&self) -> impl Future<Output = Result<u64>> + Send {
        self.get_height()
    }

    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<Hash>> + Send {
        async move {
            let blocks = self.query(&GatewayQuery::single_block(height)).await?;

            match blocks.as_slice() {
                [block] => Ok(to_hash(&block.header.hash)),
                _ => Err(Report::new(DataSourceError::Protocol))
                    .attach_printable("gateway didn't return exactly one block")
                    .attach_printable_lazy(|| format!("height: {height}"))
                    .attach_printable_lazy(|| format!("blocks: {}", blocks.len())),
            }
        }
    }

    fn get_finalized_blocks(
        &self,
        requests: Vec<RangeRequest<DataRequest>>,
        stop_on_head: bool,
    ) -> BatchStream<CanonicalBlock, DataSourceError> {
        Box::pin(self.finalized_blocks(requests, stop_on_head))
    }
}

#[async_trait]
impl HeightProvider for ArchiveHeight {
    type Error = DataSourceError;

    async fn get_height(&self) -> Result<u64> {
        self.source.get_height().await
    }
}
