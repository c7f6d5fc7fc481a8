use std::{future::Future, sync::Arc};

use alloy_primitives::B256;
use async_stream::try_stream;
use async_trait::async_trait;
use error_stack::{Report, ResultExt};
use evm_source_common::{
    concurrency::{concurrent_map, split_parallel_work},
    fork::{NavigationError, NavigatorMove, PendingChain},
    height::{height_updates, HeightProvider, PollingHeightTracker},
    source::{BatchStream, HotUpdateStream},
    stride::{generate_fetch_strides, Stride},
    Batch, DataSource, ForkNavigator, Hash, HotDataSource, HotState, NavigationTarget,
    RangeRequest, RequestsTracker,
};
use futures::{Stream, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    error::{DataSourceError, Result},
    model::{CanonicalBlock, DataRequest, RpcDataRequest},
};

use super::{
    enrich::{enrich_blocks, TracingCapabilities},
    mapping::map_raw_block,
    models::Block,
    navigator::{retry_on_inconsistency, to_hash, NodeForkSource},
    options::{RpcDataSourceOptions, TracingSplit},
    query::NodeClient,
    transport::RpcTransport,
};

/// Data source backed by a node JSON-RPC endpoint.
#[derive(Clone)]
pub struct RpcDataSource {
    inner: Arc<RpcDataSourceInner>,
}

struct RpcDataSourceInner {
    client: NodeClient,
    options: RpcDataSourceOptions,
    /// Whether the node is on the chain of the configured tracing split.
    split_probe: OnceCell<bool>,
}

/// Height of the node head.
#[derive(Clone)]
pub struct HeadHeight {
    client: NodeClient,
}

/// Height of the node head, minus the finality confirmation.
#[derive(Clone)]
pub struct FinalizedHeight {
    client: NodeClient,
    finality_confirmation: u64,
}

impl RpcDataSource {
    pub fn new(transport: Arc<dyn RpcTransport>, options: RpcDataSourceOptions) -> Self {
        let inner = RpcDataSourceInner {
            client: NodeClient::new(transport),
            options,
            split_probe: OnceCell::new(),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn client(&self) -> &NodeClient {
        &self.inner.client
    }

    pub fn options(&self) -> &RpcDataSourceOptions {
        &self.inner.options
    }

    fn finalized_height(&self) -> FinalizedHeight {
        FinalizedHeight {
            client: self.inner.client.clone(),
            finality_confirmation: self.inner.options.finality_confirmation,
        }
    }

    fn head_height(&self) -> HeadHeight {
        HeadHeight {
            client: self.inner.client.clone(),
        }
    }

    /// Enriches and maps blocks fetched for `request`.
    pub async fn process_blocks(
        &self,
        blocks: Vec<Block>,
        request: &RpcDataRequest,
    ) -> Result<Vec<CanonicalBlock>> {
        let capabilities = self
            .tracing_capabilities(request.traces || request.state_diffs)
            .await?;

        let blocks = enrich_blocks(&self.inner.client, &capabilities, request, blocks).await?;

        blocks
            .into_iter()
            .map(|block| map_raw_block(block, &request.request))
            .collect()
    }

    async fn tracing_capabilities(&self, needs_tracing: bool) -> Result<TracingCapabilities> {
        let options = &self.inner.options;

        let split = match options.tracing_split.as_ref() {
            Some(split) if needs_tracing => self.detect_split(split).await?,
            _ => None,
        };

        Ok(TracingCapabilities {
            use_trace_api: options.use_trace_api,
            use_debug_api_for_state_diffs: options.use_debug_api_for_state_diffs,
            split,
            allow_missing_replays: options.allow_missing_replays,
        })
    }

    /// Checks the node genesis hash once.
    async fn detect_split(&self, split: &TracingSplit) -> Result<Option<TracingSplit>> {
        let matches = self
            .inner
            .split_probe
            .get_or_try_init(|| async {
                let genesis = self
                    .inner
                    .client
                    .get_block_hash(0)
                    .await?
                    .ok_or(DataSourceError::Rpc)
                    .attach_printable("node doesn't return the genesis block")?;

                let matches = genesis == split.genesis_hash;
                if matches {
                    info!(
                        legacy_end = split.legacy_end,
                        debug_start = split.debug_start,
                        legacy_method = %split.legacy_method,
                        "tracing api changes at known height"
                    );
                }

                Ok::<_, Report<DataSourceError>>(matches)
            })
            .await?;

        Ok(matches.then(|| split.clone()))
    }

    /// Fetches, checks and enriches one finalized stride.
    async fn fetch_stride(
        &self,
        stride: Stride<RpcDataRequest>,
    ) -> Result<Batch<CanonicalBlock>> {
        let is_head = stride.is_head();
        let Stride { split, .. } = stride;
        let range = split.range;

        debug!(from = range.from, to = range.to, "fetching stride");

        let blocks = self
            .inner
            .client
            .get_stride(&range, split.request.transactions)
            .await
            .attach_printable_lazy(|| format!("range: {}..={}", range.from, range.to))?;

        let blocks = range
            .heights()
            .zip(blocks)
            .map(|(height, block)| {
                block
                    .ok_or(DataSourceError::Fatal)
                    .attach_printable("node doesn't have a finalized block")
                    .attach_printable_lazy(|| format!("height: {height}"))
            })
            .collect::<Result<Vec<_>>>()?;

        for pair in blocks.windows(2) {
            if pair[1].parent_hash != pair[0].hash {
                return Err(Report::new(DataSourceError::Fatal))
                    .attach_printable("finalized blocks don't link to each other")
                    .attach_printable("perhaps finality confirmation was not large enough")
                    .attach_printable_lazy(|| format!("block: {}", pair[0].name()))
                    .attach_printable_lazy(|| format!("next block: {}", pair[1].name()));
            }
        }

        let blocks = self.process_blocks(blocks, &split.request).await?;

        Ok(Batch::new(blocks, is_head))
    }

    /// Moves the navigator towards `target` and processes the new blocks.
    ///
    /// The navigator is not modified.
    async fn hot_step(
        &self,
        navigator: &ForkNavigator,
        requests: &RequestsTracker<RpcDataRequest>,
        target: NavigationTarget,
    ) -> Result<(PendingChain, Vec<CanonicalBlock>)> {
        let fork_source = NodeForkSource::new(&self.inner.client, requests);

        let NavigatorMove { blocks, chain } = navigator
            .plan_move(target, &fork_source)
            .await
            .map_err(|err| {
                // Blocks fetched by height and by hash may come from different branches.
                let is_linkage = matches!(err.current_context(), NavigationError::Linkage);
                let err = err.change_context(DataSourceError::Navigation);
                if is_linkage {
                    err.change_context(DataSourceError::Consistency)
                } else {
                    err
                }
            })?;

        debug!(
            best = target.best,
            finalized = target.finalized,
            blocks = blocks.len(),
            "hot step"
        );

        let default_request = RpcDataRequest::default();
        let chunk_size = self.inner.options.hot_chunk_size;
        let concurrency = self.inner.options.stride_concurrency;

        let mut processed = Vec::with_capacity(blocks.len());
        for split in requests.split_blocks(blocks) {
            let request = split.request.unwrap_or(&default_request);
            let blocks = split_parallel_work(split.blocks, chunk_size, concurrency, |chunk| {
                self.process_blocks(chunk, request)
            })
            .await?;
            processed.extend(blocks);
        }

        Ok((chain, processed))
    }

    /// Streams finalized batches.
    pub fn finalized_blocks(
        &self,
        requests: Vec<RangeRequest<DataRequest>>,
        stop_on_head: bool,
    ) -> impl Stream<Item = Result<Batch<CanonicalBlock>>> + Send + 'static {
        let source = self.clone();

        try_stream! {
            let requests = rpc_requests(requests)?.into_requests();
            let options = &source.inner.options;

            info!(
                requests = requests.len(),
                stride_size = options.stride_size,
                stride_concurrency = options.stride_concurrency,
                "streaming finalized blocks from node"
            );

            let tracker = PollingHeightTracker::new(source.finalized_height(), options.poll_interval);
            let strides = generate_fetch_strides(tracker, requests, options.stride_size, stop_on_head);

            let fetcher = source.clone();
            let mut batches = Box::pin(concurrent_map(strides, options.stride_concurrency, move |stride| {
                let source = fetcher.clone();
                async move { source.fetch_stride(stride).await }
            }));

            while let Some(batch) = batches.next().await {
                yield batch?;
            }
        }
    }

    /// Streams updates of the unfinalized chain, starting from `state`.
    pub fn hot_blocks(
        &self,
        requests: Vec<RangeRequest<DataRequest>>,
        state: HotState,
    ) -> impl Stream<Item = Result<HotUpdate>> + Send + 'static {
        let source = self.clone();

        try_stream! {
            let requests = rpc_requests(requests)?;
            let mut navigator = ForkNavigator::new(state)
                .change_context(DataSourceError::Configuration)
                .attach_printable("invalid hot state")?;

            let options = &source.inner.options;

            info!(
                head = %navigator.base_head(),
                finalized = %navigator.finalized_head(),
                "following node head"
            );

            let tracker = PollingHeightTracker::new(source.head_height(), options.poll_interval);
            let mut heights = Box::pin(height_updates(tracker, navigator.current_height() + 1));

            while requests.has_requests_after(navigator.finalized_head().height) {
                let Some(height) = heights.next().await else {
                    break;
                };
                let height = height?;

                let target = NavigationTarget {
                    best: height,
                    finalized: height.saturating_sub(options.finality_confirmation),
                };

                let (chain, blocks) = retry_on_inconsistency(
                    options.consistency_retries,
                    options.consistency_retry_pause,
                    || source.hot_step(&navigator, &requests, target),
                )
                .await?;

                yield navigator.apply(chain, blocks);
            }

            info!(finalized = %navigator.finalized_head(), "no more requests after finalized head");
        }
    }
}

pub type HotUpdate = evm_source_common::HotUpdate<CanonicalBlock>;

fn rpc_requests(
    requests: Vec<RangeRequest<DataRequest>>,
) -> Result<RequestsTracker<RpcDataRequest>> {
    let requests = requests
        .into_iter()
        .map(|request| RangeRequest::new(request.range, RpcDataRequest::new(request.request)))
        .collect();

    RequestsTracker::new(requests)
        .change_context(DataSourceError::Configuration)
        .attach_printable("invalid block requests")
}

impl DataSource for RpcDataSource {
    type Block = CanonicalBlock;
    type Request = DataRequest;
    type Error = DataSourceError;

    fn get_finalized_height(&self) -> impl Future<Output = Result<u64>> + Send {
        let provider = self.finalized_height();
        async move { provider.get_height().await }
    }

    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<Hash>> + Send {
        let client = self.inner.client.clone();
        async move {
            let hash: B256 = client
                .get_block_hash(height)
                .await?
                .ok_or(DataSourceError::Rpc)
                .attach_printable("block not found")
                .attach_printable_lazy(|| format!("height: {height}"))?;
            Ok(to_hash(&hash))
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

impl HotDataSource for RpcDataSource {
    fn get_hot_blocks(
        &self,
        requests: Vec<RangeRequest<DataRequest>>,
        state: HotState,
    ) -> HotUpdateStream<CanonicalBlock, DataSourceError> {
        Box::pin(self.hot_blocks(requests, state))
    }
}

#[async_trait]
impl HeightProvider for HeadHeight {
    type Error = DataSourceError;

    async fn get_height(&self) -> Result<u64> {
        self.client.get_head_height().await
    }
}

#[async_trait]
impl HeightProvider for FinalizedHeight {
    type Error = DataSourceError;

    async fn get_height(&self) -> Result<u64> {
        let head = self.client.get_head_height().await?;
        Ok(head.saturating_sub(self.finality_confirmation))
    }
}
