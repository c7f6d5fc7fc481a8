mod common;

use std::time::Duration;

use evm_source::{
    error::DataSourceError,
    model::{DataRequest, LogRequest},
};
use evm_source_common::HotState;
use futures::StreamExt;
use serde_json::Value;

use crate::common::{heights, pointer, range_request, test_options, MockRpc};

fn hex_height(value: &Value) -> u64 {
    u64::from_str_radix(value.as_str().unwrap().trim_start_matches("0x"), 16).unwrap()
}

fn logs_request() -> DataRequest {
    DataRequest {
        include_all_blocks: true,
        logs: vec![LogRequest::default()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_reorg_replaces_unfinalized_blocks() {
    let rpc = MockRpc::linear(10, 1);
    rpc.extend(1, 11, 11, 1);

    let state = HotState {
        finalized: pointer(5, 0),
        unfinalized: (6..=10)
            .map(|height| pointer(height, 0))
            .chain([pointer(11, 1)])
            .collect(),
    };

    rpc.extend(2, 11, 12, 1);

    let source = rpc.data_source(test_options(5));
    let mut updates = Box::pin(source.hot_blocks(range_request(0, None, logs_request()), state));

    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), vec![11, 12]);
    assert_eq!(update.blocks[0].header.hash, common::block_hash(11, 2));
    assert_eq!(update.blocks[0].logs.len(), 1);
    assert_eq!(update.base_head, pointer(12, 2));
    assert_eq!(update.finalized_head, pointer(7, 0));

    let next = tokio::time::timeout(Duration::from_millis(100), updates.next()).await;
    assert!(next.is_err());
}

#[tokio::test]
async fn test_hot_step_is_retried_on_inconsistency() {
    let rpc = MockRpc::linear(10, 1);
    let state = HotState {
        finalized: pointer(5, 0),
        unfinalized: (6..=10).map(|height| pointer(height, 0)).collect(),
    };

    rpc.extend(0, 11, 12, 1);
    rpc.with_faults(|faults| faults.drop_logs = 2);

    let source = rpc.data_source(test_options(5));
    let mut updates = Box::pin(source.hot_blocks(range_request(0, None, logs_request()), state));

    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), vec![11, 12]);
    assert_eq!(update.base_head, pointer(12, 0));
    assert_eq!(rpc.calls("eth_getLogs").len(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_are_fatal() {
    let rpc = MockRpc::linear(10, 1);
    let state = HotState {
        finalized: pointer(5, 0),
        unfinalized: (6..=10).map(|height| pointer(height, 0)).collect(),
    };

    rpc.extend(0, 11, 12, 1);
    rpc.with_faults(|faults| faults.drop_logs = 10);

    let source = rpc.data_source(test_options(5));
    let mut updates = Box::pin(source.hot_blocks(range_request(0, None, logs_request()), state));

    let err = updates.next().await.unwrap().unwrap_err();
    assert_eq!(err.current_context(), &DataSourceError::Fatal);
    // First attempt plus three retries.
    assert_eq!(rpc.calls("eth_getLogs").len(), 4);
}

#[tokio::test]
async fn test_hot_stream_follows_new_heads() {
    let rpc = MockRpc::linear(10, 0);
    let state = HotState {
        finalized: pointer(8, 0),
        unfinalized: vec![pointer(9, 0), pointer(10, 0)],
    };

    let source = rpc.data_source(test_options(2));
    let mut updates = Box::pin(source.hot_blocks(range_request(0, None, logs_request()), state));

    rpc.extend(0, 11, 11, 0);
    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), vec![11]);
    assert_eq!(update.finalized_head, pointer(9, 0));

    rpc.extend(0, 12, 13, 0);
    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), vec![12, 13]);
    assert_eq!(update.base_head, pointer(13, 0));
    assert_eq!(update.finalized_head, pointer(11, 0));
}

#[tokio::test]
async fn test_hot_stream_ends_after_last_request() {
    let rpc = MockRpc::linear(20, 1);
    let state = HotState {
        finalized: pointer(5, 0),
        unfinalized: (6..=10).map(|height| pointer(height, 0)).collect(),
    };

    let source = rpc.data_source(test_options(5));
    let mut updates = Box::pin(source.hot_blocks(range_request(0, 12, logs_request()), state));

    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), (11..=20).collect::<Vec<_>>());
    assert_eq!(update.base_head, pointer(20, 0));
    assert_eq!(update.finalized_head, pointer(15, 0));
    // Blocks after the last request carry no data.
    assert_eq!(update.blocks[0].logs.len(), 1);
    assert!(update.blocks[4].logs.is_empty());

    let next = tokio::time::timeout(Duration::from_millis(100), updates.next())
        .await
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_missing_block_is_retried() {
    let rpc = MockRpc::linear(10, 1);
    let state = HotState {
        finalized: pointer(5, 0),
        unfinalized: (6..=10).map(|height| pointer(height, 0)).collect(),
    };

    rpc.extend(0, 11, 12, 1);
    rpc.with_faults(|faults| faults.hide_blocks = 1);

    let source = rpc.data_source(test_options(5));
    let mut updates = Box::pin(source.hot_blocks(range_request(0, None, logs_request()), state));

    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), vec![11, 12]);
    assert_eq!(update.base_head, pointer(12, 0));
    // Both blocks are fetched again after the first one went missing.
    assert_eq!(rpc.calls("eth_getBlockByNumber").len(), 4);
}

#[tokio::test]
async fn test_large_gaps_are_processed_in_chunks() {
    let rpc = MockRpc::linear(10, 1);
    let state = HotState {
        finalized: pointer(5, 0),
        unfinalized: (6..=10).map(|height| pointer(height, 0)).collect(),
    };

    rpc.extend(0, 11, 20, 1);

    let options = test_options(5).with_hot_chunk_size(4);
    let source = rpc.data_source(options);
    let mut updates = Box::pin(source.hot_blocks(range_request(0, None, logs_request()), state));

    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), (11..=20).collect::<Vec<_>>());
    assert!(update
        .blocks
        .iter()
        .all(|block| block.logs.len() == (block.header.number % 2) as usize));

    let mut ranges = rpc
        .calls("eth_getLogs")
        .iter()
        .map(|call| {
            let filter = &call.params[0];
            (
                hex_height(&filter["fromBlock"]),
                hex_height(&filter["toBlock"]),
            )
        })
        .collect::<Vec<_>>();
    ranges.sort();
    assert_eq!(ranges, vec![(11, 14), (15, 18), (19, 20)]);
}

#[tokio::test]
async fn test_long_gap_is_navigated_without_hash_lookups() {
    let rpc = MockRpc::linear(210, 0);
    let state = HotState {
        finalized: pointer(5, 0),
        unfinalized: (6..=10).map(|height| pointer(height, 0)).collect(),
    };

    let source = rpc.data_source(test_options(5));
    let mut updates = Box::pin(source.hot_blocks(range_request(0, None, logs_request()), state));

    let update = updates.next().await.unwrap().unwrap();
    assert_eq!(heights(&update.blocks), (11..=210).collect::<Vec<_>>());
    assert_eq!(update.base_head, pointer(210, 0));
    assert!(rpc.calls("eth_getBlockByHash").is_empty());
    assert_eq!(rpc.calls("eth_getBlockByNumber").len(), 200);
}
