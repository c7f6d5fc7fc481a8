mod common;

use alloy_primitives::B256;
use evm_source::{
    model::{DataRequest, StateDiffRequest, TraceRequest},
    rpc::TracingSplit,
};
use futures::TryStreamExt;
use serde_json::Value;

use crate::common::{block_hash, heights, range_request, test_options, MockRpc};

fn traces_request() -> DataRequest {
    DataRequest {
        include_all_blocks: true,
        traces: vec![TraceRequest::default()],
        ..Default::default()
    }
}

fn test_split(genesis_hash: B256) -> TracingSplit {
    TracingSplit {
        genesis_hash,
        legacy_method: "arbtrace_replayBlockTransactions".to_string(),
        legacy_end: 4,
        debug_start: 5,
    }
}

fn call_height(params: &Value) -> u64 {
    let height = params[0].as_str().unwrap().trim_start_matches("0x");
    u64::from_str_radix(height, 16).unwrap()
}

fn call_block_hash(params: &Value) -> B256 {
    serde_json::from_value(params[0].clone()).unwrap()
}

#[tokio::test]
async fn test_tracing_api_switches_at_cutover() {
    let rpc = MockRpc::linear(20, 2);
    let options = test_options(0).with_tracing_split(Some(test_split(block_hash(0, 0))));
    let source = rpc.data_source(options);

    let blocks = source
        .finalized_blocks(range_request(3, 7, traces_request()), true)
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .into_iter()
        .flat_map(|batch| batch.blocks)
        .collect::<Vec<_>>();

    assert_eq!(heights(&blocks), (3..=7).collect::<Vec<_>>());

    let legacy = rpc
        .calls("arbtrace_replayBlockTransactions")
        .iter()
        .map(|call| call_height(&call.params))
        .collect::<Vec<_>>();
    assert_eq!(legacy, vec![3, 4]);

    let mut debug = rpc
        .calls("debug_traceBlockByHash")
        .iter()
        .map(|call| call_block_hash(&call.params))
        .collect::<Vec<_>>();
    debug.sort();
    assert_eq!(
        debug,
        vec![block_hash(5, 0), block_hash(6, 0), block_hash(7, 0)]
    );

    assert!(rpc.calls("trace_replayBlockTransactions").is_empty());

    for block in blocks.iter() {
        let expected = if block.header.number % 2 == 1 { 2 } else { 0 };
        assert_eq!(block.traces.len(), expected);
        for trace in block.traces.iter() {
            assert!(trace.trace_address.is_empty());
        }
    }
}

#[tokio::test]
async fn test_other_chains_use_the_configured_api() {
    let rpc = MockRpc::linear(20, 2);
    let options = test_options(0)
        .with_tracing_split(Some(test_split(B256::repeat_byte(0x42))))
        .with_trace_api(true);
    let source = rpc.data_source(options);

    let blocks = source
        .finalized_blocks(range_request(3, 7, traces_request()), true)
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .into_iter()
        .flat_map(|batch| batch.blocks)
        .collect::<Vec<_>>();

    assert_eq!(heights(&blocks), (3..=7).collect::<Vec<_>>());
    assert!(rpc.calls("arbtrace_replayBlockTransactions").is_empty());
    assert!(rpc.calls("debug_traceBlockByHash").is_empty());
    assert_eq!(rpc.calls("trace_replayBlockTransactions").len(), 5);
    // The genesis block is probed once.
    let probes = rpc
        .calls("eth_getBlockByNumber")
        .iter()
        .filter(|call| call.params[0] == "0x0")
        .count();
    assert_eq!(probes, 1);
}

#[tokio::test]
async fn test_state_diffs_from_debug_api() {
    let rpc = MockRpc::linear(10, 1);
    let options = test_options(0).with_debug_api_for_state_diffs(true);
    let source = rpc.data_source(options);

    let request = DataRequest {
        include_all_blocks: true,
        state_diffs: vec![StateDiffRequest::default()],
        ..Default::default()
    };

    let blocks = source
        .finalized_blocks(range_request(1, 1, request), true)
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .into_iter()
        .flat_map(|batch| batch.blocks)
        .collect::<Vec<_>>();

    let block = &blocks[0];
    assert!(!block.state_diffs.is_empty());
    let balance = block
        .state_diffs
        .iter()
        .find(|diff| diff.key == "balance")
        .unwrap();
    assert_eq!(balance.transaction_index, 0);
    assert_eq!(balance.prev.as_deref(), Some("0x1"));
    assert_eq!(balance.next.as_deref(), Some("0x2"));
    assert!(rpc.calls("trace_replayBlockTransactions").is_empty());
}
