use clap::Args;
use error_stack::ResultExt;
use evm_source_common::{ChainPointer, Hash, HotState};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    error::{DataSourceError, Result},
    model::CanonicalBlock,
};

use super::common::{consume_stream, print_json_line, RequestArgs, RpcArgs};

#[derive(Args, Debug)]
pub struct RpcFinalizedCommand {
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    request: RequestArgs,
    /// Stop once the finalized head is reached.
    #[arg(long, env = "EVM_STOP_ON_HEAD")]
    stop_on_head: bool,
}

#[derive(Args, Debug)]
pub struct RpcHotCommand {
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    request: RequestArgs,
    /// Height of the last finalized block the consumer has.
    #[arg(long, env = "EVM_FINALIZED_HEIGHT")]
    finalized_height: u64,
    /// Hash of the last finalized block, if known.
    #[arg(long, env = "EVM_FINALIZED_HASH")]
    finalized_hash: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HotUpdateLine<'a> {
    base_head: &'a ChainPointer,
    finalized_head: &'a ChainPointer,
    blocks: &'a [CanonicalBlock],
}

impl RpcFinalizedCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        info!(rpc_url = %self.rpc.rpc_url, "streaming finalized blocks");

        let source = self.rpc.to_rpc_data_source()?;
        let requests = self.request.to_range_requests()?;

        let stream = source.finalized_blocks(requests, self.stop_on_head);
        consume_stream(stream, ct, |batch| {
            for block in batch.blocks.iter() {
                print_json_line(block)?;
            }
            Ok(())
        })
        .await
    }
}

impl RpcHotCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        info!(rpc_url = %self.rpc.rpc_url, "streaming hot blocks");

        let source = self.rpc.to_rpc_data_source()?;
        let requests = self.request.to_range_requests()?;
        let state = HotState {
            finalized: self.finalized_pointer()?,
            unfinalized: Vec::new(),
        };

        let stream = source.hot_blocks(requests, state);
        consume_stream(stream, ct, |update| {
            print_json_line(&HotUpdateLine {
                base_head: &update.base_head,
                finalized_head: &update.finalized_head,
                blocks: &update.blocks,
            })
        })
        .await
    }

    fn finalized_pointer(&self) -> Result<ChainPointer> {
        let Some(hash) = &self.finalized_hash else {
            return Ok(ChainPointer::new_finalized(self.finalized_height));
        };

        let hash = Hash::from_hex(hash)
            .change_context(DataSourceError::Configuration)
            .attach_printable("invalid finalized hash")
            .attach_printable_lazy(|| format!("hash: {hash}"))?;

        Ok(ChainPointer::new(self.finalized_height, hash))
    }
}
