mod archive;
mod common;
mod rpc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use self::{
    archive::ArchiveCommand,
    rpc::{RpcFinalizedCommand, RpcHotCommand},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream finalized blocks from a node.
    RpcFinalized(RpcFinalizedCommand),
    /// Stream unfinalized blocks from a node, following reorgs.
    RpcHot(RpcHotCommand),
    /// Stream finalized blocks from an archive gateway.
    Archive(ArchiveCommand),
}

impl Cli {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        match self.subcommand {
            Command::RpcFinalized(command) => command.run(ct).await,
            Command::RpcHot(command) => command.run(ct).await,
            Command::Archive(command) => command.run(ct).await,
        }
    }
}
