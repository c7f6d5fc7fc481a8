use std::time::Duration;

use clap::Args;
use error_stack::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::{
    archive::{ArchiveDataSource, ArchiveOptions},
    error::{DataSourceError, Result},
};

use super::common::{consume_stream, print_json_line, RequestArgs};

#[derive(Args, Debug)]
pub struct ArchiveCommand {
    /// Archive gateway URL.
    #[arg(long, env = "EVM_GATEWAY_URL")]
    gateway_url: String,
    /// Gateway request timeout, in seconds.
    #[arg(long, env = "EVM_GATEWAY_TIMEOUT_SEC", default_value = "60")]
    gateway_timeout_sec: u64,
    /// How often to poll the gateway height, in seconds.
    #[arg(long, env = "EVM_GATEWAY_POLL_INTERVAL_SEC", default_value = "10")]
    poll_interval_sec: u64,
    #[clap(flatten)]
    request: RequestArgs,
    /// Stop once the gateway head is reached.
    #[arg(long, env = "EVM_STOP_ON_HEAD")]
    stop_on_head: bool,
}

impl ArchiveCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        info!(gateway_url = %self.gateway_url, "streaming archive blocks");

        let url = self
            .gateway_url
            .parse::<Url>()
            .change_context(DataSourceError::Configuration)
            .attach_printable("failed to parse gateway URL")
            .attach_printable_lazy(|| format!("url: {}", self.gateway_url))?;

        let options = ArchiveOptions::default()
            .with_timeout(Duration::from_secs(self.gateway_timeout_sec))
            .with_poll_interval(Duration::from_secs(self.poll_interval_sec));

        let source = ArchiveDataSource::new(url, options)?;
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
