use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;
use evm_source::{
    cli::Cli,
    error::{DataSourceError, ReportExt, Result},
};
use evm_source_observability::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    run_with_args(args).await.to_exit_code()
}

async fn run_with_args(args: Cli) -> Result<()> {
    init_tracing()
        .change_context(DataSourceError::Configuration)
        .attach_printable("failed to initialize tracing")?;

    let ct = CancellationToken::new();

    ctrlc::set_handler({
        let ct = ct.clone();
        move || {
            info!("SIGINT received");
            ct.cancel();
        }
    })
    .change_context(DataSourceError::Configuration)
    .attach_printable("failed to set SIGINT handler")?;

    args.run(ct).await
}
