mod cli;
mod generate;
mod pipeline;
mod server;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.cmd {
        cli::Command::Serve(cmd) => server::run(args.settings, cmd).await.context("serve failed"),
        cli::Command::Run(cmd) => generate::run(args.settings, cmd).await.context("report failed"),
    }
}
