use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use blockconn_builder::{execute, Cli};

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    info!(?cli, version = blockconn_core::version(), "starting builder");
    execute(cli)
}
