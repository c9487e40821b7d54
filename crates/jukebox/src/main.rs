use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jukebox::startup::{self, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,jukebox=info")),
        )
        .init();

    startup::run(args).await
}
