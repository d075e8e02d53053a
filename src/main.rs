//! deed-pipeline — concurrent OCR + LLM extraction for scanned property
//! sale deeds.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deed_pipeline::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "deed_pipeline=info"
    } else {
        "deed_pipeline=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    cli::run(cli).await
}
