use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use satsuma::app;
use satsuma::cli::Cli;
use satsuma_catalog::HttpCatalogClient;
use satsuma_engine::HttpDownloadEngine;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async {
        app::init_tracing(&cli.log_level);
        tracing::info!("satsuma starting");

        let (event_tx, event_rx) = mpsc::channel(64);
        let catalog = Arc::new(HttpCatalogClient::new(cli.catalog_url.clone()));
        let engine = Arc::new(HttpDownloadEngine::new(cli.download_dir.clone(), event_tx));

        app::run(
            app::Options {
                state_dir: cli.state_dir,
                listen: cli.listen,
                concurrency: cli.concurrency,
            },
            catalog,
            engine,
            event_rx,
        )
        .await
    })
}
