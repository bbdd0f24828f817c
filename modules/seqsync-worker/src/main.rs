use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use object_client::ObjectClient;
use seqsync_common::Config;
use seqsync_reconcile::{Dispatcher, Reconciler, RetryPolicy};
use seqsync_store::PgAttributeStore;
use seqsync_worker::{read_events, BucketObjects};

#[derive(Parser)]
#[command(
    name = "seqsync-worker",
    about = "Reconcile bucket notifications into the attribute store"
)]
struct Cli {
    /// Notification JSON file (`{"Records": [...]}`). Reads stdin when absent or `-`.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Do not run attribute store migrations on startup
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();

    // Load config
    let config = Config::from_env()?;
    config.log_redacted();

    // Attribute store
    let store = PgAttributeStore::connect(&config.database_url).await?;
    if cli.skip_migrations {
        info!("Skipping migrations");
    } else {
        store.migrate().await?;
    }

    // Object store
    let mut client = ObjectClient::new(&config.object_endpoint)?;
    if let Some(token) = &config.object_token {
        client = client.with_token(token);
    }

    let retry = RetryPolicy::new(
        config.max_attempts,
        Duration::from_millis(config.retry_base_ms),
        Duration::from_millis(config.retry_max_ms),
    );
    let reconciler = Reconciler::new(store).with_retry(retry);
    let dispatcher = Dispatcher::new(reconciler, BucketObjects::new(client))
        .with_id_attribute(config.id_attribute.clone());

    // Decode the batch
    let payload = read_input(cli.input.as_ref())?;
    let batch = read_events(&payload)?;
    if batch.malformed > 0 {
        warn!(malformed = batch.malformed, "Some records could not be decoded");
    }
    info!(events = batch.events.len(), "Dispatching batch");

    let stats = dispatcher.dispatch_batch(&batch.events).await;

    info!("Batch complete. {stats}");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("seqsync=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read(path)
            .with_context(|| format!("Failed to read notification file {}", path.display())),
        _ => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read notification from stdin")?;
            Ok(buf)
        }
    }
}
