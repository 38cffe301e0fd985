use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use deferq_core::{
    DeferqError, InMemoryBroker, Process, Service, ServiceConfig, WorkItem,
};

#[derive(Debug, Deserialize)]
struct FilePayload {
    file: String,
}

/// Demo work: pretend to crunch a file for the configured duration.
struct FileCruncher;

#[async_trait]
impl Process for FileCruncher {
    async fn run_slice(&self, item: &WorkItem, slice: Duration) -> Result<(), DeferqError> {
        let payload: FilePayload = serde_json::from_value(item.payload().clone())
            .map_err(|e| DeferqError::Other(format!("bad payload: {e}")))?;

        tracing::info!(seq = %item.seq(), file = %payload.file, slice_secs = slice.as_secs_f64(), "crunching");
        tokio::time::sleep(slice).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    // Demo topology: an in-memory broker seeded with a few payloads. A real
    // deployment implements `Broker` against its queue transport, wired from
    // `config.connection` and `config.queue_name`.
    let broker = Arc::new(InMemoryBroker::new());
    for name in ["alpha.bin", "beta.bin", "gamma.bin", "delta.bin"] {
        let seq = broker.send(serde_json::json!({ "file": name })).await;
        tracing::info!(%seq, file = name, "seeded message");
    }

    let service = Service::new(
        Arc::clone(&broker) as Arc<dyn deferq_core::Broker>,
        config,
        Arc::new(FileCruncher),
    );

    let status = service
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    let counts = broker.counts().await;
    tracing::info!(?counts, "final broker counts");
    std::process::exit(status.code());
}
