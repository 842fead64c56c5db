//! `boletera-api` binary entrypoint.
//!
//! Loads configuration from environment variables, wires the SQLite store,
//! gateway client and alert notifier, and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;

use boletera_api::config::Config;
use boletera_api::gateway_client::SimpleApiClient;
use boletera_api::notifier::WebhookNotifier;
use boletera_api::server::{AppState, Server};
use boletera_core::alert::{AlertNotifier, NoopNotifier};
use boletera_core::observability::{LogFormat, init_logging};
use boletera_core::store::{MemoryReceiptStore, ReceiptStore, SqliteReceiptStore};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    let store: Arc<dyn ReceiptStore> = if let Some(path) = config.database_path.as_deref() {
        tracing::info!(path = %path.display(), "using SQLite receipt store");
        Arc::new(SqliteReceiptStore::open(path)?)
    } else {
        tracing::warn!("BOLETERA_DB_PATH not set; using in-memory store (debug only)");
        Arc::new(MemoryReceiptStore::new())
    };

    let issuer_rut = config.issuer.to_identity().full_rut();
    let gateway = Arc::new(SimpleApiClient::new(&config.gateway, issuer_rut)?);

    let notifier: Arc<dyn AlertNotifier> = if let Some(url) = config.alert_webhook_url.as_deref() {
        Arc::new(WebhookNotifier::new(url))
    } else {
        tracing::warn!("BOLETERA_ALERT_WEBHOOK_URL not set; low-folio alerts will only be logged");
        Arc::new(NoopNotifier)
    };

    if !config.caf_directory.is_dir() {
        anyhow::bail!(
            "CAF directory {} does not exist",
            config.caf_directory.display()
        );
    }

    let server = Server::new(AppState::new(config, store, gateway, notifier));
    server.serve().await?;
    Ok(())
}
