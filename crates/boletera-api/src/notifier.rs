//! Webhook implementation of the low-capacity alert notifier.
//!
//! The mail relay that used to receive these alerts lives outside this
//! service; operationally the alert is delivered to a webhook (chat
//! channel, incident tool) that owns the fan-out.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use boletera_core::alert::AlertNotifier;
use boletera_core::{Error, Result};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts depletion alerts to a configured webhook URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Creates a notifier targeting `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify_low_capacity(&self, remaining_capacity: u64) -> Result<()> {
        let body = json!({
            "alert": "folios_bajos",
            "remaining": remaining_capacity,
            "message": format!(
                "Quedan solo {remaining_capacity} folios disponibles. \
                 Solicita nuevos folios lo antes posible."
            ),
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::gateway("notify", e))?;

        if !response.status().is_success() {
            return Err(Error::gateway(
                "notify",
                format!("webhook returned {}", response.status()),
            ));
        }
        tracing::info!(remaining_capacity, "low-folio alert delivered");
        Ok(())
    }
}
