// reqwest-backed WebhookClient
//
// One POST per call; retries belong to the caller's RetryPolicy. Each
// request carries a fresh delivery id so receivers can de-duplicate retried
// deliveries.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, RuntimeError};
use crate::traits::{WebhookClient, WebhookRequest};

/// Header carrying the per-attempt delivery id
pub const DELIVERY_ID_HEADER: &str = "X-Stepwise-Delivery";

#[derive(Debug, Clone)]
pub struct HttpWebhookClient {
    client: Client,
    timeout: Duration,
}

impl HttpWebhookClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    /// Use a preconfigured reqwest client (proxies, TLS roots)
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Default for HttpWebhookClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn post_json(&self, request: &WebhookRequest) -> Result<u16> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(self.timeout)
            .header(DELIVERY_ID_HEADER, Uuid::now_v7().to_string())
            .json(&request.body);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RuntimeError::http(format!("POST {} failed: {}", request.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::http(format!(
                "POST {} returned {}: {}",
                request.url,
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        tracing::debug!(url = %request.url, status = status.as_u16(), "Webhook delivered");
        Ok(status.as_u16())
    }
}
