//! Outbound webhook client for notification batches.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::warn;

use crate::config::DispatcherConfig;

/// Final status of a batch POST.
#[derive(Debug)]
pub enum Delivery {
    /// 2xx. The batch may be marked sent.
    Accepted,
    /// The endpoint refused the batch, either a 4xx or a 5xx that
    /// survived every retry. The batch stays pending.
    Rejected(reqwest::StatusCode),
}

/// Exponential backoff capped at 16 seconds.
fn backoff_secs(attempt: u32) -> u64 {
    1u64 << attempt.min(4)
}

/// Webhook endpoint plus the retry policy for posting to it.
pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
    token: String,
    max_retries: u32,
}

impl WebhookClient {
    /// `None` when no webhook URL is configured: notifications stay in-app.
    pub fn from_config(cfg: &DispatcherConfig) -> Option<Self> {
        if cfg.webhook.url.is_empty() {
            return None;
        }
        Some(Self {
            client: reqwest::Client::new(),
            url: cfg.webhook.url.clone(),
            token: cfg.webhook.token.clone(),
            max_retries: cfg.dispatcher.max_retries,
        })
    }

    async fn attempt(&self, body: &serde_json::Value) -> reqwest::Result<reqwest::Response> {
        let mut req = self.client.post(&self.url).json(body);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        req.send().await
    }

    /// POST a notification batch. Server errors and network failures are
    /// retried with backoff; client errors are final, the payload will not
    /// get better on a retry.
    pub async fn post_batch(&self, body: &serde_json::Value) -> Result<Delivery> {
        let mut attempt = 0u32;
        loop {
            let last = attempt >= self.max_retries;
            let failure = match self.attempt(body).await {
                Ok(resp) if resp.status().is_success() => return Ok(Delivery::Accepted),
                Ok(resp) if resp.status().is_client_error() => {
                    return Ok(Delivery::Rejected(resp.status()));
                }
                Ok(resp) if last => return Ok(Delivery::Rejected(resp.status())),
                Ok(resp) => format!("HTTP {}", resp.status()),
                Err(e) if last => {
                    return Err(e).context("webhook unreachable after retries");
                }
                Err(e) => e.to_string(),
            };

            let delay = backoff_secs(attempt);
            warn!(
                "Webhook attempt {}/{} failed ({failure}), retrying in {delay}s",
                attempt + 1,
                self.max_retries + 1,
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_secs(0), 1);
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(3), 8);
        assert_eq!(backoff_secs(4), 16);
        assert_eq!(backoff_secs(10), 16);
    }

    #[test]
    fn no_url_means_no_client() {
        let cfg = DispatcherConfig::default();
        assert!(WebhookClient::from_config(&cfg).is_none());

        let mut cfg = DispatcherConfig::default();
        cfg.webhook.url = "http://localhost:9/hook".into();
        assert!(WebhookClient::from_config(&cfg).is_some());
    }
}
