use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use fedagg_core::IBroadcast;
use fedagg_logging::LOG_BROADCAST;
use futures::future::join_all;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

/// Posts the aggregated model to every client over HTTP
#[derive(Debug, Clone)]
pub struct HttpBroadcast {
    clients: Vec<Url>,
    client: reqwest::Client,
}

impl HttpBroadcast {
    pub fn new(clients: Vec<Url>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { clients, client })
    }

    async fn send_to(&self, url: &Url, model: &[u8]) -> anyhow::Result<()> {
        self.client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(model.to_vec())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl IBroadcast for HttpBroadcast {
    async fn broadcast(&self, model: Vec<u8>) -> anyhow::Result<()> {
        let results = join_all(self.clients.iter().map(|url| {
            let model = &model;
            async move { (url, self.send_to(url, model).await) }
        }))
        .await;

        let mut failed = vec![];
        for (url, result) in results {
            match result {
                Ok(()) => debug!(target: LOG_BROADCAST, %url, "Model delivered"),
                Err(err) => {
                    warn!(
                        target: LOG_BROADCAST,
                        %url,
                        err = %format!("{err:#}"),
                        "Model delivery failed"
                    );
                    failed.push(url.to_string());
                }
            }
        }

        if !failed.is_empty() {
            bail!(
                "Failed to deliver model to {} of {} clients: {}",
                failed.len(),
                self.clients.len(),
                failed.join(", ")
            );
        }

        Ok(())
    }
}
