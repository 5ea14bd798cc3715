pub mod metadata;
pub mod results;

use crate::settings::ApiSettings;
use anyhow::{Context, Result};
use backon::{ExponentialBuilder, Retryable};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::info;

/// HTTP client for the measurement API. Transient failures are retried with
/// exponential backoff and jitter.
pub struct AtlasClient {
    http: reqwest::Client,
    base_url: String,
}

impl AtlasClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn measurements_url(&self) -> String {
        format!("{}/measurements/", self.base_url)
    }

    fn results_url(&self, msm_id: u64) -> String {
        format!("{}/measurements/{msm_id}/results/", self.base_url)
    }

    /// Fetch and decode a JSON document.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = (|| async {
            self.http
                .get(url)
                .query(query)
                .send()
                .await?
                .error_for_status()
        })
        .retry(&ExponentialBuilder::default().with_jitter())
        .notify(|err: &reqwest::Error, dur: Duration| {
            info!("retrying error: {:?} with sleeping {:?}", err, dur)
        })
        .await
        .with_context(|| format!("Request to {url} failed"))?;
        response
            .json()
            .await
            .with_context(|| format!("Request to {url} returned invalid JSON"))
    }

    /// Fetch one measurement's results for a time interval as newline-
    /// delimited JSON text. The `txt` format gives one JSON structure per
    /// result, which shards can store and load incrementally.
    pub async fn measurement_results(
        &self,
        msm_id: u64,
        interval_start: i64,
        interval_end: i64,
    ) -> Result<String> {
        let url = self.results_url(msm_id);
        let query = [
            ("start", interval_start.to_string()),
            ("stop", interval_end.to_string()),
            ("format", "txt".to_string()),
        ];
        let response = (|| async {
            self.http
                .get(&url)
                .query(&query)
                .send()
                .await?
                .error_for_status()
        })
        .retry(&ExponentialBuilder::default().with_jitter())
        .notify(|err: &reqwest::Error, dur: Duration| {
            info!("retrying error: {:?} with sleeping {:?}", err, dur)
        })
        .await
        .with_context(|| format!("Request for measurement {msm_id} failed"))?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read results body for measurement {msm_id}"))
    }
}
