//! Client for the COVID-19 statistics API.

use crate::config::ApiConfig;
use crate::types::{DistributionResponse, StateRecord, SummaryRecord};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(&config.base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn summary(&self) -> Result<Vec<SummaryRecord>> {
        self.get_json("/summary", &[]).await
    }

    pub async fn state(&self) -> Result<Vec<StateRecord>> {
        self.get_json("/state", &[]).await
    }

    /// Regional distribution at `data`, formatted `YYYY-MM-DD HH:mm:ss`.
    pub async fn distribution(&self, data: &str) -> Result<DistributionResponse> {
        self.get_json("/distribution/regions/overview", &[("data", data)]).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?
            .error_for_status()
            .with_context(|| format!("Request to {} was rejected", url))?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode response from {}", url))
    }
}
