//! Allora consumer API client.
//!
//! Fetches the network inference for a topic together with its normalized
//! confidence interval.
//!
//! Endpoint: `GET {base}/v2/allora/consumer/{chain}?allora_topic_id={topic}`
//! Auth: `x-api-key` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{SignalError, SignalSource};
use crate::types::{parse_decimal, Signal};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const SOURCE_NAME: &str = "allora";

/// BTC 8h price prediction.
pub const DEFAULT_TOPIC_ID: u64 = 14;

const CONFIDENCE_POINTS: usize = 5;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConsumerResponse {
    #[serde(default)]
    data: Option<ConsumerData>,
}

#[derive(Debug, Deserialize)]
struct ConsumerData {
    inference_data: InferenceData,
}

#[derive(Debug, Deserialize)]
struct InferenceData {
    network_inference_normalized: String,
    #[serde(default)]
    confidence_interval_values_normalized: Vec<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AlloraClient {
    http: Client,
    base_url: String,
    chain: String,
    api_key: SecretString,
}

impl AlloraClient {
    pub fn new(base_url: &str, chain: &str, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("gmx-allora-agent/0.1.0")
            .build()
            .context("Failed to build HTTP client for Allora")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain: chain.to_string(),
            api_key,
        })
    }

    fn consumer_url(&self, topic_id: u64) -> String {
        format!(
            "{}/v2/allora/consumer/{}?allora_topic_id={topic_id}",
            self.base_url,
            urlencoding::encode(&self.chain),
        )
    }
}

/// Turn a consumer payload into a `Signal`.
fn into_signal(topic_id: u64, body: ConsumerResponse) -> Result<Signal, SignalError> {
    let inference = body
        .data
        .ok_or_else(|| SignalError::Rejected("response has no data".into()))?
        .inference_data;

    let combined_value = parse_decimal(&inference.network_inference_normalized).ok_or_else(|| {
        SignalError::Rejected(format!(
            "unparseable network inference: {}",
            inference.network_inference_normalized
        ))
    })?;

    let values = &inference.confidence_interval_values_normalized;
    if values.len() != CONFIDENCE_POINTS {
        return Err(SignalError::Rejected(format!(
            "expected {CONFIDENCE_POINTS} confidence interval values, got {}",
            values.len()
        )));
    }
    let mut confidence_interval = [combined_value; CONFIDENCE_POINTS];
    for (slot, raw) in confidence_interval.iter_mut().zip(values) {
        *slot = parse_decimal(raw)
            .ok_or_else(|| SignalError::Rejected(format!("unparseable confidence value: {raw}")))?;
    }

    Ok(Signal {
        topic_id,
        combined_value,
        confidence_interval,
        fetched_at: Utc::now(),
    })
}

#[async_trait]
impl SignalSource for AlloraClient {
    async fn fetch(&self, topic_id: u64) -> Result<Signal, SignalError> {
        let url = self.consumer_url(topic_id);
        debug!(url = %url, "Fetching Allora prediction");

        let resp = self
            .http
            .get(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| SignalError::Transient(format!("Allora request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, topic_id, "Allora API error");
            return Err(SignalError::from_status(status, &body));
        }

        // A body that stops arriving is a transport failure; one that arrives
        // but does not parse is a rejection.
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SignalError::Transient(format!("Allora response body read failed: {e}")))?;
        let body: ConsumerResponse = serde_json::from_slice(&bytes)
            .map_err(|e| SignalError::Rejected(format!("Failed to parse Allora response: {e}")))?;

        let signal = into_signal(topic_id, body)?;
        info!(
            topic_id,
            prediction = %signal.combined_value,
            band = %signal.band_width(),
            "Allora prediction fetched"
        );
        Ok(signal)
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
