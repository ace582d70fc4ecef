//! Push delivery to subscriber endpoints.
//!
//! A flush sends one JSON envelope per batch. Any 2xx response counts as
//! delivered; every other response or transport error fails the attempt.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;

use crate::record::Record;

/// Wire envelope for one push batch.
#[derive(Serialize)]
struct PushEnvelope<'a> {
    #[serde(rename = "subscription-id")]
    subscription_id: &'a str,
    batch: &'a [Record],
}

/// Delivers one batch to the endpoint with a per-attempt timeout.
pub(super) async fn deliver(
    client: &reqwest::Client,
    endpoint: &str,
    subscription_id: &str,
    batch: &[Record],
    timeout: Duration,
) -> Result<()> {
    let envelope = PushEnvelope {
        subscription_id,
        batch,
    };

    let response = client
        .post(endpoint)
        .timeout(timeout)
        .json(&envelope)
        .send()
        .await
        .with_context(|| format!("Failed to reach subscriber at {endpoint}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        anyhow::bail!(
            "Subscriber returned status {}: {}",
            status.as_u16(),
            body.chars().take(200).collect::<String>()
        );
    }

    Ok(())
}
