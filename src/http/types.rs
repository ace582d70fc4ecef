//! Request/response types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub records: usize,
    pub active_leases: usize,
    pub subscriptions: usize,
    pub version: String,
}

/// Version response.
#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Response to a subscription creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
    #[serde(rename = "subscription-id")]
    pub subscription_id: String,
    pub endpoint: String,
    pub query: Record,
}
