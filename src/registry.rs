//! Registry client - reputation lookups
//!
//! The registry computes a reputation for every profile. The node only
//! fetches that value and folds it into its per-peer scores.

use crate::repo::ProfileId;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Registry responded with status {0}")]
    Status(u16),

    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Source of profile reputations
#[async_trait]
pub trait Registry: Send + Sync {
    /// Reputation delta the registry reports for a profile
    async fn reputation(&self, profile_id: &ProfileId) -> Result<i64, RegistryError>;
}

#[derive(Debug, Serialize)]
struct ReputationRequest<'a> {
    #[serde(rename = "profileID")]
    profile_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReputationEnvelope {
    data: Reputation,
}

#[derive(Debug, Deserialize)]
struct Reputation {
    rep: i64,
}

/// Registry reached over HTTP
pub struct HttpRegistry {
    location: String,
    client: reqwest::Client,
}

impl HttpRegistry {
    pub fn new(location: impl Into<String>) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            location: location.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn parse_reputation(body: &[u8]) -> Result<Reputation, RegistryError> {
        let envelope: ReputationEnvelope = serde_json::from_slice(body)
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn reputation(&self, profile_id: &ProfileId) -> Result<i64, RegistryError> {
        let url = format!("{}/registry/reputation", self.location);
        tracing::debug!("Fetching reputation of {} from {}", profile_id, url);

        let response = self
            .client
            .post(&url)
            .json(&ReputationRequest {
                profile_id: profile_id.as_str(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(Self::parse_reputation(&body)?.rep)
    }
}
