use crate::error::PushError;
use futures::future::join_all;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_TITLE: &str = "ICE Alert";
pub const DEFAULT_BODY: &str = "New ICE sighting reported nearby";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
}

fn non_blank_or(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

impl PushPayload {
    /// Blank fields fall back to the default alert text.
    pub fn new(title: Option<&str>, body: Option<&str>) -> Self {
        Self {
            title: non_blank_or(title, DEFAULT_TITLE),
            body: non_blank_or(body, DEFAULT_BODY),
        }
    }
}

#[derive(Deserialize)]
struct SendResponse {
    sent: usize,
}

/// A browser push subscription must at least name its endpoint.
pub fn validate_subscription(subscription: &Value) -> Result<(), PushError> {
    match subscription.get("endpoint") {
        Some(Value::String(s)) if !s.is_empty() => Ok(()),
        Some(_) => Err(PushError::InvalidSubscription("endpoint must be a string")),
        None => Err(PushError::InvalidSubscription("missing endpoint")),
    }
}

pub struct PushRelay {
    client: Client,
    base_url: String,
    secret: String,
}

impl PushRelay {
    pub fn new(base_url: &str, secret: &str) -> Result<Self, PushError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Asks the relay to notify every registered device. Returns how many
    /// deliveries the relay reports as sent.
    pub async fn broadcast(&self, payload: &PushPayload) -> Result<usize, PushError> {
        let response = self
            .client
            .post(format!("{}/api/push/send", self.base_url))
            .bearer_auth(&self.secret)
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PushError::Status(response.status().as_u16()));
        }
        let sent = response.json::<SendResponse>().await?.sent;
        info!("Relay {} sent {} notifications", self.base_url, sent);
        Ok(sent)
    }

    pub async fn register(&self, subscription: &Value) -> Result<(), PushError> {
        validate_subscription(subscription)?;
        let response = self
            .client
            .post(format!("{}/api/push/subscribe", self.base_url))
            .json(subscription)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PushError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Broadcasts through every relay and waits for all of them. Failing relays
/// are logged and skipped; the result is the total reported sent count.
pub async fn broadcast_all(relays: &[PushRelay], payload: &PushPayload) -> Result<usize, PushError> {
    if relays.is_empty() {
        return Err(PushError::NotConfigured);
    }
    let counts = join_all(relays.iter().map(|r| r.broadcast(payload))).await;
    let mut total = 0;
    for (relay, count) in relays.iter().zip(counts) {
        match count {
            Ok(n) => total += n,
            Err(e) => warn!("Relay {} failed: {}", relay.base_url(), e),
        }
    }
    Ok(total)
}
