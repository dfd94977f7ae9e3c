use crate::error::StorageError;
use crate::record::SightingRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info, warn};
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Arguments of the `insert_sighting` RPC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSighting {
    pub lng: f64,
    pub lat: f64,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// The storage collaborator: recent sightings, inserts and photo uploads.
pub trait SightingStore: Send + Sync {
    /// Every live sighting, newest first.
    fn fetch_recent(&self) -> impl Future<Output = Result<Vec<SightingRecord>, StorageError>> + Send;

    /// The single newest sighting, if any.
    fn fetch_latest(&self) -> impl Future<Output = Result<Option<SightingRecord>, StorageError>> + Send;

    /// Live sightings created at or after `since`, newest first.
    fn fetch_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<SightingRecord>, StorageError>> + Send;

    fn submit(
        &self,
        sighting: &NewSighting,
    ) -> impl Future<Output = Result<SightingRecord, StorageError>> + Send;

    /// Stores a photo and returns a reference resolvable to a displayable URL.
    fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<String, StorageError>> + Send;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<SightingRecord>),
    One(SightingRecord),
}

/// Longest wait between two attempts, before jitter.
const MAX_BACKOFF_MS: u64 = 60_000;

/// PostgREST-style storage client with retry on rate limiting and server errors.
pub struct RestStorage {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
    pub(crate) base_delay: Duration,
    pub(crate) max_retries: u32,
}

impl RestStorage {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StorageError> {
        Self::with_timeout(base_url, api_key, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bucket: "sighting-photos".to_string(),
            base_delay: Duration::from_millis(500),
            max_retries: 3,
        })
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.base_delay = Duration::from_millis(delay_ms);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn view_url(&self) -> String {
        format!("{}/rest/v1/sightings_view", self.base_url)
    }

    fn public_image_url(&self, filename: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, filename
        )
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(MAX_BACKOFF_MS);
        let exponential = 2_u64.saturating_pow(attempt).saturating_mul(base_ms).min(MAX_BACKOFF_MS);
        let jitter = rand::rng().random_range(0..base_ms.clamp(1, MAX_BACKOFF_MS));
        Duration::from_millis(exponential + jitter)
    }

    /// Sends the request built by `build`, retrying with exponential backoff
    /// and jitter on 429, 5xx and connection failures.
    async fn send_with_retry<F>(&self, label: &str, build: F) -> Result<Response, StorageError>
    where
        F: Fn() -> RequestBuilder,
    {
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                info!(
                    "Retrying {} (attempt {}) after {}ms delay",
                    label,
                    attempt + 1,
                    delay.as_millis()
                );
                sleep(delay).await;
            }

            let err = match self.authorized(build()).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    StorageError::Status { status, body }
                }
                Err(e) => StorageError::Http(e),
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt == self.max_retries {
                error!("{} failed, max retries reached: {}", label, err);
                break;
            }
            warn!("{} failed, retrying...: {}", label, err);
        }

        Err(StorageError::Exhausted { attempts: self.max_retries + 1 })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, StorageError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| StorageError::Decode(e.to_string()))
    }
}

impl SightingStore for RestStorage {
    async fn fetch_recent(&self) -> Result<Vec<SightingRecord>, StorageError> {
        let url = self.view_url();
        let response = self
            .send_with_retry("fetch recent sightings", || {
                self.client
                    .get(&url)
                    .query(&[("select", "*"), ("order", "created_at.desc")])
            })
            .await?;
        let records: Vec<SightingRecord> = Self::decode(response).await?;
        info!("Fetched {} recent sightings", records.len());
        Ok(records)
    }

    async fn fetch_latest(&self) -> Result<Option<SightingRecord>, StorageError> {
        let url = self.view_url();
        let response = self
            .send_with_retry("fetch latest sighting", || {
                self.client
                    .get(&url)
                    .query(&[("select", "*"), ("order", "created_at.desc"), ("limit", "1")])
            })
            .await?;
        let records: Vec<SightingRecord> = Self::decode(response).await?;
        Ok(records.into_iter().next())
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<SightingRecord>, StorageError> {
        let url = self.view_url();
        let cursor = format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Micros, true));
        let response = self
            .send_with_retry("fetch new sightings", || {
                self.client.get(&url).query(&[
                    ("select", "*"),
                    ("created_at", cursor.as_str()),
                    ("order", "created_at.desc"),
                ])
            })
            .await?;
        let records: Vec<SightingRecord> = Self::decode(response).await?;
        debug!("Fetched {} sightings since {}", records.len(), since);
        Ok(records)
    }

    async fn submit(&self, sighting: &NewSighting) -> Result<SightingRecord, StorageError> {
        let url = format!("{}/rest/v1/rpc/insert_sighting", self.base_url);
        // Not retried: a lost response would otherwise create a duplicate report.
        let response = self
            .authorized(self.client.post(&url).json(sighting))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status { status, body });
        }

        match Self::decode::<OneOrMany>(response).await? {
            OneOrMany::One(record) => Ok(record),
            OneOrMany::Many(records) => records
                .into_iter()
                .next()
                .ok_or_else(|| StorageError::Decode("insert_sighting returned no row".into())),
        }
    }

    async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, filename
        );
        let size = bytes.len();
        self.send_with_retry("photo upload", || {
            self.client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes.clone())
        })
        .await?;
        info!("Uploaded {} ({} bytes)", filename, size);
        Ok(self.public_image_url(filename))
    }
}
