use crate::error::{LocationError, SubmitError};
use crate::geo::LngLat;
use crate::i18n::Locale;
use crate::photo::{self, compress_image_async};
use crate::record::{MAX_DESCRIPTION_CHARS, SightingRecord};
use crate::state::StateFile;
use crate::storage::{NewSighting, SightingStore};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::Rng;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const LOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the last accepted submission time is kept.
pub trait SubmitLedger: Send {
    fn last_submit(&self) -> Option<DateTime<Utc>>;
    fn record_submit(&mut self, at: DateTime<Utc>) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    last: Option<DateTime<Utc>>,
}

impl SubmitLedger for MemoryLedger {
    fn last_submit(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    fn record_submit(&mut self, at: DateTime<Utc>) -> io::Result<()> {
        self.last = Some(at);
        Ok(())
    }
}

impl SubmitLedger for StateFile {
    fn last_submit(&self) -> Option<DateTime<Utc>> {
        self.load().last_report_at
    }

    fn record_submit(&mut self, at: DateTime<Utc>) -> io::Result<()> {
        let mut state = self.load();
        state.last_report_at = Some(at);
        self.save(&state)
    }
}

/// At most one accepted submission per rolling window.
pub struct RateLimiter<L> {
    ledger: L,
    window: Duration,
}

impl<L: SubmitLedger> RateLimiter<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger, window: RATE_LIMIT_WINDOW }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Time left before another submission is accepted.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.ledger.last_submit() else {
            return Duration::ZERO;
        };
        // A clock that moved backwards counts as "just submitted".
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.window.saturating_sub(elapsed)
    }

    pub fn check(&self, now: DateTime<Utc>) -> Result<(), SubmitError> {
        let retry_after = self.remaining(now);
        if retry_after.is_zero() {
            Ok(())
        } else {
            Err(SubmitError::RateLimited { retry_after })
        }
    }

    pub fn record(&mut self, now: DateTime<Utc>) -> io::Result<()> {
        self.ledger.record_submit(now)
    }
}

/// Device location source. One request at a time.
pub trait Geolocator: Send + Sync {
    fn current_position(&self) -> impl Future<Output = Result<LngLat, LocationError>> + Send;
}

/// A position supplied up front, e.g. from the command line.
pub struct ManualLocation(pub Option<LngLat>);

impl Geolocator for ManualLocation {
    async fn current_position(&self) -> Result<LngLat, LocationError> {
        match self.0 {
            Some(p) if p.is_valid() => Ok(p),
            Some(p) => Err(LocationError::Unavailable(format!("invalid position {:?}", p))),
            None => Err(LocationError::Unavailable("no position given".into())),
        }
    }
}

/// The report being composed.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub description: String,
    pub photo: Option<Vec<u8>>,
}

pub struct ReportSubmission<S, G, L> {
    storage: Arc<S>,
    locator: G,
    limiter: RateLimiter<L>,
    location_timeout: Duration,
    draft: Draft,
}

fn photo_filename(now: DateTime<Utc>) -> String {
    format!("{}-{:08x}.jpg", now.timestamp_millis(), rand::rng().random::<u32>())
}

impl<S, G, L> ReportSubmission<S, G, L>
where
    S: SightingStore,
    G: Geolocator,
    L: SubmitLedger,
{
    pub fn new(storage: Arc<S>, locator: G, ledger: L) -> Self {
        Self {
            storage,
            locator,
            limiter: RateLimiter::new(ledger),
            location_timeout: LOCATION_TIMEOUT,
            draft: Draft::default(),
        }
    }

    pub fn with_location_timeout(mut self, limit: Duration) -> Self {
        self.location_timeout = limit;
        self
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn set_description(&mut self, text: &str) {
        self.draft.description = text.to_string();
    }

    pub fn attach_photo(&mut self, bytes: Vec<u8>) {
        self.draft.photo = Some(bytes);
    }

    pub fn limiter(&self) -> &RateLimiter<L> {
        &self.limiter
    }

    /// Sends the draft. Nothing reaches the network when rate limited, and a
    /// report is never created without its declared photo.
    pub async fn submit(&mut self, now: DateTime<Utc>) -> Result<SightingRecord, SubmitError> {
        self.limiter.check(now)?;

        let description = self.draft.description.trim();
        let len = description.chars().count();
        if len > MAX_DESCRIPTION_CHARS {
            return Err(SubmitError::DescriptionTooLong { len, max: MAX_DESCRIPTION_CHARS });
        }
        let description = (!description.is_empty()).then(|| description.to_string());

        let position = match timeout(self.location_timeout, self.locator.current_position()).await {
            Ok(result) => result?,
            Err(_) => return Err(LocationError::Timeout.into()),
        };

        let image_url = match &self.draft.photo {
            Some(bytes) => {
                let compressed = compress_image_async(bytes.clone()).await?;
                let filename = photo_filename(now);
                let url = self
                    .storage
                    .upload_image(&filename, compressed, photo::CONTENT_TYPE)
                    .await
                    .map_err(|e| {
                        warn!("Photo upload failed: {}", e);
                        SubmitError::UploadFailed(e)
                    })?;
                Some(url)
            }
            None => None,
        };

        let record = self
            .storage
            .submit(&NewSighting {
                lng: position.lng,
                lat: position.lat,
                description,
                image_url,
            })
            .await
            .map_err(|e| {
                warn!("Report submission failed: {}", e);
                SubmitError::SubmitFailed(e)
            })?;

        // The report is in; a lost timestamp only loosens the local limit.
        if let Err(e) = self.limiter.record(now) {
            warn!("Could not persist submission time: {}", e);
        }
        self.draft = Draft::default();
        info!("Submitted sighting {}", record.id);
        Ok(record)
    }
}

/// The message shown next to the submit button for a failed attempt.
pub fn user_message(error: &SubmitError, locale: Locale) -> String {
    let m = locale.messages();
    match error {
        SubmitError::RateLimited { retry_after } => locale.cooldown(retry_after.as_secs().div_ceil(60)),
        SubmitError::LocationDenied | SubmitError::LocationUnavailable => m.location_required.to_string(),
        _ => m.report_failed.to_string(),
    }
}
