use std::time::Duration;
use thiserror::Error;

/// Failures talking to the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

impl StorageError {
    /// Status codes worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Http(e) => e.is_timeout() || e.is_connect(),
            StorageError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// The initial bulk fetch did not complete. The view stays empty.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not load sightings: {0}")]
    DataLoadFailed(#[source] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    Denied,

    #[error("location unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for a location fix")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("could not decode photo: {0}")]
    Decode(#[source] image::ImageError),

    #[error("could not encode photo: {0}")]
    Encode(#[source] image::ImageError),

    #[error("photo encoder task failed: {0}")]
    Task(String),
}

/// Everything that can stop a report from being accepted.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("rate limited, retry in {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("location unavailable")]
    LocationUnavailable,

    #[error("location permission denied")]
    LocationDenied,

    #[error("description is {len} characters, limit is {max}")]
    DescriptionTooLong { len: usize, max: usize },

    #[error(transparent)]
    PhotoRejected(#[from] PhotoError),

    #[error("photo upload failed: {0}")]
    UploadFailed(#[source] StorageError),

    #[error("report submission failed: {0}")]
    SubmitFailed(#[source] StorageError),
}

impl From<LocationError> for SubmitError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::Denied => SubmitError::LocationDenied,
            LocationError::Unavailable(_) | LocationError::Timeout => {
                SubmitError::LocationUnavailable
            }
        }
    }
}

/// Translation failures never reach callers of `CachedTranslator`.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("translation service returned no text")]
    Empty,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push relay returned HTTP {0}")]
    Status(u16),

    #[error("invalid subscription: {0}")]
    InvalidSubscription(&'static str),

    #[error("push relay is not configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("storage url is not configured")]
    MissingStorageUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_errors_map_to_submit_kinds() {
        assert!(matches!(
            SubmitError::from(LocationError::Denied),
            SubmitError::LocationDenied
        ));
        assert!(matches!(
            SubmitError::from(LocationError::Timeout),
            SubmitError::LocationUnavailable
        ));
        assert!(matches!(
            SubmitError::from(LocationError::Unavailable("no fix".into())),
            SubmitError::LocationUnavailable
        ));
    }

    #[test]
    fn test_retryable_statuses() {
        let limited = StorageError::Status { status: 429, body: String::new() };
        let server = StorageError::Status { status: 503, body: String::new() };
        let bad = StorageError::Status { status: 400, body: String::new() };
        assert!(limited.is_retryable());
        assert!(server.is_retryable());
        assert!(!bad.is_retryable());
        assert!(!StorageError::Decode("x".into()).is_retryable());
    }

    #[test]
    fn test_rate_limited_message_has_seconds() {
        let err = SubmitError::RateLimited { retry_after: Duration::from_secs(120) };
        assert_eq!(err.to_string(), "rate limited, retry in 120s");
    }
}
