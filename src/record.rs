use crate::geo::LngLat;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest description a report may carry, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 280;

/// A row of the `sightings_view` view, as served by the storage collaborator
/// and as written by `vigil export`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SightingRecord {
    pub id: String,
    pub lng: f64,
    pub lat: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Stable identity of a sighting across re-fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SightingId(pub String);

impl fmt::Display for SightingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SightingId {
    fn from(s: &str) -> Self {
        SightingId(s.to_string())
    }
}

/// One reported observation. Immutable once received.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub id: SightingId,
    pub position: LngLat,
    pub description: Option<String>,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Sighting {
    /// Validates a wire row. Rows with unusable coordinates are dropped;
    /// over-long descriptions are clipped.
    pub fn from_record(record: SightingRecord) -> Option<Sighting> {
        let position = LngLat::new(record.lng, record.lat);
        if !position.is_valid() {
            warn!("Dropping sighting {} with invalid position {:?}", record.id, position);
            return None;
        }

        let description = record
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .map(|d| clip_chars(d, MAX_DESCRIPTION_CHARS));

        Some(Sighting {
            id: SightingId(record.id),
            position,
            description,
            image_ref: record.image_url.filter(|u| !u.is_empty()),
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
    }

    pub fn to_record(&self) -> SightingRecord {
        SightingRecord {
            id: self.id.0.clone(),
            lng: self.position.lng,
            lat: self.position.lat,
            description: self.description.clone(),
            image_url: self.image_ref.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Converts a batch of rows, skipping the invalid ones.
pub fn sightings_from_records(records: Vec<SightingRecord>) -> Vec<Sighting> {
    records.into_iter().filter_map(Sighting::from_record).collect()
}

fn clip_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s,
    }
}
