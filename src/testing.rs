use crate::error::{LocationError, StorageError, TranslateError};
use crate::geo::{LngLat, Viewport};
use crate::i18n::Locale;
use crate::record::{Sighting, SightingId, SightingRecord};
use crate::render::{Banner, MapSurface, MarkerId, MarkerSpec, PopupContent};
use crate::report::Geolocator;
use crate::storage::{NewSighting, SightingStore};
use crate::translate::Translator;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const CHICAGO: LngLat = LngLat { lng: -87.6298, lat: 41.8781 };

pub fn base_time() -> DateTime<Utc> {
    "2026-03-01T18:00:00Z".parse().unwrap()
}

pub fn sighting_aged(id: &str, now: DateTime<Utc>, minutes: i64) -> Sighting {
    Sighting {
        id: SightingId::from(id),
        position: CHICAGO,
        description: Some(format!("report {id}")),
        image_ref: None,
        created_at: now - Duration::minutes(minutes),
        expires_at: now - Duration::minutes(minutes) + Duration::hours(4),
    }
}

/// A sighting at an explicit position, `minutes` before `base_time()`.
pub fn sighting_at(id: &str, lng: f64, lat: f64, minutes: i64) -> Sighting {
    Sighting {
        position: LngLat::new(lng, lat),
        ..sighting_aged(id, base_time(), minutes)
    }
}

pub fn record_aged(id: &str, now: DateTime<Utc>, minutes: i64) -> SightingRecord {
    sighting_aged(id, now, minutes).to_record()
}

#[derive(Default)]
pub struct MemoryStorage {
    pub records: Mutex<Vec<SightingRecord>>,
    pub uploads: Mutex<Vec<(String, usize, String)>>,
    pub submitted: Mutex<Vec<NewSighting>>,
    pub fail_fetch: AtomicBool,
    pub fail_upload: AtomicBool,
    pub fail_submit: AtomicBool,
}

impl MemoryStorage {
    pub fn with_records(records: Vec<SightingRecord>) -> Self {
        let storage = Self::default();
        *storage.records.lock().unwrap() = records;
        storage
    }

    /// Adds a row as the newest one.
    pub fn push(&self, record: SightingRecord) {
        self.records.lock().unwrap().insert(0, record);
    }

    fn unavailable() -> StorageError {
        StorageError::Status { status: 503, body: "unavailable".into() }
    }
}

impl SightingStore for MemoryStorage {
    async fn fetch_recent(&self) -> Result<Vec<SightingRecord>, StorageError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn fetch_latest(&self) -> Result<Option<SightingRecord>, StorageError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self.records.lock().unwrap().first().cloned())
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<SightingRecord>, StorageError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut records: Vec<SightingRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn submit(&self, sighting: &NewSighting) -> Result<SightingRecord, StorageError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.submitted.lock().unwrap().push(sighting.clone());
        let now = Utc::now();
        let id = format!("new-{}", self.submitted.lock().unwrap().len());
        let record = SightingRecord {
            id,
            lng: sighting.lng,
            lat: sighting.lat,
            description: sighting.description.clone(),
            image_url: sighting.image_url.clone(),
            created_at: now,
            expires_at: now + Duration::hours(4),
        };
        self.push(record.clone());
        Ok(record)
    }

    async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), bytes.len(), content_type.to_string()));
        Ok(format!("memory://{filename}"))
    }
}

/// Translator whose output is `"<prefix><text>"`, optionally delayed per target locale.
pub struct ScriptedTranslator {
    prefix: Option<String>,
    delays: HashMap<Locale, std::time::Duration>,
    calls: AtomicUsize,
}

impl ScriptedTranslator {
    pub fn failing() -> Self {
        Self { prefix: None, delays: HashMap::new(), calls: AtomicUsize::new(0) }
    }

    pub fn prefixing(prefix: &str) -> Self {
        Self { prefix: Some(prefix.to_string()), delays: HashMap::new(), calls: AtomicUsize::new(0) }
    }

    /// Prefixes with the target locale code, e.g. `es:`.
    pub fn by_locale() -> Self {
        Self { prefix: Some(String::new()), delays: HashMap::new(), calls: AtomicUsize::new(0) }
    }

    pub fn with_delay(mut self, locale: Locale, delay: std::time::Duration) -> Self {
        self.delays.insert(locale, delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for ScriptedTranslator {
    async fn translate(&self, text: &str, _from: Locale, to: Locale) -> Result<String, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&to) {
            tokio::time::sleep(*delay).await;
        }
        match &self.prefix {
            None => Err(TranslateError::Other("scripted failure".into())),
            Some(p) if p.is_empty() => Ok(format!("{}:{}", to.code(), text)),
            Some(p) => Ok(format!("{p}{text}")),
        }
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub markers: HashMap<MarkerId, MarkerSpec>,
    pub banners: HashMap<Banner, String>,
    pub camera: Option<Viewport>,
    pub removed: usize,
    next_id: u64,
}

impl RecordingSurface {
    pub fn single_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .markers
            .values()
            .filter_map(|m| match &m.kind {
                crate::render::MarkerKind::Single { sighting, .. } => Some(sighting.0.clone()),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    pub fn popup_for(&self, id: &str) -> Option<&PopupContent> {
        self.markers.values().find_map(|m| match &m.kind {
            crate::render::MarkerKind::Single { sighting, .. } if sighting.0 == id => m.popup.as_ref(),
            _ => None,
        })
    }
}

impl MapSurface for RecordingSurface {
    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerId {
        self.next_id += 1;
        let id = MarkerId(self.next_id);
        self.markers.insert(id, spec);
        id
    }

    fn remove_marker(&mut self, id: MarkerId) {
        if self.markers.remove(&id).is_some() {
            self.removed += 1;
        }
    }

    fn set_popup(&mut self, id: MarkerId, popup: PopupContent) {
        if let Some(marker) = self.markers.get_mut(&id) {
            marker.popup = Some(popup);
        }
    }

    fn show_banner(&mut self, banner: Banner, text: &str) {
        self.banners.insert(banner, text.to_string());
    }

    fn hide_banner(&mut self, banner: Banner) {
        self.banners.remove(&banner);
    }

    fn move_camera(&mut self, viewport: Viewport) {
        self.camera = Some(viewport);
    }
}

pub struct FixedLocator {
    pub result: Result<LngLat, LocationError>,
    pub delay: std::time::Duration,
}

impl FixedLocator {
    pub fn at(position: LngLat) -> Self {
        Self { result: Ok(position), delay: std::time::Duration::ZERO }
    }

    pub fn failing(error: LocationError) -> Self {
        Self { result: Err(error), delay: std::time::Duration::ZERO }
    }
}

impl Geolocator for FixedLocator {
    async fn current_position(&self) -> Result<LngLat, LocationError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}
