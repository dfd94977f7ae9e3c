use crate::record::{Sighting, SightingId};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

/// Immutable view of the working set handed to readers.
pub type Snapshot = Arc<Vec<Sighting>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed,
}

/// The authoritative in-memory set of sightings, newest first.
///
/// Owned by a single writer. Readers take a `snapshot()`, which is never
/// affected by later inserts.
#[derive(Debug)]
pub struct LiveViewStore {
    sightings: Snapshot,
    ids: HashSet<SightingId>,
    state: LoadState,
}

impl Default for LiveViewStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveViewStore {
    pub fn new() -> Self {
        Self {
            sightings: Arc::new(Vec::new()),
            ids: HashSet::new(),
            state: LoadState::Pending,
        }
    }

    /// Replaces the working set wholesale. Duplicate ids keep their first occurrence.
    pub fn load_all(&mut self, sightings: Vec<Sighting>) {
        let mut ids = HashSet::with_capacity(sightings.len());
        let mut unique: Vec<Sighting> = sightings
            .into_iter()
            .filter(|s| ids.insert(s.id.clone()))
            .collect();
        unique.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        info!("Loaded {} sightings into live view", unique.len());
        self.sightings = Arc::new(unique);
        self.ids = ids;
        self.state = LoadState::Loaded;
    }

    /// Records a failed initial load. The store stays empty.
    pub fn mark_failed(&mut self) {
        self.sightings = Arc::new(Vec::new());
        self.ids.clear();
        self.state = LoadState::Failed;
    }

    /// Inserts unless the id is already present. Returns whether it was inserted.
    pub fn insert_if_new(&mut self, sighting: Sighting) -> bool {
        if self.ids.contains(&sighting.id) {
            debug!("Ignoring duplicate sighting {}", sighting.id);
            return false;
        }
        self.ids.insert(sighting.id.clone());

        let list = Arc::make_mut(&mut self.sightings);
        let at = list.partition_point(|s| s.created_at >= sighting.created_at);
        list.insert(at, sighting);

        // A live insert also proves the collaborator is reachable again.
        if self.state == LoadState::Failed {
            self.state = LoadState::Loaded;
        }
        true
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.sightings)
    }

    pub fn contains(&self, id: &SightingId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.sightings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sightings.is_empty()
    }

    pub fn load_state(&self) -> LoadState {
        self.state
    }

    /// Creation time of the newest sighting held.
    pub fn newest_created_at(&self) -> Option<DateTime<Utc>> {
        self.sightings.first().map(|s| s.created_at)
    }
}
