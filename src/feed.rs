use crate::error::StorageError;
use crate::record::{SightingId, SightingRecord, sightings_from_records};
use crate::storage::SightingStore;
use crate::store::LiveViewStore;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// "Something was inserted." Carries the id when the feed knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub id: Option<SightingId>,
}

/// A live subscription. Unsubscribing, or dropping it, stops delivery and
/// releases the channel.
pub struct Subscription {
    rx: mpsc::Receiver<ChangeNotification>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<ChangeNotification>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Next notification, or `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

pub trait ChangeFeed {
    fn subscribe(&self) -> Subscription;
}

/// Polls the storage collaborator and announces every row created since
/// the previous poll, oldest first.
pub struct PollingFeed<S> {
    storage: Arc<S>,
    period: Duration,
}

impl<S: SightingStore + 'static> PollingFeed<S> {
    pub fn new(storage: Arc<S>, period: Duration) -> Self {
        Self { storage, period }
    }
}

impl<S: SightingStore + 'static> ChangeFeed for PollingFeed<S> {
    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(32);
        let storage = Arc::clone(&self.storage);
        let period = self.period;
        let task = tokio::spawn(async move { poll_new_rows(storage, period, tx).await });
        Subscription::new(rx, Some(task))
    }
}

/// Newest creation time announced so far, and the ids announced at exactly
/// that time. Rows sharing the cursor timestamp are told apart by id.
#[derive(Debug, Default)]
struct Cursor {
    at: Option<DateTime<Utc>>,
    ids: HashSet<String>,
}

impl Cursor {
    /// Advances past `record`. Returns false when it was already announced.
    fn advance(&mut self, record: &SightingRecord) -> bool {
        match self.at {
            Some(at) if record.created_at < at => false,
            Some(at) if record.created_at == at => self.ids.insert(record.id.clone()),
            _ => {
                self.at = Some(record.created_at);
                self.ids.clear();
                self.ids.insert(record.id.clone());
                true
            }
        }
    }
}

async fn poll_new_rows<S: SightingStore>(
    storage: Arc<S>,
    period: Duration,
    tx: mpsc::Sender<ChangeNotification>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cursor = Cursor::default();

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return;
        }

        let fetched = match cursor.at {
            None => storage.fetch_latest().await.map(|r| r.into_iter().collect::<Vec<_>>()),
            Some(at) => storage.fetch_since(at).await,
        };
        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                warn!("Change feed poll failed: {}", e);
                continue;
            }
        };

        for record in records.into_iter().rev() {
            if !cursor.advance(&record) {
                continue;
            }
            let notification = ChangeNotification { id: Some(SightingId(record.id)) };
            if tx.send(notification).await.is_err() {
                debug!("Change feed receiver dropped, stopping poller");
                return;
            }
        }
    }
}

/// In-process feed driven by `notify`, for hosts that receive change events
/// through their own transport.
#[derive(Clone, Default)]
pub struct ChannelFeed {
    senders: Arc<Mutex<Vec<mpsc::Sender<ChangeNotification>>>>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers to every open subscription and returns how many accepted it.
    pub fn notify(&self, notification: ChangeNotification) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.try_send(notification.clone()).is_ok())
            .count()
    }

    pub fn active_subscribers(&self) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

impl ChangeFeed for ChannelFeed {
    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(32);
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Subscription::new(rx, None)
    }
}

/// Fetches every sighting at least as new as the newest one held and
/// inserts those not yet present. An empty store refetches only the newest
/// row. Returns how many were inserted.
pub async fn ingest_new<S: SightingStore>(
    storage: &S,
    store: &mut LiveViewStore,
) -> Result<usize, StorageError> {
    let records = match store.newest_created_at() {
        Some(since) => storage.fetch_since(since).await?,
        None => storage.fetch_latest().await?.into_iter().collect(),
    };

    let mut inserted = 0;
    for sighting in sightings_from_records(records) {
        if store.insert_if_new(sighting) {
            inserted += 1;
        }
    }
    if inserted > 1 {
        info!("Ingested {} new sightings", inserted);
    }
    Ok(inserted)
}
