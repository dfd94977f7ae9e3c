use crate::error::TranslateError;
use crate::i18n::Locale;
use log::debug;
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_CACHE_CAPACITY: usize = 500;
pub const DEFAULT_ENDPOINT: &str = "https://api.mymemory.translated.net/get";

pub trait Translator: Send + Sync {
    fn translate(
        &self,
        text: &str,
        from: Locale,
        to: Locale,
    ) -> impl Future<Output = Result<String, TranslateError>> + Send;
}

#[derive(Deserialize)]
struct MyMemoryResponse {
    #[serde(rename = "responseData")]
    response_data: Option<MyMemoryData>,
    #[serde(rename = "responseStatus", default)]
    response_status: serde_json::Value,
}

#[derive(Deserialize)]
struct MyMemoryData {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
}

/// Client for a MyMemory-compatible `GET ?q=..&langpair=from|to` endpoint.
pub struct MyMemoryTranslator {
    client: Client,
    endpoint: String,
}

impl MyMemoryTranslator {
    pub fn new(endpoint: &str) -> Result<Self, TranslateError> {
        let client = Client::builder().timeout(Duration::from_secs(8)).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl Translator for MyMemoryTranslator {
    async fn translate(&self, text: &str, from: Locale, to: Locale) -> Result<String, TranslateError> {
        let langpair = format!("{}|{}", from.code(), to.code());
        let response: MyMemoryResponse = self
            .client
            .get(&self.endpoint)
            .query(&[("q", text), ("langpair", langpair.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The service reports quota and language errors in-band.
        let status = response.response_status.as_u64().unwrap_or(200);
        if status != 200 {
            return Err(TranslateError::Other(format!("service status {status}")));
        }

        let translated = response
            .response_data
            .and_then(|d| d.translated_text)
            .map(|t| decode_entities(&t))
            .filter(|t| !t.trim().is_empty())
            .ok_or(TranslateError::Empty)?;
        Ok(translated)
    }
}

/// The service escapes punctuation as HTML entities; popups want plain text.
fn decode_entities(text: &str) -> String {
    let fragment = Html::parse_fragment(text);
    fragment.root_element().text().collect::<String>()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    from: Locale,
    to: Locale,
    text: String,
}

/// Fixed-capacity memo evicting the oldest insertion first.
#[derive(Debug)]
pub struct TranslationCache {
    capacity: usize,
    entries: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, text: &str, from: Locale, to: Locale) -> Option<&str> {
        let key = CacheKey { from, to, text: text.to_string() };
        self.entries.get(&key).map(String::as_str)
    }

    pub fn insert(&mut self, text: &str, from: Locale, to: Locale, translated: String) {
        let key = CacheKey { from, to, text: text.to_string() };
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = translated;
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, translated);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Memoizing wrapper whose `translate` never fails: any error yields the
/// original text. Failures are not cached.
pub struct CachedTranslator<T> {
    inner: T,
    cache: Mutex<TranslationCache>,
}

impl<T: Translator> CachedTranslator<T> {
    pub fn new(inner: T, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(TranslationCache::new(capacity)),
        }
    }

    pub async fn translate(&self, text: &str, from: Locale, to: Locale) -> String {
        if from == to || text.trim().is_empty() {
            return text.to_string();
        }

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(text, from, to) {
                return hit.to_string();
            }
        }

        match self.inner.translate(text, from, to).await {
            Ok(translated) => {
                self.cache
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(text, from, to, translated.clone());
                translated
            }
            Err(e) => {
                debug!("Translation {}->{} failed, showing original: {}", from, to, e);
                text.to_string()
            }
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
