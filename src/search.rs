use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::Settings;
use crate::constants;
use crate::error::{Result, WebwiseError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub link: String,
    pub snippet: String,
}

// Google Custom Search response, only the fields we read
#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize, Debug)]
struct SearchItem {
    link: String,
    #[serde(default)]
    snippet: Option<String>,
}

type CacheKey = (String, u32);

const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(constants::SEARCH_CACHE_CAPACITY) {
    Some(capacity) => capacity,
    None => panic!("search cache capacity must be non-zero"),
};

/// Client for the remote web-search API.
#[derive(Clone, Debug)]
pub struct SearchClient {
    http: Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
    cache: Arc<Mutex<LruCache<CacheKey, Vec<SearchResult>>>>,
}

impl SearchClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let (api_key, engine_id) = settings.google_credentials()?;
        Ok(Self {
            http: Client::new(),
            endpoint: format!(
                "{}/customsearch/v1",
                settings.google_search_url.trim_end_matches('/')
            ),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            cache: Arc::new(Mutex::new(LruCache::new(DEFAULT_CACHE_CAPACITY))),
        })
    }

    /// Replaces the result cache with an empty one holding `capacity` queries.
    pub fn with_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache = Arc::new(Mutex::new(LruCache::new(capacity)));
        self
    }

    /// Returns up to `num_results` hits in ranking order.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, num_results: u32) -> Result<Vec<SearchResult>> {
        let key = (query.to_string(), num_results);
        let cached = self.lock_cache().get(&key).cloned();
        if let Some(hit) = cached {
            debug!("Search cache hit");
            return Ok(hit);
        }

        let num = num_results.to_string();
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Search API request failed");
            return Err(WebwiseError::Api {
                service: "search",
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response.json::<SearchResponse>().await?;
        let results: Vec<SearchResult> = parsed
            .items
            .into_iter()
            .map(|item| SearchResult {
                link: item.link,
                snippet: item.snippet.unwrap_or_default(),
            })
            .collect();

        info!(count = results.len(), "Search returned results");
        self.lock_cache().put(key, results.clone());
        Ok(results)
    }

    pub fn cached_queries(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, Vec<SearchResult>>> {
        // A poisoned cache is still a valid cache
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
