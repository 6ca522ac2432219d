use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::error::{HardcoverError, Result};

pub const ENDPOINT: &str = "https://api.hardcover.app/v1/graphql";
pub const USER_AGENT: &str = concat!("hardcover-client/", env!("CARGO_PKG_VERSION"));

// ─── GraphqlClient ────────────────────────────────────────────────────────────

/// The one execute primitive both the search provider and the sync client go
/// through: POST `{query, variables}`, bearer auth, and a combined HTTP-status
/// plus `errors`-array check before handing back `data`.
pub struct GraphqlClient {
    client: reqwest::Client,
    endpoint: String,
}

impl GraphqlClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub async fn execute(&self, token: &str, query: &str, variables: Value) -> Result<Value> {
        let payload = json!({
            "query": query,
            "variables": variables,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HardcoverError::Api(
                self.endpoint.clone(),
                format!("HTTP {}: {body}", status.as_u16()),
            ));
        }

        let body: Value = resp
            .text()
            .await
            .map_err(HardcoverError::Http)
            .and_then(|text| {
                serde_json::from_str(&text).map_err(|e| HardcoverError::Parse(e.to_string()))
            })?;

        if let Some(errors) = body.get("errors") {
            return Err(HardcoverError::Graphql(errors.to_string()));
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }
}

impl Default for GraphqlClient {
    fn default() -> Self {
        Self::new(ENDPOINT)
    }
}

/// Walk `path` through nested objects, `None` as soon as a key is absent or
/// the current node is not an object. Replaces ad hoc indexing so missing or
/// misshapen payloads degrade instead of panicking.
pub fn pluck<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

pub fn pluck_str(value: &Value, path: &[&str]) -> String {
    pluck(value, path)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Numeric ids show up both as JSON numbers and as quoted strings depending
/// on the endpoint; accept either.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

// ─── TtlCache ─────────────────────────────────────────────────────────────────

struct CacheEntry<T> {
    stored_at: u64, // Unix timestamp secs
    value: T,
}

/// In-memory key → (value, timestamp) cache with lazy time-based eviction:
/// expiry is checked on read and the stale entry dropped before reporting a
/// miss. Owned by the client instance rather than process-global.
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    ttl: Duration,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        if now_secs().saturating_sub(entry.stored_at) > self.ttl.as_secs() {
            entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn set(&self, key: &str, value: T) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                stored_at: now_secs(),
                value,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// Shift an entry's timestamp into the past so expiry paths are testable
    /// without a clock abstraction.
    #[cfg(test)]
    pub(crate) async fn backdate(&self, key: &str, by: Duration) {
        if let Some(entry) = self.entries.lock().await.get_mut(key) {
            entry.stored_at = entry.stored_at.saturating_sub(by.as_secs());
        }
    }
}
