//! Capability injection.
//!
//! The VM never performs IO on its own: storage, HTTP, LLM calls and vector
//! operations are opaque async traits owned by the host and registered per
//! run. A missing capability surfaces as a monadic error; a thrown one is
//! wrapped with its message preserved.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait StoreCapability: Send + Sync {
    async fn get(&self, key: &str) -> Result<Value>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

#[async_trait]
pub trait FetchCapability: Send + Sync {
    /// `options` carries `method`, `headers`, `body` like the web fetch API.
    async fn fetch(&self, url: &str, options: Value) -> Result<Value>;
}

#[async_trait]
pub trait LlmCapability: Send + Sync {
    async fn predict(&self, prompt: &str, options: Value) -> Result<Value>;
}

#[async_trait]
pub trait VectorCapability: Send + Sync {
    async fn search(&self, query: &Value, options: Value) -> Result<Value>;
    async fn embed(&self, text: &str) -> Result<Value>;
}

/// The capability set for one run. Cloning shares the underlying
/// implementations.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub store: Option<Arc<dyn StoreCapability>>,
    pub fetch: Option<Arc<dyn FetchCapability>>,
    pub llm: Option<Arc<dyn LlmCapability>>,
    pub vector: Option<Arc<dyn VectorCapability>>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("store", &self.store.is_some())
            .field("fetch", &self.fetch.is_some())
            .field("llm", &self.llm.is_some())
            .field("vector", &self.vector.is_some())
            .finish()
    }
}

impl Capabilities {
    pub fn with_store(mut self, store: Arc<dyn StoreCapability>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_fetch(mut self, fetch: Arc<dyn FetchCapability>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmCapability>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_vector(mut self, vector: Arc<dyn VectorCapability>) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// Map-backed store installed automatically when a run has no store
/// capability. Scoped to the run that created it.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreCapability for MemoryStore {
    async fn get(&self, key: &str) -> Result<Value> {
        Ok(self
            .map
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.map.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

/// Outbound HTTP via ureq, run on the blocking pool. This is the default
/// fetch capability the CLI wires up.
pub struct UreqFetch {
    timeout: std::time::Duration,
}

impl Default for UreqFetch {
    fn default() -> Self {
        UreqFetch {
            timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl UreqFetch {
    pub fn new(timeout: std::time::Duration) -> Self {
        UreqFetch { timeout }
    }

    fn fetch_blocking(url: &str, options: &Value, timeout: std::time::Duration) -> Result<Value> {
        let method = options
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let mut request = agent.request(&method, url);
        if let Some(headers) = options.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.set(name, v);
                }
            }
        }
        let response = match options.get("body") {
            Some(Value::String(body)) => request.send_string(body),
            Some(body) if !body.is_null() => request.send_json(body.clone()),
            _ => request.call(),
        };
        let response = match response {
            Ok(r) => r,
            Err(ureq::Error::Status(status, r)) => {
                tracing::debug!(url, status, "fetch returned error status");
                r
            }
            Err(e) => return Err(anyhow!("fetch failed: {}", e)),
        };
        let status = response.status();
        let content_type = response.content_type().to_string();
        let body = response
            .into_string()
            .map_err(|e| anyhow!("fetch body read failed: {}", e))?;
        let json_body: Value = if content_type.contains("json") {
            serde_json::from_str(&body).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        Ok(json!({
            "status": status,
            "ok": (200..300).contains(&status),
            "body": body,
            "json": json_body,
        }))
    }
}

#[async_trait]
impl FetchCapability for UreqFetch {
    async fn fetch(&self, url: &str, options: Value) -> Result<Value> {
        let url = url.to_string();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || Self::fetch_blocking(&url, &options, timeout))
            .await
            .map_err(|e| anyhow!("fetch task failed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), Value::Null);
        store.set("k", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), json!({"a": 1}));
    }

    #[test]
    fn capabilities_default_is_empty() {
        let caps = Capabilities::default();
        assert!(caps.store.is_none());
        assert!(caps.fetch.is_none());
        let caps = caps.with_store(Arc::new(MemoryStore::new()));
        assert!(caps.store.is_some());
    }
}
