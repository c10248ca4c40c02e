/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::has_type;
use crate::error::FetchError;
use crate::http_sig::Signer;
use async_trait::async_trait;
use http::{HeaderMap, Method, Uri};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::debug;

pub const AP_ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Fetches remote documents by IRI.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    /// `bypass_cache` forces a network fetch and refreshes the cached copy.
    async fn resolve(&self, iri: &str, bypass_cache: bool) -> Result<Value, FetchError>;
}

#[derive(Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    signer: Option<Signer>,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<String, CachedDoc>>>,
}

#[derive(Clone)]
struct CachedDoc {
    doc: Value,
    expires_at: std::time::Instant,
}

impl HttpResolver {
    pub fn new(client: reqwest::Client, signer: Option<Signer>, ttl: Duration) -> Self {
        Self {
            client,
            signer,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_cached(&self, iri: &str) -> Option<Value> {
        let mut cache = self.cache.write().await;
        let now = std::time::Instant::now();
        if let Some(v) = cache.get(iri) {
            if v.expires_at > now {
                return Some(v.doc.clone());
            }
        }
        cache.remove(iri);
        None
    }

    async fn put_cached(&self, iri: &str, doc: Value) {
        if self.ttl.is_zero() {
            return;
        }
        let now = std::time::Instant::now();
        let mut cache = self.cache.write().await;
        cache.retain(|_, v| v.expires_at > now);
        cache.insert(
            iri.to_string(),
            CachedDoc {
                doc,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn fetch(&self, iri: &str) -> Result<Value, FetchError> {
        let transient = |reason: String| FetchError::Transient {
            iri: iri.to_string(),
            reason,
        };

        let mut req = self.client.get(iri).header("Accept", AP_ACCEPT);
        if let Some(signer) = &self.signer {
            let uri: Uri = iri
                .parse()
                .map_err(|_| FetchError::NotAnActivity(iri.to_string()))?;
            let mut headers = HeaderMap::new();
            signer
                .sign(&Method::GET, &uri, &mut headers, &[])
                .map_err(|e| transient(format!("sign: {e:#}")))?;
            req = req.headers(headers);
        }

        let resp = req.send().await.map_err(|e| transient(e.to_string()))?;
        if let Some(err) = FetchError::from_status(iri, resp.status().as_u16()) {
            return Err(err);
        }
        let bytes = resp.bytes().await.map_err(|e| transient(e.to_string()))?;
        classify_document(iri, &bytes)
    }
}

#[async_trait]
impl RemoteResolver for HttpResolver {
    async fn resolve(&self, iri: &str, bypass_cache: bool) -> Result<Value, FetchError> {
        if !bypass_cache {
            if let Some(doc) = self.get_cached(iri).await {
                debug!(iri, "resolver cache hit");
                return Ok(doc);
            }
        }
        let doc = self.fetch(iri).await?;
        self.put_cached(iri, doc.clone()).await;
        Ok(doc)
    }
}

/// A fetched body is only useful when it is a JSON object with `id` and
/// `type`; a `Tombstone` means the remote deleted it.
pub fn classify_document(iri: &str, bytes: &[u8]) -> Result<Value, FetchError> {
    let doc: Value = serde_json::from_slice(bytes)
        .map_err(|_| FetchError::NotAnActivity(iri.to_string()))?;
    if !doc.is_object() || doc.get("id").is_none() || doc.get("type").is_none() {
        return Err(FetchError::NotAnActivity(iri.to_string()));
    }
    if has_type(&doc, "Tombstone") {
        return Err(FetchError::Gone(iri.to_string()));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstones_are_gone() {
        let err = classify_document("https://b.example/n/1", br#"{"id":"x","type":"Tombstone"}"#)
            .unwrap_err();
        assert!(matches!(err, FetchError::Gone(_)));
    }

    #[test]
    fn documents_need_id_and_type() {
        let bodies: [&[u8]; 3] = [b"<html></html>", br#"{"type":"Note"}"#, br#"["x"]"#];
        for body in bodies {
            let err = classify_document("https://b.example/n/1", body).unwrap_err();
            assert!(matches!(err, FetchError::NotAnActivity(_)));
        }
        let ok = classify_document("https://b.example/n/1", br#"{"id":"x","type":"Note"}"#).unwrap();
        assert_eq!(ok["type"], "Note");
    }

    #[tokio::test]
    async fn cache_serves_fresh_entries() {
        let resolver = HttpResolver::new(reqwest::Client::new(), None, Duration::from_secs(60));
        let doc = serde_json::json!({"id": "https://b.example/u/1", "type": "Person"});
        resolver.put_cached("https://b.example/u/1", doc.clone()).await;
        assert_eq!(resolver.resolve("https://b.example/u/1", false).await.unwrap(), doc);
        assert_eq!(resolver.get_cached("https://b.example/u/2").await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_swept_on_insert() {
        let resolver = HttpResolver::new(reqwest::Client::new(), None, Duration::from_millis(20));
        for n in 0..3 {
            let iri = format!("https://b.example/u/{n}");
            resolver.put_cached(&iri, serde_json::json!({"id": iri, "type": "Person"})).await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        resolver
            .put_cached("https://b.example/u/9", serde_json::json!({"id": "https://b.example/u/9", "type": "Person"}))
            .await;
        let cache = resolver.cache.read().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("https://b.example/u/9"));
    }
}
