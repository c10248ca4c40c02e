/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::has_type;
use crate::attachments::MediaCache;
use crate::error::{Completion, TaskError};
use crate::record::{MetaKey, RecordFilter, RecordUpdate};
use crate::resolver::RemoteResolver;
use crate::store::RecordStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

const MAX_HTML_BYTES: usize = 1024 * 1024;

/// Link preview metadata for one URL; `None` when the page has no usable
/// OpenGraph tags.
#[async_trait]
pub trait OpenGraph: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<Value>>;
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)<a\s([^>]*)>"#).expect("static regex"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex"))
}

fn meta_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)<meta\s([^>]*)>"#).expect("static regex"))
}

fn attributes(tag_body: &str) -> Vec<(String, String)> {
    attr_re()
        .captures_iter(tag_body)
        .map(|c| {
            let name = c[1].to_ascii_lowercase();
            let value = c.get(2).or_else(|| c.get(3)).map(|m| m.as_str()).unwrap_or_default();
            (name, unescape(value))
        })
        .collect()
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// External links of a note's HTML content. Mention and hashtag links (listed
/// in `tag` or marked as such in the markup) are skipped.
pub fn links_from_note(note: &Value) -> Vec<String> {
    let Some(content) = note.get("content").and_then(|c| c.as_str()) else {
        return Vec::new();
    };
    let tag_hrefs: Vec<&str> = match note.get("tag") {
        Some(Value::Array(tags)) => tags
            .iter()
            .filter_map(|t| t.get("href").and_then(|h| h.as_str()))
            .collect(),
        Some(t) => t.get("href").and_then(|h| h.as_str()).into_iter().collect(),
        None => Vec::new(),
    };

    let mut out: Vec<String> = Vec::new();
    for cap in anchor_re().captures_iter(content) {
        let attrs = attributes(&cap[1]);
        let get = |name: &str| attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        let Some(href) = get("href") else { continue };
        if !(href.starts_with("https://") || href.starts_with("http://")) {
            continue;
        }
        let class = get("class").unwrap_or_default();
        if class.contains("mention") || class.contains("hashtag") || get("rel") == Some("tag") {
            continue;
        }
        if tag_hrefs.contains(&href) || out.iter().any(|l| l == href) {
            continue;
        }
        out.push(href.to_string());
    }
    out
}

/// `og:*` properties of an HTML page as a JSON object with the `og:` prefix
/// removed. `None` when there is no `og:title`.
pub fn parse_og_tags(url: &str, html: &str) -> Option<Value> {
    let mut og = Map::new();
    for cap in meta_re().captures_iter(html) {
        let attrs = attributes(&cap[1]);
        let get = |name: &str| attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        let Some(prop) = get("property").or_else(|| get("name")) else { continue };
        let Some(key) = prop.strip_prefix("og:") else { continue };
        let Some(content) = get("content") else { continue };
        if key.is_empty() || content.trim().is_empty() {
            continue;
        }
        og.entry(key.to_string())
            .or_insert_with(|| Value::String(content.trim().to_string()));
    }
    if !og.contains_key("title") {
        return None;
    }
    og.entry("url".to_string())
        .or_insert_with(|| Value::String(url.to_string()));
    Some(Value::Object(og))
}

#[derive(Clone)]
pub struct HttpOpenGraph {
    client: reqwest::Client,
}

impl HttpOpenGraph {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OpenGraph for HttpOpenGraph {
    async fn fetch(&self, url: &str) -> Result<Option<Value>> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "text/html")
            .send()
            .await
            .with_context(|| format!("fetch page: {url}"))?
            .error_for_status()
            .with_context(|| format!("page not ok: {url}"))?;
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/html"))
            .unwrap_or(false);
        if !is_html {
            return Ok(None);
        }
        let bytes = resp.bytes().await?;
        let html = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_HTML_BYTES)]);
        Ok(parse_og_tags(url, &html))
    }
}

/// Link previews for notes created remotely.
#[derive(Clone)]
pub struct LinkPreviews {
    resolver: Arc<dyn RemoteResolver>,
    store: Arc<dyn RecordStore>,
    og: Arc<dyn OpenGraph>,
    media: Arc<dyn MediaCache>,
}

impl LinkPreviews {
    pub fn new(
        resolver: Arc<dyn RemoteResolver>,
        store: Arc<dyn RecordStore>,
        og: Arc<dyn OpenGraph>,
        media: Arc<dyn MediaCache>,
    ) -> Self {
        Self {
            resolver,
            store,
            og,
            media,
        }
    }

    pub async fn fetch_og_meta(&self, iri: &str) -> Result<Completion, TaskError> {
        if let Some(rec) = self.store.find_one(&RecordFilter::by_remote_id(iri)).await? {
            if rec.is_tombstoned() {
                debug!(iri, "activity tombstoned, no link previews");
                return Ok(Completion::skipped());
            }
        }

        let activity = self.resolver.resolve(iri, false).await?;
        if !has_type(&activity, "Create") {
            return Ok(Completion::skipped());
        }
        let note = match activity.get("object") {
            Some(Value::String(object_iri)) => self.resolver.resolve(object_iri, false).await?,
            Some(obj @ Value::Object(_)) => obj.clone(),
            _ => return Ok(Completion::skipped()),
        };

        let mut metadata = Vec::new();
        for link in links_from_note(&note) {
            match self.og.fetch(&link).await {
                Ok(Some(og)) => metadata.push(og),
                Ok(None) => debug!(link = %link, "no opengraph metadata"),
                Err(e) => warn!(link = %link, "opengraph fetch failed: {e:#}"),
            }
        }
        for og in &metadata {
            let Some(image) = og.get("image").and_then(|i| i.as_str()) else { continue };
            if let Err(e) = self.media.cache_og_image(image).await {
                warn!(iri, image, "og image cache failed: {e:#}");
            }
        }

        let n = self
            .store
            .update_one(
                &RecordFilter::by_remote_id(iri).live(),
                &RecordUpdate::new().set(MetaKey::OgMetadata, Value::Array(metadata.clone())),
            )
            .await?;
        info!(iri, links = metadata.len(), updated = n, "opengraph metadata fetched");
        Ok(Completion::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Outcome;
    use crate::record::{ActivityRecord, BoxKind};
    use crate::testing::{temp_store, FakeMedia, FakeOpenGraph, FakeResolver};
    use serde_json::json;

    #[test]
    fn links_skip_mentions_and_hashtags() {
        let note = json!({
            "content": "<p>hi <span class=\"h-card\"><a href=\"https://b.example/@bob\" class=\"u-url mention\">@bob</a></span> \
                        see <a href=\"https://news.example/a?x=1&amp;y=2\" rel=\"nofollow\">this</a> \
                        <a href=\"https://b.example/tags/rust\" rel=\"tag\">#rust</a> \
                        <a href='https://c.example/u/carol'>carol</a> \
                        <a href=\"https://news.example/a?x=1&amp;y=2\">again</a></p>",
            "tag": [{"type": "Mention", "href": "https://c.example/u/carol"}]
        });
        assert_eq!(links_from_note(&note), vec!["https://news.example/a?x=1&y=2".to_string()]);
    }

    #[test]
    fn og_tags_are_extracted() {
        let html = r#"<html><head>
            <meta property="og:title" content="A &amp; B">
            <meta content="https://news.example/i.png" property="og:image" />
            <meta name="description" content="plain">
            </head></html>"#;
        let og = parse_og_tags("https://news.example/a", html).unwrap();
        assert_eq!(og["title"], "A & B");
        assert_eq!(og["image"], "https://news.example/i.png");
        assert_eq!(og["url"], "https://news.example/a");
        assert!(parse_og_tags("https://x.example", "<meta name=\"description\" content=\"d\">").is_none());
    }

    #[tokio::test]
    async fn previews_are_stored_and_images_cached() {
        let (_dir, store) = temp_store();
        let resolver = Arc::new(FakeResolver::default());
        let create = json!({"id": "https://b.example/c/1", "type": "Create", "actor": "https://b.example/u",
            "object": {"id": "https://b.example/n/1", "type": "Note",
                       "content": "<a href=\"https://news.example/a\">a</a> <a href=\"https://news.example/down\">b</a>"}});
        resolver.insert(create.clone());
        store.insert_record(&ActivityRecord::new(BoxKind::Inbox, create)).await.unwrap();
        let og = Arc::new(FakeOpenGraph::default());
        og.insert("https://news.example/a", json!({"title": "A", "image": "https://news.example/a.png"}));
        let media = Arc::new(FakeMedia::default());

        let previews = LinkPreviews::new(resolver, store.clone(), og, media.clone());
        let done = previews.fetch_og_meta("https://b.example/c/1").await.unwrap();
        assert_eq!(done.outcome, Outcome::Done);
        let rec = store.find_one(&RecordFilter::by_remote_id("https://b.example/c/1")).await.unwrap().unwrap();
        assert_eq!(rec.meta_get(MetaKey::OgMetadata), Some(&json!([{"title": "A", "image": "https://news.example/a.png"}])));
        assert_eq!(media.og_images(), vec!["https://news.example/a.png".to_string()]);
    }

    #[tokio::test]
    async fn tombstoned_activity_gets_no_previews() {
        let (_dir, store) = temp_store();
        let resolver = Arc::new(FakeResolver::default());
        let create = json!({"id": "https://b.example/c/2", "type": "Create", "actor": "https://b.example/u",
            "object": {"id": "https://b.example/n/2", "type": "Note",
                       "content": "<a href=\"https://news.example/a\">a</a>"}});
        resolver.insert(create.clone());
        let rec = ActivityRecord::new(BoxKind::Inbox, create).with_meta(MetaKey::Deleted, json!(true));
        store.insert_record(&rec).await.unwrap();
        let og = Arc::new(FakeOpenGraph::default());
        og.insert("https://news.example/a", json!({"title": "A", "image": "https://news.example/a.png"}));
        let media = Arc::new(FakeMedia::default());

        let previews = LinkPreviews::new(resolver, store.clone(), og, media.clone());
        let done = previews.fetch_og_meta("https://b.example/c/2").await.unwrap();
        assert_eq!(done.outcome, Outcome::DoneNoRetry);
        assert!(media.og_images().is_empty());
        let rec = store.find_one(&RecordFilter::by_remote_id("https://b.example/c/2")).await.unwrap().unwrap();
        assert!(rec.meta_get(MetaKey::OgMetadata).is_none());
    }

    #[tokio::test]
    async fn non_create_is_skipped() {
        let (_dir, store) = temp_store();
        let resolver = Arc::new(FakeResolver::default());
        resolver.insert(json!({"id": "https://b.example/l/1", "type": "Like", "object": "https://x.example/n"}));
        let previews = LinkPreviews::new(resolver, store, Arc::new(FakeOpenGraph::default()), Arc::new(FakeMedia::default()));
        assert_eq!(previews.fetch_og_meta("https://b.example/l/1").await.unwrap().outcome, Outcome::DoneNoRetry);
    }
}
