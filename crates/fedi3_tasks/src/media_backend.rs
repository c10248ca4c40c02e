/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::attachments::MediaCache;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sha2::Digest as _;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Downloads larger than this are refused.
    pub max_media_bytes: Option<u64>,
    /// Longest side of generated thumbnails, in pixels.
    pub thumbnail_size: Option<u32>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_media_bytes: Some(20 * 1024 * 1024),
            thumbnail_size: Some(400),
        }
    }
}

pub fn media_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("media")
}

/// URL of an attachment or icon: a string, an object with `url`/`href`, or
/// an array of links (first usable entry wins).
pub fn media_url(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(m) => m
            .get("url")
            .and_then(media_url)
            .or_else(|| m.get("href").and_then(media_url)),
        Value::Array(arr) => arr.iter().find_map(media_url),
        _ => None,
    }
}

/// Stored file name for a remote URL: content-addressed by the URL, with an
/// extension guessed from the media type or the URL path.
pub fn stored_name(url: &str, media_type: Option<&str>) -> String {
    let mut h = sha2::Sha256::new();
    h.update(url.as_bytes());
    let digest = hex::encode(h.finalize());
    let ext = media_type
        .and_then(|m| mime_guess::get_mime_extensions_str(m))
        .and_then(|exts| exts.first().copied())
        .map(str::to_string)
        .or_else(|| {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            Path::new(path)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        })
        .unwrap_or_else(|| "bin".to_string());
    format!("{}.{ext}", &digest[..40])
}

/// Downloads remote media into `data_dir/media` and writes PNG thumbnails for
/// images. Files already on disk are not fetched again.
#[derive(Clone)]
pub struct LocalMediaCache {
    client: reqwest::Client,
    dir: PathBuf,
    max_bytes: u64,
    thumbnail_size: u32,
}

impl LocalMediaCache {
    pub fn new(client: reqwest::Client, data_dir: &Path, cfg: &MediaConfig) -> Self {
        let defaults = MediaConfig::default();
        Self {
            client,
            dir: media_dir(data_dir),
            max_bytes: cfg
                .max_media_bytes
                .or(defaults.max_media_bytes)
                .unwrap_or(20 * 1024 * 1024),
            thumbnail_size: cfg
                .thumbnail_size
                .or(defaults.thumbnail_size)
                .unwrap_or(400)
                .max(16),
        }
    }

    async fn store(&self, url: &str, media_type: Option<&str>, thumbnail: bool) -> Result<PathBuf> {
        let name = stored_name(url, media_type);
        let path = self.dir.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(url, "media already cached");
            return Ok(path);
        }

        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetch media: {url}"))?
            .error_for_status()
            .with_context(|| format!("media not ok: {url}"))?;
        if resp.content_length().unwrap_or(0) > self.max_bytes {
            return Err(anyhow!("media too large: {url}"));
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .with_context(|| format!("read media: {url}"))?
        {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(anyhow!("media too large: {url}"));
            }
            bytes.extend_from_slice(&chunk);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create media dir: {}", self.dir.display()))?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("write media {}", path.display()))?;

        let is_image = media_type
            .map(|m| m.starts_with("image/"))
            .unwrap_or_else(|| {
                mime_guess::from_path(&path)
                    .first()
                    .map(|m| m.type_() == mime_guess::mime::IMAGE)
                    .unwrap_or(false)
            });
        if thumbnail && is_image {
            let thumb_path = self.dir.join(format!("{name}.thumb.png"));
            let size = self.thumbnail_size;
            tokio::task::spawn_blocking(move || write_thumbnail(&bytes, size, &thumb_path))
                .await??;
        }
        Ok(path)
    }
}

#[async_trait]
impl MediaCache for LocalMediaCache {
    async fn cache_actor_icon(&self, actor_id: &str, icon_url: &str) -> Result<()> {
        let path = self.store(icon_url, None, true).await?;
        debug!(actor_id, path = %path.display(), "actor icon cached");
        Ok(())
    }

    async fn cache_attachment(&self, attachment: &Value, remote_id: &str) -> Result<()> {
        let url = media_url(attachment).ok_or_else(|| anyhow!("attachment without url"))?;
        let media_type = attachment.get("mediaType").and_then(|v| v.as_str());
        let path = self.store(&url, media_type, true).await?;
        debug!(remote_id, path = %path.display(), "attachment cached");
        Ok(())
    }

    async fn cache_og_image(&self, url: &str) -> Result<()> {
        self.store(url, None, true).await?;
        Ok(())
    }
}

fn write_thumbnail(bytes: &[u8], size: u32, path: &Path) -> Result<()> {
    let img = image::load_from_memory(bytes).context("decode image")?;
    let thumb = img.thumbnail(size, size);
    thumb
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("write thumbnail {}", path.display()))?;
    Ok(())
}
