/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::keys::default_data_dir;
use crate::media_backend::MediaConfig;
use crate::storage_gc::GcConfig;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub bind: Option<String>,
    pub data_dir: Option<String>,
    /// Actor id of the local identity, e.g. `https://example.org/users/me`.
    pub local_actor_id: Option<String>,
    pub key_id: Option<String>,
    pub private_key_path: Option<String>,

    pub broker_url: Option<String>,
    /// Base URL the broker uses to call back into this service.
    pub callback_base_url: Option<String>,

    pub user_agent: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub resolver_cache_ttl_secs: Option<u64>,

    pub media: MediaConfig,
    pub gc: GcConfig,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            bind: Some("127.0.0.1:7992".to_string()),
            data_dir: None,
            local_actor_id: None,
            key_id: None,
            private_key_path: None,
            broker_url: Some("http://127.0.0.1:7991/".to_string()),
            callback_base_url: Some("http://127.0.0.1:7992".to_string()),
            user_agent: Some(format!("fedi3-tasks/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: Some(15),
            resolver_cache_ttl_secs: Some(60),
            media: MediaConfig::default(),
            gc: GcConfig::default(),
        }
    }
}

impl TasksConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: TasksConfig = serde_json::from_str(text).context("decode TasksConfig")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let actor = self
            .local_actor_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("local_actor_id missing"))?;
        if !(actor.starts_with("https://") || actor.starts_with("http://")) {
            return Err(anyhow!("local_actor_id must be an http(s) url: {actor}"));
        }
        Ok(())
    }

    pub fn local_actor_id(&self) -> &str {
        self.local_actor_id.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn key_id(&self) -> String {
        self.key_id
            .clone()
            .unwrap_or_else(|| format!("{}#main-key", self.local_actor_id()))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir.trim())),
            _ => default_data_dir(),
        }
    }

    pub fn private_key_path(&self, data_dir: &Path) -> PathBuf {
        self.private_key_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("actor_private_key.pem"))
    }
}

/// `--config <path>`, then `FEDI3_TASKS_CONFIG`, then `<data_dir>/tasks.json`.
pub fn config_path_from(args: impl IntoIterator<Item = String>) -> Result<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return Ok(PathBuf::from(path));
            }
            return Err(anyhow!("--config requires a path"));
        }
    }
    if let Ok(path) = std::env::var("FEDI3_TASKS_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(default_data_dir()?.join("tasks.json"))
}
