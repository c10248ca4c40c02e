/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory collaborators shared by unit tests.

use crate::activity::id_of;
use crate::activity_db::SqliteStore;
use crate::attachments::MediaCache;
use crate::delivery::InboxSender;
use crate::error::FetchError;
use crate::media_backend::media_url;
use crate::opengraph::OpenGraph;
use crate::processor::StoreActivityProcessor;
use crate::queue::TaskEnqueuer;
use crate::resolver::RemoteResolver;
use crate::storage_gc::{GcConfig, StoreGc};
use crate::store::FollowerDirectory;
use crate::tasks::{TaskDeps, Tasks};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fedi3_protocol::TaskRequest;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub fn temp_store() -> (tempfile::TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("activities.sqlite")).unwrap());
    (dir, store)
}

/// Documents by id. Unknown IRIs are 404.
#[derive(Default)]
pub struct FakeResolver {
    docs: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, u16>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl FakeResolver {
    pub fn insert(&self, doc: Value) {
        let id = id_of(&doc).unwrap().to_string();
        self.failures.lock().unwrap().remove(&id);
        self.docs.lock().unwrap().insert(id, doc);
    }

    pub fn fail(&self, iri: &str, status: u16) {
        self.failures.lock().unwrap().insert(iri.to_string(), status);
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteResolver for FakeResolver {
    async fn resolve(&self, iri: &str, bypass_cache: bool) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push((iri.to_string(), bypass_cache));
        if let Some(status) = self.failures.lock().unwrap().get(iri) {
            if let Some(err) = FetchError::from_status(iri, *status) {
                return Err(err);
            }
        }
        self.docs
            .lock()
            .unwrap()
            .get(iri)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(iri.to_string()))
    }
}

/// Answers 202 unless told otherwise.
#[derive(Default)]
pub struct FakeSender {
    sent: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, u16>>,
    down: Mutex<HashSet<String>>,
}

impl FakeSender {
    pub fn fail_network(&self, inbox: &str) {
        self.down.lock().unwrap().insert(inbox.to_string());
    }

    pub fn heal(&self, inbox: &str) {
        self.down.lock().unwrap().remove(inbox);
    }

    pub fn respond(&self, inbox: &str, status: u16) {
        self.statuses.lock().unwrap().insert(inbox.to_string(), status);
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl InboxSender for FakeSender {
    async fn send(&self, inbox: &str, _body: &[u8]) -> Result<u16> {
        self.sent.lock().unwrap().push(inbox.to_string());
        if self.down.lock().unwrap().contains(inbox) {
            return Err(anyhow!("connection refused: {inbox}"));
        }
        Ok(self.statuses.lock().unwrap().get(inbox).copied().unwrap_or(202))
    }
}

pub struct FakeFollowers(pub Vec<String>);

#[async_trait]
impl FollowerDirectory for FakeFollowers {
    async fn follower_inboxes(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Records every attempt, including the ones told to fail.
#[derive(Default)]
pub struct FakeMedia {
    broken: Mutex<HashSet<String>>,
    attachments: Mutex<Vec<(String, String)>>,
    icons: Mutex<Vec<(String, String)>>,
    og_images: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub fn fail_url(&self, url: &str) {
        self.broken.lock().unwrap().insert(url.to_string());
    }

    pub fn attachments(&self) -> Vec<(String, String)> {
        self.attachments.lock().unwrap().clone()
    }

    pub fn icons(&self) -> Vec<(String, String)> {
        self.icons.lock().unwrap().clone()
    }

    pub fn og_images(&self) -> Vec<String> {
        self.og_images.lock().unwrap().clone()
    }

    fn check(&self, url: &str) -> Result<()> {
        if self.broken.lock().unwrap().contains(url) {
            return Err(anyhow!("download failed: {url}"));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaCache for FakeMedia {
    async fn cache_actor_icon(&self, actor_id: &str, icon_url: &str) -> Result<()> {
        self.icons
            .lock()
            .unwrap()
            .push((actor_id.to_string(), icon_url.to_string()));
        self.check(icon_url)
    }

    async fn cache_attachment(&self, attachment: &Value, remote_id: &str) -> Result<()> {
        let url = media_url(attachment).unwrap_or_default();
        self.attachments
            .lock()
            .unwrap()
            .push((url.clone(), remote_id.to_string()));
        self.check(&url)
    }

    async fn cache_og_image(&self, url: &str) -> Result<()> {
        self.og_images.lock().unwrap().push(url.to_string());
        self.check(url)
    }
}

#[derive(Default)]
pub struct FakeOpenGraph {
    pages: Mutex<HashMap<String, Value>>,
}

impl FakeOpenGraph {
    pub fn insert(&self, url: &str, og: Value) {
        self.pages.lock().unwrap().insert(url.to_string(), og);
    }
}

#[async_trait]
impl OpenGraph for FakeOpenGraph {
    async fn fetch(&self, url: &str) -> Result<Option<Value>> {
        Ok(self.pages.lock().unwrap().get(url).cloned())
    }
}

#[derive(Default)]
pub struct FakeEnqueuer {
    queued: Mutex<Vec<TaskRequest>>,
    broken: Mutex<bool>,
}

impl FakeEnqueuer {
    pub fn queued(&self) -> Vec<TaskRequest> {
        self.queued.lock().unwrap().clone()
    }

    pub fn break_broker(&self) {
        *self.broken.lock().unwrap() = true;
    }
}

#[async_trait]
impl TaskEnqueuer for FakeEnqueuer {
    async fn enqueue(&self, request: &TaskRequest) -> Result<()> {
        if *self.broken.lock().unwrap() {
            return Err(anyhow!("broker unavailable"));
        }
        self.queued.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Handlers wired to a scratch database and fakes for everything remote.
pub struct Harness {
    pub tasks: Tasks,
    pub store: Arc<SqliteStore>,
    pub resolver: Arc<FakeResolver>,
    pub sender: Arc<FakeSender>,
    pub media: Arc<FakeMedia>,
    pub opengraph: Arc<FakeOpenGraph>,
    _dir: tempfile::TempDir,
}

pub fn harness(local_actor_id: &str) -> Harness {
    let (dir, store) = temp_store();
    let resolver = Arc::new(FakeResolver::default());
    let sender = Arc::new(FakeSender::default());
    let media = Arc::new(FakeMedia::default());
    let opengraph = Arc::new(FakeOpenGraph::default());
    let tasks = Tasks::new(TaskDeps {
        local_actor_id: local_actor_id.to_string(),
        store: store.clone(),
        ledger: store.clone(),
        followers: store.clone(),
        resolver: resolver.clone(),
        sender: sender.clone(),
        media: media.clone(),
        opengraph: opengraph.clone(),
        processor: Arc::new(StoreActivityProcessor::new(
            store.clone(),
            resolver.clone(),
            local_actor_id,
        )),
        gc: Arc::new(StoreGc::new(
            store.clone(),
            GcConfig {
                receipt_ttl_days: Some(0),
                ..GcConfig::default()
            },
        )),
    });
    Harness {
        tasks,
        store,
        resolver,
        sender,
        media,
        opengraph,
        _dir: dir,
    }
}
