/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{Completion, TaskError};
use crate::record::{RecordFilter, RecordUpdate};
use crate::resolver::RemoteResolver;
use crate::store::RecordStore;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Local copies of remote media.
#[async_trait]
pub trait MediaCache: Send + Sync {
    async fn cache_actor_icon(&self, actor_id: &str, icon_url: &str) -> Result<()>;

    /// `remote_id` is the activity the attachment belongs to.
    async fn cache_attachment(&self, attachment: &Value, remote_id: &str) -> Result<()>;

    async fn cache_og_image(&self, url: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct AttachmentCache {
    resolver: Arc<dyn RemoteResolver>,
    store: Arc<dyn RecordStore>,
    media: Arc<dyn MediaCache>,
}

impl AttachmentCache {
    pub fn new(
        resolver: Arc<dyn RemoteResolver>,
        store: Arc<dyn RecordStore>,
        media: Arc<dyn MediaCache>,
    ) -> Self {
        Self {
            resolver,
            store,
            media,
        }
    }

    pub async fn cache_attachments(&self, iri: &str) -> Result<Completion, TaskError> {
        if let Some(rec) = self.store.find_one(&RecordFilter::by_remote_id(iri)).await? {
            if rec.is_tombstoned() {
                debug!(iri, "activity tombstoned, no attachment caching");
                return Ok(Completion::skipped());
            }
        }

        let activity = match self.resolver.resolve(iri, false).await {
            Ok(doc) => doc,
            Err(e) if e.is_gone_or_not_found() => {
                self.store
                    .update_many(&RecordFilter::by_remote_id(iri).live(), &RecordUpdate::tombstone())
                    .await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let object = match activity.get("object") {
            Some(Value::String(object_iri)) => self.resolver.resolve(object_iri, false).await?,
            Some(obj @ Value::Object(_)) => obj.clone(),
            _ => return Ok(Completion::skipped()),
        };

        let attachments = match object.get("attachment") {
            Some(Value::Array(arr)) => arr.clone(),
            Some(single @ Value::Object(_)) => vec![single.clone()],
            _ => Vec::new(),
        };
        debug!(iri, count = attachments.len(), "caching attachments");
        for attachment in &attachments {
            if let Err(e) = self.media.cache_attachment(attachment, iri).await {
                warn!(iri, "attachment cache failed: {e:#}");
            }
        }
        Ok(Completion::done())
    }
}
