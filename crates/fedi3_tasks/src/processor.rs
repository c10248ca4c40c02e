/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::{actor_id, has_any_type, has_type, id_of};
use crate::activity_db::SqliteStore;
use crate::recipients::inbox_of;
use crate::record::{now_rfc3339, ActivityRecord, BoxKind, MetaKey, RecordFilter, RecordUpdate};
use crate::resolver::RemoteResolver;
use crate::store::RecordStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::RngCore as _;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Side effects of activities once they are stored.
#[async_trait]
pub trait ActivityProcessor: Send + Sync {
    async fn process_inbox(&self, activity: &Value) -> Result<()>;

    async fn process_outbox(&self, activity: &Value) -> Result<()>;

    /// Flags merged into `meta` of a freshly received activity.
    async fn inbox_flags(&self, activity: &Value) -> Result<Vec<(MetaKey, Value)>>;

    /// Stores a locally authored activity in the outbox; returns its new id.
    async fn post_to_outbox(&self, activity: Value) -> Result<String>;
}

/// Minimal processor backed by the activity store: deletes, undos and the
/// follower list.
#[derive(Clone)]
pub struct StoreActivityProcessor {
    store: Arc<SqliteStore>,
    resolver: Arc<dyn RemoteResolver>,
    local_actor_id: String,
}

impl StoreActivityProcessor {
    pub fn new(
        store: Arc<SqliteStore>,
        resolver: Arc<dyn RemoteResolver>,
        local_actor_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            local_actor_id: local_actor_id.into(),
        }
    }

    fn is_local(&self, iri: &str) -> bool {
        let origin = origin_of(&self.local_actor_id);
        !origin.is_empty() && (iri == origin || iri.starts_with(&format!("{origin}/")))
    }

    async fn tombstone_object(&self, box_kind: BoxKind, object_id: &str) -> Result<u64> {
        let by_id = self
            .store
            .update_many(
                &RecordFilter::by_remote_id(object_id).in_box(box_kind).live(),
                &RecordUpdate::tombstone(),
            )
            .await?;
        let creates = self
            .store
            .update_many(
                &RecordFilter::new()
                    .in_box(box_kind)
                    .activity_type("Create")
                    .activity_object_id(object_id)
                    .live(),
                &RecordUpdate::tombstone(),
            )
            .await?;
        Ok(by_id + creates)
    }

    async fn mark_undone(&self, box_kind: BoxKind, undone_id: &str) -> Result<u64> {
        self.store
            .update_many(
                &RecordFilter::by_remote_id(undone_id).in_box(box_kind).live(),
                &RecordUpdate::new().set(MetaKey::Undo, true),
            )
            .await
    }

    async fn add_follower(&self, follower_id: &str) -> Result<()> {
        let actor = self
            .resolver
            .resolve(follower_id, false)
            .await
            .map_err(anyhow::Error::from)?;
        let inbox = actor
            .get("inbox")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("follower without inbox: {follower_id}"))?
            .to_string();
        let shared = inbox_of(&actor).filter(|s| *s != inbox);
        let store = self.store.clone();
        let follower = follower_id.to_string();
        tokio::task::spawn_blocking(move || store.upsert_follower(&follower, &inbox, shared.as_deref()))
            .await??;
        info!(follower = %follower_id, "follower added");
        Ok(())
    }

    async fn remove_follower(&self, follower_id: &str) -> Result<()> {
        let store = self.store.clone();
        let follower = follower_id.to_string();
        let removed = tokio::task::spawn_blocking(move || store.remove_follower(&follower)).await??;
        if removed {
            info!(follower = %follower_id, "follower removed");
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityProcessor for StoreActivityProcessor {
    async fn process_inbox(&self, activity: &Value) -> Result<()> {
        let object = activity.get("object").cloned().unwrap_or(Value::Null);
        let object_id = id_of(&object).unwrap_or_default().to_string();

        if has_type(activity, "Delete") {
            let n = self.tombstone_object(BoxKind::Inbox, &object_id).await?;
            debug!(object = %object_id, n, "inbox delete applied");
        } else if has_type(activity, "Follow") && object_id == self.local_actor_id {
            let follower = actor_id(activity).ok_or_else(|| anyhow!("follow without actor"))?;
            self.add_follower(&follower).await?;
        } else if has_type(activity, "Undo") {
            self.mark_undone(BoxKind::Inbox, &object_id).await?;
            if has_type(&object, "Follow") {
                if let Some(follower) = actor_id(activity) {
                    self.remove_follower(&follower).await?;
                }
            }
        }
        Ok(())
    }

    async fn process_outbox(&self, activity: &Value) -> Result<()> {
        let object = activity.get("object").cloned().unwrap_or(Value::Null);
        let object_id = id_of(&object).unwrap_or_default().to_string();
        if has_type(activity, "Delete") {
            self.tombstone_object(BoxKind::Outbox, &object_id).await?;
        } else if has_type(activity, "Undo") {
            self.mark_undone(BoxKind::Outbox, &object_id).await?;
        }
        Ok(())
    }

    async fn inbox_flags(&self, activity: &Value) -> Result<Vec<(MetaKey, Value)>> {
        let object = activity.get("object").cloned().unwrap_or(Value::Null);
        let mentions_me = match object.get("tag") {
            Some(Value::Array(tags)) => tags.iter().any(|t| {
                has_type(t, "Mention") && t.get("href").and_then(|h| h.as_str()) == Some(self.local_actor_id.as_str())
            }),
            _ => false,
        };
        let about_me = match id_of(&object) {
            Some(id) => {
                has_any_type(activity, &["Like", "Announce", "Follow"]) && self.is_local(id)
            }
            None => false,
        };
        let reply_to_me = object
            .get("inReplyTo")
            .and_then(id_of)
            .map(|id| self.is_local(id))
            .unwrap_or(false);

        Ok(vec![
            (MetaKey::MentionsMe, Value::Bool(mentions_me)),
            (MetaKey::Notification, Value::Bool(mentions_me || about_me || reply_to_me)),
        ])
    }

    async fn post_to_outbox(&self, mut activity: Value) -> Result<String> {
        let obj = activity
            .as_object_mut()
            .context("outbox activity must be an object")?;
        let id = match obj.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                let mut b = [0u8; 16];
                rand::rngs::OsRng.fill_bytes(&mut b);
                let id = format!(
                    "{}/outbox/{}",
                    self.local_actor_id.trim_end_matches('/'),
                    hex::encode(b)
                );
                obj.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };
        obj.entry("published".to_string())
            .or_insert_with(|| Value::String(now_rfc3339()));

        let published = activity["published"].clone();
        let record = ActivityRecord::new(BoxKind::Outbox, activity)
            .with_meta(MetaKey::Published, published)
            .with_meta(MetaKey::ActorId, Value::String(self.local_actor_id.clone()));
        if self.store.insert_record(&record).await? {
            info!(id = %id, "activity posted to outbox");
        } else {
            debug!(id = %id, "activity already in outbox");
        }
        Ok(id)
    }
}

fn origin_of(iri: &str) -> String {
    let Some((scheme, rest)) = iri.split_once("://") else {
        return String::new();
    };
    let host = rest.split('/').next().unwrap_or_default();
    format!("{scheme}://{host}")
}
