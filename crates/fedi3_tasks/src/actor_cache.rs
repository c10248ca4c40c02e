/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::{actor_id, fingerprint, has_any_type, has_type, id_of};
use crate::attachments::MediaCache;
use crate::error::{Completion, TaskError};
use crate::record::{MetaKey, RecordFilter, RecordUpdate};
use crate::resolver::RemoteResolver;
use crate::store::RecordStore;
use fedi3_protocol::{TaskName, TaskRequest};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keeps the actor snapshot embedded in activity records coherent with the
/// remote actor. Writes are gated on the actor fingerprint, so an unchanged
/// actor costs no writes.
#[derive(Clone)]
pub struct ActorCache {
    resolver: Arc<dyn RemoteResolver>,
    store: Arc<dyn RecordStore>,
    media: Arc<dyn MediaCache>,
    local_actor_id: String,
}

impl ActorCache {
    pub fn new(
        resolver: Arc<dyn RemoteResolver>,
        store: Arc<dyn RecordStore>,
        media: Arc<dyn MediaCache>,
        local_actor_id: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            store,
            media,
            local_actor_id: local_actor_id.into(),
        }
    }

    pub async fn refresh(&self, iri: &str) -> Result<Completion, TaskError> {
        if let Some(rec) = self.store.find_one(&RecordFilter::by_remote_id(iri)).await? {
            if rec.is_tombstoned() {
                debug!(iri, "activity tombstoned, no actor caching");
                return Ok(Completion::skipped());
            }
        }

        let activity = match self.resolver.resolve(iri, false).await {
            Ok(doc) => doc,
            Err(e) if e.is_gone_or_not_found() => {
                self.store
                    .update_many(&RecordFilter::by_remote_id(iri).live(), &RecordUpdate::tombstone())
                    .await?;
                warn!(iri, "flagging activity as deleted, no actor caching: {e}");
                return Ok(Completion::skipped());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(actor_iri) = actor_id(&activity) else {
            return Err(TaskError::BadPayload(format!("activity without actor: {iri}")));
        };
        let actor = self.resolver.resolve(&actor_iri, true).await?;
        let actor_iri = id_of(&actor).unwrap_or(&actor_iri).to_string();
        let hash = fingerprint(&actor);

        let mut done = Completion::done();
        if has_type(&activity, "Create") {
            done = done.then(TaskRequest::for_iri(TaskName::FetchOgMeta, iri));
        }

        match actor.get("icon") {
            None | Some(Value::Null) => {}
            Some(Value::Object(icon)) if icon.get("url").and_then(|u| u.as_str()).is_some() => {
                let url = icon.get("url").and_then(|u| u.as_str()).unwrap_or_default();
                if let Err(e) = self.media.cache_actor_icon(&actor_iri, url).await {
                    warn!(actor = %actor_iri, "icon cache failed: {e:#}");
                }
            }
            Some(other) => warn!(actor = %actor_iri, "failed to parse icon {other} for {iri}"),
        }

        if has_type(&activity, "Follow") && actor_iri == self.local_actor_id {
            let followed = match activity.get("object") {
                Some(Value::String(object_iri)) => Some(self.resolver.resolve(object_iri, false).await?),
                Some(obj @ Value::Object(_)) => Some(obj.clone()),
                _ => None,
            };
            if let Some(followed) = followed {
                self.store
                    .update_one(
                        &RecordFilter::by_remote_id(iri).live(),
                        &RecordUpdate::new().set(MetaKey::Object, followed),
                    )
                    .await?;
            }
        }

        let updated = self.store_snapshot(&actor_iri, &actor, &hash).await?;
        info!(iri, actor = %actor_iri, updated, "actor cached");

        if has_any_type(&activity, &["Create", "Announce"]) {
            done = done.then(TaskRequest::for_iri(TaskName::CacheAttachments, iri));
        }
        Ok(done.with_updated(updated))
    }

    /// Writes the snapshot to every live record that embeds this actor under a
    /// different hash. Returns how many records changed.
    pub async fn store_snapshot(&self, actor_iri: &str, actor: &Value, hash: &str) -> Result<u64, TaskError> {
        let as_actor = self
            .store
            .update_many(
                &RecordFilter::new()
                    .meta_eq(MetaKey::ActorId, actor_iri)
                    .meta_ne(MetaKey::ActorHash, hash)
                    .live(),
                &RecordUpdate::new()
                    .set(MetaKey::Actor, actor.clone())
                    .set(MetaKey::ActorHash, hash),
            )
            .await?;
        let as_object_author = self
            .store
            .update_many(
                &RecordFilter::new()
                    .meta_eq(MetaKey::ObjectActorId, actor_iri)
                    .meta_ne(MetaKey::ObjectActorHash, hash)
                    .live(),
                &RecordUpdate::new()
                    .set(MetaKey::ObjectActor, actor.clone())
                    .set(MetaKey::ObjectActorHash, hash),
            )
            .await?;
        Ok(as_actor + as_object_author)
    }
}
