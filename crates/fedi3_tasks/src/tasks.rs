/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Handlers for every task route. Each handler is one unit of work that is
//! safe to run more than once; follow-up work is returned, never enqueued.

use crate::activity::{actor_id, clean_activity, fingerprint, has_type, AS_PUBLIC};
use crate::actor_cache::ActorCache;
use crate::attachments::{AttachmentCache, MediaCache};
use crate::delivery::{DeliveryForwarder, InboxSender};
use crate::error::{Completion, FetchError, TaskError};
use crate::object_cache::ObjectCache;
use crate::opengraph::{LinkPreviews, OpenGraph};
use crate::poll_sync::PollSync;
use crate::processor::ActivityProcessor;
use crate::recipients::RecipientResolver;
use crate::record::{now_rfc3339, BoxKind, MetaKey, RecordFilter, RecordUpdate};
use crate::resolver::RemoteResolver;
use crate::storage_gc::GarbageCollector;
use crate::store::{DeliveryLedger, FollowerDirectory, RecordStore};
use fedi3_protocol::{TaskName, TaskRequest};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Collaborators the handlers are built from.
#[derive(Clone)]
pub struct TaskDeps {
    pub local_actor_id: String,
    pub store: Arc<dyn RecordStore>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub followers: Arc<dyn FollowerDirectory>,
    pub resolver: Arc<dyn RemoteResolver>,
    pub sender: Arc<dyn InboxSender>,
    pub media: Arc<dyn MediaCache>,
    pub opengraph: Arc<dyn OpenGraph>,
    pub processor: Arc<dyn ActivityProcessor>,
    pub gc: Arc<dyn GarbageCollector>,
}

#[derive(Clone)]
pub struct Tasks {
    local_actor_id: String,
    store: Arc<dyn RecordStore>,
    followers: Arc<dyn FollowerDirectory>,
    resolver: Arc<dyn RemoteResolver>,
    processor: Arc<dyn ActivityProcessor>,
    gc: Arc<dyn GarbageCollector>,
    actors: ActorCache,
    objects: ObjectCache,
    attachments: AttachmentCache,
    previews: LinkPreviews,
    polls: PollSync,
    forwarder: DeliveryForwarder,
}

impl Tasks {
    pub fn new(deps: TaskDeps) -> Self {
        Self {
            actors: ActorCache::new(
                deps.resolver.clone(),
                deps.store.clone(),
                deps.media.clone(),
                deps.local_actor_id.clone(),
            ),
            objects: ObjectCache::new(deps.resolver.clone(), deps.store.clone()),
            attachments: AttachmentCache::new(
                deps.resolver.clone(),
                deps.store.clone(),
                deps.media.clone(),
            ),
            previews: LinkPreviews::new(
                deps.resolver.clone(),
                deps.store.clone(),
                deps.opengraph.clone(),
                deps.media.clone(),
            ),
            polls: PollSync::new(deps.resolver.clone(), deps.store.clone()),
            forwarder: DeliveryForwarder::new(deps.sender.clone(), deps.ledger.clone()),
            local_actor_id: deps.local_actor_id,
            store: deps.store,
            followers: deps.followers,
            resolver: deps.resolver,
            processor: deps.processor,
            gc: deps.gc,
        }
    }

    fn followers_collection(&self) -> String {
        format!("{}/followers", self.local_actor_id.trim_end_matches('/'))
    }

    /// Stored copy of an activity when there is one, the remote document otherwise.
    async fn load_activity(&self, box_kind: BoxKind, iri: &str) -> Result<Value, TaskError> {
        let filter = RecordFilter::by_remote_id(iri).in_box(box_kind);
        if let Some(rec) = self.store.find_one(&filter).await? {
            return Ok(rec.activity);
        }
        Ok(self.resolver.resolve(iri, false).await?)
    }

    fn deliveries(&self, activity: Value, recipients: &[String]) -> Result<Completion, TaskError> {
        let payload = serde_json::to_string(&clean_activity(activity))
            .map_err(|e| TaskError::Unclassified(e.into()))?;
        let mut done = Completion::done();
        for to in recipients {
            done = done.then(TaskRequest::post_to_remote_inbox(&payload, to));
        }
        Ok(done)
    }

    pub async fn update_question(&self, iri: &str) -> Result<Completion, TaskError> {
        let filter = RecordFilter::by_remote_id(iri).in_box(BoxKind::Outbox).live();
        let Some(rec) = self.store.find_one(&filter).await? else {
            warn!(iri, "no local question to update");
            return Ok(Completion::skipped());
        };
        let mut question = rec.activity.get("object").cloned().unwrap_or(Value::Null);
        if !has_type(&question, "Question") {
            return Err(TaskError::BadPayload(format!("not a question: {iri}")));
        }
        let answers = rec.meta_get(MetaKey::QuestionAnswers).cloned().unwrap_or(json!({}));
        let replies = rec
            .meta_get(MetaKey::QuestionReplies)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        for field in ["oneOf", "anyOf"] {
            if let Some(Value::Array(options)) = question.get_mut(field) {
                for option in options.iter_mut() {
                    let name = option.get("name").and_then(|n| n.as_str()).unwrap_or_default();
                    let count = answers.get(name).and_then(|c| c.as_u64()).unwrap_or(0);
                    option["replies"] = json!({"type": "Collection", "totalItems": count});
                }
            }
        }
        question["replies"] = json!({"type": "Collection", "totalItems": replies});

        // The Update id is a function of the question and its tallies.
        let tally = fingerprint(&json!({"question": iri, "answers": answers, "replies": replies}));
        let update_id = format!(
            "{}/outbox/{}",
            self.local_actor_id.trim_end_matches('/'),
            &tally[..32]
        );
        let update = json!({
            "@context": AS_CONTEXT,
            "id": update_id,
            "type": "Update",
            "actor": self.local_actor_id,
            "object": question,
            "to": [AS_PUBLIC],
            "cc": [self.followers_collection()],
        });
        let new_iri = self.processor.post_to_outbox(update).await?;
        info!(iri, update = %new_iri, "question update posted");
        Ok(Completion::done().then(TaskRequest::for_iri(TaskName::FinishPostToOutbox, &new_iri)))
    }

    pub async fn fetch_og_meta(&self, iri: &str) -> Result<Completion, TaskError> {
        self.previews.fetch_og_meta(iri).await
    }

    pub async fn cache_object(&self, iri: &str) -> Result<Completion, TaskError> {
        self.objects.cache(iri).await
    }

    pub async fn finish_post_to_outbox(&self, iri: &str) -> Result<Completion, TaskError> {
        let activity = self.load_activity(BoxKind::Outbox, iri).await?;
        let recipients = RecipientResolver {
            local_actor_id: &self.local_actor_id,
            resolver: self.resolver.as_ref(),
            followers: self.followers.as_ref(),
        }
        .inboxes_for(&activity)
        .await?;
        self.processor.process_outbox(&activity).await?;
        info!(iri, recipients = recipients.len(), "outbox activity processed");
        self.deliveries(activity, &recipients)
    }

    pub async fn finish_post_to_inbox(&self, iri: &str) -> Result<Completion, TaskError> {
        let activity = self.load_activity(BoxKind::Inbox, iri).await?;
        self.processor.process_inbox(&activity).await?;
        Ok(Completion::done())
    }

    pub async fn cache_attachments(&self, iri: &str) -> Result<Completion, TaskError> {
        self.attachments.cache_attachments(iri).await
    }

    pub async fn cache_actor(&self, iri: &str) -> Result<Completion, TaskError> {
        self.actors.refresh(iri).await
    }

    pub async fn forward_activity(&self, iri: &str) -> Result<Completion, TaskError> {
        let activity = self.load_activity(BoxKind::Inbox, iri).await?;
        let recipients = self.followers.follower_inboxes().await?;
        info!(iri, recipients = recipients.len(), "forwarding activity");
        self.deliveries(activity, &recipients)
    }

    pub async fn post_to_remote_inbox(&self, payload: &str, to: &str) -> Result<Completion, TaskError> {
        serde_json::from_str::<Value>(payload)
            .map_err(|e| TaskError::BadPayload(format!("activity is not json: {e}")))?;
        let report = self.forwarder.deliver(payload, &[to.to_string()]).await?;
        if let Some((_, status)) = report.rejected().first() {
            return Err(TaskError::Rejected { status: *status });
        }
        Ok(Completion::done())
    }

    pub async fn fetch_remote_question(&self, iri: &str) -> Result<Completion, TaskError> {
        self.polls.sync(iri).await
    }

    pub async fn cleanup(&self) -> Result<Completion, TaskError> {
        let report = self.gc.perform().await?;
        info!(?report, "cleanup done");
        Ok(Completion::done())
    }

    pub async fn process_new_activity(&self, iri: &str) -> Result<Completion, TaskError> {
        let activity = match self.load_activity(BoxKind::Inbox, iri).await {
            Ok(a) => a,
            Err(TaskError::Fetch(e @ (FetchError::Gone(_) | FetchError::NotFound(_)))) => {
                warn!(iri, "dropping activity, skip processing: {e}");
                return Ok(Completion::skipped());
            }
            Err(e) => return Err(e),
        };

        let published = activity
            .get("published")
            .and_then(|p| p.as_str())
            .map(str::to_string)
            .unwrap_or_else(now_rfc3339);
        let mut update = RecordUpdate::new().set(MetaKey::Published, published);
        if let Some(actor) = actor_id(&activity) {
            update = update.set(MetaKey::ActorId, actor);
        }
        for (key, value) in self.processor.inbox_flags(&activity).await? {
            update = update.set(key, value);
        }
        self.store
            .update_one(
                &RecordFilter::by_remote_id(iri).in_box(BoxKind::Inbox).live(),
                &update,
            )
            .await?;
        info!(iri, "new activity processed");

        let mut done = Completion::done();
        if !has_type(&activity, "Delete") {
            done = done.then(TaskRequest::cache_actor(iri));
        }
        Ok(done)
    }
}
