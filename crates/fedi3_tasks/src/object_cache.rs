/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::{actor_id, author_id, fingerprint};
use crate::error::{Completion, FetchError, TaskError};
use crate::record::{MetaKey, RecordFilter, RecordUpdate};
use crate::resolver::RemoteResolver;
use crate::store::RecordStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Embeds the object of an activity (and its author, when it is not the
/// activity's actor) into the activity's record.
#[derive(Clone)]
pub struct ObjectCache {
    resolver: Arc<dyn RemoteResolver>,
    store: Arc<dyn RecordStore>,
}

impl ObjectCache {
    pub fn new(resolver: Arc<dyn RemoteResolver>, store: Arc<dyn RecordStore>) -> Self {
        Self { resolver, store }
    }

    pub async fn cache(&self, iri: &str) -> Result<Completion, TaskError> {
        if let Some(rec) = self.store.find_one(&RecordFilter::by_remote_id(iri)).await? {
            if rec.is_tombstoned() {
                return Ok(Completion::skipped());
            }
        }

        let update = match self.snapshot(iri).await {
            Ok(update) => update,
            Err(TaskError::Fetch(e)) if e.is_vanished() => {
                self.store
                    .update_many(&RecordFilter::by_remote_id(iri).live(), &RecordUpdate::tombstone())
                    .await?;
                warn!(iri, "flagging activity as deleted, no object caching: {e}");
                return Ok(Completion::skipped());
            }
            Err(e) => return Err(e),
        };

        let n = self
            .store
            .update_many(&RecordFilter::by_remote_id(iri).live(), &update)
            .await?;
        info!(iri, updated = n, "object cached");
        Ok(Completion::done())
    }

    async fn snapshot(&self, iri: &str) -> Result<RecordUpdate, TaskError> {
        let activity = self.resolver.resolve(iri, false).await?;
        let object = match activity.get("object") {
            Some(Value::String(object_iri)) => self.resolver.resolve(object_iri, false).await?,
            Some(obj @ Value::Object(_)) => obj.clone(),
            _ => return Err(FetchError::NotAnActivity(iri.to_string()).into()),
        };
        let object_hash = fingerprint(&object);

        let mut update = RecordUpdate::new()
            .set(MetaKey::Object, object.clone())
            .set(MetaKey::ObjectHash, object_hash);

        let author = author_id(&object);
        if let Some(author) = author.filter(|a| Some(a) != actor_id(&activity).as_ref()) {
            let author_doc = self.resolver.resolve(&author, false).await?;
            let author_hash = fingerprint(&author_doc);
            update = update
                .set(MetaKey::ObjectActor, author_doc)
                .set(MetaKey::ObjectActorId, author)
                .set(MetaKey::ObjectActorHash, author_hash);
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Outcome;
    use crate::record::{ActivityRecord, BoxKind};
    use crate::testing::{temp_store, FakeResolver};
    use serde_json::json;

    fn announce() -> Value {
        json!({"id": "https://a.example/an/1", "type": "Announce", "actor": "https://a.example/u1",
               "object": "https://b.example/n/1"})
    }

    #[tokio::test]
    async fn boosted_note_embeds_its_author() {
        let (_dir, store) = temp_store();
        let resolver = Arc::new(FakeResolver::default());
        resolver.insert(announce());
        resolver.insert(json!({"id": "https://b.example/n/1", "type": "Note", "content": "hi",
                               "attributedTo": "https://b.example/u2"}));
        resolver.insert(json!({"id": "https://b.example/u2", "type": "Person", "name": "B"}));
        let rec = ActivityRecord::new(BoxKind::Inbox, announce())
            .with_meta(MetaKey::ActorId, json!("https://a.example/u1"));
        store.insert_record(&rec).await.unwrap();

        let cache = ObjectCache::new(resolver, store.clone());
        assert_eq!(cache.cache("https://a.example/an/1").await.unwrap().outcome, Outcome::Done);

        let got = store.find_one(&RecordFilter::by_remote_id("https://a.example/an/1")).await.unwrap().unwrap();
        assert_eq!(got.meta_get(MetaKey::Object).unwrap()["content"], "hi");
        assert_eq!(got.meta_get(MetaKey::ObjectActorId), Some(&json!("https://b.example/u2")));
        assert_eq!(got.meta_get(MetaKey::ObjectActor).unwrap()["name"], "B");
        assert_eq!(got.meta_get(MetaKey::ActorId), Some(&json!("https://a.example/u1")));
    }

    #[tokio::test]
    async fn own_object_skips_author_fields() {
        let (_dir, store) = temp_store();
        let resolver = Arc::new(FakeResolver::default());
        let create = json!({"id": "https://a.example/c/1", "type": "Create", "actor": "https://a.example/u1",
                            "object": {"id": "https://a.example/n/1", "type": "Note", "attributedTo": "https://a.example/u1"}});
        resolver.insert(create.clone());
        store.insert_record(&ActivityRecord::new(BoxKind::Inbox, create)).await.unwrap();

        ObjectCache::new(resolver, store.clone()).cache("https://a.example/c/1").await.unwrap();
        let got = store.find_one(&RecordFilter::by_remote_id("https://a.example/c/1")).await.unwrap().unwrap();
        assert!(got.meta_get(MetaKey::ObjectHash).is_some());
        assert!(got.meta_get(MetaKey::ObjectActor).is_none());
    }

    #[tokio::test]
    async fn missing_object_tombstones_the_record() {
        let (_dir, store) = temp_store();
        let resolver = Arc::new(FakeResolver::default());
        resolver.insert(announce());
        resolver.fail("https://b.example/n/1", 404);
        store.insert_record(&ActivityRecord::new(BoxKind::Inbox, announce())).await.unwrap();

        let cache = ObjectCache::new(resolver.clone(), store.clone());
        assert_eq!(cache.cache("https://a.example/an/1").await.unwrap().outcome, Outcome::DoneNoRetry);
        let got = store.find_one(&RecordFilter::by_remote_id("https://a.example/an/1")).await.unwrap().unwrap();
        assert!(got.is_tombstoned());
        assert!(got.meta_get(MetaKey::Object).is_none());

        resolver.insert(json!({"id": "https://b.example/n/1", "type": "Note"}));
        assert_eq!(cache.cache("https://a.example/an/1").await.unwrap().outcome, Outcome::DoneNoRetry);
        let got = store.find_one(&RecordFilter::by_remote_id("https://a.example/an/1")).await.unwrap().unwrap();
        assert!(got.meta_get(MetaKey::Object).is_none());
    }

    #[tokio::test]
    async fn unreachable_author_retries() {
        let (_dir, store) = temp_store();
        let resolver = Arc::new(FakeResolver::default());
        resolver.insert(announce());
        resolver.insert(json!({"id": "https://b.example/n/1", "type": "Note", "attributedTo": "https://b.example/u2"}));
        resolver.fail("https://b.example/u2", 503);
        let err = ObjectCache::new(resolver, store).cache("https://a.example/an/1").await.unwrap_err();
        assert!(err.outcome().needs_retry());
    }
}
