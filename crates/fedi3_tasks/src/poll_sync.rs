/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::{fingerprint, id_of};
use crate::error::{Completion, TaskError};
use crate::record::{
    now_rfc3339, BoxKind, MetaKey, Notification, RecordFilter, RecordUpdate,
    NOTIFICATION_QUESTION_ENDED,
};
use crate::resolver::RemoteResolver;
use crate::store::RecordStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Pulls the current state of a remote poll for servers that never send an
/// `Update`, and tells the local user once when a poll they took part in ends.
#[derive(Clone)]
pub struct PollSync {
    resolver: Arc<dyn RemoteResolver>,
    store: Arc<dyn RecordStore>,
}

impl PollSync {
    pub fn new(resolver: Arc<dyn RemoteResolver>, store: Arc<dyn RecordStore>) -> Self {
        Self { resolver, store }
    }

    pub async fn sync(&self, iri: &str) -> Result<Completion, TaskError> {
        let local = self
            .store
            .find_one(
                &RecordFilter::new()
                    .in_box(BoxKind::Inbox)
                    .activity_type("Create")
                    .activity_object_id(iri)
                    .live(),
            )
            .await?;

        let question = self.resolver.resolve(iri, true).await?;
        let question_id = id_of(&question).unwrap_or(iri).to_string();
        let hash = fingerprint(&question);

        if let Some(local) = &local {
            let involved = local.meta_flag(MetaKey::VotedFor) || local.meta_flag(MetaKey::Subscribed);
            if involved
                && self
                    .store
                    .find_notification(NOTIFICATION_QUESTION_ENDED, &question_id)
                    .await?
                    .is_none()
            {
                let inserted = self
                    .store
                    .insert_notification(&Notification {
                        kind: NOTIFICATION_QUESTION_ENDED.to_string(),
                        activity_id: question_id.clone(),
                        created_at: now_rfc3339(),
                        activity: question.clone(),
                    })
                    .await?;
                debug!(question = %question_id, inserted, "question ended notification");
            }

            self.store
                .update_one(
                    &RecordFilter::by_remote_id(&local.remote_id)
                        .in_box(BoxKind::Inbox)
                        .meta_ne(MetaKey::QuestionHash, hash.as_str())
                        .live(),
                    &RecordUpdate::new()
                        .set_activity_object(question.clone())
                        .set(MetaKey::QuestionHash, hash.as_str()),
                )
                .await?;
        }

        let copies = self
            .store
            .update_many(
                &RecordFilter::new()
                    .meta_object_id(&question_id)
                    .meta_ne(MetaKey::ObjectHash, hash.as_str())
                    .live(),
                &RecordUpdate::new()
                    .set(MetaKey::Object, question)
                    .set(MetaKey::ObjectHash, hash.as_str()),
            )
            .await?;
        info!(question = %question_id, local = local.is_some(), copies, "remote question synced");
        Ok(Completion::done())
    }
}
