/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{Completion, Outcome, TaskError};
use crate::queue::TaskEnqueuer;
use crate::tasks::Tasks;
use fedi3_protocol::{CacheActorPayload, RemoteInboxPayload, TaskName};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Runs one task invocation and turns its result into the broker's verdict.
/// Follow-ups are enqueued only after the handler succeeded.
#[derive(Clone)]
pub struct TaskDispatcher {
    tasks: Tasks,
    queue: Arc<dyn TaskEnqueuer>,
}

impl TaskDispatcher {
    pub fn new(tasks: Tasks, queue: Arc<dyn TaskEnqueuer>) -> Self {
        Self { tasks, queue }
    }

    pub async fn dispatch(&self, name: TaskName, payload: Value) -> Outcome {
        let result = match self.run(name, &payload).await {
            Ok(done) => self.enqueue_follow_ups(name, done).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => {
                debug!(task = %name, ?outcome, "task finished");
                outcome
            }
            Err(e) => {
                let outcome = e.outcome();
                if outcome.needs_retry() {
                    error!(task = %name, %payload, "task failed, will retry: {e:#}");
                } else {
                    warn!(task = %name, %payload, "task dropped: {e:#}");
                }
                outcome
            }
        }
    }

    async fn enqueue_follow_ups(&self, name: TaskName, done: Completion) -> Result<Outcome, TaskError> {
        for req in &done.follow_ups {
            self.queue
                .enqueue(req)
                .await
                .map_err(|e| TaskError::Transient(format!("enqueue {} after {name}: {e:#}", req.task)))?;
        }
        Ok(done.outcome)
    }

    async fn run(&self, name: TaskName, payload: &Value) -> Result<Completion, TaskError> {
        let t = &self.tasks;
        match name {
            TaskName::UpdateQuestion => t.update_question(iri(payload)?).await,
            TaskName::FetchOgMeta => t.fetch_og_meta(iri(payload)?).await,
            TaskName::CacheObject => t.cache_object(iri(payload)?).await,
            TaskName::FinishPostToOutbox => t.finish_post_to_outbox(iri(payload)?).await,
            TaskName::FinishPostToInbox => t.finish_post_to_inbox(iri(payload)?).await,
            TaskName::CacheAttachments => t.cache_attachments(iri(payload)?).await,
            TaskName::CacheActor => {
                let p: CacheActorPayload = decode(payload)?;
                t.cache_actor(&p.iri).await
            }
            TaskName::ForwardActivity => t.forward_activity(iri(payload)?).await,
            TaskName::PostToRemoteInbox => {
                let p: RemoteInboxPayload = decode(payload)?;
                t.post_to_remote_inbox(&p.payload, &p.to).await
            }
            TaskName::FetchRemoteQuestion => t.fetch_remote_question(iri(payload)?).await,
            TaskName::Cleanup => t.cleanup().await,
            TaskName::ProcessNewActivity => t.process_new_activity(iri(payload)?).await,
        }
    }
}

fn iri(payload: &Value) -> Result<&str, TaskError> {
    payload
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TaskError::BadPayload(format!("expected an IRI, got {payload}")))
}

fn decode<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, TaskError> {
    serde_json::from_value(payload.clone()).map_err(|e| TaskError::BadPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ActivityRecord, BoxKind};
    use crate::store::RecordStore;
    use crate::testing::{harness, FakeEnqueuer, Harness};
    use fedi3_protocol::TaskRequest;
    use serde_json::json;

    const ME: &str = "https://me.example/users/me";

    fn dispatcher(h: &Harness) -> (TaskDispatcher, Arc<FakeEnqueuer>) {
        let queue = Arc::new(FakeEnqueuer::default());
        (TaskDispatcher::new(h.tasks.clone(), queue.clone()), queue)
    }

    #[tokio::test]
    async fn missing_remote_objects_are_never_retried() {
        let h = harness(ME);
        let (d, _) = dispatcher(&h);
        for status in [404u16, 410] {
            let iri = format!("https://b.example/an/{status}");
            h.resolver.fail(&iri, status);
            for task in [TaskName::CacheObject, TaskName::CacheAttachments, TaskName::FetchRemoteQuestion] {
                assert_eq!(d.dispatch(task, json!(iri)).await, Outcome::DoneNoRetry, "{task} {status}");
            }
        }
    }

    #[tokio::test]
    async fn server_errors_are_always_retried() {
        let h = harness(ME);
        let (d, _) = dispatcher(&h);
        h.resolver.fail("https://b.example/an/1", 500);
        for task in [TaskName::CacheObject, TaskName::FetchOgMeta, TaskName::FinishPostToInbox] {
            assert_eq!(d.dispatch(task, json!("https://b.example/an/1")).await, Outcome::Retry, "{task}");
        }
        let actor = json!({"iri": "https://b.example/an/1"});
        assert_eq!(d.dispatch(TaskName::CacheActor, actor).await, Outcome::Retry);
    }

    #[tokio::test]
    async fn follow_ups_are_enqueued_after_success() {
        let h = harness(ME);
        let (d, queue) = dispatcher(&h);
        let like = json!({"id": "https://b.example/l/1", "type": "Like", "actor": "https://b.example/u/1",
                          "object": "https://me.example/notes/1"});
        h.resolver.insert(like.clone());
        h.store.insert_record(&ActivityRecord::new(BoxKind::Inbox, like)).await.unwrap();

        assert_eq!(d.dispatch(TaskName::ProcessNewActivity, json!("https://b.example/l/1")).await, Outcome::Done);
        assert_eq!(queue.queued(), vec![TaskRequest::cache_actor("https://b.example/l/1")]);

        queue.break_broker();
        assert_eq!(d.dispatch(TaskName::ProcessNewActivity, json!("https://b.example/l/1")).await, Outcome::Retry);
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped() {
        let h = harness(ME);
        let (d, queue) = dispatcher(&h);
        assert_eq!(d.dispatch(TaskName::CacheObject, json!({"iri": 1})).await, Outcome::DoneNoRetry);
        assert_eq!(d.dispatch(TaskName::CacheActor, json!(42)).await, Outcome::DoneNoRetry);
        assert_eq!(d.dispatch(TaskName::PostToRemoteInbox, json!({"to": "x"})).await, Outcome::DoneNoRetry);
        assert_eq!(d.dispatch(TaskName::ProcessNewActivity, json!("  ")).await, Outcome::DoneNoRetry);
        assert!(queue.queued().is_empty());
    }

    #[tokio::test]
    async fn cleanup_ignores_its_payload() {
        let h = harness(ME);
        let (d, _) = dispatcher(&h);
        assert_eq!(d.dispatch(TaskName::Cleanup, Value::Null).await, Outcome::Done);
    }
}
