/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Closed set of task callbacks the broker can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    UpdateQuestion,
    FetchOgMeta,
    CacheObject,
    FinishPostToOutbox,
    FinishPostToInbox,
    CacheAttachments,
    CacheActor,
    ForwardActivity,
    PostToRemoteInbox,
    FetchRemoteQuestion,
    Cleanup,
    ProcessNewActivity,
}

impl TaskName {
    pub const ALL: [TaskName; 12] = [
        TaskName::UpdateQuestion,
        TaskName::FetchOgMeta,
        TaskName::CacheObject,
        TaskName::FinishPostToOutbox,
        TaskName::FinishPostToInbox,
        TaskName::CacheAttachments,
        TaskName::CacheActor,
        TaskName::ForwardActivity,
        TaskName::PostToRemoteInbox,
        TaskName::FetchRemoteQuestion,
        TaskName::Cleanup,
        TaskName::ProcessNewActivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::UpdateQuestion => "update_question",
            TaskName::FetchOgMeta => "fetch_og_meta",
            TaskName::CacheObject => "cache_object",
            TaskName::FinishPostToOutbox => "finish_post_to_outbox",
            TaskName::FinishPostToInbox => "finish_post_to_inbox",
            TaskName::CacheAttachments => "cache_attachments",
            TaskName::CacheActor => "cache_actor",
            TaskName::ForwardActivity => "forward_activity",
            TaskName::PostToRemoteInbox => "post_to_remote_inbox",
            TaskName::FetchRemoteQuestion => "fetch_remote_question",
            TaskName::Cleanup => "cleanup",
            TaskName::ProcessNewActivity => "process_new_activity",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        let input = input.trim();
        Self::ALL.into_iter().find(|t| t.as_str() == input)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A follow-up task a handler asks the dispatcher to enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: TaskName,
    pub payload: Value,
}

impl TaskRequest {
    pub fn new(task: TaskName, payload: Value) -> Self {
        Self { task, payload }
    }

    /// Tasks whose payload is a bare activity IRI.
    pub fn for_iri(task: TaskName, iri: &str) -> Self {
        Self::new(task, Value::String(iri.to_string()))
    }

    pub fn cache_actor(iri: &str) -> Self {
        Self::new(
            TaskName::CacheActor,
            serde_json::json!(CacheActorPayload {
                iri: iri.to_string()
            }),
        )
    }

    pub fn post_to_remote_inbox(payload: &str, to: &str) -> Self {
        Self::new(
            TaskName::PostToRemoteInbox,
            serde_json::json!(RemoteInboxPayload {
                payload: payload.to_string(),
                to: to.to_string(),
            }),
        )
    }
}

/// Body the broker POSTs to `/task/<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(default)]
    pub req_id: String,
    #[serde(default)]
    pub tries: u32,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheActorPayload {
    pub iri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteInboxPayload {
    /// Serialized activity JSON, signed at send time.
    pub payload: String,
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_routes() {
        for task in TaskName::ALL {
            let encoded = serde_json::to_value(task).unwrap();
            assert_eq!(encoded, Value::String(task.as_str().to_string()));
            assert_eq!(TaskName::from_str(task.as_str()), Some(task));
        }
        assert_eq!(TaskName::from_str("nope"), None);
    }

    #[test]
    fn cache_actor_payload_is_wrapped() {
        let req = TaskRequest::cache_actor("https://a.example/act/1");
        assert_eq!(req.task, TaskName::CacheActor);
        assert_eq!(req.payload["iri"], "https://a.example/act/1");
    }
}
