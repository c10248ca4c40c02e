/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoxKind {
    Inbox,
    Outbox,
}

impl BoxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxKind::Inbox => "INBOX",
            BoxKind::Outbox => "OUTBOX",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input {
            "INBOX" => Some(BoxKind::Inbox),
            "OUTBOX" => Some(BoxKind::Outbox),
            _ => None,
        }
    }
}

/// Named fields of `meta` this core reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    Published,
    Deleted,
    Actor,
    ActorId,
    ActorHash,
    Object,
    ObjectHash,
    ObjectActor,
    ObjectActorId,
    ObjectActorHash,
    OgMetadata,
    VotedFor,
    Subscribed,
    QuestionHash,
    QuestionAnswers,
    QuestionReplies,
    Undo,
    Notification,
    MentionsMe,
}

impl MetaKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKey::Published => "published",
            MetaKey::Deleted => "deleted",
            MetaKey::Actor => "actor",
            MetaKey::ActorId => "actorId",
            MetaKey::ActorHash => "actorHash",
            MetaKey::Object => "object",
            MetaKey::ObjectHash => "objectHash",
            MetaKey::ObjectActor => "objectActor",
            MetaKey::ObjectActorId => "objectActorId",
            MetaKey::ObjectActorHash => "objectActorHash",
            MetaKey::OgMetadata => "ogMetadata",
            MetaKey::VotedFor => "votedFor",
            MetaKey::Subscribed => "subscribed",
            MetaKey::QuestionHash => "questionHash",
            MetaKey::QuestionAnswers => "questionAnswers",
            MetaKey::QuestionReplies => "questionReplies",
            MetaKey::Undo => "undo",
            MetaKey::Notification => "notification",
            MetaKey::MentionsMe => "mentionsMe",
        }
    }

    /// JSON path of the field inside the `meta` document.
    pub fn path(&self) -> String {
        format!("$.{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub remote_id: String,
    pub box_kind: BoxKind,
    pub activity: Value,
    pub meta: Map<String, Value>,
}

impl ActivityRecord {
    pub fn new(box_kind: BoxKind, activity: Value) -> Self {
        let remote_id = activity
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Self {
            remote_id,
            box_kind,
            activity,
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: MetaKey, value: Value) -> Self {
        self.meta.insert(key.as_str().to_string(), value);
        self
    }

    pub fn meta_get(&self, key: MetaKey) -> Option<&Value> {
        self.meta.get(key.as_str())
    }

    pub fn meta_flag(&self, key: MetaKey) -> bool {
        self.meta_get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn is_tombstoned(&self) -> bool {
        self.meta_flag(MetaKey::Deleted)
    }
}

/// One condition of a record filter. All conditions of a filter are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Box(BoxKind),
    RemoteId(String),
    ActivityType(String),
    ActivityObjectId(String),
    MetaEq(MetaKey, Value),
    /// Also matches records where the field is missing.
    MetaNe(MetaKey, Value),
    MetaObjectId(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub conds: Vec<Cond>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_remote_id(remote_id: &str) -> Self {
        Self::new().remote_id(remote_id)
    }

    pub fn remote_id(mut self, remote_id: &str) -> Self {
        self.conds.push(Cond::RemoteId(remote_id.to_string()));
        self
    }

    pub fn in_box(mut self, box_kind: BoxKind) -> Self {
        self.conds.push(Cond::Box(box_kind));
        self
    }

    pub fn activity_type(mut self, ty: &str) -> Self {
        self.conds.push(Cond::ActivityType(ty.to_string()));
        self
    }

    pub fn activity_object_id(mut self, id: &str) -> Self {
        self.conds.push(Cond::ActivityObjectId(id.to_string()));
        self
    }

    pub fn meta_eq(mut self, key: MetaKey, value: impl Into<Value>) -> Self {
        self.conds.push(Cond::MetaEq(key, value.into()));
        self
    }

    pub fn meta_ne(mut self, key: MetaKey, value: impl Into<Value>) -> Self {
        self.conds.push(Cond::MetaNe(key, value.into()));
        self
    }

    pub fn meta_object_id(mut self, id: &str) -> Self {
        self.conds.push(Cond::MetaObjectId(id.to_string()));
        self
    }

    /// Excludes tombstoned records; every cache write goes through this.
    pub fn live(self) -> Self {
        self.meta_ne(MetaKey::Deleted, true)
    }
}

/// Field-qualified partial update. Never replaces a whole document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub meta: Vec<(MetaKey, Value)>,
    pub activity_object: Option<Value>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: MetaKey, value: impl Into<Value>) -> Self {
        self.meta.push((key, value.into()));
        self
    }

    pub fn set_activity_object(mut self, object: Value) -> Self {
        self.activity_object = Some(object);
        self
    }

    pub fn tombstone() -> Self {
        Self::new().set(MetaKey::Deleted, true)
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty() && self.activity_object.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: String,
    pub activity_id: String,
    pub created_at: String,
    pub activity: Value,
}

pub const NOTIFICATION_QUESTION_ENDED: &str = "question_ended";

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
