/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::{has_any_type, AS_PUBLIC};
use crate::error::TaskError;
use crate::resolver::RemoteResolver;
use crate::store::FollowerDirectory;
use serde_json::Value;
use tracing::warn;

const ADDRESS_FIELDS: &[&str] = &["to", "cc", "bto", "bcc"];
const COLLECTION_TYPES: &[&str] = &[
    "Collection",
    "OrderedCollection",
    "CollectionPage",
    "OrderedCollectionPage",
];

/// Addressed IRIs of an activity, without the public collection.
pub fn extract_addresses(activity: &Value) -> Vec<String> {
    let mut out = Vec::new();
    for field in ADDRESS_FIELDS {
        collect_field(activity, field, &mut out);
    }
    out.retain(|v| v != AS_PUBLIC && v != "as:Public" && v != "Public");
    out.sort();
    out.dedup();
    out
}

fn collect_field(activity: &Value, field: &str, out: &mut Vec<String>) {
    let Some(v) = activity.get(field) else { return };
    match v {
        Value::String(s) => out.push(s.clone()),
        Value::Array(arr) => {
            for item in arr {
                if let Some(s) = crate::activity::id_of(item) {
                    out.push(s.to_string());
                }
            }
        }
        Value::Object(_) => {
            if let Some(s) = crate::activity::id_of(v) {
                out.push(s.to_string());
            }
        }
        _ => {}
    }
}

/// Inbox of an actor document: shared inbox first.
pub fn inbox_of(actor: &Value) -> Option<String> {
    actor
        .get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(|v| v.as_str())
        .or_else(|| actor.get("inbox").and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Resolves the inboxes an outbound activity must reach.
pub struct RecipientResolver<'a> {
    pub local_actor_id: &'a str,
    pub resolver: &'a dyn RemoteResolver,
    pub followers: &'a dyn FollowerDirectory,
}

impl RecipientResolver<'_> {
    fn followers_collection(&self) -> String {
        format!("{}/followers", self.local_actor_id.trim_end_matches('/'))
    }

    pub async fn inboxes_for(&self, activity: &Value) -> Result<Vec<String>, TaskError> {
        let followers_collection = self.followers_collection();
        let mut out = Vec::new();
        for address in extract_addresses(activity) {
            if address == self.local_actor_id {
                continue;
            }
            if address == followers_collection {
                out.extend(self.followers.follower_inboxes().await?);
                continue;
            }
            match self.resolver.resolve(&address, false).await {
                Ok(doc) if has_any_type(&doc, COLLECTION_TYPES) => {
                    warn!(address = %address, "skipping collection recipient");
                }
                Ok(doc) => match inbox_of(&doc) {
                    Some(inbox) => out.push(inbox),
                    None => warn!(address = %address, "recipient has no inbox"),
                },
                Err(e) if e.is_vanished() => {
                    warn!(address = %address, "skipping recipient: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}
