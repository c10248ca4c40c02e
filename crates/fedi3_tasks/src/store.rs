/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::record::{ActivityRecord, Notification, RecordFilter, RecordUpdate};
use anyhow::Result;
use async_trait::async_trait;

/// Activity records and notifications. Single statements are atomic; nothing
/// spans documents transactionally.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns false when a record with the same box and remote id exists.
    async fn insert_record(&self, record: &ActivityRecord) -> Result<bool>;

    async fn find_one(&self, filter: &RecordFilter) -> Result<Option<ActivityRecord>>;

    /// Applies the update to at most one matching record; returns rows written.
    async fn update_one(&self, filter: &RecordFilter, update: &RecordUpdate) -> Result<u64>;

    async fn update_many(&self, filter: &RecordFilter, update: &RecordUpdate) -> Result<u64>;

    async fn find_notification(&self, kind: &str, activity_id: &str)
        -> Result<Option<Notification>>;

    /// Returns false when a notification with the same kind and activity id exists.
    async fn insert_notification(&self, notification: &Notification) -> Result<bool>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    pub host: String,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_success_ms: Option<i64>,
    pub last_failure_ms: Option<i64>,
}

/// Per-recipient receipts and per-host counters written by delivery.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn already_delivered(&self, activity_id: &str, recipient: &str) -> Result<bool>;

    async fn record_delivered(&self, activity_id: &str, recipient: &str) -> Result<()>;

    async fn track_send(&self, host: &str, ok: bool) -> Result<()>;

    async fn host_stats(&self, host: &str) -> Result<Option<HostStats>>;
}

#[async_trait]
pub trait FollowerDirectory: Send + Sync {
    /// Inbox per follower, shared inbox preferred, deduplicated.
    async fn follower_inboxes(&self) -> Result<Vec<String>>;
}
