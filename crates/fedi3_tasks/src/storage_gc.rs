/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity_db::{now_ms, SqliteStore};
use crate::record::BoxKind;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const DAY_MS: i64 = 24 * 3600 * 1000;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Tombstoned inbox records older than this are removed.
    pub deleted_ttl_days: Option<u32>,
    pub notification_ttl_days: Option<u32>,
    pub receipt_ttl_days: Option<u32>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            deleted_ttl_days: Some(30),
            notification_ttl_days: Some(90),
            receipt_ttl_days: Some(14),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub tombstones: u64,
    pub notifications: u64,
    pub receipts: u64,
}

#[async_trait]
pub trait GarbageCollector: Send + Sync {
    async fn perform(&self) -> Result<GcReport>;
}

#[derive(Clone)]
pub struct StoreGc {
    store: Arc<SqliteStore>,
    cfg: GcConfig,
}

impl StoreGc {
    pub fn new(store: Arc<SqliteStore>, cfg: GcConfig) -> Self {
        Self { store, cfg }
    }
}

fn cutoff(now: i64, days: u32) -> i64 {
    now.saturating_sub((days as i64).saturating_mul(DAY_MS))
}

#[async_trait]
impl GarbageCollector for StoreGc {
    async fn perform(&self) -> Result<GcReport> {
        let now = now_ms();
        let mut report = GcReport::default();

        if let Some(days) = self.cfg.deleted_ttl_days {
            let before = cutoff(now, days);
            report.tombstones = tokio::task::spawn_blocking({
                let s = self.store.clone();
                move || s.prune_tombstones_before(before, BoxKind::Inbox)
            })
            .await??;
            if report.tombstones > 0 {
                info!(deleted = report.tombstones, "gc pruned tombstoned activities");
            }
        }

        if let Some(days) = self.cfg.notification_ttl_days {
            let before = cutoff(now, days);
            report.notifications = tokio::task::spawn_blocking({
                let s = self.store.clone();
                move || s.prune_notifications_before(before)
            })
            .await??;
            if report.notifications > 0 {
                info!(deleted = report.notifications, "gc pruned notifications");
            }
        }

        if let Some(days) = self.cfg.receipt_ttl_days {
            let before = cutoff(now, days);
            report.receipts = tokio::task::spawn_blocking({
                let s = self.store.clone();
                move || s.prune_receipts_before(before)
            })
            .await??;
            if report.receipts > 0 {
                info!(deleted = report.receipts, "gc pruned delivery receipts");
            }
        }

        Ok(report)
    }
}
