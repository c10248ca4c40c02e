/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::record::{ActivityRecord, BoxKind, Cond, Notification, RecordFilter, RecordUpdate};
use crate::store::{DeliveryLedger, FollowerDirectory, HostStats, RecordStore};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS activities (
              box TEXT NOT NULL,
              remote_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              activity TEXT NOT NULL,
              meta TEXT NOT NULL DEFAULT '{}',
              PRIMARY KEY(box, remote_id)
            );
            CREATE INDEX IF NOT EXISTS idx_activities_remote_id ON activities(remote_id);
            CREATE INDEX IF NOT EXISTS idx_activities_actor_id ON activities(json_extract(meta, '$.actorId'));
            CREATE INDEX IF NOT EXISTS idx_activities_object_id ON activities(json_extract(meta, '$.object.id'));

            -- UNIQUE(kind, activity_id): duplicate task runs cannot double-notify.
            CREATE TABLE IF NOT EXISTS notifications (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              kind TEXT NOT NULL,
              activity_id TEXT NOT NULL,
              created_at TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              activity TEXT NOT NULL,
              UNIQUE(kind, activity_id)
            );

            CREATE TABLE IF NOT EXISTS delivery_receipts (
              activity_id TEXT NOT NULL,
              recipient TEXT NOT NULL,
              delivered_at_ms INTEGER NOT NULL,
              PRIMARY KEY(activity_id, recipient)
            );

            CREATE TABLE IF NOT EXISTS remote_hosts (
              host TEXT PRIMARY KEY,
              successes INTEGER NOT NULL DEFAULT 0,
              failures INTEGER NOT NULL DEFAULT 0,
              consecutive_failures INTEGER NOT NULL DEFAULT 0,
              last_success_ms INTEGER NULL,
              last_failure_ms INTEGER NULL
            );

            CREATE TABLE IF NOT EXISTS followers (
              actor_id TEXT PRIMARY KEY,
              inbox TEXT NOT NULL,
              shared_inbox TEXT NULL,
              created_at_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<Connection> {
        open_conn(&self.path)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_conn(&path)?;
            f(&conn)
        })
        .await?
    }

    pub fn upsert_follower(&self, actor_id: &str, inbox: &str, shared_inbox: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO followers(actor_id, inbox, shared_inbox, created_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(actor_id) DO UPDATE SET
              inbox=excluded.inbox,
              shared_inbox=excluded.shared_inbox
            "#,
            params![actor_id, inbox, shared_inbox, now_ms()],
        )?;
        Ok(())
    }

    pub fn remove_follower(&self, actor_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM followers WHERE actor_id=?1", params![actor_id])?;
        Ok(n > 0)
    }

    pub fn prune_tombstones_before(&self, cutoff_ms: i64, box_kind: BoxKind) -> Result<u64> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM activities WHERE box=?1 AND json_extract(meta, '$.deleted') IS 1 AND updated_at_ms < ?2",
            params![box_kind.as_str(), cutoff_ms],
        )?;
        Ok(n as u64)
    }

    pub fn prune_notifications_before(&self, cutoff_ms: i64) -> Result<u64> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM notifications WHERE created_at_ms < ?1",
            params![cutoff_ms],
        )?;
        Ok(n as u64)
    }

    pub fn prune_receipts_before(&self, cutoff_ms: i64) -> Result<u64> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM delivery_receipts WHERE delivered_at_ms < ?1",
            params![cutoff_ms],
        )?;
        Ok(n as u64)
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_record(&self, record: &ActivityRecord) -> Result<bool> {
        if record.remote_id.is_empty() {
            return Err(anyhow!("activity record without remote id"));
        }
        let box_kind = record.box_kind.as_str();
        let remote_id = record.remote_id.clone();
        let activity = serde_json::to_string(&record.activity)?;
        let meta = serde_json::to_string(&record.meta)?;
        self.blocking(move |conn| {
            let now = now_ms();
            let n = conn.execute(
                r#"
                INSERT INTO activities(box, remote_id, created_at_ms, updated_at_ms, activity, meta)
                VALUES (?1, ?2, ?3, ?3, ?4, ?5)
                ON CONFLICT(box, remote_id) DO NOTHING
                "#,
                params![box_kind, remote_id, now, activity, meta],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn find_one(&self, filter: &RecordFilter) -> Result<Option<ActivityRecord>> {
        let mut args = Vec::new();
        let where_sql = where_clause(filter, &mut args);
        self.blocking(move |conn| {
            let sql = format!(
                "SELECT box, remote_id, activity, meta FROM activities WHERE {where_sql} ORDER BY created_at_ms DESC LIMIT 1"
            );
            let row = conn
                .query_row(&sql, params_from_iter(args), |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                })
                .optional()?;
            let Some((box_kind, remote_id, activity, meta)) = row else {
                return Ok(None);
            };
            let box_kind = BoxKind::from_str(&box_kind)
                .ok_or_else(|| anyhow!("unknown box in db: {box_kind}"))?;
            let activity: Value = serde_json::from_str(&activity).context("decode activity")?;
            let meta: Map<String, Value> = serde_json::from_str(&meta).context("decode meta")?;
            Ok(Some(ActivityRecord {
                remote_id,
                box_kind,
                activity,
                meta,
            }))
        })
        .await
    }

    async fn update_one(&self, filter: &RecordFilter, update: &RecordUpdate) -> Result<u64> {
        let Some((set_sql, mut args)) = set_clause(update)? else {
            return Ok(0);
        };
        let where_sql = where_clause(filter, &mut args);
        self.blocking(move |conn| {
            let sql = format!(
                "UPDATE activities SET {set_sql} WHERE rowid = (SELECT rowid FROM activities WHERE {where_sql} ORDER BY created_at_ms DESC LIMIT 1)"
            );
            let n = conn.execute(&sql, params_from_iter(args))?;
            Ok(n as u64)
        })
        .await
    }

    async fn update_many(&self, filter: &RecordFilter, update: &RecordUpdate) -> Result<u64> {
        let Some((set_sql, mut args)) = set_clause(update)? else {
            return Ok(0);
        };
        let where_sql = where_clause(filter, &mut args);
        self.blocking(move |conn| {
            let sql = format!("UPDATE activities SET {set_sql} WHERE {where_sql}");
            let n = conn.execute(&sql, params_from_iter(args))?;
            Ok(n as u64)
        })
        .await
    }

    async fn find_notification(&self, kind: &str, activity_id: &str) -> Result<Option<Notification>> {
        let kind = kind.to_string();
        let activity_id = activity_id.to_string();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT kind, activity_id, created_at, activity FROM notifications WHERE kind=?1 AND activity_id=?2",
                    params![kind, activity_id],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            let Some((kind, activity_id, created_at, activity)) = row else {
                return Ok(None);
            };
            Ok(Some(Notification {
                kind,
                activity_id,
                created_at,
                activity: serde_json::from_str(&activity).context("decode notification")?,
            }))
        })
        .await
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<bool> {
        let n = notification.clone();
        let activity = serde_json::to_string(&n.activity)?;
        self.blocking(move |conn| {
            let changed = conn.execute(
                r#"
                INSERT INTO notifications(kind, activity_id, created_at, created_at_ms, activity)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(kind, activity_id) DO NOTHING
                "#,
                params![n.kind, n.activity_id, n.created_at, now_ms(), activity],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl DeliveryLedger for SqliteStore {
    async fn already_delivered(&self, activity_id: &str, recipient: &str) -> Result<bool> {
        let activity_id = activity_id.to_string();
        let recipient = recipient.to_string();
        self.blocking(move |conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM delivery_receipts WHERE activity_id=?1 AND recipient=?2",
                    params![activity_id, recipient],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
        .await
    }

    async fn record_delivered(&self, activity_id: &str, recipient: &str) -> Result<()> {
        let activity_id = activity_id.to_string();
        let recipient = recipient.to_string();
        self.blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO delivery_receipts(activity_id, recipient, delivered_at_ms)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(activity_id, recipient) DO NOTHING
                "#,
                params![activity_id, recipient, now_ms()],
            )?;
            Ok(())
        })
        .await
    }

    async fn track_send(&self, host: &str, ok: bool) -> Result<()> {
        let host = host.to_string();
        self.blocking(move |conn| {
            let now = now_ms();
            if ok {
                conn.execute(
                    r#"
                    INSERT INTO remote_hosts(host, successes, failures, consecutive_failures, last_success_ms)
                    VALUES (?1, 1, 0, 0, ?2)
                    ON CONFLICT(host) DO UPDATE SET
                      successes=remote_hosts.successes + 1,
                      consecutive_failures=0,
                      last_success_ms=excluded.last_success_ms
                    "#,
                    params![host, now],
                )?;
            } else {
                conn.execute(
                    r#"
                    INSERT INTO remote_hosts(host, successes, failures, consecutive_failures, last_failure_ms)
                    VALUES (?1, 0, 1, 1, ?2)
                    ON CONFLICT(host) DO UPDATE SET
                      failures=remote_hosts.failures + 1,
                      consecutive_failures=remote_hosts.consecutive_failures + 1,
                      last_failure_ms=excluded.last_failure_ms
                    "#,
                    params![host, now],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn host_stats(&self, host: &str) -> Result<Option<HostStats>> {
        let host = host.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT host, successes, failures, consecutive_failures, last_success_ms, last_failure_ms FROM remote_hosts WHERE host=?1",
                params![host],
                |r| {
                    Ok(HostStats {
                        host: r.get(0)?,
                        successes: r.get(1)?,
                        failures: r.get(2)?,
                        consecutive_failures: r.get(3)?,
                        last_success_ms: r.get(4)?,
                        last_failure_ms: r.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }
}

#[async_trait]
impl FollowerDirectory for SqliteStore {
    async fn follower_inboxes(&self) -> Result<Vec<String>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT COALESCE(shared_inbox, inbox) FROM followers ORDER BY 1",
            )?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

fn open_conn(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("open db: {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn where_clause(filter: &RecordFilter, args: &mut Vec<SqlValue>) -> String {
    if filter.conds.is_empty() {
        return "1=1".to_string();
    }
    let mut parts = Vec::with_capacity(filter.conds.len());
    for cond in &filter.conds {
        let part = match cond {
            Cond::Box(b) => {
                args.push(SqlValue::Text(b.as_str().to_string()));
                "box = ?".to_string()
            }
            Cond::RemoteId(id) => {
                args.push(SqlValue::Text(id.clone()));
                "remote_id = ?".to_string()
            }
            Cond::ActivityType(ty) => {
                args.push(SqlValue::Text(ty.clone()));
                "json_extract(activity, '$.type') = ?".to_string()
            }
            Cond::ActivityObjectId(id) => {
                args.push(SqlValue::Text(id.clone()));
                "json_extract(activity, '$.object.id') = ?".to_string()
            }
            Cond::MetaEq(key, v) => {
                args.push(json_to_sql(v));
                format!("json_extract(meta, '{}') IS ?", key.path())
            }
            Cond::MetaNe(key, v) => {
                args.push(json_to_sql(v));
                format!("json_extract(meta, '{}') IS NOT ?", key.path())
            }
            Cond::MetaObjectId(id) => {
                args.push(SqlValue::Text(id.clone()));
                "json_extract(meta, '$.object.id') = ?".to_string()
            }
        };
        parts.push(part);
    }
    parts.join(" AND ")
}

/// `json_set` over named paths only; `json(?)` keeps values typed as JSON.
fn set_clause(update: &RecordUpdate) -> Result<Option<(String, Vec<SqlValue>)>> {
    if update.is_empty() {
        return Ok(None);
    }
    let mut args = Vec::new();
    let mut sets = Vec::new();
    if !update.meta.is_empty() {
        let mut pairs = Vec::with_capacity(update.meta.len());
        for (key, value) in &update.meta {
            pairs.push(format!("'{}', json(?)", key.path()));
            args.push(SqlValue::Text(serde_json::to_string(value)?));
        }
        sets.push(format!("meta = json_set(meta, {})", pairs.join(", ")));
    }
    if let Some(obj) = &update.activity_object {
        sets.push("activity = json_set(activity, '$.object', json(?))".to_string());
        args.push(SqlValue::Text(serde_json::to_string(obj)?));
    }
    sets.push("updated_at_ms = ?".to_string());
    args.push(SqlValue::Integer(now_ms()));
    Ok(Some((sets.join(", "), args)))
}

fn json_to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
