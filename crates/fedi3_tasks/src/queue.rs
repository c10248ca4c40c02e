/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use fedi3_protocol::TaskRequest;
use serde::Serialize;

/// Hands a follow-up task to the broker.
#[async_trait]
pub trait TaskEnqueuer: Send + Sync {
    async fn enqueue(&self, request: &TaskRequest) -> Result<()>;
}

/// Job the broker stores and later POSTs back to `url`.
#[derive(Debug, Serialize)]
struct BrokerJob<'a> {
    url: String,
    payload: &'a serde_json::Value,
    expected: u16,
}

#[derive(Clone)]
pub struct HttpTaskQueue {
    client: reqwest::Client,
    broker_url: String,
    callback_base_url: String,
}

impl HttpTaskQueue {
    pub fn new(client: reqwest::Client, broker_url: &str, callback_base_url: &str) -> Self {
        Self {
            client,
            broker_url: broker_url.to_string(),
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn callback_url(&self, request: &TaskRequest) -> String {
        format!("{}/task/{}", self.callback_base_url, request.task)
    }
}

#[async_trait]
impl TaskEnqueuer for HttpTaskQueue {
    async fn enqueue(&self, request: &TaskRequest) -> Result<()> {
        let job = BrokerJob {
            url: self.callback_url(request),
            payload: &request.payload,
            expected: 200,
        };
        self.client
            .post(&self.broker_url)
            .json(&job)
            .send()
            .await
            .with_context(|| format!("enqueue {}", request.task))?
            .error_for_status()
            .with_context(|| format!("broker refused {}", request.task))?;
        Ok(())
    }
}
