/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{FetchError, TaskError};
use crate::http_sig::Signer;
use crate::store::DeliveryLedger;
use anyhow::{Context, Result};
use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, Uri};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use sha2::Digest as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

const AP_CONTENT_TYPE: &str = "application/activity+json";

/// Sends one signed payload to one inbox.
#[async_trait]
pub trait InboxSender: Send + Sync {
    /// Returns the response status; `Err` only when no response was received.
    async fn send(&self, inbox: &str, body: &[u8]) -> Result<u16>;
}

#[derive(Clone)]
pub struct SignedHttpSender {
    client: reqwest::Client,
    signer: Signer,
}

impl SignedHttpSender {
    pub fn new(client: reqwest::Client, signer: Signer) -> Self {
        Self { client, signer }
    }
}

#[async_trait]
impl InboxSender for SignedHttpSender {
    async fn send(&self, inbox: &str, body: &[u8]) -> Result<u16> {
        let uri: Uri = inbox.parse().context("parse inbox url")?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(AP_CONTENT_TYPE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(AP_CONTENT_TYPE));
        self.signer.sign(&Method::POST, &uri, &mut headers, body)?;

        let resp = self
            .client
            .post(inbox)
            .headers(headers)
            .body(body.to_vec())
            .send()
            .await
            .with_context(|| format!("post to inbox: {inbox}"))?;
        Ok(resp.status().as_u16())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    Delivered,
    /// A receipt from an earlier run exists; nothing was sent.
    AlreadyDelivered,
    Rejected { status: u16 },
    Failed { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub activity_id: String,
    pub results: Vec<(String, RecipientOutcome)>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, o)| {
                matches!(o, RecipientOutcome::Delivered | RecipientOutcome::AlreadyDelivered)
            })
            .count()
    }

    pub fn rejected(&self) -> Vec<(&str, u16)> {
        self.results
            .iter()
            .filter_map(|(r, o)| match o {
                RecipientOutcome::Rejected { status } => Some((r.as_str(), *status)),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, o)| matches!(o, RecipientOutcome::Failed { .. }))
            .map(|(r, _)| r.as_str())
            .collect()
    }
}

/// Fans a payload out to inboxes. Every recipient is attempted; one recipient
/// failing never stops the others.
#[derive(Clone)]
pub struct DeliveryForwarder {
    sender: Arc<dyn InboxSender>,
    ledger: Arc<dyn DeliveryLedger>,
}

impl DeliveryForwarder {
    pub fn new(sender: Arc<dyn InboxSender>, ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self { sender, ledger }
    }

    /// `Err(TaskError::Transient)` when any recipient failed transiently;
    /// recipients with a receipt are skipped when the task runs again.
    pub async fn deliver(
        &self,
        payload: &str,
        recipients: &[String],
    ) -> Result<DeliveryReport, TaskError> {
        let activity_id = activity_id_of(payload);
        let mut report = DeliveryReport {
            activity_id: activity_id.clone(),
            results: Vec::with_capacity(recipients.len()),
        };

        for recipient in recipients {
            let outcome = self.deliver_one(&activity_id, payload, recipient).await;
            report.results.push((recipient.clone(), outcome));
        }

        let failed = report.failed();
        if !failed.is_empty() {
            return Err(TaskError::Transient(format!(
                "delivery of {activity_id} failed for {} of {} recipients: {}",
                failed.len(),
                recipients.len(),
                failed.join(", ")
            )));
        }
        info!(
            activity_id = %activity_id,
            delivered = report.delivered(),
            rejected = report.rejected().len(),
            "delivery finished"
        );
        Ok(report)
    }

    async fn deliver_one(&self, activity_id: &str, payload: &str, recipient: &str) -> RecipientOutcome {
        match self.ledger.already_delivered(activity_id, recipient).await {
            Ok(true) => {
                debug!(activity_id, recipient, "already delivered");
                return RecipientOutcome::AlreadyDelivered;
            }
            Ok(false) => {}
            Err(e) => warn!(activity_id, recipient, "receipt lookup failed: {e:#}"),
        }

        let outcome = match self.sender.send(recipient, payload.as_bytes()).await {
            Err(e) => RecipientOutcome::Failed {
                reason: format!("{e:#}"),
            },
            Ok(status) => match FetchError::from_status(recipient, status) {
                None => RecipientOutcome::Delivered,
                Some(FetchError::Transient { reason, .. }) => RecipientOutcome::Failed { reason },
                Some(_) => RecipientOutcome::Rejected { status },
            },
        };

        let ok = outcome == RecipientOutcome::Delivered;
        if ok {
            if let Err(e) = self.ledger.record_delivered(activity_id, recipient).await {
                warn!(activity_id, recipient, "record delivery receipt failed: {e:#}");
            }
        } else {
            warn!(activity_id, recipient, ?outcome, "delivery not accepted");
        }
        if let Some(host) = host_of(recipient) {
            if let Err(e) = self.ledger.track_send(&host, ok).await {
                warn!(host = %host, "track send failed: {e:#}");
            }
        }
        outcome
    }
}

/// The payload's `id`, or a content hash when it has none.
pub fn activity_id_of(payload: &str) -> String {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            let mut h = sha2::Sha256::new();
            h.update(payload.as_bytes());
            format!("urn:sha256:{}", hex::encode(h.finalize()))
        })
}

pub fn host_of(url: &str) -> Option<String> {
    let uri: Uri = url.parse().ok()?;
    uri.host().map(|h| h.to_ascii_lowercase())
}
