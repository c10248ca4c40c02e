/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use fedi3_protocol::TaskRequest;
use thiserror::Error;

/// What the broker should do after a task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Finished without doing the work, and retrying cannot help.
    DoneNoRetry,
    Retry,
}

impl Outcome {
    pub fn needs_retry(&self) -> bool {
        matches!(self, Outcome::Retry)
    }
}

/// Successful end of a handler: how it finished and what to run next.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub outcome: Outcome,
    pub follow_ups: Vec<TaskRequest>,
    /// Stored records the handler rewrote.
    pub updated: u64,
}

impl Completion {
    pub fn done() -> Self {
        Self {
            outcome: Outcome::Done,
            follow_ups: Vec::new(),
            updated: 0,
        }
    }

    /// Nothing to do and nothing a retry could change (e.g. tombstoned).
    pub fn skipped() -> Self {
        Self {
            outcome: Outcome::DoneNoRetry,
            follow_ups: Vec::new(),
            updated: 0,
        }
    }

    pub fn then(mut self, request: TaskRequest) -> Self {
        self.follow_ups.push(request);
        self
    }

    pub fn with_updated(mut self, n: u64) -> Self {
        self.updated = n;
        self
    }
}

/// Classified failure of a remote fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gone: {0}")]
    Gone(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not an activity: {0}")]
    NotAnActivity(String),
    #[error("rejected with status {status}: {iri}")]
    ClientRejected { iri: String, status: u16 },
    #[error("transient failure fetching {iri}: {reason}")]
    Transient { iri: String, reason: String },
}

impl FetchError {
    /// Classify an HTTP status from a remote fetch. Success codes are not errors.
    pub fn from_status(iri: &str, status: u16) -> Option<Self> {
        let iri = iri.to_string();
        match status {
            200..=299 => None,
            410 => Some(FetchError::Gone(iri)),
            404 => Some(FetchError::NotFound(iri)),
            429 => Some(FetchError::Transient {
                iri,
                reason: "rate limited (429)".to_string(),
            }),
            400..=499 => Some(FetchError::ClientRejected { iri, status }),
            _ => Some(FetchError::Transient {
                iri,
                reason: format!("status {status}"),
            }),
        }
    }

    /// The remote entity no longer exists or never was a valid activity.
    pub fn is_vanished(&self) -> bool {
        matches!(
            self,
            FetchError::Gone(_) | FetchError::NotFound(_) | FetchError::NotAnActivity(_)
        )
    }

    pub fn is_gone_or_not_found(&self) -> bool {
        matches!(self, FetchError::Gone(_) | FetchError::NotFound(_))
    }
}

/// Failure of a task handler. `outcome()` is the single retry classification.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("remote rejected request with status {status}")]
    Rejected { status: u16 },
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("bad task payload: {0}")]
    BadPayload(String),
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

impl TaskError {
    pub fn outcome(&self) -> Outcome {
        match self {
            TaskError::Fetch(FetchError::Transient { .. }) => Outcome::Retry,
            TaskError::Fetch(_) => Outcome::DoneNoRetry,
            TaskError::Rejected { .. } => Outcome::DoneNoRetry,
            TaskError::BadPayload(_) => Outcome::DoneNoRetry,
            TaskError::Transient(_) => Outcome::Retry,
            TaskError::Unclassified(_) => Outcome::Retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_and_not_found_never_retry() {
        for status in [404u16, 410] {
            let err = FetchError::from_status("https://a.example/n/1", status).unwrap();
            assert_eq!(TaskError::from(err).outcome(), Outcome::DoneNoRetry);
        }
    }

    #[test]
    fn server_errors_always_retry() {
        for status in [500u16, 502, 503, 429] {
            let err = FetchError::from_status("https://a.example/n/1", status).unwrap();
            assert_eq!(TaskError::from(err).outcome(), Outcome::Retry);
        }
    }

    #[test]
    fn client_rejections_are_dropped() {
        let err = FetchError::from_status("https://a.example/n/1", 401).unwrap();
        assert!(matches!(err, FetchError::ClientRejected { status: 401, .. }));
        assert_eq!(TaskError::from(err).outcome(), Outcome::DoneNoRetry);
        assert_eq!(
            TaskError::Rejected { status: 403 }.outcome(),
            Outcome::DoneNoRetry
        );
    }

    #[test]
    fn unclassified_failures_retry() {
        let err = TaskError::from(anyhow::anyhow!("db locked"));
        assert!(err.outcome().needs_retry());
        assert!(FetchError::from_status("x", 204).is_none());
    }
}
