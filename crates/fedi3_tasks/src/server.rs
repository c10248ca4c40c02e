/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity_db::SqliteStore;
use crate::dispatcher::TaskDispatcher;
use crate::error::Outcome;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use fedi3_protocol::{TaskEnvelope, TaskName};
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info_span, warn, Instrument};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: TaskDispatcher,
    pub store: Arc<SqliteStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/task/:name", post(run_task))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("req");
                info_span!(
                    "http",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id
                )
            }),
        )
        .with_state(state)
}

const ENVELOPE_KEYS: [&str; 3] = ["req_id", "tries", "payload"];

/// The broker posts either an envelope or the bare payload. Only an object
/// made of envelope keys is an envelope; `{"payload", "to"}` is a payload.
/// An empty body is a null payload (`cleanup` takes none).
fn unwrap_envelope(body: &[u8]) -> Option<TaskEnvelope> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).ok()?
    };
    let is_envelope = value.as_object().is_some_and(|m| {
        m.contains_key("payload") && m.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str()))
    });
    if is_envelope {
        if let Ok(env) = serde_json::from_value::<TaskEnvelope>(value.clone()) {
            return Some(env);
        }
    }
    Some(TaskEnvelope {
        req_id: String::new(),
        tries: 0,
        payload: value,
    })
}

async fn run_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let Some(task) = TaskName::from_str(&name) else {
        return (StatusCode::NOT_FOUND, format!("unknown task: {name}")).into_response();
    };
    let Some(env) = unwrap_envelope(&body) else {
        warn!(task = %task, "undecodable task body, dropping");
        return StatusCode::OK.into_response();
    };
    let span = info_span!("task", task = %task, req_id = %env.req_id, tries = env.tries);
    match state.dispatcher.dispatch(task, env.payload).instrument(span).await {
        Outcome::Done | Outcome::DoneNoRetry => StatusCode::OK.into_response(),
        Outcome::Retry => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{task} failed, retry")).into_response()
        }
    }
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.health_check()).await {
        Ok(Ok(())) => "ok".into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("db: {e:#}")).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("db: {e}")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DeliveryLedger;
    use crate::testing::{harness, FakeEnqueuer, Harness};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        router(AppState {
            dispatcher: TaskDispatcher::new(h.tasks.clone(), Arc::new(FakeEnqueuer::default())),
            store: h.store.clone(),
        })
    }

    fn post_task(name: &str, body: Value) -> Request<Body> {
        Request::post(format!("/task/{name}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_codes_follow_outcomes() {
        let h = harness("https://me.example/users/me");
        h.resolver.fail("https://b.example/n/gone", 410);
        h.resolver.fail("https://b.example/n/down", 503);

        let resp = app(&h)
            .oneshot(post_task("cache_object", json!({"req_id": "r1", "tries": 2, "payload": "https://b.example/n/gone"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());

        let resp = app(&h)
            .oneshot(post_task("cache_object", json!("https://b.example/n/down")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("cache_object"));
    }

    #[tokio::test]
    async fn unknown_tasks_are_404() {
        let h = harness("https://me.example/users/me");
        let resp = app(&h).oneshot(post_task("mine_bitcoin", json!("x"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_endpoints_answer() {
        let h = harness("https://me.example/users/me");
        for path in ["/healthz", "/readyz"] {
            let resp = app(&h)
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn empty_body_still_runs_cleanup() {
        let h = harness("https://me.example/users/me");
        h.store.record_delivered("https://me.example/a/1", "https://b.example/inbox").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let req = Request::post("/task/cleanup").body(Body::empty()).unwrap();
        let resp = app(&h).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!h.store.already_delivered("https://me.example/a/1", "https://b.example/inbox").await.unwrap());
    }

    #[test]
    fn bare_payloads_are_wrapped() {
        let env = unwrap_envelope(br#""https://a.example/a/1""#).unwrap();
        assert_eq!(env.payload, json!("https://a.example/a/1"));
        let env = unwrap_envelope(br#"{"iri": "https://a.example/a/1"}"#).unwrap();
        assert_eq!(env.payload["iri"], "https://a.example/a/1");
        let env = unwrap_envelope(br#"{"payload": "{}", "to": "https://b.example/inbox"}"#).unwrap();
        assert_eq!(env.payload["to"], "https://b.example/inbox");
        assert_eq!(unwrap_envelope(b"").unwrap().payload, Value::Null);
        assert_eq!(unwrap_envelope(b" \n").unwrap().payload, Value::Null);
        assert!(unwrap_envelope(b"{nope").is_none());
    }
}
