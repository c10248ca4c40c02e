/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use fedi3_tasks::activity_db::SqliteStore;
use fedi3_tasks::config::{config_path_from, TasksConfig};
use fedi3_tasks::delivery::SignedHttpSender;
use fedi3_tasks::dispatcher::TaskDispatcher;
use fedi3_tasks::http_sig::Signer;
use fedi3_tasks::keys::load_or_generate_private_key;
use fedi3_tasks::media_backend::LocalMediaCache;
use fedi3_tasks::opengraph::HttpOpenGraph;
use fedi3_tasks::processor::StoreActivityProcessor;
use fedi3_tasks::queue::HttpTaskQueue;
use fedi3_tasks::resolver::HttpResolver;
use fedi3_tasks::server::{router, AppState};
use fedi3_tasks::storage_gc::StoreGc;
use fedi3_tasks::tasks::{TaskDeps, Tasks};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("static directive")),
        )
        .try_init()
        .ok();

    let cfg_path = config_path_from(std::env::args().skip(1))?;
    info!("fedi3 tasks service starting");
    info!("config: {}", cfg_path.display());
    let cfg = TasksConfig::load(&cfg_path)?;

    let data_dir = cfg.data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    let store = Arc::new(SqliteStore::open(data_dir.join("activities.sqlite"))?);

    let pem = load_or_generate_private_key(cfg.private_key_path(&data_dir))?;
    let signer = Signer::from_pem(&cfg.key_id(), &pem)?;

    let client = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone().unwrap_or_else(|| "fedi3-tasks".to_string()))
        .timeout(Duration::from_secs(cfg.http_timeout_secs.unwrap_or(15)))
        .build()
        .context("build http client")?;

    let resolver = Arc::new(HttpResolver::new(
        client.clone(),
        Some(signer.clone()),
        Duration::from_secs(cfg.resolver_cache_ttl_secs.unwrap_or(60)),
    ));
    let local_actor_id = cfg.local_actor_id().to_string();

    let tasks = Tasks::new(TaskDeps {
        local_actor_id: local_actor_id.clone(),
        store: store.clone(),
        ledger: store.clone(),
        followers: store.clone(),
        resolver: resolver.clone(),
        sender: Arc::new(SignedHttpSender::new(client.clone(), signer)),
        media: Arc::new(LocalMediaCache::new(client.clone(), &data_dir, &cfg.media)),
        opengraph: Arc::new(HttpOpenGraph::new(client.clone())),
        processor: Arc::new(StoreActivityProcessor::new(store.clone(), resolver, local_actor_id.as_str())),
        gc: Arc::new(StoreGc::new(store.clone(), cfg.gc.clone())),
    });

    let queue = Arc::new(HttpTaskQueue::new(
        client,
        cfg.broker_url.as_deref().unwrap_or("http://127.0.0.1:7991/"),
        cfg.callback_base_url.as_deref().unwrap_or("http://127.0.0.1:7992"),
    ));
    let app = router(AppState {
        dispatcher: TaskDispatcher::new(tasks, queue),
        store,
    });

    let addr: SocketAddr = cfg
        .bind
        .as_deref()
        .unwrap_or("127.0.0.1:7992")
        .parse()
        .context("parse bind")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
    info!(actor = %local_actor_id, "tasks server http://{addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("serve")?;
    Ok(())
}
