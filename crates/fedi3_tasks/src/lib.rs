/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod activity;
pub mod activity_db;
pub mod actor_cache;
pub mod attachments;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod http_sig;
pub mod keys;
pub mod media_backend;
pub mod object_cache;
pub mod opengraph;
pub mod poll_sync;
pub mod processor;
pub mod queue;
pub mod recipients;
pub mod record;
pub mod resolver;
pub mod server;
pub mod storage_gc;
pub mod store;
pub mod tasks;

#[cfg(test)]
mod testing;
