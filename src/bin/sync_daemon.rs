// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;

use imap_sync_worker::config::{DaemonConfig, WorkerConfig};
use imap_sync_worker::daemon::Daemon;
use imap_sync_worker::process_uid::NoopProcessUid;
use imap_sync_worker::user_store::{SqliteUserStore, UserStore};

#[derive(Parser, Debug)]
#[command(name = "sync-daemon", about = "Runs one IMAP sync worker per active user")]
struct Cli {
    /// Path to a TOML config file, overriding config/default.toml.
    #[arg(long, env = "SYNC_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let daemon_config = DaemonConfig::new(cli.config.as_deref())?;
    let worker_config = WorkerConfig::default();

    log::info!("connecting to {}", daemon_config.database_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&daemon_config.database_url)
        .await?;

    let store: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(pool));
    let process_uid = Arc::new(NoopProcessUid);
    let daemon = Daemon::new(&daemon_config, worker_config, store.clone(), process_uid);

    let user_ids = store.list_active_users().await?;
    log::info!("spawning workers for {} active users", user_ids.len());

    let mut handles = Vec::new();
    for user_id in user_ids {
        match daemon.spawn_worker(user_id.clone()) {
            Ok(handle) => handles.push(handle),
            Err(e) => log::error!("failed to spawn worker for user {}: {}", user_id, e),
        }
    }

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received, stopping all workers");
    for handle in &handles {
        handle.stop.notify_one();
    }
    for handle in handles {
        let _ = handle.done.await;
    }

    Ok(())
}
