// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_intake::{
    config,
    dead_letter::DeadLetterLog,
    log_agent::LogAgent,
    store::{FileStore, LogStore, MemoryStore},
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_INTAKE_LOG_LEVEL")
        .map(|val| val.trim().to_lowercase())
        .ok()
        .filter(|val| !val.is_empty())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config::Config::new() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on log intake startup: {e:#}");
            return;
        }
    };

    let store: Arc<dyn LogStore> = match &config.store_path {
        Some(path) => match FileStore::open(path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Error opening log store at {}: {e}", path.display());
                return;
            }
        },
        None => {
            info!("LOG_INTAKE_STORE_PATH not set, keeping log entries in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let dead_letters = Arc::new(DeadLetterLog::new(config.dead_letter_retention));

    let (log_agent, worker_pool) = LogAgent::new(config, store, dead_letters);

    let cancel = CancellationToken::new();
    let workers = worker_pool.start(cancel.clone());

    let server_cancel = cancel.clone();
    let mut server = tokio::spawn(async move {
        if let Err(e) = log_agent.start_log_agent(server_cancel).await {
            error!("Error when starting log intake server: {e:?}");
        }
    });

    let server_finished = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Unable to listen for shutdown signal: {e}");
            }
            info!("Shutdown signal received, draining queued log entries");
            false
        }
        res = &mut server => {
            if let Err(e) = res {
                error!("Log intake server task died: {e:?}");
            }
            true
        }
    };

    cancel.cancel();
    if !server_finished {
        if let Err(e) = server.await {
            error!("Log intake server task died: {e:?}");
        }
    }
    workers.shutdown().await;
    info!("Log intake stopped");
}
