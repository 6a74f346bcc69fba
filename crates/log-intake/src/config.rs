// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use tracing::level_filters::LevelFilter;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_DEAD_LETTER_RETENTION: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// `EnvFilter` directive for the crate's own logs
    pub log_level: String,
    /// jobs that may wait in the ingestion queue before submissions are refused
    pub queue_capacity: usize,
    pub worker_count: usize,
    /// attempts per job, including the first
    pub job_max_attempts: u32,
    /// timeout for a single write attempt, in seconds
    pub job_timeout_secs: u64,
    /// base backoff between write attempts, in milliseconds
    pub job_retry_backoff_base_ms: u64,
    /// JSON-lines file backing the store; in memory when unset
    pub store_path: Option<PathBuf>,
    pub dead_letter_retention: usize,
    pub max_request_content_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_count: DEFAULT_WORKERS,
            job_max_attempts: 3,
            job_timeout_secs: 60,
            job_retry_backoff_base_ms: 100,
            store_path: None,
            dead_letter_retention: DEFAULT_DEAD_LETTER_RETENTION,
            max_request_content_length: 1024 * 1024, // 1MiB in Bytes
        }
    }
}

impl Config {
    pub fn new() -> anyhow::Result<Config> {
        let defaults = Config::default();

        let host = env_or("LOG_INTAKE_HOST", defaults.host)?;
        let port = env_or("LOG_INTAKE_PORT", defaults.port)?;

        let log_level = env::var("LOG_INTAKE_LOG_LEVEL")
            .ok()
            .filter(|level| !level.trim().is_empty())
            .map(|level| level.trim().to_lowercase())
            .unwrap_or(defaults.log_level);
        LevelFilter::from_str(&log_level)
            .map_err(|_| anyhow!("LOG_INTAKE_LOG_LEVEL: unknown log level '{log_level}'"))?;

        let queue_capacity = env_or("LOG_INTAKE_QUEUE_CAPACITY", defaults.queue_capacity)?;
        if queue_capacity == 0 {
            bail!("LOG_INTAKE_QUEUE_CAPACITY must be at least 1");
        }
        let worker_count = env_or("LOG_INTAKE_WORKERS", defaults.worker_count)?;
        if worker_count == 0 {
            bail!("LOG_INTAKE_WORKERS must be at least 1");
        }
        let job_max_attempts = env_or("LOG_INTAKE_JOB_TRIES", defaults.job_max_attempts)?;
        if job_max_attempts == 0 {
            bail!("LOG_INTAKE_JOB_TRIES must be at least 1");
        }
        let job_timeout_secs = env_or("LOG_INTAKE_JOB_TIMEOUT_SECS", defaults.job_timeout_secs)?;
        if job_timeout_secs == 0 {
            bail!("LOG_INTAKE_JOB_TIMEOUT_SECS must be at least 1");
        }

        let store_path = env::var("LOG_INTAKE_STORE_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(Config {
            host,
            port,
            log_level,
            queue_capacity,
            worker_count,
            job_max_attempts,
            job_timeout_secs,
            job_retry_backoff_base_ms: env_or(
                "LOG_INTAKE_RETRY_BACKOFF_MS",
                defaults.job_retry_backoff_base_ms,
            )?,
            store_path,
            dead_letter_retention: env_or(
                "LOG_INTAKE_DEAD_LETTER_RETENTION",
                defaults.dead_letter_retention,
            )?,
            max_request_content_length: env_or(
                "LOG_INTAKE_MAX_REQUEST_BYTES",
                defaults.max_request_content_length,
            )?,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Parses `name` when it is set and non-empty, otherwise returns `default`.
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("{name}: invalid value '{value}'")),
        _ => Ok(default),
    }
}
