// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use log_intake::config::Config;
use log_intake::log_agent::LogAgent;
use log_intake::write_worker::{WorkerPool, WorkerPoolHandle};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Config with fast retries so failure paths finish quickly
pub fn create_test_config() -> Config {
    Config {
        queue_capacity: 64,
        worker_count: 2,
        job_max_attempts: 3,
        job_timeout_secs: 1,
        job_retry_backoff_base_ms: 5,
        ..Config::default()
    }
}

/// A log agent serving on an ephemeral local port
pub struct TestServer {
    pub port: u16,
    pub cancel: CancellationToken,
    pub server: JoinHandle<()>,
    pub workers: Option<WorkerPoolHandle>,
}

impl TestServer {
    /// Serves `agent` and, when given, runs `pool` under the same cancellation token.
    pub async fn start(agent: LogAgent, pool: Option<WorkerPool>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let port = listener.local_addr().expect("Failed to get local addr").port();
        let cancel = CancellationToken::new();
        let workers = pool.map(|pool| pool.start(cancel.clone()));

        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            agent
                .serve(listener, server_cancel)
                .await
                .expect("log agent server failed");
        });

        TestServer {
            port,
            cancel,
            server,
            workers,
        }
    }

    /// Stops accepting requests and drains queued jobs.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = self.server.await;
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
    }
}

/// Send an HTTP request over TCP and return the status with the decoded JSON body
pub async fn send_tcp_request(
    port: u16,
    uri: &str,
    method: &str,
    body: Option<&str>,
) -> TestResult<(StatusCode, Value)> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Content-Type", "application/json");

    let request = if let Some(body_data) = body {
        request_builder = request_builder.header("Content-Length", body_data.len().to_string());
        request_builder.body(Full::new(Bytes::from(body_data.to_string())))?
    } else {
        request_builder.body(Full::new(Bytes::new()))?
    };
    let response = timeout(Duration::from_secs(2), sender.send_request(request)).await??;

    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

/// Polls `GET /logs/{id}` until the entry is visible
pub async fn wait_for_entry(port: u16, id: &str) -> TestResult<Value> {
    let uri = format!("/logs/{id}");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = send_tcp_request(port, &uri, "GET", None).await?;
        if status == StatusCode::OK {
            return Ok(body["data"].clone());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("log entry {id} never became visible (last status {status})").into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls `GET /info` until `dead_letters` reaches `expected`
pub async fn wait_for_dead_letters(port: u16, expected: u64) -> TestResult<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (_, body) = send_tcp_request(port, "/info", "GET", None).await?;
        if body["dead_letters"].as_u64() == Some(expected) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("expected {expected} dead letters, /info says {body}").into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
