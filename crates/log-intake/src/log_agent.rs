// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::sync::Arc;
use std::time::Instant;

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{header, http, Method, Request, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::dead_letter::DeadLetterObserver;
use crate::error::StoreError;
use crate::http_utils::{
    create_json_response, log_and_create_http_response, not_found_response,
    verify_request_content_length, HttpResponse,
};
use crate::ingestion::IngestionService;
use crate::query::QueryService;
use crate::queue::{ChannelQueue, IngestionQueue};
use crate::requests::{IndexLogRequest, RequestError, StoreLogRequest};
use crate::resources::{AcceptedResponse, LogCollection, PageUrl, SingleResource};
use crate::store::LogStore;
use crate::write_worker::{RetryPolicy, WorkerPool, WriteWorker};

const LOGS_ENDPOINT_PATH: &str = "/logs";
const LOG_ENDPOINT_PREFIX: &str = "/logs/";
const INFO_ENDPOINT_PATH: &str = "/info";

pub type AgentError = Box<dyn std::error::Error + Send + Sync>;

pub struct LogAgent {
    pub config: Arc<Config>,
    pub ingestion_service: Arc<IngestionService>,
    pub query_service: Arc<QueryService>,
    pub dead_letters: Arc<dyn DeadLetterObserver>,
}

impl LogAgent {
    /// Wires the pipeline around a bounded in-process queue.
    ///
    /// The returned pool owns the receiving side of the queue and must be
    /// started for submitted entries to reach the store.
    pub fn new(
        config: Config,
        store: Arc<dyn LogStore>,
        dead_letters: Arc<dyn DeadLetterObserver>,
    ) -> (LogAgent, WorkerPool) {
        let (queue, jobs) = ChannelQueue::new(config.queue_capacity);
        let worker = Arc::new(WriteWorker::new(
            store.clone(),
            dead_letters.clone(),
            RetryPolicy::from_config(&config),
        ));
        let pool = WorkerPool::new(worker, jobs, config.worker_count);
        let agent = LogAgent::with_queue(config, Arc::new(queue), store, dead_letters);
        (agent, pool)
    }

    /// Wires the HTTP side only, submitting to the given queue.
    pub fn with_queue(
        config: Config,
        queue: Arc<dyn IngestionQueue>,
        store: Arc<dyn LogStore>,
        dead_letters: Arc<dyn DeadLetterObserver>,
    ) -> LogAgent {
        LogAgent {
            config: Arc::new(config),
            ingestion_service: Arc::new(IngestionService::new(queue)),
            query_service: Arc::new(QueryService::new(store)),
            dead_letters,
        }
    }

    pub async fn start_log_agent(&self, cancel: CancellationToken) -> Result<(), AgentError> {
        let now = Instant::now();
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!(
            "Log intake listening on {}",
            listener.local_addr()?
        );
        debug!(
            "Time taken to start the log intake: {} ms",
            now.elapsed().as_millis()
        );
        self.serve(listener, cancel).await
    }

    /// Serves HTTP on an already bound listener until `cancel` fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        let config = self.config.clone();
        let ingestion_service = self.ingestion_service.clone();
        let query_service = self.query_service.clone();
        let dead_letters = self.dead_letters.clone();

        let service = service_fn(move |req| {
            LogAgent::endpoint_handler(
                config.clone(),
                req,
                ingestion_service.clone(),
                query_service.clone(),
                dead_letters.clone(),
            )
        });

        Self::serve_tcp(listener, service, cancel).await
    }

    async fn serve_tcp<S>(
        listener: TcpListener,
        service: S,
        cancel: CancellationToken,
    ) -> Result<(), AgentError>
    where
        S: hyper::service::Service<
                Request<hyper::body::Incoming>,
                Response = HttpResponse,
            > + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Log intake server shutting down, closing {} connections", joinset.len());
                    joinset.shutdown().await;
                    return Ok(());
                },
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    pub async fn endpoint_handler<B>(
        config: Arc<Config>,
        req: Request<B>,
        ingestion_service: Arc<IngestionService>,
        query_service: Arc<QueryService>,
        dead_letters: Arc<dyn DeadLetterObserver>,
    ) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<AgentError>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        match (&method, path.as_str()) {
            (&Method::GET | &Method::HEAD, LOGS_ENDPOINT_PATH) => {
                Self::index_handler(&req, query_service).await
            }
            (&Method::POST, LOGS_ENDPOINT_PATH) => {
                Self::store_handler(config, req, ingestion_service).await
            }
            (_, LOGS_ENDPOINT_PATH) => method_not_allowed(&method),
            (&Method::GET | &Method::HEAD, path) if is_single_log_path(path) => {
                Self::show_handler(&path[LOG_ENDPOINT_PREFIX.len()..], query_service).await
            }
            (_, path) if is_single_log_path(path) => method_not_allowed(&method),
            (&Method::GET, INFO_ENDPOINT_PATH) => {
                Self::info_handler(
                    &config,
                    &ingestion_service,
                    &query_service,
                    dead_letters.as_ref(),
                )
                .await
            }
            (_, INFO_ENDPOINT_PATH) => method_not_allowed(&method),
            _ => not_found_response(),
        }
    }

    async fn store_handler<B>(
        config: Arc<Config>,
        req: Request<B>,
        ingestion_service: Arc<IngestionService>,
    ) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<AgentError>,
    {
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing log entry",
        ) {
            return response;
        }

        // chunked bodies skip the content-length check
        let body = match Limited::new(body, config.max_request_content_length)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return log_and_create_http_response(
                    "Error processing log entry: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading log entry request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let entry = match StoreLogRequest::from_json(&body) {
            Ok(entry) => entry,
            Err(RequestError::Malformed(reason)) => {
                return log_and_create_http_response(
                    &format!("Error processing log entry: {reason}"),
                    StatusCode::BAD_REQUEST,
                );
            }
            Err(RequestError::Invalid(errors)) => {
                debug!("Rejected log entry: {errors}");
                return create_json_response(&errors, StatusCode::UNPROCESSABLE_ENTITY);
            }
        };

        match ingestion_service.submit(entry).await {
            Ok(receipt) => {
                create_json_response(&AcceptedResponse::from(receipt), StatusCode::ACCEPTED)
            }
            Err(e) => log_and_create_http_response(
                &format!("Error enqueueing log entry: {e}"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }

    async fn index_handler<B>(
        req: &Request<B>,
        query_service: Arc<QueryService>,
    ) -> http::Result<HttpResponse> {
        let query = req.uri().query();
        let request = match IndexLogRequest::from_query(query) {
            Ok(request) => request,
            Err(errors) => {
                debug!("Rejected log search: {errors}");
                return create_json_response(&errors, StatusCode::UNPROCESSABLE_ENTITY);
            }
        };

        match query_service.search(&request.filters, request.page).await {
            Ok(page) => {
                let base = match req.headers().get(header::HOST).and_then(|h| h.to_str().ok()) {
                    Some(host) => format!("http://{host}{LOGS_ENDPOINT_PATH}"),
                    None => LOGS_ENDPOINT_PATH.to_string(),
                };
                let url = PageUrl::new(base, query);
                create_json_response(&LogCollection::new(page, &url), StatusCode::OK)
            }
            Err(e) => store_error_response("Error searching log entries", e),
        }
    }

    async fn show_handler(
        id: &str,
        query_service: Arc<QueryService>,
    ) -> http::Result<HttpResponse> {
        let Ok(id) = Uuid::try_parse(id) else {
            return not_found_response();
        };
        match query_service.find_by_id(&id).await {
            Ok(Some(entry)) => create_json_response(&SingleResource::from(entry), StatusCode::OK),
            Ok(None) => not_found_response(),
            Err(e) => store_error_response("Error fetching log entry", e),
        }
    }

    async fn info_handler(
        config: &Config,
        ingestion_service: &IngestionService,
        query_service: &QueryService,
        dead_letters: &dyn DeadLetterObserver,
    ) -> http::Result<HttpResponse> {
        let stored_entries = match query_service.count().await {
            Ok(count) => count,
            Err(e) => return store_error_response("Error counting log entries", e),
        };
        let config_json = json!({
            "listen_addr": config.listen_addr().to_string(),
            "queue_capacity": config.queue_capacity,
            "workers": config.worker_count,
            "job_tries": config.job_max_attempts,
            "job_timeout_secs": config.job_timeout_secs,
            "retry_backoff_ms": config.job_retry_backoff_base_ms,
            "store": config
                .store_path
                .as_ref()
                .map_or_else(|| "memory".to_string(), |path| path.display().to_string()),
            "max_request_content_length": config.max_request_content_length,
        });

        let response_json = json!(
            {
                "endpoints": [
                    LOGS_ENDPOINT_PATH,
                    format!("{LOG_ENDPOINT_PREFIX}{{id}}"),
                    INFO_ENDPOINT_PATH
                ],
                "config": config_json,
                "queue_depth": ingestion_service.queue_depth(),
                "stored_entries": stored_entries,
                "dead_letters": dead_letters.count()
            }
        );
        create_json_response(&response_json, StatusCode::OK)
    }
}

fn is_single_log_path(path: &str) -> bool {
    path.strip_prefix(LOG_ENDPOINT_PREFIX)
        .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}

fn method_not_allowed(method: &Method) -> http::Result<HttpResponse> {
    log_and_create_http_response(
        &format!("Method {method} not allowed"),
        StatusCode::METHOD_NOT_ALLOWED,
    )
}

fn store_error_response(context: &str, e: StoreError) -> http::Result<HttpResponse> {
    let status = match e {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Io(_) | StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log_and_create_http_response(&format!("{context}: {e}"), status)
}
