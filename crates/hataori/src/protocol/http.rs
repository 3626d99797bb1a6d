//! Request/response transport over HTTP.

use super::Transport;
use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use hataori_core::{ActivityName, ActivityProvider, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct TaskRequest {
    task: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskFailure {
    error: String,
}

/// Transport posting each call to `POST /<activity>` on a worker.
///
/// The worker side binds a listener up front with [`bind`](Self::bind) and
/// serves one route per activity of its delegate. The caller side only
/// needs the worker's base URL.
#[derive(Debug)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    listener: Mutex<Option<TcpListener>>,
}

impl HttpTransport {
    /// Caller-side transport for the worker at `base_url`.
    pub fn connect(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            listener: Mutex::new(None),
        }
    }

    /// Worker-side transport listening on `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, WorkflowError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|error| WorkflowError::Transport(error.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|error| WorkflowError::Transport(error.to_string()))?;
        Ok(Self {
            base_url: format!("http://{local}"),
            client: reqwest::Client::new(),
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Base URL calls are posted to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn router(delegate: Arc<dyn ActivityProvider>) -> Router {
    delegate
        .activity_names()
        .into_iter()
        .fold(Router::new(), |router, name| {
            let delegate = Arc::clone(&delegate);
            let path = format!("/{name}");
            router.route(
                &path,
                post(move |Json(request): Json<TaskRequest>| {
                    let delegate = Arc::clone(&delegate);
                    let name = name.clone();
                    async move {
                        debug!(activity = %name, "serving activity request");
                        match delegate.activity_result(&name, request.task).await {
                            Ok(output) => Ok(Json(output)),
                            Err(error) => {
                                warn!(activity = %name, "activity request failed: {}", error);
                                Err((
                                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                                    Json(TaskFailure {
                                        error: error.to_string(),
                                    }),
                                ))
                            }
                        }
                    }
                }),
            )
        })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, activity: &ActivityName, input: Value) -> Result<Value, WorkflowError> {
        let url = format!("{}/{}", self.base_url, activity);
        let response = self
            .client
            .post(&url)
            .json(&TaskRequest { task: input })
            .send()
            .await
            .map_err(|error| WorkflowError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let failure = response.json::<TaskFailure>().await.ok();
            return Err(match failure {
                Some(TaskFailure { error }) => WorkflowError::Remote(error),
                None => WorkflowError::Transport(format!("{url} answered {status}")),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|error| WorkflowError::Transport(error.to_string()))
    }

    async fn serve(&self, delegate: Arc<dyn ActivityProvider>) -> Result<(), WorkflowError> {
        let listener = self.listener.lock().await.take().ok_or_else(|| {
            WorkflowError::Configuration("HTTP transport has no listener to serve on".to_string())
        })?;
        info!(url = %self.base_url, "HTTP worker listening");
        axum::serve(listener, router(delegate))
            .await
            .map_err(|error| WorkflowError::Transport(error.to_string()))
    }
}
