//! HTTP frontend.
//!
//! One tokio task per accepted connection; hyper drives the HTTP/1.1
//! exchange and calls [`ServerState::handle`] for every request. Within a
//! request, matching, rendering, and writing run in sequence.

use crate::admin;
use crate::config::{status_code, FaultConfig, GlobalSettings, ResponseDefinition, ServerConfig};
use crate::error::{RequestError, ResponseError, ServerError, StubError};
use crate::matcher::MatchContext;
use crate::registry::{Stub, StubRegistry};
use crate::request::IncomingRequest;
use crate::template::TemplateEngine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub(crate) type HttpResponse = Response<Full<Bytes>>;

/// Shared, read-only request handling state.
struct ServerState {
    registry: StubRegistry,
    engine: TemplateEngine,
    settings: GlobalSettings,
    default_response: Option<ResponseDefinition>,
}

/// A running stub server.
///
/// Dropping the handle stops accepting new connections.
pub struct StubServer {
    address: SocketAddr,
    registry: StubRegistry,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StubServer {
    /// Start on an ephemeral port on the loopback interface.
    pub async fn start(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), config).await
    }

    /// Start on the given address and register the configured stubs.
    pub async fn bind(address: SocketAddr, config: ServerConfig) -> Result<Self, ServerError> {
        let registry = StubRegistry::new();
        for (index, stub) in config.stubs.into_iter().enumerate() {
            registry
                .register_definition(stub)
                .await
                .map_err(|source| ServerError::Stub { index, source })?;
        }

        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        let address = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        let state = Arc::new(ServerState {
            registry: registry.clone(),
            engine: TemplateEngine::new(),
            settings: config.settings,
            default_response: config.default_response,
        });

        let stubs = registry.len().await;
        info!(%address, stubs, "Stub server listening");

        let (shutdown, signal) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, state, signal));

        Ok(Self {
            address,
            registry,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// The bound socket address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// `http://host:port`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// The registry serving this server's requests.
    pub fn registry(&self) -> &StubRegistry {
        &self.registry
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Stub server shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let service = service_fn(move |request| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, Infallible>(state.handle(request).await) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "Connection closed with error");
                    }
                });
            }
        }
    }
}

impl ServerState {
    async fn handle(&self, request: Request<Incoming>) -> HttpResponse {
        let (parts, body) = request.into_parts();

        let request = match read_body(body, self.settings.max_body_bytes).await {
            Ok(body) => IncomingRequest::from_parts(&parts, body),
            Err(e) => Err(e),
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!(method = %parts.method, uri = %parts.uri, error = %e, "Malformed request");
                return error_response(StatusCode::BAD_REQUEST, "malformed_request", &e.to_string());
            }
        };

        if admin::is_admin_path(&request.path) {
            return admin::handle(&self.registry, &request).await;
        }

        self.respond(&request).await
    }

    async fn respond(&self, request: &IncomingRequest) -> HttpResponse {
        let Some(result) = self.registry.find_match(request).await else {
            if self.settings.log_unmatched {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    "No matching stub found"
                );
            }
            return self.build_default_response(request);
        };

        let stub = &result.stub;
        if self.settings.log_matches {
            info!(
                stub_id = %stub.id,
                method = %request.method,
                path = %request.path,
                "Request matched stub"
            );
        }

        // Check for fault injection
        if let Some(fault) = &stub.fault {
            return self.apply_fault(fault, stub, request).await;
        }

        // Apply delay if configured
        if let Some(delay) = &stub.delay {
            let delay_ms = delay.calculate();
            if delay_ms > 0 {
                debug!(stub_id = %stub.id, delay_ms, "Applying delay");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        self.build_response(&stub.response, request, &result.context)
    }

    /// Render a response definition for the request.
    fn build_response(
        &self,
        response: &ResponseDefinition,
        request: &IncomingRequest,
        match_ctx: &MatchContext,
    ) -> HttpResponse {
        let status = match status_code(response.status) {
            Ok(status) => status,
            Err(e) => return invalid_status(request, &e),
        };

        let body = match self.engine.render_body(response, request, match_ctx) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "Failed to build response body"
                );
                let kind = match e {
                    ResponseError::Template(_) => "template_error",
                    _ => "response_error",
                };
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, kind, &e.to_string());
            }
        };

        // Determine content type
        let content_type = response
            .content_type()
            .map(String::from)
            .unwrap_or_else(|| {
                response
                    .body
                    .as_ref()
                    .map(|b| b.content_type().to_string())
                    .unwrap_or_else(|| self.settings.default_content_type.clone())
            });

        let mut http = Response::new(Full::new(Bytes::from(body.unwrap_or_default())));
        *http.status_mut() = status;
        insert_header(&mut http, CONTENT_TYPE.as_str(), &content_type);
        for (name, value) in &response.headers {
            if !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                insert_header(&mut http, name, value);
            }
        }
        http
    }

    /// Build a default response for unmatched requests.
    fn build_default_response(&self, request: &IncomingRequest) -> HttpResponse {
        match &self.default_response {
            Some(default) => {
                let context = MatchContext {
                    query_params: request.query_params(),
                    ..MatchContext::default()
                };
                self.build_response(default, request, &context)
            }
            None => json_response(
                StatusCode::NOT_FOUND,
                &json!({
                    "error": "not_found",
                    "message": "No matching stub found",
                    "method": request.method.as_str(),
                    "path": request.path,
                }),
            ),
        }
    }

    /// Apply fault injection.
    async fn apply_fault(
        &self,
        fault: &FaultConfig,
        stub: &Stub,
        request: &IncomingRequest,
    ) -> HttpResponse {
        match fault {
            FaultConfig::Error { status, message } => match status_code(*status) {
                Ok(status) => {
                    let body = message.clone().unwrap_or_else(|| "Error".to_string());
                    text_response(status, body)
                }
                Err(e) => invalid_status(request, &e),
            },

            FaultConfig::Timeout { duration_ms } => {
                debug!(stub_id = %stub.id, duration_ms, "Simulating timeout");
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                text_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout (simulated)".to_string())
            }

            FaultConfig::Empty => Response::new(Full::new(Bytes::new())),
        }
    }
}

async fn read_body(body: Incoming, limit: usize) -> Result<Bytes, RequestError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<http_body_util::LengthLimitError>() => {
            Err(RequestError::BodyTooLarge { limit })
        }
        Err(e) => Err(RequestError::Body(e.to_string())),
    }
}

fn invalid_status(request: &IncomingRequest, e: &StubError) -> HttpResponse {
    error!(
        method = %request.method,
        path = %request.path,
        error = %e,
        "Stub has an unusable status code"
    );
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "response_error", &e.to_string())
}

fn insert_header(response: &mut HttpResponse, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            response.headers_mut().insert(name, value);
        }
        _ => warn!(header = %name, "Skipping invalid response header"),
    }
}

fn text_response(status: StatusCode, body: String) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

pub(crate) fn json_response(status: StatusCode, body: &serde_json::Value) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub(crate) fn error_response(status: StatusCode, error: &str, message: &str) -> HttpResponse {
    json_response(status, &json!({ "error": error, "message": message }))
}
