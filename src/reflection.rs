//! Reflection coordinator: acquires `FileDescriptorProto` material from
//! servers via gRPC Server Reflection, once per origin, with
//! concurrent-caller coalescing.
//!
//! Requests are manually framed single-shot gRPC-Web calls (the channel
//! is request/response, not a streaming client). Per-origin state moves
//! `Unknown → InFlight → Ready | Failed`; failure is terminal for the
//! session so servers without reflection are not hammered.

pub mod proto;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::descriptor::parse::parse_file_descriptor;
use crate::descriptor::FileDescriptor;
use crate::framing::{self, FramingOptions};
use crate::reflection::proto::{ReflectionRequest, ReflectionResponse};

/// Reflection endpoints, tried in order.
pub const REFLECTION_SERVICE_PATHS: &[&str] = &[
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectionError {
    /// HTTP failure contacting the reflection endpoint
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a ServerReflection error response
    #[error("server reflection error {code}: {message}")]
    Server { code: i32, message: String },
    /// Response framing/parse failure
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("reflection timed out after {0} ms")]
    Timeout(u64),
}

/// Per-origin lifecycle, as observed by the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "error")]
pub enum ReflectionState {
    Unknown,
    InFlight,
    Ready,
    Failed(String),
}

/// A plain HTTP reply from the transport.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Single-shot POST of one framed gRPC-Web message. Abstracted so tests
/// drive the coordinator against a scripted server.
#[async_trait]
pub trait ReflectionTransport: Send + Sync {
    async fn unary(
        &self,
        origin: &str,
        service_path: &str,
        frame: Vec<u8>,
    ) -> Result<TransportReply, ReflectionError>;
}

/// Production transport over reqwest.
pub struct HttpReflectionTransport {
    client: reqwest::Client,
}

impl HttpReflectionTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpReflectionTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReflectionTransport for HttpReflectionTransport {
    async fn unary(
        &self,
        origin: &str,
        service_path: &str,
        frame: Vec<u8>,
    ) -> Result<TransportReply, ReflectionError> {
        let url = format!("{}{}", origin.trim_end_matches('/'), service_path);
        let response = self
            .client
            .post(&url)
            .header("content-type", "application/grpc-web+proto")
            .header("x-grpc-web", "1")
            .body(frame)
            .send()
            .await
            .map_err(|e| ReflectionError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ReflectionError::Transport(e.to_string()))?
            .to_vec();
        Ok(TransportReply {
            status,
            headers,
            body,
        })
    }
}

/// Result of [`ReflectionCoordinator::ensure_origin`].
#[derive(Debug, Clone)]
pub enum EnsureOutcome {
    /// This caller owned the fetch; the descriptors are fresh and still
    /// need registering.
    Fetched { descriptors: Vec<FileDescriptor> },
    /// The origin was already (or concurrently became) ready.
    Ready,
    /// The origin failed this session; terminal.
    Failed(String),
}

type FetchResult = Result<(), String>;

enum OriginEntry {
    InFlight(watch::Receiver<Option<FetchResult>>),
    Done(FetchResult),
}

/// Callback invoked on every per-origin state transition.
pub type StatusCallback = Arc<dyn Fn(&str, &ReflectionState) + Send + Sync>;

pub struct ReflectionCoordinator {
    transport: Arc<dyn ReflectionTransport>,
    timeout: Duration,
    states: Mutex<HashMap<String, OriginEntry>>,
    on_status: Option<StatusCallback>,
}

impl ReflectionCoordinator {
    pub fn new(transport: Arc<dyn ReflectionTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            states: Mutex::new(HashMap::new()),
            on_status: None,
        }
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    /// Current state for an origin.
    pub fn state(&self, origin: &str) -> ReflectionState {
        let states = self.states.lock().expect("reflection state lock");
        match states.get(origin) {
            None => ReflectionState::Unknown,
            Some(OriginEntry::InFlight(_)) => ReflectionState::InFlight,
            Some(OriginEntry::Done(Ok(()))) => ReflectionState::Ready,
            Some(OriginEntry::Done(Err(e))) => ReflectionState::Failed(e.clone()),
        }
    }

    /// Ensure descriptors have been fetched for `origin`, coalescing
    /// concurrent callers onto a single in-flight fetch. Exactly one
    /// caller receives `Fetched` per successful origin.
    pub async fn ensure_origin(&self, origin: &str) -> EnsureOutcome {
        enum Role {
            Owner(watch::Sender<Option<FetchResult>>),
            Waiter(watch::Receiver<Option<FetchResult>>),
            Done(FetchResult),
        }

        let role = {
            let mut states = self.states.lock().expect("reflection state lock");
            match states.get(origin) {
                Some(OriginEntry::Done(result)) => Role::Done(result.clone()),
                Some(OriginEntry::InFlight(rx)) => Role::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    states.insert(origin.to_string(), OriginEntry::InFlight(rx));
                    Role::Owner(tx)
                }
            }
        };

        match role {
            Role::Done(Ok(())) => EnsureOutcome::Ready,
            Role::Done(Err(error)) => EnsureOutcome::Failed(error),
            Role::Waiter(mut rx) => {
                let waited = rx.wait_for(|slot| slot.is_some()).await;
                match waited {
                    Ok(slot) => match slot.as_ref().cloned().unwrap_or(Err("fetch aborted".into())) {
                        Ok(()) => EnsureOutcome::Ready,
                        Err(error) => EnsureOutcome::Failed(error),
                    },
                    // Sender dropped without a result: owner was cancelled.
                    Err(_) => EnsureOutcome::Failed("fetch aborted".to_string()),
                }
            }
            Role::Owner(tx) => {
                self.emit_status(origin, &ReflectionState::InFlight);
                let deadline_ms = self.timeout.as_millis() as u64;
                let fetched = match tokio::time::timeout(self.timeout, self.fetch_origin(origin))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ReflectionError::Timeout(deadline_ms)),
                };

                let (result, outcome) = match fetched {
                    Ok(descriptors) => (Ok(()), EnsureOutcome::Fetched { descriptors }),
                    Err(err) => {
                        warn!(origin = %origin, error = %err, "reflection fetch failed");
                        (Err(err.to_string()), EnsureOutcome::Failed(err.to_string()))
                    }
                };

                {
                    let mut states = self.states.lock().expect("reflection state lock");
                    states.insert(origin.to_string(), OriginEntry::Done(result.clone()));
                }
                let state = match &result {
                    Ok(()) => ReflectionState::Ready,
                    Err(e) => ReflectionState::Failed(e.clone()),
                };
                self.emit_status(origin, &state);
                // Release all waiters with the terminal result.
                let _ = tx.send(Some(result));
                outcome
            }
        }
    }

    fn emit_status(&self, origin: &str, state: &ReflectionState) {
        if let Some(callback) = &self.on_status {
            callback(origin, state);
        }
    }

    /// Fetch the descriptor closure for every service the origin
    /// exposes, trying v1 then v1alpha.
    async fn fetch_origin(&self, origin: &str) -> Result<Vec<FileDescriptor>, ReflectionError> {
        let mut last_err = ReflectionError::Transport("no reflection endpoint tried".into());
        for service_path in REFLECTION_SERVICE_PATHS {
            match self.fetch_via(origin, service_path).await {
                Ok(files) => return Ok(files),
                Err(err) => {
                    debug!(origin = %origin, endpoint = %service_path, error = %err,
                           "reflection endpoint attempt failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn fetch_via(
        &self,
        origin: &str,
        service_path: &str,
    ) -> Result<Vec<FileDescriptor>, ReflectionError> {
        let host = host_of(origin);

        let services = match self
            .call(origin, service_path, &host, &ReflectionRequest::ListServices)
            .await?
        {
            ReflectionResponse::Services(services) => services,
            ReflectionResponse::Error { code, message } => {
                return Err(ReflectionError::Server { code, message })
            }
            other => {
                return Err(ReflectionError::Protocol(format!(
                    "unexpected ListServices payload: {:?}",
                    other
                )))
            }
        };

        let mut files: Vec<FileDescriptor> = Vec::new();
        let mut seen_files: HashSet<String> = HashSet::new();
        let mut pending: VecDeque<ReflectionRequest> = services
            .iter()
            // Reflection services describe themselves; skip them.
            .filter(|name| !name.starts_with("grpc.reflection."))
            .map(|name| ReflectionRequest::FileContainingSymbol(name.clone()))
            .collect();

        while let Some(request) = pending.pop_front() {
            let response = match self.call(origin, service_path, &host, &request).await {
                Ok(response) => response,
                Err(err) => match &request {
                    // A missing dependency degrades the registry but does
                    // not fail the origin.
                    ReflectionRequest::FileByFilename(dep) => {
                        warn!(origin = %origin, dependency = %dep, error = %err,
                              "dependency fetch failed, leaving unresolved");
                        continue;
                    }
                    _ => return Err(err),
                },
            };

            let payloads = match response {
                ReflectionResponse::FileDescriptors(payloads) => payloads,
                ReflectionResponse::Error { code, message } => {
                    if let ReflectionRequest::FileByFilename(dep) = &request {
                        warn!(origin = %origin, dependency = %dep, code, message = %message,
                              "dependency lookup rejected, leaving unresolved");
                        continue;
                    }
                    return Err(ReflectionError::Server { code, message });
                }
                other => {
                    return Err(ReflectionError::Protocol(format!(
                        "unexpected file descriptor payload: {:?}",
                        other
                    )))
                }
            };

            for bytes in payloads {
                let file = parse_file_descriptor(&bytes)
                    .map_err(|e| ReflectionError::Protocol(e.to_string()))?;
                if file.file_name.is_empty() || !seen_files.insert(file.file_name.clone()) {
                    continue;
                }
                for dep in &file.dependencies {
                    if !seen_files.contains(dep) {
                        pending.push_back(ReflectionRequest::FileByFilename(dep.clone()));
                    }
                }
                files.push(file);
            }
        }

        info!(origin = %origin, files = files.len(), services = services.len(),
              "reflection fetch complete");
        Ok(files)
    }

    /// One framed request/response round trip.
    async fn call(
        &self,
        origin: &str,
        service_path: &str,
        host: &str,
        request: &ReflectionRequest,
    ) -> Result<ReflectionResponse, ReflectionError> {
        let frame = framing::write_frame(&request.encode(host), 0);
        let reply = self.transport.unary(origin, service_path, frame).await?;
        if reply.status != 200 {
            return Err(ReflectionError::Transport(format!(
                "http status {}",
                reply.status
            )));
        }

        let unframed = framing::read_frames(&FramingOptions::default(), &reply.body);
        if let Some(trailers) = &unframed.trailers {
            if let Some(status) = trailers.get("grpc-status") {
                if status != "0" {
                    let message = trailers
                        .get("grpc-message")
                        .cloned()
                        .unwrap_or_default();
                    return Err(ReflectionError::Server {
                        code: status.parse().unwrap_or(2),
                        message,
                    });
                }
            }
        }
        let payload = unframed
            .payloads
            .first()
            .ok_or_else(|| ReflectionError::Protocol("empty reflection response".into()))?;
        proto::parse_response(payload).map_err(|e| ReflectionError::Protocol(e.to_string()))
    }
}

/// Authority portion of an origin, for the request `host` field.
fn host_of(origin: &str) -> String {
    url::Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(|h| match u.port() {
            Some(port) => format!("{}:{}", h, port),
            None => h.to_string(),
        }))
        .unwrap_or_else(|| origin.trim_start_matches("https://").trim_start_matches("http://").to_string())
}
