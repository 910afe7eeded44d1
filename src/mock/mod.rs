//! Scripted in-process transport.
//!
//! This module is intended for:
//! - unit tests of the dispatcher and the job poller
//! - tests of resource-wrapper crates built on top of [`crate::Client`]
//!
//! Replies are scripted per command (and per job id for
//! `queryAsyncJobResult`). Each route is a queue; once drained, its last
//! reply keeps being served, so a single `job_pending` reply describes a job
//! that never finishes. Every request is recorded with its decoded
//! parameters and the (tokio) instant it was issued.
//!
//! It is gated behind `cfg(test)` or the `mock` Cargo feature.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::{
    credentials::Credentials,
    error::{Error, Result},
    poll::QUERY_ASYNC_JOB_RESULT,
    sign::{HttpMethod, SignedRequest, encode},
    transport::{RawResponse, Transport, TransportFuture},
};

/// How a request should be answered by the mock.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum MockReply {
    /// JSON body with an HTTP status.
    Json {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: Value,
    },

    /// Raw body bytes with an HTTP status.
    Raw {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: Vec<u8>,
    },

    /// Fail with [`Error::Network`].
    NetworkError(String),

    /// Wait for the request timeout, then fail with [`Error::Timeout`].
    Timeout,

    /// Wait, then answer with the inner reply (or time out first).
    Delayed {
        /// Delay before answering.
        delay: Duration,
        /// Reply sent after the delay.
        reply: Box<MockReply>,
    },
}

impl MockReply {
    /// Synchronous success envelope: `{"<command>response": payload}`.
    #[must_use]
    pub fn success(command: &str, payload: Value) -> Self {
        Self::Json {
            status: 200,
            body: envelope(command, payload),
        }
    }

    /// Error envelope. The HTTP status mirrors the error code, as the
    /// platform does, when the code is a valid 4xx/5xx status.
    #[must_use]
    pub fn error(command: &str, code: i64, text: &str) -> Self {
        let status = u16::try_from(code)
            .ok()
            .filter(|s| (400..600).contains(s))
            .unwrap_or(200);
        Self::Json {
            status,
            body: envelope(
                command,
                json!({"uuidList": [], "errorcode": code, "errortext": text}),
            ),
        }
    }

    /// Async-accepted envelope carrying `job_id`.
    #[must_use]
    pub fn accepted(command: &str, job_id: &str) -> Self {
        Self::success(command, json!({"jobid": job_id}))
    }

    /// `queryAsyncJobResult` answer for a running job.
    #[must_use]
    pub fn job_pending(job_id: &str) -> Self {
        Self::success(
            QUERY_ASYNC_JOB_RESULT,
            json!({"jobid": job_id, "jobstatus": 0, "jobprocstatus": 0, "jobresultcode": 0}),
        )
    }

    /// `queryAsyncJobResult` answer for a finished job.
    #[must_use]
    pub fn job_succeeded(job_id: &str, result: Value) -> Self {
        Self::success(
            QUERY_ASYNC_JOB_RESULT,
            json!({
                "jobid": job_id,
                "jobstatus": 1,
                "jobresultcode": 0,
                "jobresulttype": "object",
                "jobresult": result
            }),
        )
    }

    /// `queryAsyncJobResult` answer for a failed job.
    #[must_use]
    pub fn job_failed(job_id: &str, code: i64, text: &str) -> Self {
        Self::success(
            QUERY_ASYNC_JOB_RESULT,
            json!({
                "jobid": job_id,
                "jobstatus": 2,
                "jobresultcode": 530,
                "jobresulttype": "object",
                "jobresult": {"errorcode": code, "errortext": text}
            }),
        )
    }

    /// Delay this reply.
    #[must_use]
    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed {
            delay,
            reply: Box::new(self),
        }
    }
}

fn envelope(command: &str, payload: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(format!("{}response", command.to_lowercase()), payload);
    Value::Object(map)
}

/// A request as seen by the mock "server".
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Value of the `command` parameter.
    pub command: String,
    /// Form-decoded parameters, signature included.
    pub params: BTreeMap<String, String>,
    /// When the request was issued.
    pub at: Instant,
}

/// Scripted [`Transport`]. Clones share the same script and log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, Route>,
    requests: Vec<RecordedRequest>,
    verifier: Option<Credentials>,
}

#[derive(Debug, Default)]
struct Route {
    queue: VecDeque<MockReply>,
    last: Option<MockReply>,
}

impl Route {
    fn next(&mut self) -> Option<MockReply> {
        match self.queue.pop_front() {
            Some(reply) => {
                self.last = Some(reply.clone());
                Some(reply)
            }
            None => self.last.clone(),
        }
    }
}

impl MockTransport {
    /// Create an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject requests whose signature does not verify against `credentials`,
    /// the way the platform does (HTTP 401).
    pub fn verify_signatures(&self, credentials: Credentials) -> &Self {
        self.lock().verifier = Some(credentials);
        self
    }

    /// Queue a reply for `command`.
    pub fn on(&self, command: &str, reply: MockReply) -> &Self {
        self.push(command.to_string(), reply)
    }

    /// Queue a `queryAsyncJobResult` reply for `job_id`.
    pub fn on_job(&self, job_id: &str, reply: MockReply) -> &Self {
        self.push(job_route(job_id), reply)
    }

    /// All recorded requests, in issue order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Recorded requests for `command`.
    #[must_use]
    pub fn requests_for(&self, command: &str) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.command == command)
            .cloned()
            .collect()
    }

    /// Number of status queries issued for `job_id`.
    #[must_use]
    pub fn job_polls(&self, job_id: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| {
                r.command == QUERY_ASYNC_JOB_RESULT
                    && r.params.get("jobid").map(String::as_str) == Some(job_id)
            })
            .count()
    }

    fn push(&self, route: String, reply: MockReply) -> &Self {
        self.lock()
            .routes
            .entry(route)
            .or_default()
            .queue
            .push_back(reply);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `request` and pick its reply.
    fn route(&self, request: &SignedRequest) -> MockReply {
        let params: BTreeMap<String, String> =
            url::form_urlencoded::parse(request.query().as_bytes())
                .into_owned()
                .collect();
        let command = params.get("command").cloned().unwrap_or_default();

        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method: request.method(),
            command: command.clone(),
            params: params.clone(),
            at: Instant::now(),
        });

        if let Some(creds) = &state.verifier {
            if !signature_matches(creds, &params) {
                return MockReply::Json {
                    status: 401,
                    body: json!({"errorresponse": {
                        "errorcode": 401,
                        "errortext": "unable to verify user credentials and/or request signature"
                    }}),
                };
            }
        }

        let key = match (command.as_str(), params.get("jobid")) {
            (QUERY_ASYNC_JOB_RESULT, Some(job_id)) => job_route(job_id),
            _ => command.clone(),
        };

        state
            .routes
            .get_mut(&key)
            .and_then(Route::next)
            .unwrap_or_else(|| {
                MockReply::error(
                    &command,
                    432,
                    &format!("The given command '{command}' has no mock reply"),
                )
            })
    }
}

impl Transport for MockTransport {
    fn send<'a>(&'a self, request: &'a SignedRequest, timeout: Duration) -> TransportFuture<'a> {
        Box::pin(async move {
            let reply = self.route(request);
            play(reply, timeout).await
        })
    }
}

async fn play(mut reply: MockReply, timeout: Duration) -> Result<RawResponse> {
    let mut waited = Duration::ZERO;
    loop {
        match reply {
            MockReply::Json { status, body } => {
                return Ok(RawResponse::new(status, body.to_string()));
            }
            MockReply::Raw { status, body } => return Ok(RawResponse::new(status, body)),
            MockReply::NetworkError(message) => return Err(Error::network(message, None)),
            MockReply::Timeout => {
                tokio::time::sleep(timeout.saturating_sub(waited)).await;
                return Err(Error::Timeout { timeout });
            }
            MockReply::Delayed { delay, reply: next } => {
                if waited + delay >= timeout {
                    tokio::time::sleep(timeout.saturating_sub(waited)).await;
                    return Err(Error::Timeout { timeout });
                }
                tokio::time::sleep(delay).await;
                waited += delay;
                reply = *next;
            }
        }
    }
}

fn job_route(job_id: &str) -> String {
    format!("{QUERY_ASYNC_JOB_RESULT}/{job_id}")
}

/// Server-side signature check over the decoded parameters.
fn signature_matches(creds: &Credentials, params: &BTreeMap<String, String>) -> bool {
    let Some(signature) = params.get("signature") else {
        return false;
    };
    if params.get("apiKey").map(String::as_str) != Some(creds.api_key()) {
        return false;
    }

    let mut unsigned: Vec<(&String, &String)> =
        params.iter().filter(|(k, _)| k.as_str() != "signature").collect();
    unsigned.sort_by(|a, b| {
        a.0.to_ascii_lowercase()
            .cmp(&b.0.to_ascii_lowercase())
            .then_with(|| a.0.cmp(b.0))
    });

    let canonical = unsigned
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
        .to_ascii_lowercase();

    STANDARD.encode(creds.digest(canonical.as_bytes())) == *signature
}
