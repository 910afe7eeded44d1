//! Asynchronous API client: the single dispatch point for every command.

use std::{fmt, sync::Arc, time::Duration};

use serde_json::Value;
use url::Url;

use crate::{
    cancel::{CancelToken, cancelled_or_pending},
    command::{Command, deserialize_value},
    credentials::Credentials,
    envelope::{ApiOutcome, decode},
    error::{Error, Result},
    params::ParameterSet,
    poll::{JobOutcome, JobPoller, PollPolicy, QUERY_ASYNC_JOB_RESULT, job_params},
    sign::{DEFAULT_MAX_GET_QUERY_LEN, RequestSigner, SignedRequest},
    transport::{HttpTransport, RawResponse, Transport},
    types::AsyncJobResult,
};

/// Options fixed at client construction.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout for a single HTTP request.
    ///
    /// Individual calls can override this via [`CallOptions`].
    pub request_timeout: Duration,

    /// Default policy for waiting on async jobs.
    pub poll: PollPolicy,

    /// Signed queries of at least this many bytes are sent as POST forms.
    pub max_get_query_len: usize,

    /// Always use GET, whatever the query length.
    pub http_get_only: bool,

    /// Verify the server's TLS certificate.
    ///
    /// Only consulted when the client builds its own HTTP transport.
    pub verify_tls: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            poll: PollPolicy::default(),
            max_get_query_len: DEFAULT_MAX_GET_QUERY_LEN,
            http_get_only: false,
            verify_tls: true,
        }
    }
}

/// Options for a single call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Override the request timeout, for the command and for every status
    /// query issued while waiting on its job.
    pub timeout: Option<Duration>,

    /// Override the async job poll policy.
    pub poll: Option<PollPolicy>,

    /// A cancellation token. Cancelling stops waiting; it never cancels a
    /// job the platform already accepted.
    pub cancel: Option<CancelToken>,
}

impl CallOptions {
    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the poll policy.
    #[must_use]
    pub fn poll(mut self, poll: PollPolicy) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Set the cancellation token.
    #[must_use]
    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Client builder.
pub struct ClientBuilder {
    base_url: String,
    credentials: Credentials,
    options: ClientOptions,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Set the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    /// Set the default async job poll policy.
    #[must_use]
    pub fn poll_policy(mut self, poll: PollPolicy) -> Self {
        self.options.poll = poll;
        self
    }

    /// Set the query length at which requests switch to POST.
    #[must_use]
    pub fn max_get_query_len(mut self, len: usize) -> Self {
        self.options.max_get_query_len = len;
        self
    }

    /// Always use GET requests.
    #[must_use]
    pub fn http_get_only(mut self, enabled: bool) -> Self {
        self.options.http_get_only = enabled;
        self
    }

    /// Enable / disable TLS certificate verification.
    ///
    /// Disabling this is **dangerous**; it is meant for lab installations
    /// with self-signed certificates.
    #[must_use]
    pub fn verify_tls(mut self, enabled: bool) -> Self {
        self.options.verify_tls = enabled;
        self
    }

    /// Replace all options at once.
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom transport instead of the built-in HTTP one.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the configuration and build the client.
    pub fn build(self) -> Result<Client> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("invalid base URL: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported base URL scheme '{}'",
                base_url.scheme()
            )));
        }
        if base_url.query().is_some() || base_url.fragment().is_some() {
            return Err(Error::config(
                "base URL must not carry a query string or fragment",
            ));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(self.options.verify_tls)?),
        };

        let signer = RequestSigner::new(Arc::new(self.credentials), &base_url)
            .max_get_query_len(self.options.max_get_query_len)
            .get_only(self.options.http_get_only);

        Ok(Client {
            inner: Arc::new(Inner {
                pipeline: Pipeline::new(signer, transport, self.options.request_timeout),
                poll: self.options.poll,
            }),
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

/// Sign, send and decode: the path shared by commands and job status queries.
pub(crate) struct Pipeline {
    signer: RequestSigner,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl Pipeline {
    pub(crate) fn new(
        signer: RequestSigner,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            signer,
            transport,
            request_timeout,
        }
    }

    pub(crate) fn sign(&self, command: &str, params: &ParameterSet) -> SignedRequest {
        self.signer.sign(command, params)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub(crate) async fn send_with_timeout(
        &self,
        request: &SignedRequest,
        timeout: Duration,
    ) -> Result<RawResponse> {
        self.transport.send(request, timeout).await
    }

    fn with_timeout(&self, timeout: Duration) -> PipelineView<'_> {
        PipelineView {
            pipeline: self,
            timeout,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("signer", &self.signer)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// A pipeline with a per-call request timeout.
struct PipelineView<'a> {
    pipeline: &'a Pipeline,
    timeout: Duration,
}

impl PipelineView<'_> {
    async fn round_trip(&self, command: &str, params: &ParameterSet) -> Result<ApiOutcome> {
        let request = self.pipeline.sign(command, params);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            command = command,
            method = ?request.method(),
            "sending API request"
        );

        let raw = self
            .pipeline
            .send_with_timeout(&request, self.timeout)
            .await?;

        #[cfg(feature = "tracing")]
        tracing::trace!(command = command, status = raw.status, "received API response");

        decode(&raw)
    }
}

/// An async-first API client.
///
/// Cheap to clone; clones share credentials and the connection pool.
/// Concurrent calls never share mutable state.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    pipeline: Pipeline,
    poll: PollPolicy,
}

impl Client {
    /// Create a builder for the API endpoint at `base_url`
    /// (e.g. `https://cloud.example/client/api`).
    #[must_use]
    pub fn builder(base_url: impl Into<String>, credentials: Credentials) -> ClientBuilder {
        ClientBuilder {
            base_url: base_url.into(),
            credentials,
            options: ClientOptions::default(),
            transport: None,
        }
    }

    /// Create a client with default options.
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self> {
        Self::builder(base_url, credentials).build()
    }

    /// Default poll policy for async jobs.
    #[must_use]
    pub fn poll_policy(&self) -> &PollPolicy {
        &self.inner.poll
    }

    /// Execute a command.
    ///
    /// Synchronous commands return their response payload. Async commands are
    /// polled to completion and return the job's `jobresult`, whose shape
    /// differs from a synchronous payload (it is usually keyed by the
    /// resource name, e.g. `{"virtualmachine": {...}}`).
    pub async fn execute(&self, command: &str, params: &ParameterSet) -> Result<Value> {
        self.execute_with_options(command, params, CallOptions::default())
            .await
    }

    /// Execute a command with per-call options.
    pub async fn execute_with_options(
        &self,
        command: &str,
        params: &ParameterSet,
        options: CallOptions,
    ) -> Result<Value> {
        let outcome = self.submit_inner(command, params, &options).await?;

        match outcome {
            ApiOutcome::Success(payload) => Ok(payload),
            ApiOutcome::Error(body) => Err(Error::api(
                command,
                body.code,
                body.cs_error_code,
                body.message,
            )),
            ApiOutcome::Accepted { job_id, .. } => {
                #[cfg(feature = "tracing")]
                tracing::debug!(command = command, job_id = %job_id, "command accepted as async job");

                self.wait(&job_id, &options)
                    .await
                    .into_result(command, &job_id)
            }
        }
    }

    /// Send a command without waiting for an async job.
    ///
    /// Returns the decoded outcome as-is, including platform errors, so
    /// callers can keep the job id of an [`ApiOutcome::Accepted`] answer and
    /// poll it later with [`Client::await_job`].
    pub async fn submit(
        &self,
        command: &str,
        params: &ParameterSet,
        options: CallOptions,
    ) -> Result<ApiOutcome> {
        self.submit_inner(command, params, &options).await
    }

    /// Wait for a known job id, e.g. one retained from
    /// [`Error::JobTimeout`].
    ///
    /// `command` names the originating command in errors.
    pub async fn await_job(
        &self,
        command: &str,
        job_id: &str,
        options: CallOptions,
    ) -> Result<Value> {
        self.wait(job_id, &options)
            .await
            .into_result(command, job_id)
    }

    /// Query the current status of `job_id` once, without waiting.
    pub async fn job_status(
        &self,
        job_id: &str,
        options: CallOptions,
    ) -> Result<AsyncJobResult> {
        let outcome = self
            .submit_inner(QUERY_ASYNC_JOB_RESULT, &job_params(job_id), &options)
            .await?;

        match outcome {
            ApiOutcome::Success(payload) | ApiOutcome::Accepted { payload, .. } => {
                deserialize_value::<AsyncJobResult>(payload).map_err(|e| {
                    Error::protocol(format!("malformed status for job {job_id}: {e}"))
                })
            }
            ApiOutcome::Error(body) => Err(Error::api(
                QUERY_ASYNC_JOB_RESULT,
                body.code,
                body.cs_error_code,
                body.message,
            )),
        }
    }

    /// Poll `job_id` until it reaches a terminal state, `policy.timeout`
    /// elapses, or `cancel` fires.
    pub async fn await_completion(
        &self,
        job_id: &str,
        policy: &PollPolicy,
        cancel: Option<&CancelToken>,
    ) -> JobOutcome {
        JobPoller::new(&self.inner.pipeline, policy, cancel)
            .await_completion(job_id)
            .await
    }

    /// Execute a typed command and decode its payload.
    pub async fn call<C: Command>(&self, command: &C) -> Result<C::Response> {
        self.call_with_options(command, CallOptions::default())
            .await
    }

    /// Execute a typed command with per-call options.
    pub async fn call_with_options<C: Command>(
        &self,
        command: &C,
        options: CallOptions,
    ) -> Result<C::Response> {
        let name = command.name();
        let value = self
            .execute_with_options(name, &command.params(), options)
            .await?;
        deserialize_value::<C::Response>(value).map_err(|e| {
            Error::protocol(format!("failed to decode response for '{name}': {e}"))
        })
    }

    async fn submit_inner(
        &self,
        command: &str,
        params: &ParameterSet,
        options: &CallOptions,
    ) -> Result<ApiOutcome> {
        let timeout = options
            .timeout
            .unwrap_or(self.inner.pipeline.request_timeout());
        let view = self.inner.pipeline.with_timeout(timeout);

        tokio::select! {
            biased;
            _ = cancelled_or_pending(options.cancel.as_ref()) => Err(Error::Cancelled),
            res = view.round_trip(command, params) => res,
        }
    }

    /// Poll with the call's policy, cancel token and request timeout.
    async fn wait(&self, job_id: &str, options: &CallOptions) -> JobOutcome {
        let policy = options.poll.as_ref().unwrap_or(&self.inner.poll);
        JobPoller::new(&self.inner.pipeline, policy, options.cancel.as_ref())
            .request_timeout(options.timeout)
            .await_completion(job_id)
            .await
    }
}
