//! Async job polling.
//!
//! A job is polled with `queryAsyncJobResult` through the regular
//! sign / send / decode pipeline until it reaches a terminal status, the
//! deadline elapses, the caller cancels, or polling fails for good. Giving up
//! only stops the client from waiting: the platform has no operation to
//! cancel a job, and the job keeps running server-side.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep, sleep_until};

use crate::{
    backoff::Backoff,
    cancel::{CancelToken, cancelled_or_pending},
    client::Pipeline,
    envelope::{ApiOutcome, decode},
    error::{Error, Result},
    params::ParameterSet,
    sign::SignedRequest,
    types::JobStatus,
};

/// Command used to query the status of an async job.
pub const QUERY_ASYNC_JOB_RESULT: &str = "queryAsyncJobResult";

/// How long and how often to poll an async job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Give up waiting after this long. The job itself is not cancelled.
    pub timeout: Duration,

    /// Delay schedule between status queries.
    pub backoff: Backoff,

    /// Consecutive transient transport failures tolerated before aborting.
    pub max_transient_failures: u32,
}

impl PollPolicy {
    /// Set the overall wait timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set how many consecutive transient failures are tolerated.
    #[must_use]
    pub fn with_max_transient_failures(mut self, n: u32) -> Self {
        self.max_transient_failures = n;
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            backoff: Backoff::default(),
            max_transient_failures: 3,
        }
    }
}

/// Final result of waiting for an async job.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job finished; carries its `jobresult`.
    Succeeded(Value),

    /// The job failed.
    Failed {
        /// Error code.
        code: i64,
        /// Internal platform error code, when supplied.
        cs_error_code: Option<i64>,
        /// Error text.
        message: String,
    },

    /// The deadline elapsed while the job was still pending.
    TimedOut {
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// Polling itself failed (repeated transport failures, vanished job,
    /// malformed status).
    Aborted(Error),

    /// The caller cancelled the wait.
    Cancelled,
}

impl JobOutcome {
    /// Map to the crate's result type.
    ///
    /// `command` is the command that started the job.
    pub fn into_result(self, command: &str, job_id: &str) -> Result<Value> {
        match self {
            Self::Succeeded(result) => Ok(result),
            Self::Failed {
                code,
                cs_error_code,
                message,
            } => Err(Error::Api {
                command: command.to_string(),
                code,
                cs_error_code,
                message,
                job_id: Some(job_id.to_string()),
            }),
            Self::TimedOut { elapsed } => Err(Error::JobTimeout {
                job_id: job_id.to_string(),
                waited: elapsed,
            }),
            Self::Aborted(cause) => Err(Error::Aborted {
                job_id: job_id.to_string(),
                cause: Box::new(cause),
            }),
            Self::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// Drives one job to completion. Holds no state shared with other polls.
pub(crate) struct JobPoller<'a> {
    pipeline: &'a Pipeline,
    policy: &'a PollPolicy,
    cancel: Option<&'a CancelToken>,
    request_timeout: Duration,
}

impl<'a> JobPoller<'a> {
    pub(crate) fn new(
        pipeline: &'a Pipeline,
        policy: &'a PollPolicy,
        cancel: Option<&'a CancelToken>,
    ) -> Self {
        Self {
            pipeline,
            policy,
            cancel,
            request_timeout: pipeline.request_timeout(),
        }
    }

    /// Use `timeout` for each status query instead of the client default.
    pub(crate) fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            self.request_timeout = timeout;
        }
        self
    }

    pub(crate) async fn await_completion(&self, job_id: &str) -> JobOutcome {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;

        // The status query only reads, so it is retried whatever its method.
        let request = self.pipeline.sign(QUERY_ASYNC_JOB_RESULT, &job_params(job_id));

        let mut pending: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancelled_or_pending(self.cancel) => return JobOutcome::Cancelled,
                _ = sleep_until(deadline) => return timed_out(started),
                res = self.query(&request) => res,
            };

            let delay = match polled {
                Ok(JobStatus::Pending) => {
                    failures = 0;
                    let delay = self.policy.backoff.delay(pending);
                    pending = pending.saturating_add(1);
                    delay
                }
                Ok(JobStatus::Succeeded(result)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(job_id = job_id, polls = pending + 1, "async job succeeded");
                    return JobOutcome::Succeeded(result);
                }
                Ok(JobStatus::Failed {
                    code,
                    cs_error_code,
                    message,
                }) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(job_id = job_id, code = code, "async job failed");
                    return JobOutcome::Failed {
                        code,
                        cs_error_code,
                        message,
                    };
                }
                Err(e) if e.is_retryable() && failures < self.policy.max_transient_failures => {
                    failures += 1;

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        job_id = job_id,
                        failures = failures,
                        max_failures = self.policy.max_transient_failures,
                        error = %e,
                        "transient failure while polling async job"
                    );

                    self.policy.backoff.delay(failures - 1)
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(job_id = job_id, error = %e, "polling async job aborted");
                    return JobOutcome::Aborted(e);
                }
            };

            tokio::select! {
                biased;
                _ = cancelled_or_pending(self.cancel) => return JobOutcome::Cancelled,
                _ = sleep_until(deadline) => return timed_out(started),
                _ = sleep(delay) => {}
            }
        }
    }

    async fn query(&self, request: &SignedRequest) -> Result<JobStatus> {
        let raw = self
            .pipeline
            .send_with_timeout(request, self.request_timeout)
            .await?;
        match decode(&raw)? {
            ApiOutcome::Success(payload) | ApiOutcome::Accepted { payload, .. } => {
                JobStatus::from_payload(&payload)
            }
            ApiOutcome::Error(body) => Err(Error::api(
                QUERY_ASYNC_JOB_RESULT,
                body.code,
                body.cs_error_code,
                body.message,
            )),
        }
    }
}

pub(crate) fn job_params(job_id: &str) -> ParameterSet {
    ParameterSet::builder().set("jobid", job_id).build()
}

fn timed_out(started: Instant) -> JobOutcome {
    JobOutcome::TimedOut {
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        client::Pipeline,
        credentials::Credentials,
        error::ErrorKind,
        mock::{MockReply, MockTransport},
        sign::{HttpMethod, RequestSigner},
    };

    const INTERVAL: Duration = Duration::from_secs(2);

    fn pipeline(transport: &MockTransport) -> Pipeline {
        let creds = Arc::new(Credentials::new("key", "secret").unwrap());
        let url = url::Url::parse("http://cloud.test/client/api").unwrap();
        Pipeline::new(
            RequestSigner::new(creds, &url),
            Arc::new(transport.clone()),
            Duration::from_secs(30),
        )
    }

    fn fixed(timeout: Duration) -> PollPolicy {
        PollPolicy::default()
            .with_timeout(timeout)
            .with_backoff(Backoff::fixed(INTERVAL))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_n_pending_polls() {
        const N: usize = 4;
        let transport = MockTransport::new();
        for _ in 0..N {
            transport.on_job("job-1", MockReply::job_pending("job-1"));
        }
        transport.on_job("job-1", MockReply::job_succeeded("job-1", json!({"group": {"id": "g1"}})));

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600));
        let started = Instant::now();

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-1")
            .await;

        match outcome {
            JobOutcome::Succeeded(v) => assert_eq!(v, json!({"group": {"id": "g1"}})),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(transport.job_polls("job-1"), N + 1);
        assert!(started.elapsed() >= INTERVAL * N as u32);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_deadline_without_further_polls() {
        let transport = MockTransport::new();
        transport.on_job("job-2", MockReply::job_pending("job-2"));

        let pipeline = pipeline(&transport);
        let deadline = Duration::from_secs(9);
        let policy = fixed(deadline);
        let started = Instant::now();

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-2")
            .await;

        let elapsed = match outcome {
            JobOutcome::TimedOut { elapsed } => elapsed,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(elapsed >= deadline);
        assert!(elapsed < deadline + INTERVAL);

        // Polls at t = 0, 2, 4, 6, 8; none at or after the deadline.
        let polls = transport.requests_for(QUERY_ASYNC_JOB_RESULT);
        assert_eq!(polls.len(), 5);
        assert!(polls.iter().all(|r| r.at < started + deadline));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.job_polls("job-2"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_transient_transport_failures() {
        let transport = MockTransport::new();
        transport
            .on_job("job-3", MockReply::job_pending("job-3"))
            .on_job("job-3", MockReply::NetworkError("connection reset".into()))
            .on_job("job-3", MockReply::Timeout)
            .on_job("job-3", MockReply::job_succeeded("job-3", json!({"success": true})));

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600));

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-3")
            .await;

        assert!(matches!(outcome, JobOutcome::Succeeded(_)), "{outcome:?}");
        assert_eq!(transport.job_polls("job-3"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn aborts_after_too_many_transient_failures() {
        let transport = MockTransport::new();
        transport.on_job("job-4", MockReply::NetworkError("no route to host".into()));

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600)).with_max_transient_failures(2);

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-4")
            .await;

        match outcome {
            JobOutcome::Aborted(cause) => assert_eq!(cause.kind(), ErrorKind::Network),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(transport.job_polls("job-4"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_job_aborts_immediately() {
        let transport = MockTransport::new();
        transport.on_job(
            "gone",
            MockReply::error(QUERY_ASYNC_JOB_RESULT, 530, "Unable to find job by id gone"),
        );

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600));

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("gone")
            .await;

        match outcome {
            JobOutcome::Aborted(cause) => {
                assert_eq!(cause.kind(), ErrorKind::Api);
                assert_eq!(cause.api_code(), Some(530));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(transport.job_polls("gone"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_jobstatus_is_not_pending() {
        let transport = MockTransport::new();
        transport.on_job(
            "odd",
            MockReply::success(QUERY_ASYNC_JOB_RESULT, json!({"jobid": "odd"})),
        );

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600));

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("odd")
            .await;

        match outcome {
            JobOutcome::Aborted(cause) => assert_eq!(cause.kind(), ErrorKind::Protocol),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(transport.job_polls("odd"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_reports_code_and_text() {
        let transport = MockTransport::new();
        transport
            .on_job("job-5", MockReply::job_pending("job-5"))
            .on_job("job-5", MockReply::job_failed("job-5", 431, "Invalid parameter"));

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600));

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-5")
            .await;

        let err = outcome.into_result("deployVirtualMachine", "job-5").unwrap_err();
        match err {
            Error::Api {
                command,
                code,
                message,
                job_id,
                ..
            } => {
                assert_eq!(command, "deployVirtualMachine");
                assert_eq!(code, 431);
                assert_eq!(message, "Invalid parameter");
                assert_eq!(job_id.as_deref(), Some("job-5"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn posted_status_query_is_still_retried() {
        let transport = MockTransport::new();
        transport
            .on_job("job-8", MockReply::NetworkError("connection reset".into()))
            .on_job("job-8", MockReply::job_succeeded("job-8", json!({"ok": true})));

        let creds = Arc::new(Credentials::new("key", "secret").unwrap());
        let url = url::Url::parse("http://cloud.test/client/api").unwrap();
        let pipeline = Pipeline::new(
            RequestSigner::new(creds, &url).max_get_query_len(0),
            Arc::new(transport.clone()),
            Duration::from_secs(30),
        );
        let policy = fixed(Duration::from_secs(600));

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-8")
            .await;

        assert!(matches!(outcome, JobOutcome::Succeeded(_)), "{outcome:?}");
        let polls = transport.requests_for(QUERY_ASYNC_JOB_RESULT);
        assert_eq!(polls.len(), 2);
        assert!(polls.iter().all(|r| r.method == HttpMethod::Post));
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_override_applies_to_status_queries() {
        let transport = MockTransport::new();
        transport.on_job("job-9", MockReply::Timeout);

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600)).with_max_transient_failures(0);
        let started = Instant::now();

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .request_timeout(Some(Duration::from_secs(3)))
            .await_completion("job-9")
            .await;

        match outcome {
            JobOutcome::Aborted(Error::Timeout { timeout }) => {
                assert_eq!(timeout, Duration::from_secs(3));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_keeps_internal_error_code() {
        let transport = MockTransport::new();
        transport.on_job(
            "job-10",
            MockReply::success(
                QUERY_ASYNC_JOB_RESULT,
                json!({
                    "jobid": "job-10",
                    "jobstatus": 2,
                    "jobresultcode": 530,
                    "jobresult": {"errorcode": 530, "cserrorcode": 9999, "errortext": "boom"}
                }),
            ),
        );

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600));

        let err = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-10")
            .await
            .into_result("createVolume", "job-10")
            .unwrap_err();

        match err {
            Error::Api {
                code,
                cs_error_code,
                ..
            } => {
                assert_eq!(code, 530);
                assert_eq!(cs_error_code, Some(9999));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling_promptly() {
        let transport = MockTransport::new();
        transport.on_job("job-6", MockReply::job_pending("job-6"));

        let pipeline = pipeline(&transport);
        let policy = fixed(Duration::from_secs(600));
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = JobPoller::new(&pipeline, &policy, Some(&cancel))
            .await_completion("job-6")
            .await;

        assert!(matches!(outcome, JobOutcome::Cancelled), "{outcome:?}");
        assert!(started.elapsed() < Duration::from_secs(6));
        // Polls at t = 0, 2, 4.
        assert_eq!(transport.job_polls("job-6"), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.job_polls("job-6"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_status_query_is_abandoned_at_deadline() {
        let transport = MockTransport::new();
        transport.on_job(
            "job-7",
            MockReply::job_succeeded("job-7", json!({})).delayed(Duration::from_secs(20)),
        );

        let transport_timeout = Duration::from_secs(30);
        let creds = Arc::new(Credentials::new("key", "secret").unwrap());
        let url = url::Url::parse("http://cloud.test/client/api").unwrap();
        let pipeline = Pipeline::new(
            RequestSigner::new(creds, &url),
            Arc::new(transport.clone()),
            transport_timeout,
        );
        let policy = fixed(Duration::from_secs(5));

        let outcome = JobPoller::new(&pipeline, &policy, None)
            .await_completion("job-7")
            .await;

        match outcome {
            JobOutcome::TimedOut { elapsed } => assert!(elapsed < Duration::from_secs(6)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
