//! `cloudstack` - Async-first client core for the CloudStack HTTP API.
//!
//! This crate is designed for:
//! - resource wrappers (VMs, volumes, networks, ...) that need one dispatch point
//! - automation tools talking to a management server's `/client/api` endpoint
//!
//! It provides:
//! - HMAC-SHA1 request signing over a canonical, sorted query string
//! - a pluggable HTTP transport (GET, or POST for long queries)
//! - response envelope decoding into success / error / async-accepted
//! - async job polling with backoff, deadline and cooperative cancellation
//! - typed commands decoded with serde
//!
//! ## Quick start
//!
//! ```no_run
//! use cloudstack::{Client, Credentials, ParameterSet};
//! # async fn demo() -> cloudstack::Result<()> {
//! let creds = Credentials::new("api-key", "secret-key")?;
//! let client = Client::new("https://cloud.example/client/api", creds)?;
//!
//! // Synchronous command:
//! let zones = client.execute("listZones", &ParameterSet::empty()).await?;
//! println!("zones = {zones}");
//!
//! // Async command; waits for the job and returns its `jobresult`:
//! let params = ParameterSet::builder()
//!     .set("zoneid", "z1")
//!     .set("templateid", "t1")
//!     .set("serviceofferingid", "s1")
//!     .build();
//! let vm = client.execute("deployVirtualMachine", &params).await?;
//! println!("vm = {}", vm["virtualmachine"]["id"]);
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod cancel;
mod client;
mod command;
mod credentials;
mod envelope;
mod params;
mod poll;
mod sign;
mod transport;

pub mod error;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backoff::Backoff;
pub use cancel::CancelToken;
pub use client::{CallOptions, Client, ClientBuilder, ClientOptions};
pub use command::Command;
pub use credentials::Credentials;
pub use envelope::{ApiOutcome, decode};
pub use error::{Error, ErrorKind, Result};
pub use params::{ParamValue, ParameterSet, ParameterSetBuilder};
pub use poll::{JobOutcome, PollPolicy, QUERY_ASYNC_JOB_RESULT};
pub use sign::{DEFAULT_MAX_GET_QUERY_LEN, HttpMethod, RequestSigner, SignedRequest, encode};
pub use transport::{HttpTransport, RawResponse, Transport, TransportFuture};
