//! Request signing.
//!
//! The platform verifies an HMAC-SHA1 signature computed over the sorted,
//! percent-encoded and lowercased parameter string. Any deviation in
//! ordering or encoding is rejected as an authentication failure, so the
//! rules below are fixed:
//!
//! 1. merge `apiKey`, `command` and `response=json` into the caller's
//!    parameters (a caller-supplied `signature` is dropped);
//! 2. sort by lowercased name, ties broken by the exact name;
//! 3. percent-encode every byte outside `A-Za-z0-9-_.~` (space is `%20`);
//! 4. HMAC-SHA1 the lowercased string, base64 it, percent-encode it;
//! 5. send the original-case string with `&signature=...` appended.

use std::{fmt, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

use crate::{credentials::Credentials, params::ParameterSet};

/// Characters left unescaped: the RFC 3986 unreserved set.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Default threshold above which a request is sent as a POST form.
pub const DEFAULT_MAX_GET_QUERY_LEN: usize = 2048;

const API_KEY: &str = "apiKey";
const COMMAND: &str = "command";
const RESPONSE: &str = "response";
const SIGNATURE: &str = "signature";

/// Percent-encode a name or value the way the platform expects.
#[must_use]
pub fn encode(input: &str) -> String {
    utf8_percent_encode(input, QUERY_ENCODE_SET).to_string()
}

/// HTTP method of a signed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// Parameters in the URL query.
    Get,
    /// Parameters in an `application/x-www-form-urlencoded` body.
    Post,
}

/// A signed, ready-to-send request. Single use.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedRequest {
    method: HttpMethod,
    url: String,
    body: Option<String>,
}

impl SignedRequest {
    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Full request URL (including the query for GET requests).
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Form body for POST requests.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// The signed parameter string, wherever it travels.
    #[must_use]
    pub fn query(&self) -> &str {
        match (&self.body, self.url.split_once('?')) {
            (Some(body), _) => body,
            (None, Some((_, query))) => query,
            (None, None) => "",
        }
    }

    /// Whether resending this request cannot create anything twice.
    ///
    /// Only GET requests qualify; the platform offers no idempotency keys
    /// for form POSTs.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        self.method == HttpMethod::Get
    }
}

impl fmt::Debug for SignedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The query carries the API key and the signature.
        f.debug_struct("SignedRequest")
            .field("method", &self.method)
            .field("query_len", &self.query().len())
            .finish_non_exhaustive()
    }
}

/// Signs parameter sets for one endpoint with one set of credentials.
#[derive(Clone, Debug)]
pub struct RequestSigner {
    credentials: Arc<Credentials>,
    base_url: String,
    max_get_query_len: usize,
    get_only: bool,
}

impl RequestSigner {
    /// Create a signer for `base_url` (e.g. `https://cloud.example/client/api`).
    #[must_use]
    pub fn new(credentials: Arc<Credentials>, base_url: &Url) -> Self {
        Self {
            credentials,
            base_url: base_url.as_str().trim_end_matches('?').to_string(),
            max_get_query_len: DEFAULT_MAX_GET_QUERY_LEN,
            get_only: false,
        }
    }

    /// Queries of at least this many bytes are sent as POST forms.
    #[must_use]
    pub fn max_get_query_len(mut self, len: usize) -> Self {
        self.max_get_query_len = len;
        self
    }

    /// Always use GET, regardless of query length.
    #[must_use]
    pub fn get_only(mut self, enabled: bool) -> Self {
        self.get_only = enabled;
        self
    }

    /// Sign `params` for `command`.
    #[must_use]
    pub fn sign(&self, command: &str, params: &ParameterSet) -> SignedRequest {
        let query = self.signed_query(command, params);

        if !self.get_only && query.len() >= self.max_get_query_len {
            SignedRequest {
                method: HttpMethod::Post,
                url: self.base_url.clone(),
                body: Some(query),
            }
        } else {
            SignedRequest {
                method: HttpMethod::Get,
                url: format!("{}?{}", self.base_url, query),
                body: None,
            }
        }
    }

    /// The transmitted parameter string: canonical order, original case,
    /// signature appended.
    pub(crate) fn signed_query(&self, command: &str, params: &ParameterSet) -> String {
        let query = canonical_query(self.credentials.api_key(), command, params);
        let digest = self.credentials.digest(query.to_ascii_lowercase().as_bytes());
        let signature = STANDARD.encode(digest);
        format!("{query}&{SIGNATURE}={}", encode(&signature))
    }
}

/// Sorted, encoded, original-case parameter string (without signature).
fn canonical_query(api_key: &str, command: &str, params: &ParameterSet) -> String {
    let mut pairs: Vec<(String, String)> = params
        .to_pairs()
        .into_iter()
        .filter(|(name, _)| !is_reserved(name))
        .collect();

    pairs.push((API_KEY.to_string(), api_key.to_string()));
    pairs.push((COMMAND.to_string(), command.to_string()));
    pairs.push((RESPONSE.to_string(), "json".to_string()));

    let mut encoded: Vec<(String, String, String)> = pairs
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), encode(name), encode(value)))
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    encoded
        .iter()
        .map(|(_, name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn is_reserved(name: &str) -> bool {
    [API_KEY, COMMAND, RESPONSE, SIGNATURE]
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}
