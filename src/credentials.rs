//! API credentials.

use std::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Error, Result};

pub(crate) type HmacSha1 = Hmac<Sha1>;

/// API key pair used to authenticate every request.
///
/// The secret key is consumed at construction: only a keyed HMAC state is
/// retained, so the secret cannot leak through `Debug`, `Display` or
/// serialization. Credentials are immutable and cheap to share across
/// concurrent calls.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    mac: HmacSha1,
}

impl Credentials {
    /// Create credentials from an API key and a secret key.
    ///
    /// Both keys must be non-empty.
    pub fn new(api_key: impl Into<String>, secret_key: impl AsRef<[u8]>) -> Result<Self> {
        let api_key = api_key.into();
        let secret_key = secret_key.as_ref();

        if api_key.trim().is_empty() {
            return Err(Error::config("API key must not be empty"));
        }
        if secret_key.is_empty() {
            return Err(Error::config("secret key must not be empty"));
        }

        let mac = HmacSha1::new_from_slice(secret_key)
            .map_err(|_| Error::config("secret key cannot be used as an HMAC key"))?;

        Ok(Self { api_key, mac })
    }

    /// The public API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Raw HMAC-SHA1 digest of `message`, keyed by the secret key.
    pub(crate) fn digest(&self, message: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_keys_are_rejected() {
        let err = Credentials::new("", "secret").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = Credentials::new("key", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn debug_output_is_redacted() {
        let creds = Credentials::new("my-api-key", "my-secret").unwrap();
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("my-api-key"));
        assert!(!dbg.contains("my-secret"));
    }

    #[test]
    fn digest_is_rfc2202_hmac_sha1() {
        // RFC 2202, test case 2.
        let creds = Credentials::new("key", "Jefe").unwrap();
        let digest = creds.digest(b"what do ya want for nothing?");
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(hex, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }
}
