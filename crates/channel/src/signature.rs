//! Events API request signing.
//!
//! The provider signs every webhook with
//! `v0=hex(HMAC-SHA256(signing_secret, "v0:{timestamp}:{raw body}"))` and
//! sends it in `X-Slack-Signature`, with the timestamp in
//! `X-Slack-Request-Timestamp`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use hd_domain::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Compute the `v0=<hex>` signature for `body` sent at `timestamp`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Auth(format!("invalid signing key: {e}")))?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(format!("v0={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verifies inbound webhook signatures and the replay window.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    tolerance_secs: u64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl SignatureVerifier {
    /// `secret = None` rejects every request.
    pub fn new(secret: Option<String>, tolerance_secs: u64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Check `signature` over `body` sent at `timestamp`, with `now` in unix
    /// seconds.  Every failure is an [`Error::Auth`].
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<()> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| Error::Auth("signing secret not configured".into()))?;
        let timestamp = timestamp.ok_or_else(|| Error::Auth("missing timestamp".into()))?;
        let signature = signature.ok_or_else(|| Error::Auth("missing signature".into()))?;

        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| Error::Auth("malformed timestamp".into()))?;
        if now.abs_diff(ts) > self.tolerance_secs {
            return Err(Error::Auth("stale timestamp".into()));
        }

        let computed = sign(secret, timestamp, body)?;
        if computed.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() != 1 {
            return Err(Error::Auth("signature mismatch".into()));
        }
        Ok(())
    }
}
