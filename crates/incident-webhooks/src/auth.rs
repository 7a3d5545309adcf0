//! Webhook caller authentication.
//!
//! Two credential forms are accepted, checked in priority order:
//!
//! 1. `X-Signature`: hex HMAC-SHA256 of the raw request body
//! 2. `X-Webhook-Token`: shared token, only when one is configured
//!
//! A successful check yields the identity used for rate limiting.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Header carrying the shared token.
pub const TOKEN_HEADER: &str = "x-webhook-token";
/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// Identity assigned to signature-authenticated callers.
pub const HMAC_IDENTITY: &str = "hmac";

const TOKEN_IDENTITY_PREFIX: &str = "token:";

/// Identity safe to log or echo back: the token value is masked.
#[must_use]
pub fn redacted_identity(identity: &str) -> String {
    if !identity.starts_with(TOKEN_IDENTITY_PREFIX) {
        return identity.to_string();
    }
    if identity.ends_with(":recovery") {
        "token:<redacted>:recovery".to_string()
    } else {
        "token:<redacted>".to_string()
    }
}

/// Verify a body signature using HMAC-SHA256.
///
/// # Arguments
/// * `body` - Raw request body bytes
/// * `signature` - Hex-encoded signature from the `X-Signature` header
/// * `secret` - Shared signing secret
///
/// # Returns
/// `true` if signature is valid, `false` otherwise
#[must_use]
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(signature_bytes) = hex::decode(signature.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Compute the hex signature a sender would attach to `body`.
#[must_use]
pub fn sign_body(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Credential headers extracted from a request.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    /// HMAC signature
    pub signature: Option<String>,
    /// Shared token
    pub token: Option<String>,
    /// Idempotency key
    pub idempotency_key: Option<String>,
}

impl WebhookHeaders {
    /// Parse headers from a request
    #[must_use]
    pub fn from_header_map(get_header: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| get_header(name).filter(|v| !v.trim().is_empty());
        Self {
            signature: non_empty(SIGNATURE_HEADER),
            token: non_empty(TOKEN_HEADER),
            idempotency_key: non_empty(IDEMPOTENCY_HEADER).map(|k| k.trim().to_string()),
        }
    }
}

/// Verifies webhook callers against the configured secret and token.
#[derive(Clone, Default)]
pub struct Authenticator {
    secret: Option<String>,
    token: Option<String>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Authenticator {
    /// Create an authenticator. Empty strings count as unset.
    #[must_use]
    pub fn new(secret: Option<String>, token: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Authenticate a request and return the caller identity.
    ///
    /// A present signature always takes priority; a token is never consulted
    /// once a signature header has been sent.
    pub fn authenticate(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<String, AuthError> {
        if let Some(signature) = &headers.signature {
            let Some(secret) = &self.secret else {
                return Err(AuthError::InvalidSignature);
            };
            if body.is_empty() || !verify_signature(body, signature, secret) {
                return Err(AuthError::InvalidSignature);
            }
            return Ok(HMAC_IDENTITY.to_string());
        }

        match (&self.token, &headers.token) {
            (Some(expected), Some(provided)) => {
                if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
                    Ok(format!("{TOKEN_IDENTITY_PREFIX}{provided}"))
                } else {
                    Err(AuthError::InvalidToken)
                }
            }
            _ => Err(AuthError::MissingCredentials),
        }
    }
}
