//! Symmetric-signed, expiring access tokens.
//!
//! The backend issues HS256 tokens carrying the subject id and an expiry
//! timestamp. Validation is a three-way outcome: a token that parses and
//! whose signature verifies but whose claims are expired (or carry no
//! subject) is *invalid* rather than an error, so handlers can distinguish
//! "bad token material" from "good token, no longer acceptable".

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
    iat: u64,
    exp: u64,
}

/// Outcome of validating a well-signed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// Signature verified, not expired, subject present.
    Valid { subject: String },
    /// Signature verified but the claims are expired or carry no subject.
    Invalid,
}

/// The token was malformed or its signature did not verify.
#[derive(Debug, Error)]
#[error("token rejected")]
pub struct TokenError(#[source] jsonwebtoken::errors::Error);

/// Issues and validates tokens with a shared secret.
///
/// The secret is held only in key form and is never logged; `TokenIssuer`
/// deliberately does not implement `Debug`.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], lifetime: Duration) -> TokenIssuer {
        let mut validation = Validation::new(Algorithm::HS256);
        // The deployment issues short-lived tokens; clock slack would defeat
        // the expiry tests and the revocation story.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        TokenIssuer {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            lifetime,
        }
    }

    /// Issue a token for a subject id.
    ///
    /// Returns the empty string if signing fails; callers treat that as
    /// "issue failed".
    pub fn issue(&self, subject: &str) -> String {
        let now = jsonwebtoken::get_current_timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + self.lifetime.as_secs(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .unwrap_or_default()
    }

    /// Validate a token against the configured secret.
    ///
    /// - `Ok(TokenStatus::Valid { .. })` — signature verified, unexpired,
    ///   non-empty subject.
    /// - `Ok(TokenStatus::Invalid)` — parsed and signed correctly, but the
    ///   claims are expired or otherwise unacceptable.
    /// - `Err(_)` — malformed token or signature mismatch.
    pub fn validate(&self, token: &str) -> Result<TokenStatus, TokenError> {
        match jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) if data.claims.sub.is_empty() => Ok(TokenStatus::Invalid),
            Ok(data) => Ok(TokenStatus::Valid {
                subject: data.claims.sub,
            }),
            Err(err) => match err.kind() {
                ErrorKind::ExpiredSignature
                | ErrorKind::ImmatureSignature
                | ErrorKind::MissingRequiredClaim(_) => Ok(TokenStatus::Invalid),
                _ => Err(TokenError(err)),
            },
        }
    }
}

/// Read the subject claim out of a token without verifying it.
///
/// The frontend uses this to key its cache before the backend has vouched
/// for the token; it is never a substitute for [`TokenIssuer::validate`].
pub fn peek_subject(token: &str) -> Option<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data =
        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    if data.claims.sub.is_empty() {
        None
    } else {
        Some(data.claims.sub)
    }
}
