#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pine-auth** – The admin Basic-auth password check.
//!
//! The admin API authenticates with HTTP Basic auth against a single
//! configured password; there are no claims to extract and no token
//! lifecycle, so this crate is a small, focused validator trait rather than
//! a full token-issuing auth stack. Routing and the HTTP framework itself
//! remain external collaborators — this crate is the pure, testable
//! function underneath them.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

/// Why an admin request's `Authorization` header failed the check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminAuthError {
    /// No `Authorization` header was present at all.
    #[error("missing Authorization header")]
    MissingAuthorizationHeader,
    /// The header was present but not a well-formed `Basic <base64>` value.
    #[error("malformed Authorization header")]
    MalformedAuthorizationHeader,
    /// The decoded credentials were not `username:password`.
    #[error("malformed Basic auth credentials")]
    MalformedBasicCredentials,
    /// The supplied password did not match the configured one.
    #[error("incorrect password")]
    IncorrectPassword,
}

impl AdminAuthError {
    /// The HTTP status code this failure maps to, for the external HTTP
    /// layer to surface without re-deriving the mapping.
    pub fn status_code(&self) -> u16 {
        match self {
            AdminAuthError::MissingAuthorizationHeader => 401,
            AdminAuthError::MalformedAuthorizationHeader
            | AdminAuthError::MalformedBasicCredentials
            | AdminAuthError::IncorrectPassword => 403,
        }
    }
}

/// Verifier for the admin API's single-password Basic auth.
#[async_trait]
pub trait AdminAuth: Send + Sync {
    /// Check `authorization_header` (the raw `Authorization` header value,
    /// if one was sent) against the configured admin password.
    async fn check(&self, authorization_header: Option<&str>) -> Result<(), AdminAuthError>;
}

/// Checks HTTP Basic auth credentials against a single configured password.
/// The username is accepted but never inspected — there is one admin
/// password, no per-user accounts.
#[derive(Clone)]
pub struct SinglePasswordAuth {
    password: String,
}

impl SinglePasswordAuth {
    /// Configure the check against `password`.
    pub fn new(password: impl Into<String>) -> Self {
        Self { password: password.into() }
    }
}

#[async_trait]
impl AdminAuth for SinglePasswordAuth {
    async fn check(&self, authorization_header: Option<&str>) -> Result<(), AdminAuthError> {
        let header = authorization_header.ok_or(AdminAuthError::MissingAuthorizationHeader)?;
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or(AdminAuthError::MalformedAuthorizationHeader)?;
        let decoded = BASE64
            .decode(encoded)
            .map_err(|_| AdminAuthError::MalformedAuthorizationHeader)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AdminAuthError::MalformedAuthorizationHeader)?;
        let (_username, password) = decoded
            .split_once(':')
            .ok_or(AdminAuthError::MalformedBasicCredentials)?;

        // Constant-time comparison: the admin password is a long-lived
        // secret, not a per-request token, so a timing side-channel on
        // length-of-match would be a real leak.
        if bool::from(password.as_bytes().ct_eq(self.password.as_bytes())) {
            Ok(())
        } else {
            debug!("admin auth rejected: incorrect password");
            Err(AdminAuthError::IncorrectPassword)
        }
    }
}
