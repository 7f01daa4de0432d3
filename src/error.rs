//! Error types for the Keycloak web guard

use std::io;

use thiserror::Error;

/// Result type alias for the Keycloak web guard
pub type Result<T> = std::result::Result<T, Error>;

/// Keycloak web guard errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The OpenID configuration document could not be loaded
    #[error("It was not possible to load OpenId configuration: {0}")]
    Discovery(String),

    /// A required endpoint is absent from the discovery document
    #[error("Endpoint '{0}' missing from OpenId configuration")]
    MissingEndpoint(String),

    /// ID token claims did not match what was expected
    #[error("Token validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Admin REST call failed
    #[error("It was not possible to {operation}: {message}")]
    Admin {
        /// Human readable operation, e.g. "load users"
        operation: &'static str,
        /// Original failure message
        message: String,
    },

    /// Transport or unexpected-status error on the authentication path
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an admin error for the given operation
    pub fn admin(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Admin {
            operation,
            message: message.into(),
        }
    }
}

/// Structural and claim-level failures of an unverified JWT
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The token set carries no access token
    #[error("Access Token is invalid")]
    MissingAccessToken,

    /// The token set carries no ID token
    #[error("ID Token is missing")]
    MissingIdToken,

    /// The JWT is not made of exactly three dot-separated segments
    #[error("JWT must have 3 segments, found {0}")]
    Segments(usize),

    /// A segment is not valid base64url
    #[error("JWT {segment} is not valid base64url")]
    Encoding {
        /// Segment name ("header" or "payload")
        segment: &'static str,
    },

    /// A segment is not a JSON object
    #[error("JWT {segment} is not valid JSON: {message}")]
    Json {
        /// Segment name ("header" or "payload")
        segment: &'static str,
        /// Parser message
        message: String,
    },

    /// A claim did not hold the expected value
    #[error("Claim '{claim}' mismatch: expected {expected}, got {actual}")]
    ClaimMismatch {
        /// Claim name
        claim: &'static str,
        /// Expected value
        expected: String,
        /// Value found in the token
        actual: String,
    },
}

impl ValidationError {
    pub(crate) fn mismatch(
        claim: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ClaimMismatch {
            claim,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
