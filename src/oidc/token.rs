//! Token set model and unverified JWT claim inspection
//!
//! # Security note
//!
//! ID and access tokens are decoded with [`parse_claims_unverified`], which
//! checks structure and claim values only. The JWT signature is **not**
//! verified against the realm's JWKS. Tokens are only ever obtained directly
//! from the token endpoint over the configured transport, and the userinfo
//! `sub` is cross-checked against the ID token, but a caller that accepts
//! tokens from anywhere else must verify signatures separately.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Raw token endpoint response, persisted in the session as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// OIDC ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Refresh token lifetime in seconds (Keycloak extension)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,

    /// Token type (usually "Bearer")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Unix time at which this set was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<u64>,

    /// Any other provider fields (`session_state`, `not-before-policy`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Claims read from an ID token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,

    /// Subject
    #[serde(default)]
    pub sub: Option<String>,

    /// Audience (single string or array)
    #[serde(default)]
    pub aud: Option<Audience>,

    /// Expiry (Unix timestamp)
    #[serde(default)]
    pub exp: Option<i64>,

    /// Issued-at (Unix timestamp)
    #[serde(default)]
    pub iat: Option<i64>,

    /// Remaining claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `aud` claim, which may be a string or an array of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience
    One(String),
    /// Several audiences
    Many(Vec<String>),
}

impl Audience {
    /// Whether `client_id` is (one of) the audience(s)
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|a| a == client_id),
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(aud) => f.write_str(aud),
            Self::Many(auds) => write!(f, "[{}]", auds.join(", ")),
        }
    }
}

/// Claim values an ID token must carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedClaims {
    /// Expected audience, the configured client id
    pub aud: String,
    /// Expected issuer, from the discovery document
    pub iss: String,
}

/// Decode a JWT payload into a JSON object **without** verifying its signature.
///
/// The token must have exactly three dot-separated segments and both header
/// and payload must be base64url-encoded JSON objects. The signature segment
/// is not inspected.
pub fn decode_payload_unverified(jwt: &str) -> Result<Map<String, Value>, ValidationError> {
    let segments: Vec<&str> = jwt.split('.').collect();
    if segments.len() != 3 {
        return Err(ValidationError::Segments(segments.len()));
    }

    decode_segment(segments[0], "header")?;
    decode_segment(segments[1], "payload")
}

/// Decode ID token claims **without** verifying the signature.
pub fn parse_claims_unverified(jwt: &str) -> Result<IdTokenClaims, ValidationError> {
    let payload = decode_payload_unverified(jwt)?;
    serde_json::from_value(Value::Object(payload)).map_err(|e| ValidationError::Json {
        segment: "payload",
        message: e.to_string(),
    })
}

fn decode_segment(
    segment: &str,
    name: &'static str,
) -> Result<Map<String, Value>, ValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| ValidationError::Encoding { segment: name })?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ValidationError::Json {
            segment: name,
            message: format!("expected object, found {other}"),
        }),
        Err(e) => Err(ValidationError::Json {
            segment: name,
            message: e.to_string(),
        }),
    }
}

/// Current Unix time in seconds
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

impl TokenSet {
    /// Whether this set has no usable access token
    pub fn is_empty(&self) -> bool {
        self.access_token().is_none()
    }

    /// Access token, if present and non-empty
    pub fn access_token(&self) -> Option<&str> {
        non_empty(self.access_token.as_ref())
    }

    /// Refresh token, if present and non-empty
    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(self.refresh_token.as_ref())
    }

    /// ID token, if present and non-empty
    pub fn id_token(&self) -> Option<&str> {
        non_empty(self.id_token.as_ref())
    }

    /// Record the local receipt time used as the expiry fallback
    pub(crate) fn stamped(mut self) -> Self {
        self.issued_at = Some(unix_now());
        self
    }

    /// Decoded ID token claims
    pub fn id_token_claims(&self) -> Result<IdTokenClaims, ValidationError> {
        let id_token = self.id_token().ok_or(ValidationError::MissingIdToken)?;
        parse_claims_unverified(id_token)
    }

    /// Whether the token set must be refreshed, as of now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    /// Whether the token set must be refreshed at Unix time `now`.
    ///
    /// Uses the ID token's `exp` when an ID token is present; otherwise the
    /// local `issued_at + expires_in`. Anything undecodable counts as expired.
    pub fn is_expired_at(&self, now: u64) -> bool {
        if self.id_token().is_some() {
            return match self.id_token_claims() {
                Ok(IdTokenClaims { exp: Some(exp), .. }) => {
                    i64::try_from(now).unwrap_or(i64::MAX) >= exp
                }
                _ => true,
            };
        }

        match (self.issued_at, self.expires_in) {
            (Some(issued_at), Some(expires_in)) => now >= issued_at.saturating_add(expires_in),
            _ => true,
        }
    }

    /// Check the ID token's `aud` and `iss` against expected values
    pub fn validate_claims(&self, expected: &ExpectedClaims) -> Result<(), ValidationError> {
        let claims = self.id_token_claims()?;

        match &claims.aud {
            Some(aud) if aud.contains(&expected.aud) => {}
            Some(aud) => return Err(ValidationError::mismatch("aud", &expected.aud, aud.to_string())),
            None => return Err(ValidationError::mismatch("aud", &expected.aud, "<none>")),
        }

        let iss = claims.iss.unwrap_or_default();
        if iss != expected.iss {
            return Err(ValidationError::mismatch("iss", &expected.iss, iss));
        }

        Ok(())
    }

    /// Check the ID token's `sub` against the subject returned by userinfo
    pub fn validate_subject(&self, expected_sub: &str) -> Result<(), ValidationError> {
        let sub = self.id_token_claims()?.sub.unwrap_or_default();
        if sub.is_empty() || sub != expected_sub {
            return Err(ValidationError::mismatch("sub", expected_sub, sub));
        }
        Ok(())
    }

    /// Decoded access token payload, if it is a JWT
    pub fn access_token_claims(&self) -> Result<Map<String, Value>, ValidationError> {
        let access_token = self
            .access_token()
            .ok_or(ValidationError::MissingAccessToken)?;
        decode_payload_unverified(access_token)
    }

    /// Client roles granted on `resource` (`resource_access.<resource>.roles`)
    pub fn resource_roles(&self, resource: &str) -> Vec<String> {
        self.access_token_claims()
            .ok()
            .and_then(|claims| {
                claims
                    .get("resource_access")
                    .and_then(|ra| ra.get(resource))
                    .and_then(|r| r.get("roles"))
                    .map(string_array)
            })
            .unwrap_or_default()
    }

    /// Realm roles (`realm_access.roles`)
    pub fn realm_roles(&self) -> Vec<String> {
        self.access_token_claims()
            .ok()
            .and_then(|claims| {
                claims
                    .get("realm_access")
                    .and_then(|ra| ra.get("roles"))
                    .map(string_array)
            })
            .unwrap_or_default()
    }

    /// Whether any of `roles` is granted on `resource`
    pub fn has_role<S: AsRef<str>>(&self, roles: &[S], resource: &str) -> bool {
        let granted = self.resource_roles(resource);
        roles
            .iter()
            .any(|wanted| granted.iter().any(|g| g == wanted.as_ref()))
    }
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
