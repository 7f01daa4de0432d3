//! Fail-soft outcomes
//!
//! Operations on the authentication path never surface errors to the caller.
//! They return a [`Recovered`] value instead: either the real result, or a
//! default ("not authenticated") value together with the reason it was
//! substituted. Administrative operations use the crate [`Result`](crate::Result)
//! and propagate errors.

use std::fmt::Display;

use tracing::{debug, error};

/// Result of a fail-soft operation
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Recovered<T> {
    value: T,
    failure: Option<String>,
}

impl<T> Recovered<T> {
    /// Wrap a successful value
    pub fn success(value: T) -> Self {
        Self {
            value,
            failure: None,
        }
    }

    /// Substitute `fallback` after logging `reason`
    pub fn fallback(fallback: T, reason: impl Display) -> Self {
        let reason = reason.to_string();
        error!(reason = %reason, "[Keycloak Service] recovered from failure");
        Self {
            value: fallback,
            failure: Some(reason),
        }
    }

    /// Whether the value is a substitute for a failed operation
    pub fn is_fallback(&self) -> bool {
        self.failure.is_some()
    }

    /// Reason the fallback was used, if any
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Borrow the value
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Take the value, discarding the failure reason
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Map the carried value, keeping the failure reason
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recovered<U> {
        Recovered {
            value: f(self.value),
            failure: self.failure,
        }
    }
}

impl<T: Default> Recovered<T> {
    /// Convert a propagated result into a fail-soft one
    pub fn from_result<E: Display>(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::fallback(T::default(), e),
        }
    }

    /// Default value for an expected absence (no token, bad state).
    /// Logged at debug level, unlike failures.
    pub fn empty(reason: impl Display) -> Self {
        let reason = reason.to_string();
        debug!(reason = %reason, "[Keycloak Service] nothing to return");
        Self {
            value: T::default(),
            failure: Some(reason),
        }
    }
}
