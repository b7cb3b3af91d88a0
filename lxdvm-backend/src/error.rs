//! Error types for the backend crate.

use std::time::Duration;

/// Errors that can occur while driving the LXD daemon.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The daemon has no record of the instance, operation or device.
    #[error("LXD object not found: {0}")]
    NotFound(String),

    /// The daemon socket could not be reached or the exchange broke off.
    #[error("LXD daemon unavailable: {0}")]
    TransportUnavailable(String),

    /// The daemon answered a request with an error other than "not found".
    #[error("LXD API error {code} for {path}: {message}")]
    Api {
        path: String,
        code: u16,
        message: String,
    },

    /// The daemon sent something that is not a valid API envelope.
    #[error("invalid LXD response: {0}")]
    InvalidResponse(String),

    /// A background operation finished with a failure.
    #[error("LXD operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    /// A background operation did not finish before its deadline.
    #[error("LXD operation {operation} did not finish within {}s", timeout.as_secs())]
    OperationTimeout { operation: String, timeout: Duration },

    /// The backend does not implement the requested operation.
    #[error("{0} is currently not supported")]
    UnsupportedOperation(&'static str),

    /// A native mount was requested in a state that cannot accept it.
    #[error("invalid mount state: {0}")]
    InvalidMountState(String),

    /// A caller broke an argument contract.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The instance shut down while it was being started.
    #[error("{name}: {reason}")]
    StartFailed { name: String, reason: String },

    /// No DHCP lease showed up for the instance in time.
    #[error("failed to determine IP address of {name} within {}s", timeout.as_secs())]
    IpAddressTimeout { name: String, timeout: Duration },

    /// The snap environment needed for a host check is missing.
    #[error("snap environment unavailable: {0}")]
    SnapEnvironment(String),

    /// A description failed validation.
    #[error(transparent)]
    Core(#[from] lxdvm_core::CoreError),
}

/// Outcome of a lookup against the daemon.
///
/// "Not found" is an ordinary answer for many callers (a VM that still has
/// to be created, an operation the daemon already reaped), so it is a
/// variant here instead of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// The daemon returned the object.
    Found(T),
    /// The daemon has no such object.
    NotFound,
}

impl<T> Lookup<T> {
    /// Converts `NotFound` into [`BackendError::NotFound`] describing `what`.
    ///
    /// # Errors
    /// Returns [`BackendError::NotFound`] when the lookup found nothing.
    pub fn require(self, what: &str) -> Result<T, BackendError> {
        match self {
            Lookup::Found(value) => Ok(value),
            Lookup::NotFound => Err(BackendError::NotFound(what.to_owned())),
        }
    }

    /// Returns `true` for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Lookup::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_require_maps_not_found() {
        let missing: Lookup<u8> = Lookup::NotFound;
        match missing.require("instance primary") {
            Err(BackendError::NotFound(what)) => assert_eq!(what, "instance primary"),
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(matches!(Lookup::Found(3u8).require("x"), Ok(3)));
    }

    #[test]
    fn timeout_display_reports_seconds() {
        let err = BackendError::OperationTimeout {
            operation: "abc".to_owned(),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "LXD operation abc did not finish within 60s");
    }

    #[test]
    fn unsupported_display_names_operation() {
        let err = BackendError::UnsupportedOperation("suspend");
        assert_eq!(err.to_string(), "suspend is currently not supported");
    }
}
