//! Error types for the script service bridge.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while submitting a request over the remote transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The remote side refused the call for security reasons.
    #[error("security error: {0}")]
    Security(String),
    /// The remote call failed in transit.
    #[error("remote error: {0}")]
    Remote(String),
    /// The callback was dropped without ever being invoked.
    #[error("callback dropped before delivering a result")]
    CallbackDropped,
}

/// Errors reported by the platform collaborators (permission UI, service binder).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform refused to start the bind.
    #[error("bind failed: {0}")]
    BindFailed(String),
    /// No surface was available to show the permission request.
    #[error("permission flow unavailable: {0}")]
    PermissionFlowUnavailable(String),
    /// Anything else the platform reports.
    #[error("{0}")]
    Other(String),
}

/// Errors returned by the bridge to its callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The user (or platform) denied the permission needed to talk to the service.
    #[error("permission not granted: {permission}")]
    PermissionDenied {
        /// The permission that was requested.
        permission: String,
    },
    /// The service is installed but older than the minimum supported version.
    #[error("script service version {found} is older than the minimum supported {minimum}")]
    ServiceUnsupportedVersion {
        /// Version reported by the installed service.
        found: u32,
        /// Minimum version this client understands.
        minimum: u32,
    },
    /// No service answers the well-known action.
    #[error("no script service found for action {action}")]
    ServiceMissing {
        /// The action that failed to resolve.
        action: String,
    },
    /// The bind this caller was waiting on was torn down by a concurrent `unbind`.
    #[error("bind was interrupted by a concurrent unbind")]
    BindInProgressConflict,
    /// A call was issued without binding first.
    #[error("you have to bind before you can call anything else")]
    NotBound,
    /// The request could not be delivered or its callback never fired.
    #[error("remote transport failure: {0}")]
    RemoteTransportFailure(#[from] TransportError),
    /// The remote rejected the request payload.
    #[error("remote rejected the input")]
    RemoteInvalidInput,
    /// The remote could not evaluate the script.
    #[error("script could not be evaluated")]
    RemoteEvaluationFailed,
    /// The launcher is not in a state where it can accept scripts.
    #[error("launcher is in an invalid state")]
    RemoteLauncherInvalid,
    /// The remote still reported the script as existing after a forced update.
    #[error("script {name} still exists after a forced update")]
    RemoteAlreadyExists {
        /// Name of the script that could not be replaced.
        name: String,
    },
    /// The script already existed and the user declined to overwrite it.
    #[error("user declined to overwrite the existing script")]
    ImportRejectedByUser,
    /// A bounded wait expired.
    #[error("{operation} did not complete within {waited:?}")]
    Timeout {
        /// The operation that was waiting.
        operation: &'static str,
        /// How long the caller waited.
        waited: Duration,
    },
    /// A platform collaborator failed.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl BridgeError {
    /// Returns true if the error happened while setting up the connection,
    /// before any remote call was issued.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::PermissionDenied { .. }
                | BridgeError::ServiceUnsupportedVersion { .. }
                | BridgeError::ServiceMissing { .. }
                | BridgeError::BindInProgressConflict
                | BridgeError::NotBound
                | BridgeError::Platform(_)
        )
    }

    /// What the user can do about this error, if anything.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            BridgeError::PermissionDenied { .. } => {
                Some("grant the script import permission and try again")
            }
            BridgeError::ServiceUnsupportedVersion { .. } => {
                Some("update the launcher to a newer version")
            }
            BridgeError::ServiceMissing { .. } => Some("install the launcher"),
            BridgeError::RemoteLauncherInvalid => Some("open the launcher once and try again"),
            _ => None,
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
