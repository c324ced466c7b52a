//! Runtime permission requests.
//!
//! The platform shows its permission UI out of band and reports the answer
//! later, possibly on another thread. [`PermissionGate`] turns that into a
//! blocking call: each request gets a fresh correlation id, the waiter is
//! registered under that id, and the platform's answer is routed back to the
//! matching waiter.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::completion::{self, Completer, Completion, WaitError};
use crate::error::{BridgeError, BridgeResult, PlatformError};

/// Key linking a permission request to its eventual answer.
pub type CorrelationId = u64;

/// The platform side of runtime permissions.
pub trait PermissionPlatform: Send + Sync {
    /// Whether the platform asks the user for permissions at runtime.
    ///
    /// When false, [`check_granted`](Self::check_granted) is the final answer.
    fn runtime_permissions_supported(&self) -> bool {
        true
    }

    /// Whether `permission` is currently granted.
    fn check_granted(&self, permission: &str) -> bool;

    /// Start the permission flow for `permission`.
    ///
    /// The answer is delivered later through `responder` (or through
    /// [`PermissionGate::deliver`] with `responder.id()`).
    fn request(
        &self,
        permission: &str,
        responder: PermissionResponder,
    ) -> Result<(), PlatformError>;
}

#[derive(Default)]
struct Registry {
    pending: Mutex<HashMap<CorrelationId, Completer<bool>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, Completer<bool>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, id: CorrelationId, granted: bool) -> bool {
        // Remove under the lock, complete outside it.
        let completer = self.lock().remove(&id);
        match completer {
            Some(completer) => completer.complete(granted),
            None => false,
        }
    }
}

/// Handle the platform uses to answer one permission request.
pub struct PermissionResponder {
    id: CorrelationId,
    registry: Weak<Registry>,
}

impl PermissionResponder {
    /// The correlation id of the request this responder answers.
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Deliver the user's answer.
    ///
    /// Returns false if the request was already answered, timed out, or the
    /// gate no longer exists.
    pub fn respond(self, granted: bool) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.resolve(self.id, granted),
            None => false,
        }
    }
}

impl fmt::Debug for PermissionResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionResponder")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Blocking front for runtime permission requests.
pub struct PermissionGate {
    platform: Arc<dyn PermissionPlatform>,
    registry: Arc<Registry>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate")
            .field("pending", &self.pending_count())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PermissionGate {
    /// Create a gate that gives up on an unanswered request after `timeout`.
    pub fn new(platform: Arc<dyn PermissionPlatform>, timeout: Duration) -> Self {
        Self {
            platform,
            registry: Arc::new(Registry::default()),
            next_id: AtomicU64::new(0),
            timeout,
        }
    }

    /// Ask for `permission`, blocking until the platform answers.
    ///
    /// Returns immediately when the platform has no runtime permission model
    /// or the permission is already granted. If the permission flow cannot be
    /// started, or nobody answers within the configured timeout, the
    /// permission counts as denied.
    pub fn request_permission(&self, permission: &str) -> bool {
        if !self.platform.runtime_permissions_supported() {
            return self.platform.check_granted(permission);
        }
        if self.platform.check_granted(permission) {
            tracing::debug!("Permission {} already granted", permission);
            return true;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completer, completion) = completion::channel();
        self.registry.lock().insert(id, completer);

        let responder = PermissionResponder {
            id,
            registry: Arc::downgrade(&self.registry),
        };
        tracing::debug!("Requesting permission {} (request {})", permission, id);
        if let Err(e) = self.platform.request(permission, responder) {
            tracing::warn!("Could not start permission flow for {}: {}", permission, e);
            self.registry.lock().remove(&id);
            return false;
        }

        match completion.wait_timeout(self.timeout) {
            Ok(granted) => granted,
            Err(WaitError::TimedOut) => self.settle_expired(id, &completion),
            Err(WaitError::Abandoned) => false,
        }
    }

    /// Resolve a request whose wait ran out.
    ///
    /// An answer that claimed the registration before it could be withdrawn
    /// still counts.
    fn settle_expired(&self, id: CorrelationId, completion: &Completion<bool>) -> bool {
        let withdrawn = self.registry.lock().remove(&id);
        if withdrawn.is_none() {
            tracing::debug!("Permission request {} answered as its wait expired", id);
            return completion.wait_timeout(self.timeout).unwrap_or(false);
        }
        tracing::warn!(
            "Permission request {} not answered within {:?}, treating as denied",
            id,
            self.timeout
        );
        false
    }

    /// Like [`request_permission`](Self::request_permission), but reports a
    /// denial as [`BridgeError::PermissionDenied`].
    pub fn require(&self, permission: &str) -> BridgeResult<()> {
        if self.request_permission(permission) {
            Ok(())
        } else {
            Err(BridgeError::PermissionDenied {
                permission: permission.to_string(),
            })
        }
    }

    /// Deliver an answer by correlation id.
    ///
    /// Each id is answered at most once; later deliveries return false.
    pub fn deliver(&self, id: CorrelationId, granted: bool) -> bool {
        self.registry.resolve(id, granted)
    }

    /// Number of requests still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.registry.lock().len()
    }
}
