//! Connection lifecycle for the remote script service.
//!
//! ```text
//! Unbound ──bind()──▶ Binding ──permission granted, connected──▶ Bound
//!    ▲                   │                                          │
//!    │                   └──permission denied──▶ PermissionDenied    │
//!    └───────────────────────disconnected / unbind()─────────────────┘
//!
//! Unsupported, Missing: fixed at construction, every bind() fails.
//! ```
//!
//! All state lives behind one mutex and every waiter sleeps on one condition
//! variable, re-checking the state after each wake. Platform events
//! ([`ConnectionEvents`]) may arrive on any thread at any time.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, PlatformError};
use crate::permission::PermissionGate;
use crate::remote::RemoteService;

/// A service found by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    /// Package that hosts the service
    pub package: String,
    /// Component name of the service entry point
    pub component: String,
    /// Version code of the hosting package
    pub version: u32,
}

/// Looks up the script service.
pub trait ServiceDiscovery: Send + Sync {
    /// Resolve the service registered for `action`.
    ///
    /// Returns `None` when nothing answers the action or its package details
    /// cannot be read.
    fn resolve(&self, action: &str) -> Option<ResolvedService>;
}

/// Binds to and unbinds from the script service.
pub trait ServiceBinder: Send + Sync {
    /// Start binding. The platform reports the result through `events`.
    fn bind(
        &self,
        service: &ResolvedService,
        events: ConnectionEvents,
    ) -> Result<(), PlatformError>;

    /// Release the binding.
    fn unbind(&self) -> Result<(), PlatformError>;
}

/// What discovery found, computed once per [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Action the service was looked up by
    pub action: String,
    /// The resolved service, if any
    pub service: Option<ResolvedService>,
    /// Oldest version this client accepts
    pub min_version: u32,
}

impl ServiceDescriptor {
    /// Whether discovery found a service at all.
    pub fn is_resolved(&self) -> bool {
        self.service.is_some()
    }

    /// The service if it can be used, otherwise why not.
    pub fn usable(&self) -> BridgeResult<&ResolvedService> {
        match &self.service {
            Some(service) if service.version >= self.min_version => Ok(service),
            Some(service) => Err(BridgeError::ServiceUnsupportedVersion {
                found: service.version,
                minimum: self.min_version,
            }),
            None => Err(BridgeError::ServiceMissing {
                action: self.action.clone(),
            }),
        }
    }
}

/// Connection lifecycle state.
#[derive(Clone)]
pub enum ConnectionState {
    /// Not connected.
    Unbound,
    /// A bind is in flight.
    Binding,
    /// Connected; holds the live handle.
    Bound(Arc<dyn RemoteService>),
    /// The last bind was refused the permission.
    PermissionDenied,
    /// The installed service is too old.
    Unsupported,
    /// No service is installed.
    Missing,
}

impl ConnectionState {
    /// Returns true if a live handle is available.
    pub fn is_bound(&self) -> bool {
        matches!(self, ConnectionState::Bound(_))
    }

    fn is_binding(&self) -> bool {
        matches!(self, ConnectionState::Binding)
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unbound => write!(f, "Unbound"),
            ConnectionState::Binding => write!(f, "Binding"),
            ConnectionState::Bound(_) => write!(f, "Bound(..)"),
            ConnectionState::PermissionDenied => write!(f, "PermissionDenied"),
            ConnectionState::Unsupported => write!(f, "Unsupported"),
            ConnectionState::Missing => write!(f, "Missing"),
        }
    }
}

struct Inner {
    state: ConnectionState,
    /// The client asked to be bound and has not unbound since.
    wanted: bool,
    /// Incremented each time a bind attempt starts.
    attempt: u64,
    /// Failure of the most recent attempt that failed.
    failure: Option<(u64, BridgeError)>,
}

impl Inner {
    fn fail(&mut self, attempt: u64, state: ConnectionState, error: BridgeError) {
        self.state = state;
        self.wanted = false;
        self.failure = Some((attempt, error));
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while_binding<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.changed
            .wait_while(guard, |inner| inner.state.is_binding())
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle the platform uses to report connection events for one bind attempt.
#[derive(Clone)]
pub struct ConnectionEvents {
    shared: Arc<Shared>,
    attempt: u64,
}

impl ConnectionEvents {
    /// The service connected and `service` is its live handle.
    pub fn connected(&self, service: Arc<dyn RemoteService>) {
        let mut inner = self.shared.lock();
        if inner.attempt != self.attempt || !inner.wanted {
            tracing::debug!("Ignoring connection from stale bind attempt {}", self.attempt);
            return;
        }
        if !matches!(inner.state, ConnectionState::Binding | ConnectionState::Unbound) {
            return;
        }
        tracing::info!("Service connected");
        inner.state = ConnectionState::Bound(service);
        drop(inner);
        self.shared.changed.notify_all();
    }

    /// The service went away. The next call re-binds.
    pub fn disconnected(&self) {
        let mut inner = self.shared.lock();
        if inner.attempt != self.attempt || !inner.state.is_bound() {
            return;
        }
        tracing::info!("Service disconnected");
        inner.state = ConnectionState::Unbound;
        drop(inner);
        self.shared.changed.notify_all();
    }
}

impl fmt::Debug for ConnectionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvents")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Owns the binding to the remote script service.
pub struct ConnectionManager {
    descriptor: ServiceDescriptor,
    permission: String,
    bind_timeout: Option<Duration>,
    gate: Arc<PermissionGate>,
    binder: Arc<dyn ServiceBinder>,
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Resolve the service and create a manager in the matching initial state.
    pub fn new(
        config: &BridgeConfig,
        discovery: &dyn ServiceDiscovery,
        binder: Arc<dyn ServiceBinder>,
        gate: Arc<PermissionGate>,
    ) -> Self {
        tracing::debug!("Resolving service...");
        let service = discovery.resolve(&config.service_action);
        match &service {
            Some(service) => {
                tracing::debug!("Service resolved: {}/{}", service.package, service.component);
                tracing::debug!("Service version: {}", service.version);
            }
            None => tracing::debug!("Service not resolved"),
        }

        let descriptor = ServiceDescriptor {
            action: config.service_action.clone(),
            service,
            min_version: config.min_service_version,
        };
        let state = match descriptor.usable() {
            Ok(_) => ConnectionState::Unbound,
            Err(BridgeError::ServiceUnsupportedVersion { .. }) => ConnectionState::Unsupported,
            Err(_) => ConnectionState::Missing,
        };

        Self {
            descriptor,
            permission: config.permission.clone(),
            bind_timeout: config.bind_timeout,
            gate,
            binder,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state,
                    wanted: false,
                    attempt: 0,
                    failure: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// What discovery found.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Version of the resolved service, if any.
    pub fn version(&self) -> Option<u32> {
        self.descriptor.service.as_ref().map(|s| s.version)
    }

    /// The permission gate used before binding.
    pub fn permission_gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state.clone()
    }

    /// Returns true if a live handle is available.
    pub fn is_bound(&self) -> bool {
        self.shared.lock().state.is_bound()
    }

    /// Bind to the service, blocking until connected or failed.
    ///
    /// Returns immediately if already bound. If another thread is binding,
    /// waits for that attempt and reports its outcome instead of starting a
    /// second bind.
    pub fn bind(&self) -> BridgeResult<()> {
        let service = self.descriptor.usable()?;

        let mut inner = self.shared.lock();
        loop {
            if inner.state.is_binding() {
                tracing::debug!("Bind already in flight, waiting");
                let waited = inner.attempt;
                inner = self.shared.wait_while_binding(inner);
                if let Some((attempt, error)) = &inner.failure {
                    if *attempt == waited && !inner.state.is_bound() {
                        return Err(error.clone());
                    }
                }
                continue;
            }
            match inner.state {
                ConnectionState::Bound(_) => {
                    inner.wanted = true;
                    return Ok(());
                }
                ConnectionState::Unsupported | ConnectionState::Missing => {
                    return Err(self.static_error());
                }
                _ => break,
            }
        }

        inner.state = ConnectionState::Binding;
        inner.wanted = true;
        inner.attempt += 1;
        let attempt = inner.attempt;
        drop(inner);

        tracing::debug!("Checking for permission...");
        if !self.gate.request_permission(&self.permission) {
            tracing::info!("Permission {} denied", self.permission);
            let error = BridgeError::PermissionDenied {
                permission: self.permission.clone(),
            };
            self.resolve_failure(attempt, ConnectionState::PermissionDenied, error.clone());
            return Err(error);
        }
        tracing::debug!("Permission granted");

        if !self.still_binding(attempt) {
            return Err(BridgeError::BindInProgressConflict);
        }

        tracing::debug!("Binding service...");
        let events = ConnectionEvents {
            shared: self.shared.clone(),
            attempt,
        };
        if let Err(e) = self.binder.bind(service, events) {
            tracing::warn!("Binding service failed: {}", e);
            let error = BridgeError::Platform(e);
            self.resolve_failure(attempt, ConnectionState::Unbound, error.clone());
            return Err(error);
        }

        self.await_attempt(attempt)
    }

    /// Release the connection. A no-op when not bound.
    ///
    /// An in-flight bind is interrupted: its callers get
    /// [`BridgeError::BindInProgressConflict`] and the binding thread
    /// releases whatever the platform bound for it.
    pub fn unbind(&self) {
        let mut inner = self.shared.lock();
        inner.wanted = false;
        let release = match inner.state {
            ConnectionState::Bound(_) => true,
            ConnectionState::Binding => {
                let attempt = inner.attempt;
                inner.failure = Some((attempt, BridgeError::BindInProgressConflict));
                inner.state = ConnectionState::Unbound;
                false
            }
            _ => {
                tracing::debug!("Unbind requested while not bound");
                false
            }
        };
        if release {
            inner.state = ConnectionState::Unbound;
        }
        drop(inner);
        self.shared.changed.notify_all();

        if release {
            self.release_binder();
        }
    }

    fn release_binder(&self) {
        if let Err(e) = self.binder.unbind() {
            tracing::warn!("Trying to unbind while not bound: {}", e);
        }
    }

    /// The live handle, waiting out an in-flight bind.
    ///
    /// Calling this without a prior [`bind`](Self::bind) is a caller error
    /// and returns [`BridgeError::NotBound`].
    pub fn connection(&self) -> BridgeResult<Arc<dyn RemoteService>> {
        let mut inner = self.shared.lock();
        if inner.state.is_binding() {
            tracing::debug!("Service binding, wait");
            inner = self.shared.wait_while_binding(inner);
        }
        match &inner.state {
            ConnectionState::Bound(service) => {
                tracing::trace!("Service already bound, return directly");
                Ok(service.clone())
            }
            ConnectionState::PermissionDenied => Err(BridgeError::PermissionDenied {
                permission: self.permission.clone(),
            }),
            ConnectionState::Unsupported | ConnectionState::Missing => Err(self.static_error()),
            ConnectionState::Unbound | ConnectionState::Binding => Err(BridgeError::NotBound),
        }
    }

    /// The live handle, re-binding first if a disconnect dropped it.
    ///
    /// Only re-binds when the client asked to be bound; otherwise behaves
    /// like [`connection`](Self::connection).
    pub fn ensure_connected(&self) -> BridgeResult<Arc<dyn RemoteService>> {
        loop {
            if self.wants_rebind() {
                tracing::debug!("Service was disconnected, binding again");
                self.bind()?;
            }
            match self.connection() {
                // Disconnected between the check and the lookup.
                Err(BridgeError::NotBound) if self.wants_rebind() => continue,
                other => return other,
            }
        }
    }

    fn wants_rebind(&self) -> bool {
        let inner = self.shared.lock();
        inner.wanted && matches!(inner.state, ConnectionState::Unbound)
    }

    fn static_error(&self) -> BridgeError {
        match self.descriptor.usable() {
            Err(e) => e,
            Ok(_) => BridgeError::NotBound,
        }
    }

    fn still_binding(&self, attempt: u64) -> bool {
        let inner = self.shared.lock();
        inner.attempt == attempt && inner.state.is_binding()
    }

    fn resolve_failure(&self, attempt: u64, state: ConnectionState, error: BridgeError) {
        let mut inner = self.shared.lock();
        if inner.attempt == attempt && inner.state.is_binding() {
            inner.fail(attempt, state, error);
        }
        drop(inner);
        self.shared.changed.notify_all();
    }

    fn await_attempt(&self, attempt: u64) -> BridgeResult<()> {
        let pending = move |inner: &mut Inner| inner.attempt == attempt && inner.state.is_binding();

        let guard = self.shared.lock();
        let inner = match self.bind_timeout {
            Some(timeout) => {
                let (mut inner, result) = self
                    .shared
                    .changed
                    .wait_timeout_while(guard, timeout, pending)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && pending(&mut *inner) {
                    tracing::warn!("Service did not connect within {:?}", timeout);
                    let error = BridgeError::Timeout {
                        operation: "bind",
                        waited: timeout,
                    };
                    inner.fail(attempt, ConnectionState::Unbound, error.clone());
                    drop(inner);
                    self.shared.changed.notify_all();
                    if let Err(e) = self.binder.unbind() {
                        tracing::debug!("Releasing timed out bind failed: {}", e);
                    }
                    return Err(error);
                }
                inner
            }
            None => self
                .shared
                .changed
                .wait_while(guard, pending)
                .unwrap_or_else(PoisonError::into_inner),
        };

        if inner.state.is_bound() {
            return Ok(());
        }
        let failure = match &inner.failure {
            Some((failed, error)) if *failed == attempt => Some(error.clone()),
            _ => None,
        };
        let wanted = inner.wanted;
        drop(inner);

        match failure {
            Some(BridgeError::BindInProgressConflict) => {
                // unbind() ran while this attempt was in flight, possibly
                // before the platform bind started; release it here.
                tracing::debug!("Bind attempt {} interrupted by unbind", attempt);
                self.release_binder();
                Err(BridgeError::BindInProgressConflict)
            }
            Some(error) => Err(error),
            None if wanted => {
                // Connected, then lost before this thread woke. The next
                // call re-binds.
                tracing::debug!("Service disconnected right after connecting");
                Ok(())
            }
            None => Err(BridgeError::BindInProgressConflict),
        }
    }
}
