//! Client facade tying the connection and the call bridge together.

use std::fmt;
use std::sync::Arc;

use crate::bridge::CallBridge;
use crate::config::BridgeConfig;
use crate::connection::{
    ConnectionManager, ConnectionState, ServiceBinder, ServiceDescriptor, ServiceDiscovery,
};
use crate::error::BridgeResult;
use crate::permission::{PermissionGate, PermissionPlatform};
use crate::remote::{Action, Script, ScriptId};
use crate::response::{DeclineAll, ResponseManager};

/// Builder for creating a [`ScriptClient`].
///
/// # Example
///
/// ```rust,ignore
/// use scriptlink::{BridgeConfig, ScriptClient, Script};
///
/// let client = ScriptClient::builder(permissions, discovery, binder)
///     .config(BridgeConfig::default())
///     .response_manager(Arc::new(prompt))
///     .build();
///
/// client.bind()?;
/// let id = client.import_script(&Script::new("hello", "alert('hi')"))?;
/// client.run_script(id, None, false)?;
/// ```
pub struct ScriptClientBuilder {
    config: BridgeConfig,
    permissions: Arc<dyn PermissionPlatform>,
    discovery: Arc<dyn ServiceDiscovery>,
    binder: Arc<dyn ServiceBinder>,
    responses: Option<Arc<dyn ResponseManager>>,
}

impl fmt::Debug for ScriptClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScriptClientBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the manager asked about import conflicts.
    ///
    /// Without one, conflicting imports are declined.
    pub fn response_manager(mut self, responses: Arc<dyn ResponseManager>) -> Self {
        self.responses = Some(responses);
        self
    }

    /// Resolve the service and build the client.
    pub fn build(self) -> ScriptClient {
        let gate = Arc::new(PermissionGate::new(
            self.permissions,
            self.config.permission_timeout,
        ));
        let connection = Arc::new(ConnectionManager::new(
            &self.config,
            self.discovery.as_ref(),
            self.binder,
            gate,
        ));
        let responses = self.responses.unwrap_or_else(|| Arc::new(DeclineAll));
        let bridge = CallBridge::new(connection.clone(), responses, self.config.call_timeout);

        ScriptClient {
            config: self.config,
            connection,
            bridge,
        }
    }
}

/// Blocking client for the launcher's script service.
///
/// Call [`bind`](Self::bind) once before anything else. Every other call
/// blocks the calling thread until the remote answers; do not call from a
/// thread the platform uses to deliver callbacks.
pub struct ScriptClient {
    config: BridgeConfig,
    connection: Arc<ConnectionManager>,
    bridge: CallBridge,
}

impl fmt::Debug for ScriptClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptClient")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl ScriptClient {
    /// Start building a client from its platform collaborators.
    pub fn builder(
        permissions: Arc<dyn PermissionPlatform>,
        discovery: Arc<dyn ServiceDiscovery>,
        binder: Arc<dyn ServiceBinder>,
    ) -> ScriptClientBuilder {
        ScriptClientBuilder {
            config: BridgeConfig::default(),
            permissions,
            discovery,
            binder,
            responses: None,
        }
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Bind to the service. See [`ConnectionManager::bind`].
    pub fn bind(&self) -> BridgeResult<()> {
        self.connection.bind()
    }

    /// Release the service. Safe to call when not bound.
    pub fn unbind(&self) {
        self.connection.unbind()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Returns true if connected.
    pub fn is_bound(&self) -> bool {
        self.connection.is_bound()
    }

    /// What service discovery found.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.connection.descriptor()
    }

    /// Version of the installed service, if any.
    pub fn service_version(&self) -> Option<u32> {
        self.connection.version()
    }

    /// The permission gate, for platforms that answer by correlation id.
    pub fn permission_gate(&self) -> &Arc<PermissionGate> {
        self.connection.permission_gate()
    }

    /// Replace the manager asked about import conflicts.
    pub fn set_response_manager(&self, responses: Arc<dyn ResponseManager>) {
        self.bridge.set_response_manager(responses)
    }

    /// Import a script. See [`CallBridge::import_script`].
    pub fn import_script(&self, script: &Script) -> BridgeResult<ScriptId> {
        self.bridge.import_script(script)
    }

    /// Run an imported script.
    pub fn run_script(
        &self,
        id: ScriptId,
        data: Option<&str>,
        background: bool,
    ) -> BridgeResult<()> {
        self.bridge.run_script(id, data, background)
    }

    /// Evaluate code and return its result.
    pub fn run_script_for_result(&self, code: &str) -> BridgeResult<Option<String>> {
        self.bridge.run_script_for_result(code)
    }

    /// Trigger a launcher action.
    pub fn run_action(
        &self,
        action: Action,
        data: Option<&str>,
        background: bool,
    ) -> BridgeResult<()> {
        self.bridge.run_action(action, data, background)
    }
}
