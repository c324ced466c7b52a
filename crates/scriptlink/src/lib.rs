//! Scriptlink: blocking client for the launcher script service
//!
//! The launcher's script service is asynchronous end to end: permissions are
//! granted through a UI callback, the connection arrives through a lifecycle
//! callback, and every remote call answers through a one-shot callback on some
//! other thread. Scriptlink turns all of that into plain blocking calls.
//!
//! ```text
//! caller ──▶ ScriptClient ──▶ ConnectionManager ──▶ PermissionGate
//!                 │                   │
//!                 ▼                   ▼
//!            CallBridge ──────▶ RemoteService ──callback──▶ waiting caller
//!                 │
//!                 ▼
//!          ResponseManager (import conflicts)
//! ```

mod bridge;
mod client;
mod completion;
mod config;
mod connection;
mod error;
mod permission;
mod remote;
mod response;


pub use bridge::CallBridge;
pub use client::{ScriptClient, ScriptClientBuilder};
pub use config::{BridgeConfig, DEFAULT_PERMISSION, DEFAULT_SERVICE_ACTION, MIN_SERVICE_VERSION};
pub use connection::{
    ConnectionEvents, ConnectionManager, ConnectionState, ResolvedService, ServiceBinder,
    ServiceDescriptor, ServiceDiscovery,
};
pub use error::{BridgeError, BridgeResult, PlatformError, TransportError};
pub use permission::{CorrelationId, PermissionGate, PermissionPlatform, PermissionResponder};
pub use remote::{
    Action, EvalReply, Failure, ImportCallback, ImportReply, RemoteService, ResultCallback, Script,
    ScriptFlags, ScriptId,
};
pub use response::{
    AcceptAll, ChannelResponseManager, DeclineAll, PendingConfirmation, ResponseManager,
    UpdateConflict, UserDecision,
};
