//! User decisions requested while a call is in flight.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Describes a script that collides with one already in the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConflict {
    /// Name of the script being imported
    pub script_name: String,
    /// Folder of the script being imported, if any
    pub path: Option<String>,
}

/// The user's answer to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDecision {
    /// Overwrite the existing script.
    Proceed,
    /// Keep the existing script.
    Decline,
}

impl UserDecision {
    /// Returns true if the user chose to proceed.
    pub fn is_proceed(&self) -> bool {
        matches!(self, UserDecision::Proceed)
    }
}

/// Asks the user what to do when an import conflicts with an existing script.
///
/// # Example
///
/// ```rust,ignore
/// use scriptlink::{ResponseManager, UpdateConflict, UserDecision};
///
/// struct Prompt;
///
/// #[async_trait::async_trait]
/// impl ResponseManager for Prompt {
///     async fn confirm_update(&self, conflict: &UpdateConflict) -> UserDecision {
///         if ask_user(&conflict.script_name).await {
///             UserDecision::Proceed
///         } else {
///             UserDecision::Decline
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ResponseManager: Send + Sync {
    /// Decide whether the existing script should be overwritten.
    async fn confirm_update(&self, conflict: &UpdateConflict) -> UserDecision;
}

/// Blanket implementation for async closures.
///
/// ```rust,ignore
/// client.set_response_manager(Arc::new(|conflict: UpdateConflict| async move {
///     UserDecision::Proceed
/// }));
/// ```
#[async_trait]
impl<F, Fut> ResponseManager for F
where
    F: Fn(UpdateConflict) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = UserDecision> + Send,
{
    async fn confirm_update(&self, conflict: &UpdateConflict) -> UserDecision {
        self(conflict.clone()).await
    }
}

/// Always overwrites.
#[derive(Clone, Debug, Default)]
pub struct AcceptAll;

#[async_trait]
impl ResponseManager for AcceptAll {
    async fn confirm_update(&self, _conflict: &UpdateConflict) -> UserDecision {
        UserDecision::Proceed
    }
}

/// Never overwrites.
///
/// This is the default when no response manager is configured.
#[derive(Clone, Debug, Default)]
pub struct DeclineAll;

#[async_trait]
impl ResponseManager for DeclineAll {
    async fn confirm_update(&self, _conflict: &UpdateConflict) -> UserDecision {
        UserDecision::Decline
    }
}

/// A conflict waiting for the UI to answer.
#[derive(Debug)]
pub struct PendingConfirmation {
    /// The conflict to show
    pub conflict: UpdateConflict,
    responder: oneshot::Sender<UserDecision>,
}

impl PendingConfirmation {
    /// Send the user's answer back to the waiting call.
    pub fn respond(self, decision: UserDecision) {
        if self.responder.send(decision).is_err() {
            tracing::debug!("Confirmation for {} no longer awaited", self.conflict.script_name);
        }
    }
}

/// Forwards conflicts to a UI loop over a channel.
///
/// Each conflict is sent with its own response channel; dropping the
/// [`PendingConfirmation`] without answering counts as a decline.
#[derive(Debug, Clone)]
pub struct ChannelResponseManager {
    sender: mpsc::UnboundedSender<PendingConfirmation>,
}

impl ChannelResponseManager {
    /// Create the manager and the receiver the UI loop reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingConfirmation>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ResponseManager for ChannelResponseManager {
    async fn confirm_update(&self, conflict: &UpdateConflict) -> UserDecision {
        let (responder, receiver) = oneshot::channel();
        let pending = PendingConfirmation {
            conflict: conflict.clone(),
            responder,
        };

        if self.sender.send(pending).is_err() {
            tracing::warn!("No UI is listening for update confirmations");
            return UserDecision::Decline;
        }

        receiver.await.unwrap_or(UserDecision::Decline)
    }
}
