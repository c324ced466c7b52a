//! Blocking wrappers around the remote operations.
//!
//! Each call gets its own callback and completion slot, so concurrent calls on
//! the same connection never share state and may finish in any order.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::completion::{Completion, WaitError};
use crate::connection::ConnectionManager;
use crate::error::{BridgeError, BridgeResult, TransportError};
use crate::remote::{Action, Failure, ImportCallback, ImportReply, ResultCallback, Script, ScriptId};
use crate::response::{ResponseManager, UpdateConflict, UserDecision};

/// Where an import stands between remote round trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportStage {
    /// Submit the import, overwriting only if `force`.
    Submit { force: bool },
    /// The script exists; waiting on the user.
    Confirm,
}

/// Map a callback failure for the script `name` to the error the caller sees.
fn failure_error(name: &str, failure: Failure) -> BridgeError {
    match failure {
        Failure::LauncherInvalid => BridgeError::RemoteLauncherInvalid,
        Failure::InvalidInput => BridgeError::RemoteInvalidInput,
        Failure::EvalFailed => BridgeError::RemoteEvaluationFailed,
        Failure::AlreadyExists => BridgeError::RemoteAlreadyExists {
            name: name.to_string(),
        },
    }
}

/// Issues remote calls and blocks until their callbacks fire.
pub struct CallBridge {
    connection: Arc<ConnectionManager>,
    responses: RwLock<Arc<dyn ResponseManager>>,
    call_timeout: Option<Duration>,
}

impl fmt::Debug for CallBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallBridge")
            .field("connection", &self.connection)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl CallBridge {
    /// Create a bridge over `connection`.
    ///
    /// `call_timeout` bounds each wait for a remote callback; `None` waits
    /// until the callback fires or is dropped.
    pub fn new(
        connection: Arc<ConnectionManager>,
        responses: Arc<dyn ResponseManager>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connection,
            responses: RwLock::new(responses),
            call_timeout,
        }
    }

    /// Replace the manager asked about import conflicts.
    pub fn set_response_manager(&self, responses: Arc<dyn ResponseManager>) {
        *self
            .responses
            .write()
            .unwrap_or_else(PoisonError::into_inner) = responses;
    }

    fn response_manager(&self) -> Arc<dyn ResponseManager> {
        self.responses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Import `script` and return the id the launcher assigned.
    ///
    /// If a script with the same name exists, the response manager decides
    /// whether to overwrite it. Overwriting submits a second, forced import;
    /// declining returns [`BridgeError::ImportRejectedByUser`] without
    /// contacting the remote again. The user is asked once per call: if the
    /// forced import still reports the script as existing, the call fails
    /// with [`BridgeError::RemoteAlreadyExists`].
    pub fn import_script(&self, script: &Script) -> BridgeResult<ScriptId> {
        let mut stage = ImportStage::Submit { force: false };
        loop {
            stage = match stage {
                ImportStage::Submit { force } => match self.submit_import(script, force)? {
                    Ok(id) => return Ok(id),
                    Err(Failure::AlreadyExists) if !force => ImportStage::Confirm,
                    Err(failure) => {
                        tracing::warn!("Import of {} failed: {:?}", script.name, failure);
                        return Err(failure_error(&script.name, failure));
                    }
                },
                ImportStage::Confirm => match self.confirm_update(script) {
                    UserDecision::Proceed => {
                        tracing::info!("User granted update of {}", script.name);
                        ImportStage::Submit { force: true }
                    }
                    UserDecision::Decline => {
                        tracing::info!("User denied update of {}", script.name);
                        return Err(BridgeError::ImportRejectedByUser);
                    }
                },
            };
        }
    }

    /// Run an imported script. The remote does not report completion.
    pub fn run_script(
        &self,
        id: ScriptId,
        data: Option<&str>,
        background: bool,
    ) -> BridgeResult<()> {
        let service = self.connection.ensure_connected()?;
        tracing::debug!("Running script {}", id);
        service
            .run_script(id, data, background)
            .inspect_err(|e| tracing::warn!("Running script {} failed: {}", id, e))?;
        Ok(())
    }

    /// Evaluate `code` and return its result.
    ///
    /// `Ok(None)` means the script ran and returned nothing.
    pub fn run_script_for_result(&self, code: &str) -> BridgeResult<Option<String>> {
        let service = self.connection.ensure_connected()?;
        let (callback, completion) = ResultCallback::new();
        service
            .run_script_for_result(code, callback)
            .inspect_err(|e| tracing::warn!("Run for result failed: {}", e))?;

        match self.wait("run_script_for_result", completion)? {
            Ok(result) => {
                tracing::debug!("Result received");
                Ok(result)
            }
            Err(Failure::EvalFailed) => {
                tracing::warn!("Script could not be evaluated");
                Err(BridgeError::RemoteEvaluationFailed)
            }
            Err(failure) => Err(failure_error("<eval>", failure)),
        }
    }

    /// Trigger a launcher action. The remote does not report completion.
    pub fn run_action(
        &self,
        action: Action,
        data: Option<&str>,
        background: bool,
    ) -> BridgeResult<()> {
        let service = self.connection.ensure_connected()?;
        tracing::debug!("Running action {}", action.0);
        service
            .run_action(action, data, background)
            .inspect_err(|e| tracing::warn!("Running action {} failed: {}", action.0, e))?;
        Ok(())
    }

    fn submit_import(&self, script: &Script, force: bool) -> BridgeResult<ImportReply> {
        let service = self.connection.ensure_connected()?;
        let (callback, completion) = ImportCallback::new();

        tracing::debug!("Importing {} into launcher (force: {})", script.name, force);
        service
            .import_script(script, force, callback)
            .inspect_err(|e| tracing::warn!("Import of {} failed: {}", script.name, e))?;

        let reply = self.wait("import_script", completion)?;
        tracing::debug!("Import finished");
        Ok(reply)
    }

    fn confirm_update(&self, script: &Script) -> UserDecision {
        let conflict = UpdateConflict {
            script_name: script.name.clone(),
            path: script.path.clone(),
        };
        let responses = self.response_manager();
        // The decision may come from any thread; block here like the remote calls do.
        futures::executor::block_on(responses.confirm_update(&conflict))
    }

    fn wait<T>(&self, operation: &'static str, completion: Completion<T>) -> BridgeResult<T> {
        match completion.wait_for(self.call_timeout) {
            Ok(value) => Ok(value),
            Err(WaitError::Abandoned) => {
                tracing::warn!("{} callback dropped without a result", operation);
                Err(TransportError::CallbackDropped.into())
            }
            Err(WaitError::TimedOut) => Err(BridgeError::Timeout {
                operation,
                waited: self.call_timeout.unwrap_or_default(),
            }),
        }
    }
}
