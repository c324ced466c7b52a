//! Remote script service interface.
//!
//! The service exposes four operations. Two of them report their outcome
//! through a one-shot callback that may fire on any thread; the other two are
//! fire-and-forget.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::completion::{self, Completer, Completion};
use crate::error::TransportError;

/// Id the launcher assigned to an imported script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(pub u32);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Launcher action id, as understood by the remote's `run_action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(pub i32);

/// Where the launcher offers a script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFlags {
    /// Listed in the app menu
    #[serde(default)]
    pub app_menu: bool,
    /// Listed in the item menu
    #[serde(default)]
    pub item_menu: bool,
    /// Listed in the custom menu
    #[serde(default)]
    pub custom_menu: bool,
}

/// A script to import into the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Display name, also used to detect conflicts
    pub name: String,
    /// Folder the script is stored under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Script source
    pub code: String,
    /// Menu placement
    #[serde(default)]
    pub flags: ScriptFlags,
}

impl Script {
    /// Create a script with no path and default flags.
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            code: code.into(),
            flags: ScriptFlags::default(),
        }
    }

    /// Set the folder the script is stored under.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set menu placement flags.
    pub fn with_flags(mut self, flags: ScriptFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Failure reasons the remote reports through a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    /// A script with the same name already exists
    AlreadyExists,
    /// The launcher cannot accept scripts right now
    LauncherInvalid,
    /// The request payload was malformed
    InvalidInput,
    /// The script failed to evaluate
    EvalFailed,
}

/// What an import callback delivers.
pub type ImportReply = Result<ScriptId, Failure>;

/// What a run-for-result callback delivers. `Ok(None)` is a valid empty result.
pub type EvalReply = Result<Option<String>, Failure>;

/// One-shot callback for `import_script`.
///
/// Dropping it without calling [`finish`](Self::finish) or
/// [`fail`](Self::fail) releases the waiting caller with a transport failure.
#[derive(Debug)]
pub struct ImportCallback {
    completer: Completer<ImportReply>,
}

impl ImportCallback {
    pub(crate) fn new() -> (Self, Completion<ImportReply>) {
        let (completer, completion) = completion::channel();
        (Self { completer }, completion)
    }

    /// The import succeeded and the script was assigned `id`.
    pub fn finish(self, id: ScriptId) -> bool {
        self.completer.complete(Ok(id))
    }

    /// The import failed.
    pub fn fail(self, failure: Failure) -> bool {
        self.completer.complete(Err(failure))
    }
}

/// One-shot callback for `run_script_for_result`.
#[derive(Debug)]
pub struct ResultCallback {
    completer: Completer<EvalReply>,
}

impl ResultCallback {
    pub(crate) fn new() -> (Self, Completion<EvalReply>) {
        let (completer, completion) = completion::channel();
        (Self { completer }, completion)
    }

    /// The script ran and returned `result` (possibly nothing).
    pub fn result(self, result: Option<String>) -> bool {
        self.completer.complete(Ok(result))
    }

    /// The script could not be run.
    pub fn fail(self, failure: Failure) -> bool {
        self.completer.complete(Err(failure))
    }
}

/// A live handle to the remote script service.
///
/// Submission errors are returned directly; outcomes of `import_script` and
/// `run_script_for_result` arrive later through their callbacks.
pub trait RemoteService: Send + Sync {
    /// Import `script`, overwriting an existing one only if `force_update`.
    fn import_script(
        &self,
        script: &Script,
        force_update: bool,
        callback: ImportCallback,
    ) -> Result<(), TransportError>;

    /// Run an imported script.
    fn run_script(
        &self,
        id: ScriptId,
        data: Option<&str>,
        background: bool,
    ) -> Result<(), TransportError>;

    /// Evaluate `code` and report what it returns.
    fn run_script_for_result(
        &self,
        code: &str,
        callback: ResultCallback,
    ) -> Result<(), TransportError>;

    /// Trigger a launcher action.
    fn run_action(
        &self,
        action: Action,
        data: Option<&str>,
        background: bool,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::completion::WaitError;

    #[test]
    fn test_script_serialization_omits_missing_path() {
        let script = Script::new("hello", "alert('hi')");
        let json = serde_json::to_string(&script).unwrap();

        assert!(!json.contains("path"));
        assert!(json.contains("\"app_menu\":false"));
    }

    #[test]
    fn test_script_id_is_transparent() {
        assert_eq!(serde_json::to_string(&ScriptId(12)).unwrap(), "12");
        assert_eq!(ScriptId(12).to_string(), "12");
    }

    #[test]
    fn test_import_callback_fires_once() {
        let (callback, completion) = ImportCallback::new();
        assert!(callback.finish(ScriptId(3)));
        assert_eq!(completion.wait(), Ok(Ok(ScriptId(3))));
    }

    #[test]
    fn test_dropped_result_callback_abandons() {
        let (callback, completion) = ResultCallback::new();
        drop(callback);
        assert_eq!(completion.wait(), Err(WaitError::Abandoned));
    }
}
