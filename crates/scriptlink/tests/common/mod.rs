//! Fake asynchronous collaborators shared by the integration tests.
//!
//! Every fake answers from a freshly spawned thread unless told to answer
//! inline, so callers always wait on a result produced elsewhere.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use scriptlink::{
    Action, BridgeConfig, ConnectionEvents, Failure, ImportCallback, PermissionPlatform,
    PermissionResponder, PlatformError, RemoteService, ResolvedService, ResultCallback,
    ScriptClient, Script, ScriptId, ServiceBinder, ServiceDiscovery, TransportError,
};

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("scriptlink=debug")
            .with_test_writer()
            .init();
    });
}

/// Answers permission requests from another thread.
pub struct FakePermissions {
    pub grant: bool,
    pub requests: AtomicUsize,
}

impl FakePermissions {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            grant: true,
            requests: AtomicUsize::new(0),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            grant: false,
            requests: AtomicUsize::new(0),
        })
    }
}

impl PermissionPlatform for FakePermissions {
    fn check_granted(&self, _permission: &str) -> bool {
        false
    }

    fn request(
        &self,
        _permission: &str,
        responder: PermissionResponder,
    ) -> Result<(), PlatformError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let grant = self.grant;
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            responder.respond(grant);
        });
        Ok(())
    }
}

/// Discovery that finds the launcher at a fixed version, or nothing.
pub struct FakeDiscovery(pub Option<u32>);

impl ServiceDiscovery for FakeDiscovery {
    fn resolve(&self, _action: &str) -> Option<ResolvedService> {
        self.0.map(|version| ResolvedService {
            package: "net.pierrox.lightning_launcher_extreme".to_string(),
            component: "net.pierrox.lightning_launcher.script.ScriptService".to_string(),
            version,
        })
    }
}

/// How the fake launcher delivers callbacks.
#[derive(Debug, Clone, Copy)]
pub enum Delivery {
    /// Fire the callback before `submit` returns.
    Inline,
    /// Fire the callback from another thread after a delay.
    Threaded(Duration),
    /// Drop the callback without firing it.
    Drop,
    /// Keep import callbacks alive without ever firing them.
    Never,
}

/// A launcher that imports scripts by name and evaluates `sleep:<ms>:<value>` code.
pub struct FakeLauncher {
    pub delivery: Mutex<Delivery>,
    pub existing: Mutex<HashSet<String>>,
    pub imports: Mutex<Vec<(String, bool)>>,
    pub runs: Mutex<Vec<(ScriptId, Option<String>, bool)>>,
    pub actions: Mutex<Vec<Action>>,
    pub submit_error: Mutex<Option<TransportError>>,
    next_id: AtomicU32,
    held: Mutex<Vec<ImportCallback>>,
}

impl FakeLauncher {
    pub fn new(delivery: Delivery) -> Arc<Self> {
        Arc::new(Self {
            delivery: Mutex::new(delivery),
            existing: Mutex::new(HashSet::new()),
            imports: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            submit_error: Mutex::new(None),
            next_id: AtomicU32::new(1),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn with_existing(self: Arc<Self>, name: &str) -> Arc<Self> {
        self.existing.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn import_requests(&self) -> Vec<(String, bool)> {
        self.imports.lock().unwrap().clone()
    }

    fn deliver(&self, job: impl FnOnce() + Send + 'static) {
        let delivery = *self.delivery.lock().unwrap();
        match delivery {
            Delivery::Inline => job(),
            Delivery::Threaded(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    job();
                });
            }
            Delivery::Drop | Delivery::Never => drop(job),
        }
    }

    fn submit_error(&self) -> Result<(), TransportError> {
        match self.submit_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl RemoteService for FakeLauncher {
    fn import_script(
        &self,
        script: &Script,
        force_update: bool,
        callback: ImportCallback,
    ) -> Result<(), TransportError> {
        self.submit_error()?;
        self.imports
            .lock()
            .unwrap()
            .push((script.name.clone(), force_update));

        if matches!(*self.delivery.lock().unwrap(), Delivery::Never) {
            self.held.lock().unwrap().push(callback);
            return Ok(());
        }

        let reply = if script.code.is_empty() {
            Err(Failure::InvalidInput)
        } else if !force_update && self.existing.lock().unwrap().contains(&script.name) {
            Err(Failure::AlreadyExists)
        } else {
            self.existing.lock().unwrap().insert(script.name.clone());
            Ok(ScriptId(self.next_id.fetch_add(1, Ordering::SeqCst)))
        };

        self.deliver(move || match reply {
            Ok(id) => {
                callback.finish(id);
            }
            Err(failure) => {
                callback.fail(failure);
            }
        });
        Ok(())
    }

    fn run_script(
        &self,
        id: ScriptId,
        data: Option<&str>,
        background: bool,
    ) -> Result<(), TransportError> {
        self.submit_error()?;
        self.runs
            .lock()
            .unwrap()
            .push((id, data.map(str::to_string), background));
        Ok(())
    }

    fn run_script_for_result(
        &self,
        code: &str,
        callback: ResultCallback,
    ) -> Result<(), TransportError> {
        self.submit_error()?;

        // "sleep:<ms>:<value>" answers <value> after <ms>; "fail" cannot be
        // evaluated; "empty" returns nothing; anything else echoes itself.
        let mut delay = None;
        let reply = match code {
            "fail" => Err(Failure::EvalFailed),
            "empty" => Ok(None),
            _ => match code.strip_prefix("sleep:").and_then(|rest| rest.split_once(':')) {
                Some((ms, value)) => {
                    delay = ms.parse().ok().map(Duration::from_millis);
                    Ok(Some(value.to_string()))
                }
                None => Ok(Some(code.to_string())),
            },
        };

        let fire = move || match reply {
            Ok(result) => {
                callback.result(result);
            }
            Err(failure) => {
                callback.fail(failure);
            }
        };
        match delay {
            Some(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    fire();
                });
            }
            None => self.deliver(fire),
        }
        Ok(())
    }

    fn run_action(
        &self,
        action: Action,
        _data: Option<&str>,
        _background: bool,
    ) -> Result<(), TransportError> {
        self.submit_error()?;
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

/// Connects to a [`FakeLauncher`] from another thread.
pub struct FakeBinder {
    pub launcher: Arc<FakeLauncher>,
    pub binds: AtomicUsize,
    pub unbinds: AtomicUsize,
    pub connect_delay: Duration,
    pub events: Mutex<Option<ConnectionEvents>>,
}

impl FakeBinder {
    pub fn new(launcher: Arc<FakeLauncher>) -> Arc<Self> {
        Arc::new(Self {
            launcher,
            binds: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
            connect_delay: Duration::from_millis(30),
            events: Mutex::new(None),
        })
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    /// Simulate the platform killing the service.
    pub fn disconnect(&self) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            events.disconnected();
        }
    }
}

impl ServiceBinder for FakeBinder {
    fn bind(
        &self,
        _service: &ResolvedService,
        events: ConnectionEvents,
    ) -> Result<(), PlatformError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events.clone());

        let launcher: Arc<dyn RemoteService> = self.launcher.clone();
        let delay = self.connect_delay;
        thread::spawn(move || {
            thread::sleep(delay);
            events.connected(launcher);
        });
        Ok(())
    }

    fn unbind(&self) -> Result<(), PlatformError> {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything a test needs to drive a client.
pub struct Harness {
    pub client: Arc<ScriptClient>,
    pub permissions: Arc<FakePermissions>,
    pub binder: Arc<FakeBinder>,
    pub launcher: Arc<FakeLauncher>,
}

pub fn harness(version: Option<u32>, launcher: Arc<FakeLauncher>) -> Harness {
    harness_with(version, launcher, FakePermissions::granting(), BridgeConfig::default())
}

pub fn harness_with(
    version: Option<u32>,
    launcher: Arc<FakeLauncher>,
    permissions: Arc<FakePermissions>,
    config: BridgeConfig,
) -> Harness {
    init_tracing();
    let binder = FakeBinder::new(launcher.clone());
    let client = ScriptClient::builder(
        permissions.clone(),
        Arc::new(FakeDiscovery(version)),
        binder.clone(),
    )
    .config(config)
    .build();

    Harness {
        client: Arc::new(client),
        permissions,
        binder,
        launcher,
    }
}
