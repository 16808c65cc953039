//! The application plug-in contract (spec §6.4). The syscall-interception
//! shim and the plug-ins themselves are out of scope; this module only
//! fixes the registration contract a plug-in is loaded through.
//!
//! Where the original contract hands the core a C function table plus raw
//! `(size, pointer)` resident-state pairs so many instances of one plug-in
//! image can be multiplexed onto a single worker, the in-process
//! equivalent is a `Plugin` trait with an associated `Snapshot` type: the
//! core owns a `Snapshot` per instance and swaps it in before each
//! `activate`, instead of copying raw memory.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::error::PluginError;

pub trait Plugin {
    type Snapshot: Send + 'static;

    fn new(argv: &[String]) -> Result<Self, PluginError>
    where
        Self: Sized;

    /// Capture whatever per-instance state would otherwise live in the
    /// image's globals, so the core can multiplex several instances of the
    /// same plug-in across `activate` calls on one worker.
    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: Self::Snapshot);

    /// Run until the plug-in would block on a virtual descriptor.
    fn activate(&mut self) -> Result<(), PluginError>;
}

/// Type-erased handle the core holds per process, since the concrete
/// `Plugin` implementation varies by loaded image and is otherwise not
/// nameable in `Process`.
///
/// Owns the instance's resident `Snapshot` between calls: `activate`
/// restores it first and re-captures it afterward, so the underlying
/// `P` can be multiplexed with other instances of the same image onto
/// one worker without the core ever naming `P` directly.
pub struct PluginInstance {
    id: String,
    activate: Box<dyn FnMut() -> Result<(), PluginError> + Send>,
    snapshot: Box<dyn FnMut() -> Box<dyn Any + Send> + Send>,
    restore: Box<dyn FnMut(Box<dyn Any + Send>) + Send>,
    resident: Option<Box<dyn Any + Send>>,
}

impl PluginInstance {
    pub fn new<P: Plugin + Send + 'static>(id: String, plugin: P) -> Self {
        let shared = Arc::new(Mutex::new(plugin));
        let for_activate = shared.clone();
        let for_snapshot = shared.clone();
        let for_restore = shared;
        Self {
            id,
            activate: Box::new(move || for_activate.lock().unwrap().activate()),
            snapshot: Box::new(move || {
                Box::new(for_snapshot.lock().unwrap().snapshot()) as Box<dyn Any + Send>
            }),
            restore: Box::new(move |snapshot: Box<dyn Any + Send>| {
                if let Ok(snapshot) = snapshot.downcast::<P::Snapshot>() {
                    for_restore.lock().unwrap().restore(*snapshot);
                }
            }),
            resident: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs the plug-in's `activate`. The caller (`Host::run_process`)
    /// counts a failure against the per-run plug-in error threshold (spec
    /// §7) rather than letting it abort the whole run on its own, since a
    /// single misbehaving instance must not take down other hosts.
    ///
    /// Restores the resident snapshot captured by the previous call (if
    /// any) before running, and re-captures a fresh one afterward, so an
    /// instance parked between two `activate` calls never observes state
    /// left over from a different instance sharing the same worker.
    pub fn activate(&mut self) -> Result<(), PluginError> {
        if let Some(resident) = self.resident.take() {
            (self.restore)(resident);
        }
        let result = (self.activate)();
        self.resident = Some((self.snapshot)());
        result
    }
}
