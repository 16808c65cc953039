//! The error taxonomy described in spec §7.
//!
//! Configuration and setup errors abort before any host boots. Simulation
//! errors are bugs in the core and abort the run. Socket errors are the
//! errno-shaped failures a hosted application is allowed to observe.
//! Plug-in errors are counted and only abort the run once a threshold is
//! crossed (see [`crate::master::Master`]).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {element}: {message}")]
    Malformed {
        path: PathBuf,
        element: String,
        message: String,
    },
    #[error("{path}: missing required attribute `{attribute}` on <{element}>")]
    MissingAttribute {
        path: PathBuf,
        element: String,
        attribute: String,
    },
    #[error("{0}: unreadable")]
    Unreadable(PathBuf),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("unable to reserve TLS storage for {0} hosts: {1}")]
    ThreadLocalStorage(usize, String),
    #[error("unable to load plugin image `{id}` from {path}: {message}")]
    PluginLoad {
        id: String,
        path: PathBuf,
        message: String,
    },
}

/// Indicates a bug in the core itself: these are not supposed to be
/// reachable by any hosted application behavior.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("event targets unknown host {0}")]
    UnknownHost(u32),
    #[error("event time {time} is before current time {now} on host {host}")]
    TimeTravel { host: u32, now: u64, time: u64 },
    #[error("event time {time} exceeds scheduler barrier {barrier} on host {host}")]
    RunaheadViolation { host: u32, time: u64, barrier: u64 },
    #[error("corrupt packet header: {0}")]
    CorruptPacket(String),
    #[error("worker popped an event for a host it does not own (host {0})")]
    MisroutedEvent(u32),
    #[error("simulation aborted: {0}")]
    Aborted(String),
}

/// The errno-shaped failures visible to hosted applications, mirroring the
/// subset of `errno.h` the syscall-interception shim needs to translate
/// back to the calling process.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    #[error("EADDRINUSE")]
    AddrInUse,
    #[error("ECONNREFUSED")]
    ConnRefused,
    #[error("ECONNRESET")]
    ConnReset,
    #[error("EAGAIN")]
    Again,
    #[error("EINPROGRESS")]
    InProgress,
    #[error("ENOTCONN")]
    NotConnected,
    #[error("EPIPE")]
    BrokenPipe,
    #[error("ETIMEDOUT")]
    TimedOut,
    #[error("EEXIST")]
    Exists,
    #[error("ENOENT")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin `{id}` instance failed: {message}")]
    InstanceFailed { id: String, message: String },
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
