//! The virtual transport layer: TCP, UDP, and local pipes (spec §4.5,
//! §4.6), plus the [`socket::Socket`] wrapper that gives the epoll engine
//! a uniform readiness view over all three (spec §3 `Socket`).

pub mod local;
pub mod route;
pub mod socket;
pub mod tcp;
pub mod udp;

pub use socket::{Socket, SocketId, SocketKind};
