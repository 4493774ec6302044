//! minio-mcp-events: live event delivery to subscribed clients
//!
//! Producers publish [`Event`]s through the [`ConnectionRegistry`], which
//! keeps one FIFO queue per attached connection. An [`EventStream`] turns a
//! queue into server-sent event frames, inserting heartbeats while idle and
//! detaching the connection when it ends.

pub mod event;
pub mod registry;
pub mod stream;

pub use event::{Event, EventKind, FrameError, ParsedFrame, UnknownEventKind, parse_frame};
pub use registry::{Connection, ConnectionRegistry, ConnectionStats, RegistryStats};
pub use stream::{EventStream, HEARTBEAT_INTERVAL};
