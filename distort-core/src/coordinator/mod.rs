//! Coordinator
//!
//! Accepts client and worker connections, keeps the worker registry and
//! routes `Distort` requests to the primary worker of each class.

pub mod acceptor;
pub mod dispatch;
pub mod registry;
pub mod server;
pub mod session;

pub use acceptor::{Acceptor, ListenerClass};
pub use dispatch::DispatchEngine;
pub use registry::{ConnectionId, WorkerInfo, WorkerRegistry};
pub use server::{Coordinator, CoordinatorConfig, CoordinatorState};
pub use session::{serve_connection, ConnectionMeta, SessionEnd};
