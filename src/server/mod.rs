//! TCP front end: one thread accepting, one thread per admitted client.
//!
//! ```text
//! ConnectionAcceptor --try_register--> ConnectionRegistry
//!        |
//!        v
//! ConnectionWorker (thread per client) --> Upstream + ArrivalParser
//!                                      --> marker / version files
//! ```

pub mod acceptor;
pub mod protocol;
pub mod registry;
pub mod worker;

pub use acceptor::{AcceptorHandle, ConnectionAcceptor};
pub use registry::{ConnectionRegistry, SessionInfo, SessionSlot};
pub use worker::{ClientSession, ConnectionContext, ConnectionWorker};
