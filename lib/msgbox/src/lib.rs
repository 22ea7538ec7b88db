//! Event-driven one-way/request/reply messaging over non-blocking TCP and
//! UDP sockets, dispatched through a single-threaded reactor loop.
//!
//! A `Handler` registers interest with an `Engine` via `listen`/`connect`,
//! then the caller drives `Engine::run_loop` until it's done; the engine
//! delivers `listening`, `connection_ready`, `message`, `request`, `reply`,
//! `connection_closed`, `connection_lost` and `error` events as they occur.

pub mod address;
pub mod connection;
pub mod databuffer;
pub mod engine;
pub mod error;
pub mod handler;
pub mod header;
pub mod logging;
pub mod peer;
pub mod reactor;
pub mod scheduler;
pub mod transport;

pub use address::{Address, Host, Transport};
pub use connection::ConnId;
pub use databuffer::DataBuffer;
pub use engine::{Engine, EngineConfig, EngineHandle};
pub use error::{ErrorKind, NetworkError, NetworkResult};
pub use handler::{ConnInfo, Event, Handler};
