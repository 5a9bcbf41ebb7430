//! counter-reactor: a multi-reactor TCP server around one shared counter.
//!
//! Clients stream framed ADD/SUBTRACT operations and finish with
//! TERMINATE; the server answers with the counter value at that moment.
//!
//! - `protocol`: length-prefixed binary frame codec
//! - `counter`: the lock-free shared counter
//! - `runtime`: acceptor, worker reactors and connection handling
//! - `client`: load-generating client driver
//! - `config`: CLI and TOML configuration

pub mod client;
pub mod config;
pub mod counter;
pub mod protocol;
pub mod report;
pub mod runtime;

pub use config::Config;
pub use counter::SharedCounter;
pub use protocol::Message;
