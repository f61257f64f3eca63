//! Node implementations shipped with the core.
//!
//! Real transports (sockets, brokers, shared memory couplings) live in
//! downstream crates; the core only ships the in-memory node used for
//! loopback paths and tests.

mod memory;

pub use memory::{MemoryHandle, MemoryNode, Record};
