//! Sample-routing core for real-time measurement gateways.
//!
//! gridpipe moves time-stamped vectors of typed values between pluggable
//! endpoint [`Node`](node::Node)s over user-defined [`Path`](path::Path)s.
//! The runtime is built from a few tightly scoped pieces:
//!
//! - [`pool`]: a fixed arena of reference-counted samples with a
//!   lock-free free list; allocation never blocks, underrun returns short.
//! - [`queue`]: a single-producer multi-reader ring with per-reader
//!   cursors; the producer never waits on a slow reader.
//! - [`hook`]: priority-ordered transforms running at defined pipeline
//!   phases, with per-hook history windows into the queue.
//! - [`mapping`]: projection of sample, header, timestamp and statistics
//!   fields into remapped samples.
//! - [`path`]: the routing loop itself, one ingest thread per path plus an
//!   optional periodic emit thread, with cooperative shutdown.
//! - [`c37_118`]: a bit-exact IEEE C37.118.2 synchrophasor codec with
//!   CRC-CCITT protection and context-driven variable frame layouts.
//!
//! # Threading model
//!
//! Paths run on parallel OS threads, not cooperative tasks. Blocking I/O is
//! confined to node implementations; queue, pool, hook and codec operations
//! run to completion without yielding. For any single path and destination,
//! output order equals ingest order minus hook-dropped samples.
//!
//! ```rust
//! use gridpipe::prelude::*;
//!
//! let (input, feed) = MemoryNode::with_capacity("src", SignalList::floats(2), 64);
//! let (output, sink) = MemoryNode::with_capacity("dst", SignalList::floats(2), 64);
//!
//! let config = PathConfigBuilder::default()
//!     .vectorize(4)
//!     .queuelen(64)
//!     .samplelen(2)
//!     .build()
//!     .unwrap();
//! let mut path = Path::new("src => dst", Box::new(input), config);
//! path.add_output(Box::new(output));
//! path.prepare().unwrap();
//! path.start().unwrap();
//!
//! feed.inject(Record::floats(0, &[230.0, 50.0])).unwrap();
//! while sink.written_count() == 0 {
//!     std::thread::yield_now();
//! }
//!
//! feed.close();
//! path.stop().unwrap();
//! assert_eq!(sink.drain()[0].sequence, Some(0));
//! ```

pub mod c37_118;
pub mod error;
pub mod hook;
pub mod hooks;
pub mod mapping;
pub mod node;
pub mod nodes;
pub mod path;
pub mod pool;
pub mod queue;
pub mod sample;
pub mod signal;
pub mod stats;
pub mod timing;

pub mod prelude {
    pub use crate::c37_118::parser::{decode_frame, encode_frame, CodecError, Context};
    pub use crate::c37_118::types::{Frame, Message};
    pub use crate::c37_118::StreamCodec;
    pub use crate::error::{Error, Result};
    pub use crate::hook::{Hook, HookContext, HookError, Phase, PhaseMask, Tick};
    pub use crate::hooks::{CastHook, MapHook};
    pub use crate::mapping::{MappingEntry, MappingList};
    pub use crate::node::{Direction, Node, NodeId, TransportError};
    pub use crate::nodes::{MemoryHandle, MemoryNode, Record};
    pub use crate::path::{Path, PathConfig, PathConfigBuilder, PathState};
    pub use crate::pool::Pool;
    pub use crate::queue::{MultiQueue, ReaderId};
    pub use crate::sample::{Sample, SampleRef, Value, ValueFormat};
    pub use crate::signal::{Signal, SignalList, SignalType};
    pub use crate::stats::{Aggregate, Histogram, Metric, SharedStats, Stats};
    pub use crate::timing::{IntervalTimer, Timestamp};
}
