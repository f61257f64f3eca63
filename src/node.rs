//! The polymorphic endpoint interface paths read from and write to.
//!
//! A node is anything that exchanges sample vectors: a simulator coupling, a
//! measurement device, a broker connection. The routing core only sees this
//! trait; transports own their connection lifecycle, retries and worker
//! threads behind it. Blocking is allowed inside `read` and `write` only.

use enum_as_inner::EnumAsInner;

use crate::sample::SampleRef;
use crate::signal::SignalList;

/// Identifies a node instance; samples carry it as a weak back-reference to
/// their producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// File descriptor handed out by `poll_fds` for readiness integration.
pub type PollFd = std::os::raw::c_int;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumAsInner)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, thiserror::Error, EnumAsInner)]
pub enum TransportError {
    /// The peer or backing channel is gone; the path thread winds down.
    #[error("transport closed")]
    Closed,
    /// The node does not implement this capability.
    #[error("operation {0:?} not supported by this node")]
    Unsupported(&'static str),
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Other(String),
}

/// A sample endpoint.
///
/// `read` blocks until at least one sample is available and fills the
/// provided pool-allocated buffers, returning how many it filled. `write`
/// returns how many samples the transport accepted; a short write is
/// reported, not retried, by the core.
#[allow(unused_variables)]
pub trait Node: Send {
    fn name(&self) -> &str;

    fn id(&self) -> NodeId;

    /// Signal descriptors for one direction. Frozen once a path using this
    /// node is prepared.
    fn signals(&self, direction: Direction) -> &SignalList;

    fn start(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn read(&mut self, samples: &mut [SampleRef]) -> Result<usize, TransportError>;

    fn write(&mut self, samples: &[SampleRef]) -> Result<usize, TransportError>;

    /// File descriptors a reactor could poll for readiness; none by default.
    fn poll_fds(&mut self, fds: &mut Vec<PollFd>) -> usize {
        0
    }

    /// Swap the logical input/output roles without reconfiguration.
    fn reverse(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("reverse"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null {
        signals: SignalList,
    }

    impl Node for Null {
        fn name(&self) -> &str {
            "null"
        }

        fn id(&self) -> NodeId {
            NodeId(0)
        }

        fn signals(&self, _direction: Direction) -> &SignalList {
            &self.signals
        }

        fn read(&mut self, _samples: &mut [SampleRef]) -> Result<usize, TransportError> {
            Err(TransportError::Closed)
        }

        fn write(&mut self, samples: &[SampleRef]) -> Result<usize, TransportError> {
            Ok(samples.len())
        }
    }

    #[test]
    fn test_default_capabilities() {
        let mut node = Null {
            signals: SignalList::floats(1),
        };
        assert!(node.start().is_ok());
        assert!(node.stop().is_ok());
        assert_eq!(node.poll_fds(&mut Vec::new()), 0);
        assert!(node
            .reverse()
            .unwrap_err()
            .is_unsupported());
    }
}
