//! Boundary between the dispatch loop and whatever transport delivers frames.
//!
//! A `Channel` owns the port handle. It is driven from exactly one thread;
//! the only thing another thread may do is call [`Closer::close`], which
//! aborts a blocked receive and makes every later receive fail with
//! [`ReceiveError::Closed`]. The handle itself is released when the channel
//! is dropped.

use std::{fmt, sync::Arc};
use thiserror::Error;

use crate::comms::reply::ReplyPayload;
use crate::comms::status::{self, ReceiveClass};

pub trait Channel {
    /// Block until the next frame arrives. The returned bytes start with the
    /// 12-byte message header and stay valid until the next call.
    fn receive(&mut self) -> Result<&[u8], ReceiveError>;

    /// Answer the message identified by `message_id`.
    fn reply(&mut self, message_id: u64, reply: &ReplyPayload) -> Result<(), SendError>;

    /// Handle that lets another thread shut this channel down.
    fn closer(&self) -> Closer;
}

/// Cross-thread shutdown handle; cheap to clone.
#[derive(Clone)]
pub struct Closer(Arc<dyn Fn() + Send + Sync>);

impl Closer {
    pub fn new(close: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(close))
    }

    /// Idempotent.
    pub fn close(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closer")
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot connect to port {port}: {}", status::describe(*.status))]
    Port { port: String, status: u32 },

    #[error("filter communication ports are only available on Windows")]
    Unsupported,

    #[error("cannot set up port resources: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// Nothing arrived within the configured wait.
    #[error("receive timed out")]
    Timeout,

    /// This receive failed; the port is still usable.
    #[error("receive failed: {}", status::describe(*.status))]
    Transient { status: u32 },

    /// The handle was invalidated or access revoked.
    #[error("port lost: {}", status::describe(*.status))]
    Fatal { status: u32 },

    /// Shutdown was requested through the channel's `Closer`.
    #[error("port closed")]
    Closed,
}

impl ReceiveError {
    pub fn from_status(status: u32) -> Self {
        match status::classify_receive_status(status) {
            ReceiveClass::Timeout => ReceiveError::Timeout,
            ReceiveClass::Transient => ReceiveError::Transient { status },
            ReceiveClass::Fatal => ReceiveError::Fatal { status },
        }
    }

    /// Whether the receive loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReceiveError::Fatal { .. } | ReceiveError::Closed)
    }

    pub(crate) fn metric_label(&self) -> &'static str {
        match self {
            ReceiveError::Timeout => "timeout",
            ReceiveError::Transient { .. } => "transient",
            ReceiveError::Fatal { .. } => "fatal",
            ReceiveError::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("reply to message {message_id} failed: {}", status::describe(*.status))]
    Rejected { message_id: u64, status: u32 },

    #[error("reply to message {message_id} dropped: port closed")]
    Closed { message_id: u64 },
}
