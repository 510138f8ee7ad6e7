//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed channel primitives and control protocol messages."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Messaging primitives shared by the host simulation and external simulators.
//!
//! Every co-simulation connection is built on a [`TypedChannel`]: an unbounded,
//! FIFO-ordered pair of queues with one message type per direction. The
//! [`control`] module defines the lock-step handshake carried on the dedicated
//! control channel.
#![warn(missing_docs)]

pub mod channel;
pub mod control;
pub mod logging;

use std::time::Duration;

/// Shared result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures surfaced by channel endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The opposite side dropped its endpoint. Treated as an orderly shutdown
    /// request rather than a data error.
    #[error("channel '{channel}' disconnected")]
    Disconnected {
        /// Channel name.
        channel: &'static str,
    },
    /// A bounded wait elapsed without a message arriving.
    #[error("channel '{channel}' received no message within {after:?}")]
    Timeout {
        /// Channel name.
        channel: &'static str,
        /// Configured deadline.
        after: Duration,
    },
    /// A message arrived whose variant differs from the one the caller waits for.
    #[error("channel '{channel}' expected {expected} but received {actual}")]
    UnexpectedResponseType {
        /// Channel name.
        channel: &'static str,
        /// Variant the caller waited for.
        expected: &'static str,
        /// Variant actually received.
        actual: &'static str,
    },
}

impl ChannelError {
    /// Whether this error signals that the peer went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ChannelError::Disconnected { .. })
    }

    /// Name of the channel that produced the error.
    pub fn channel(&self) -> &'static str {
        match self {
            ChannelError::Disconnected { channel }
            | ChannelError::Timeout { channel, .. }
            | ChannelError::UnexpectedResponseType { channel, .. } => channel,
        }
    }
}

pub use channel::{
    ExternalEndpoint, HostEndpoint, Inbox, MessageKind, Notifier, OneWay, TypedChannel, Variant,
};
pub use control::{
    ControlMessage, ControlResponse, DataServiceKind, ScheduleDataService, Tick, INIT_TICK,
};
pub use logging::{log_message, ChannelMetrics, Direction};
