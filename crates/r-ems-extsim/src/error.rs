//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error taxonomy for the external simulation coupling."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use r_ems_msg::{ChannelError, Tick};
use thiserror::Error;

use crate::mapping::{ColumnScheme, MappingError};
use crate::result::ResultKind;

/// Result alias used throughout the coupling crate.
pub type Result<T> = std::result::Result<T, ExtSimError>;

/// Failures raised by the control handshake, the domain connections and the
/// containers.
#[derive(Debug, Error)]
pub enum ExtSimError {
    /// Channel-level failure: disconnect, deadline or foreign response variant.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// A control message is not allowed in the current handshake state.
    #[error("control protocol violation: received {received} while {state}")]
    ProtocolViolation {
        /// Handshake state at the time of the message.
        state: &'static str,
        /// Offending message.
        received: &'static str,
    },
    /// A new control request was issued before the previous one was answered.
    #[error("control request {pending} is still awaiting a response")]
    OutstandingRequest {
        /// Request still awaiting its response.
        pending: &'static str,
    },
    /// A response was awaited with no control request open.
    #[error("no control request is awaiting a response")]
    NoOutstandingRequest,
    /// Activation tick lower than the last activated one.
    #[error("activation tick {requested} precedes last activated tick {last}")]
    TickRegression {
        /// Last activated tick.
        last: Tick,
        /// Tick the host tried to activate.
        requested: Tick,
    },
    /// The external simulation asked for a next tick at or before the current one.
    #[error("requested next tick {next} does not follow activated tick {current}")]
    NextTickNotAhead {
        /// Tick just completed.
        current: Tick,
        /// Next tick the external side returned.
        next: Tick,
    },
    /// The control response does not answer the open request.
    #[error("expected {expected} in response to the open control request, received {actual}")]
    UnexpectedControlResponse {
        /// Response kind the open request calls for.
        expected: &'static str,
        /// Response kind received.
        actual: &'static str,
    },
    /// A domain request ended without its response earlier, so the link can
    /// no longer pair requests with responses.
    #[error("channel '{channel}' abandoned an unanswered request and accepts no further traffic")]
    AbandonedRequest {
        /// Channel name.
        channel: &'static str,
    },
    /// A typed result accessor was used on a result of another kind.
    #[error("cannot read {quantity} from a {actual} result, requires a {expected} result")]
    InvalidResultKind {
        /// Quantity the caller asked for.
        quantity: &'static str,
        /// Kind carrying that quantity.
        expected: ResultKind,
        /// Kind actually stored.
        actual: ResultKind,
    },
    /// No result is stored for the entity.
    #[error("no result available for entity {entity}")]
    MissingResult {
        /// Entity key as rendered by the container.
        entity: String,
    },
    /// Mapping table could not be built or loaded.
    #[error(transparent)]
    Mapping(#[from] MappingError),
    /// External payload could not be converted.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// A simulation callback returned an error.
    #[error("external simulation callback failed: {0}")]
    Callback(#[source] anyhow::Error),
}

impl ExtSimError {
    /// Whether the error is the cooperative shutdown path: a blocking wait
    /// ended because the peer dropped its endpoint.
    pub fn is_interruption(&self) -> bool {
        match self {
            ExtSimError::Channel(err) => err.is_disconnect(),
            ExtSimError::Callback(err) => {
                err.downcast_ref::<ExtSimError>()
                    .is_some_and(ExtSimError::is_interruption)
                    || err
                        .downcast_ref::<ChannelError>()
                        .is_some_and(ChannelError::is_disconnect)
            }
            _ => false,
        }
    }
}

/// Failure adapting an external payload to an internal value. Recoverable:
/// the affected entry is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// A field required by the column scheme is absent.
    #[error("column scheme '{scheme}' requires field '{field}'")]
    MissingField {
        /// Scheme of the entity.
        scheme: ColumnScheme,
        /// Missing field.
        field: &'static str,
    },
    /// A field holds NaN or an infinity.
    #[error("field '{field}' is not a finite number")]
    NotFinite {
        /// Offending field.
        field: &'static str,
    },
    /// The entity has no column scheme in the mapping.
    #[error("no column scheme registered for entity '{entity}'")]
    NoScheme {
        /// External id of the entity.
        entity: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_is_interruption_even_through_callbacks() {
        let disconnect = ChannelError::Disconnected { channel: "ev" };
        assert!(ExtSimError::from(disconnect.clone()).is_interruption());

        let wrapped = ExtSimError::Callback(anyhow::Error::new(ExtSimError::Channel(
            disconnect.clone(),
        )));
        assert!(wrapped.is_interruption());

        let raw = ExtSimError::Callback(anyhow::Error::new(disconnect));
        assert!(raw.is_interruption());
    }

    #[test]
    fn timeouts_and_violations_are_not_interruptions() {
        let timeout = ExtSimError::from(ChannelError::Timeout {
            channel: "control",
            after: std::time::Duration::from_secs(1),
        });
        assert!(!timeout.is_interruption());
        let violation = ExtSimError::ProtocolViolation {
            state: "terminated",
            received: "activate",
        };
        assert!(!violation.is_interruption());
    }
}
