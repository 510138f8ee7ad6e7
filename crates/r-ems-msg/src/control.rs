//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed channel primitives and control protocol messages."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Control handshake messages.
//!
//! Exactly one [`ControlMessage`] is outstanding at any time. `Activate` is
//! answered by exactly one `Completed`, `Terminate` by exactly one
//! `TerminationAck`.

use serde::{Deserialize, Serialize};

use crate::channel::MessageKind;

/// Logical simulation time.
pub type Tick = i64;

/// Tick used for the initialisation activation. Not a real tick.
pub const INIT_TICK: Tick = -1;

/// Host → external simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Run up to and including `tick`.
    Activate {
        /// Tick to run.
        tick: Tick,
    },
    /// Shut down.
    Terminate {
        /// Whether the overall run finished successfully.
        successful: bool,
    },
}

impl MessageKind for ControlMessage {
    fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Activate { .. } => "activate",
            ControlMessage::Terminate { .. } => "terminate",
        }
    }
}

/// External simulation → host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Work for the current activation is done.
    Completed {
        /// Next tick the external simulation wants to be activated at. `None`
        /// when it will not request further activation.
        next_tick: Option<Tick>,
    },
    /// Termination acknowledged.
    TerminationAck,
}

impl MessageKind for ControlResponse {
    fn kind(&self) -> &'static str {
        match self {
            ControlResponse::Completed { .. } => "completed",
            ControlResponse::TerminationAck => "termination_ack",
        }
    }
}

/// Host-side data service a domain connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataServiceKind {
    /// Electric vehicle charging events.
    Ev,
    /// Energy management set points and flexibility.
    EnergyManagement,
    /// Primary (measurement) data.
    PrimaryData,
    /// Result retrieval.
    Results,
    /// Communication messages.
    Communication,
}

impl DataServiceKind {
    /// Name used for channels and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            DataServiceKind::Ev => "ev",
            DataServiceKind::EnergyManagement => "em",
            DataServiceKind::PrimaryData => "primary",
            DataServiceKind::Results => "results",
            DataServiceKind::Communication => "communication",
        }
    }
}

/// Companion signal telling the host scheduler that a data message for
/// `service` is pending. A data message alone does not wake the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDataService {
    /// Service that has a pending message.
    pub service: DataServiceKind,
}

impl MessageKind for ScheduleDataService {
    fn kind(&self) -> &'static str {
        "schedule_data_service"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_use_tagged_json() {
        let json = serde_json::to_string(&ControlMessage::Activate { tick: 900 })
            .expect("serialize activation");
        assert_eq!(json, r#"{"type":"activate","tick":900}"#);

        let response: ControlResponse =
            serde_json::from_str(r#"{"type":"completed","next_tick":null}"#)
                .expect("deserialize completion");
        assert_eq!(response, ControlResponse::Completed { next_tick: None });
        assert_eq!(response.kind(), "completed");
    }
}
