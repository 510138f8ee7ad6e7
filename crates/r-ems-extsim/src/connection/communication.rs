//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Communication connection relaying agent messages through an external network simulator."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use r_ems_msg::{HostEndpoint, Tick};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::DataLink;
use crate::error::Result;
use crate::mapping::{log_unmapped, DataKind, EntityMapping};

/// Message between two agents. Keyed by UUID on the host side and by
/// external id towards the network simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommMessage<K = Uuid> {
    /// Sending agent.
    pub sender: K,
    /// Receiving agent.
    pub receiver: K,
    /// Opaque message body.
    pub payload: String,
}

/// Messages the network simulator delivered at `tick`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliverMessages {
    /// Delivery tick.
    pub tick: Tick,
    /// Delivered messages, routed by UUID.
    pub messages: Vec<CommMessage>,
    /// Next tick the simulator delivers at.
    pub next_tick: Option<Tick>,
}

/// Ask for the messages host agents queued up to `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestOutbox {
    /// Tick the outbox is collected for.
    pub tick: Tick,
}

/// Messages host agents want to send through the network.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvideOutbox {
    /// Queued messages, routed by UUID.
    pub messages: Vec<CommMessage>,
}

r_ems_msg::message_variants! {
    /// Network simulator to communication service.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum CommunicationMessage {
        /// Messages the network delivered.
        DeliverMessages(DeliverMessages) => "deliver_messages",
        /// Outbox request.
        RequestOutbox(RequestOutbox) => "request_outbox",
    }
}

r_ems_msg::message_variants! {
    /// Communication service to network simulator.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum CommunicationResponse {
        /// Outbox contents.
        ProvideOutbox(ProvideOutbox) => "provide_outbox",
    }
}

/// Host end of the communication channel.
pub type CommunicationHost = HostEndpoint<CommunicationMessage, CommunicationResponse>;

/// External end of the communication service. Agents are addressed by the
/// external ids of [`DataKind::CommunicationInput`].
pub struct ExtCommunicationConnection {
    link: DataLink<CommunicationMessage, CommunicationResponse>,
    mapping: Arc<EntityMapping>,
}

impl ExtCommunicationConnection {
    pub(crate) fn new(
        link: DataLink<CommunicationMessage, CommunicationResponse>,
        mapping: Arc<EntityMapping>,
    ) -> Self {
        Self { link, mapping }
    }

    fn to_internal(&self, message: CommMessage<String>) -> Option<CommMessage> {
        Some(CommMessage {
            sender: self
                .mapping
                .id_to_uuid(DataKind::CommunicationInput, &message.sender)?,
            receiver: self
                .mapping
                .id_to_uuid(DataKind::CommunicationInput, &message.receiver)?,
            payload: message.payload,
        })
    }

    fn to_external(&self, message: CommMessage) -> Option<CommMessage<String>> {
        Some(CommMessage {
            sender: self
                .mapping
                .uuid_to_id(DataKind::CommunicationInput, message.sender)?
                .to_owned(),
            receiver: self
                .mapping
                .uuid_to_id(DataKind::CommunicationInput, message.receiver)?
                .to_owned(),
            payload: message.payload,
        })
    }

    /// Hand delivered messages to the receiving agents. Messages with an
    /// unmapped sender or receiver are skipped and reported as
    /// `sender->receiver`.
    pub fn deliver_messages(
        &self,
        tick: Tick,
        messages: Vec<CommMessage<String>>,
        next_tick: Option<Tick>,
    ) -> Result<Vec<String>> {
        let mut delivered = Vec::with_capacity(messages.len());
        let mut rejected = Vec::new();
        for message in messages {
            let route = format!("{}->{}", message.sender, message.receiver);
            match self.to_internal(message) {
                Some(message) => delivered.push(message),
                None => rejected.push(route),
            }
        }
        log_unmapped(self.link.name(), DataKind::CommunicationInput, &rejected);
        debug!(channel = self.link.name(), tick, delivered = delivered.len(), "delivering messages");
        self.link.send(DeliverMessages {
            tick,
            messages: delivered,
            next_tick,
        })?;
        Ok(rejected)
    }

    /// Collect the messages host agents queued for sending at `tick`.
    pub fn request_outbox(&self, tick: Tick) -> Result<Vec<CommMessage<String>>> {
        let response: ProvideOutbox = self.link.request(RequestOutbox { tick })?;
        let mut outbox = Vec::with_capacity(response.messages.len());
        let mut rejected = Vec::new();
        for message in response.messages {
            let route = format!("{}->{}", message.sender, message.receiver);
            match self.to_external(message) {
                Some(message) => outbox.push(message),
                None => rejected.push(route),
            }
        }
        log_unmapped(self.link.name(), DataKind::CommunicationInput, &rejected);
        Ok(outbox)
    }
}
