//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Energy management set point and flexibility connection."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use r_ems_msg::{HostEndpoint, Tick};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::DataLink;
use crate::container::{EmSetPoint, ExtInputContainer, FlexOptions, FlexRequest};
use crate::error::Result;
use crate::mapping::{log_unmapped, DataKind, EntityMapping};
use crate::result::ExtResultContainer;

/// Set points for energy management agents at one tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideSetPoints {
    /// Tick the set points apply from.
    pub tick: Tick,
    /// Set points keyed by agent UUID.
    pub set_points: BTreeMap<Uuid, EmSetPoint>,
    /// Next tick set points will be provided for.
    pub next_tick: Option<Tick>,
}

/// Everything energy-management related drained from one input container.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideEmInput {
    /// Tick of the container.
    pub tick: Tick,
    /// Set points keyed by agent UUID.
    pub set_points: BTreeMap<Uuid, EmSetPoint>,
    /// Flex requests keyed by receiving agent.
    pub flex_requests: BTreeMap<Uuid, FlexRequest>,
    /// Flex options keyed by receiving agent.
    pub flex_options: BTreeMap<Uuid, Vec<FlexOptions>>,
    /// Next tick of the container.
    pub next_tick: Option<Tick>,
}

/// Ask agents for their flexibility at `tick`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestFlexOptions {
    /// Tick the options are wanted for.
    pub tick: Tick,
    /// Agents by UUID.
    pub receivers: Vec<Uuid>,
}

/// Answer to [`RequestFlexOptions`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideFlexOptions {
    /// Options keyed by agent UUID.
    pub options: BTreeMap<Uuid, Vec<FlexOptions>>,
}

/// Ask for flex results of `ids` at `tick`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestFlexResults {
    /// Tick the results are wanted for.
    pub tick: Tick,
    /// Agents by UUID.
    pub ids: Vec<Uuid>,
}

/// Answer to [`RequestFlexResults`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlexResultResponse {
    /// Results keyed by UUID.
    pub results: ExtResultContainer,
}

r_ems_msg::message_variants! {
    /// External simulation to energy management service.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum EmMessage {
        /// Set points only.
        ProvideSetPoints(ProvideSetPoints) => "provide_set_points",
        /// Full energy management input.
        ProvideEmInput(ProvideEmInput) => "provide_em_input",
        /// Flex options request.
        RequestFlexOptions(RequestFlexOptions) => "request_flex_options",
        /// Flex results request.
        RequestFlexResults(RequestFlexResults) => "request_flex_results",
    }
}

r_ems_msg::message_variants! {
    /// Energy management service to external simulation.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum EmResponse {
        /// Requested flex options.
        ProvideFlexOptions(ProvideFlexOptions) => "provide_flex_options",
        /// Requested flex results.
        FlexResultResponse(FlexResultResponse) => "flex_result_response",
    }
}

/// Host end of the energy management channel.
pub type EmHost = HostEndpoint<EmMessage, EmResponse>;

/// External end of the energy management service. Agents are addressed by
/// the external ids of [`DataKind::EmInput`].
pub struct ExtEmConnection {
    link: DataLink<EmMessage, EmResponse>,
    mapping: Arc<EntityMapping>,
}

impl ExtEmConnection {
    pub(crate) fn new(link: DataLink<EmMessage, EmResponse>, mapping: Arc<EntityMapping>) -> Self {
        Self { link, mapping }
    }

    /// Send set points keyed by external agent id. Returns the ids that are
    /// not mapped.
    pub fn provide_set_points(
        &self,
        tick: Tick,
        set_points: BTreeMap<String, EmSetPoint>,
        next_tick: Option<Tick>,
    ) -> Result<Vec<String>> {
        let translation = self.mapping.to_internal(DataKind::EmInput, set_points);
        log_unmapped(self.link.name(), DataKind::EmInput, &translation.rejected);
        self.link.send(ProvideSetPoints {
            tick,
            set_points: translation.mapped,
            next_tick,
        })?;
        Ok(translation.rejected)
    }

    /// Drain the energy management parts of `container` and send them. The
    /// primary data part is left in place.
    pub fn provide_input(&self, container: &mut ExtInputContainer) -> Result<()> {
        let message = ProvideEmInput {
            tick: container.tick(),
            set_points: container.extract_set_points(),
            flex_requests: container.extract_flex_requests(),
            flex_options: container.extract_flex_options(),
            next_tick: container.next_tick(),
        };
        debug!(
            channel = self.link.name(),
            tick = message.tick,
            set_points = message.set_points.len(),
            flex_requests = message.flex_requests.len(),
            "providing energy management input"
        );
        self.link.send(message)
    }

    /// Ask the given agents for their flex options. Unknown agents are
    /// skipped before the request is sent.
    pub fn request_flex_options(
        &self,
        tick: Tick,
        ids: &[String],
    ) -> Result<BTreeMap<String, Vec<FlexOptions>>> {
        let (receivers, rejected) = self.mapping.resolve_ids(&[DataKind::EmInput], ids);
        log_unmapped(self.link.name(), DataKind::EmInput, &rejected);
        let response: ProvideFlexOptions =
            self.link.request(RequestFlexOptions { tick, receivers })?;
        let translation = self.mapping.to_external(DataKind::EmInput, response.options);
        translation.log_rejected(self.link.name());
        Ok(translation.mapped)
    }

    /// Request flex results, resolving ids as agents first and then as flex
    /// result entities.
    pub fn request_flex_results(
        &self,
        tick: Tick,
        ids: &[String],
    ) -> Result<ExtResultContainer<String>> {
        let kinds = [DataKind::EmInput, DataKind::ResultFlex];
        let (ids, rejected) = self.mapping.resolve_ids(&kinds, ids);
        log_unmapped(self.link.name(), DataKind::EmInput, &rejected);
        let response: FlexResultResponse = self.link.request(RequestFlexResults { tick, ids })?;
        let (results, rejected) = response.results.into_external(&self.mapping, &kinds);
        log_unmapped(self.link.name(), DataKind::ResultFlex, &rejected);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{PowerValue, PrimaryValue};
    use crate::mapping::MappingEntry;
    use r_ems_msg::{DataServiceKind, OneWay, ScheduleDataService, TypedChannel};

    #[test]
    fn provide_input_drains_only_em_collections() {
        let agent = Uuid::new_v4();
        let (external, host) = TypedChannel::<EmMessage, EmResponse>::new("em").split();
        let (signal, inbox) = OneWay::<ScheduleDataService>::new("data_services").split();
        let connection = ExtEmConnection::new(
            DataLink::new(external, signal, DataServiceKind::EnergyManagement, None),
            Arc::new(
                EntityMapping::new([MappingEntry::new(agent, "hems-1", DataKind::EmInput)])
                    .expect("mapping"),
            ),
        );

        let mut container = ExtInputContainer::new(900, Some(1800));
        container.add_set_point(agent, EmSetPoint::new(PowerValue::active(4.0)));
        container.add_primary_value(agent, PrimaryValue::ActivePower { p_kw: 1.0 });
        connection.provide_input(&mut container).expect("provide");

        assert!(!container.is_empty());
        assert_eq!(container.extract_primary_data().len(), 1);
        match host.receive_from_external().expect("message") {
            EmMessage::ProvideEmInput(input) => {
                assert_eq!(input.tick, 900);
                assert_eq!(input.next_tick, Some(1800));
                assert_eq!(input.set_points.len(), 1);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(inbox.drain().len(), 1);
    }
}
