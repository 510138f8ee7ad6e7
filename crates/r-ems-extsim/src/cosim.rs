//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Wiring of control and domain channels for one external simulation."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use r_ems_common::ChannelConfig;
use r_ems_msg::{
    ChannelMetrics, ControlMessage, ControlResponse, DataServiceKind, Notifier, OneWay,
    ScheduleDataService, TypedChannel,
};
use tracing::info;

use crate::connection::{
    communication::{CommunicationMessage, CommunicationResponse},
    em::{EmMessage, EmResponse},
    ev::{EvMessage, EvResponse},
    primary::PrimaryDataMessage,
    results::{ResultsMessage, ResultsResponse},
    CommunicationHost, DataLink, EmHost, EvHost, ExtCommunicationConnection, ExtEmConnection,
    ExtEvConnection, ExtPrimaryDataConnection, ExtResultDataConnection, PrimaryDataHost,
    ResultsHost, SignalLink,
};
use crate::control::{ControlEndpoint, ControlHandle};
use crate::mapping::EntityMapping;

const CONTROL_CHANNEL: &str = "control";
const SIGNAL_CHANNEL: &str = "data_services";

/// Host ends of every wired channel.
///
/// Domain ends are `None` for services the builder did not enable.
pub struct HostSide {
    /// Handshake driver, also collecting `ScheduleDataService` signals.
    pub control: ControlHandle,
    /// EV charging service.
    pub ev: Option<EvHost>,
    /// Energy management service.
    pub em: Option<EmHost>,
    /// Primary data service.
    pub primary: Option<PrimaryDataHost>,
    /// Results service.
    pub results: Option<ResultsHost>,
    /// Communication service.
    pub communication: Option<CommunicationHost>,
}

/// External ends: the control endpoint for the loop and the domain
/// connections for the simulation callbacks.
pub struct ExternalSide {
    /// Endpoint for [`crate::ExternalSimulationLoop`].
    pub control: ControlEndpoint,
    /// EV charging service.
    pub ev: Option<ExtEvConnection>,
    /// Energy management service.
    pub em: Option<ExtEmConnection>,
    /// Primary data service.
    pub primary: Option<ExtPrimaryDataConnection>,
    /// Results service.
    pub results: Option<ExtResultDataConnection>,
    /// Communication service.
    pub communication: Option<ExtCommunicationConnection>,
}

/// Entry point for wiring a co-simulation.
pub struct CoSimulation;

impl CoSimulation {
    /// Start wiring with the given deadlines and id mapping. Only the control
    /// channel is created unless services are enabled.
    pub fn builder(channels: &ChannelConfig, mapping: Arc<EntityMapping>) -> CoSimulationBuilder {
        CoSimulationBuilder {
            channels: channels.clone(),
            mapping,
            metrics: None,
            services: Vec::new(),
        }
    }
}

/// Collects the services to wire; see [`CoSimulation::builder`].
pub struct CoSimulationBuilder {
    channels: ChannelConfig,
    mapping: Arc<EntityMapping>,
    metrics: Option<ChannelMetrics>,
    services: Vec<DataServiceKind>,
}

impl CoSimulationBuilder {
    fn with(mut self, service: DataServiceKind) -> Self {
        if !self.services.contains(&service) {
            self.services.push(service);
        }
        self
    }

    /// Enable the EV charging service.
    pub fn with_ev(self) -> Self {
        self.with(DataServiceKind::Ev)
    }

    /// Enable the energy management service.
    pub fn with_em(self) -> Self {
        self.with(DataServiceKind::EnergyManagement)
    }

    /// Enable the primary data service.
    pub fn with_primary(self) -> Self {
        self.with(DataServiceKind::PrimaryData)
    }

    /// Enable the results service.
    pub fn with_results(self) -> Self {
        self.with(DataServiceKind::Results)
    }

    /// Enable the communication service.
    pub fn with_communication(self) -> Self {
        self.with(DataServiceKind::Communication)
    }

    /// Record traffic on every channel in `metrics`.
    pub fn with_metrics(mut self, metrics: ChannelMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn typed<Tx, Rx>(&self, name: &'static str) -> TypedChannel<Tx, Rx>
    where
        Tx: r_ems_msg::MessageKind,
        Rx: r_ems_msg::MessageKind,
    {
        let channel = TypedChannel::new(name);
        match &self.metrics {
            Some(metrics) => channel.with_metrics(metrics.clone()),
            None => channel,
        }
    }

    fn one_way<T: r_ems_msg::MessageKind>(&self, name: &'static str) -> OneWay<T> {
        let channel = OneWay::new(name);
        match &self.metrics {
            Some(metrics) => channel.with_metrics(metrics.clone()),
            None => channel,
        }
    }

    fn link<Tx, Rx>(
        &self,
        service: DataServiceKind,
        signal: &Notifier<ScheduleDataService>,
    ) -> (DataLink<Tx, Rx>, r_ems_msg::HostEndpoint<Tx, Rx>)
    where
        Tx: r_ems_msg::MessageKind,
        Rx: r_ems_msg::MessageKind,
    {
        let (external, host) = self.typed::<Tx, Rx>(service.as_str()).split();
        let link = DataLink::new(
            external,
            signal.clone(),
            service,
            self.channels.response_timeout,
        );
        (link, host)
    }

    /// Create the channels and split them into host and external halves.
    pub fn build(self) -> (HostSide, ExternalSide) {
        let (control_external, control_host) = self
            .typed::<ControlResponse, ControlMessage>(CONTROL_CHANNEL)
            .split();
        let (signal, signals) = self.one_way::<ScheduleDataService>(SIGNAL_CHANNEL).split();

        let mut host = HostSide {
            control: ControlHandle::new(control_host, signals, self.channels.completion_timeout),
            ev: None,
            em: None,
            primary: None,
            results: None,
            communication: None,
        };
        let mut external = ExternalSide {
            control: control_external,
            ev: None,
            em: None,
            primary: None,
            results: None,
            communication: None,
        };

        for service in &self.services {
            let mapping = Arc::clone(&self.mapping);
            match service {
                DataServiceKind::Ev => {
                    let (link, endpoint) = self.link::<EvMessage, EvResponse>(*service, &signal);
                    external.ev = Some(ExtEvConnection::new(link, mapping));
                    host.ev = Some(endpoint);
                }
                DataServiceKind::EnergyManagement => {
                    let (link, endpoint) = self.link::<EmMessage, EmResponse>(*service, &signal);
                    external.em = Some(ExtEmConnection::new(link, mapping));
                    host.em = Some(endpoint);
                }
                DataServiceKind::PrimaryData => {
                    let (sender, inbox) = self
                        .one_way::<PrimaryDataMessage>(service.as_str())
                        .split();
                    let link = SignalLink::new(sender, signal.clone(), *service);
                    external.primary = Some(ExtPrimaryDataConnection::new(link, mapping));
                    host.primary = Some(inbox);
                }
                DataServiceKind::Results => {
                    let (link, endpoint) =
                        self.link::<ResultsMessage, ResultsResponse>(*service, &signal);
                    external.results = Some(ExtResultDataConnection::new(link, mapping));
                    host.results = Some(endpoint);
                }
                DataServiceKind::Communication => {
                    let (link, endpoint) = self
                        .link::<CommunicationMessage, CommunicationResponse>(*service, &signal);
                    external.communication = Some(ExtCommunicationConnection::new(link, mapping));
                    host.communication = Some(endpoint);
                }
            }
        }

        info!(
            services = ?self.services,
            mapped_entities = self.mapping.len(),
            completion_timeout = ?self.channels.completion_timeout,
            response_timeout = ?self.channels.response_timeout,
            "co-simulation channels wired"
        );
        (host, external)
    }
}
