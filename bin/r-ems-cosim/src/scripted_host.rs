//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Scripted host answering domain requests and driving the control handshake."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Stand-in for the grid simulation. Every domain service is answered on its
//! own thread so requests made inside an activation are served while the
//! control loop waits for completion.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use r_ems_common::SimulationConfig;
use r_ems_extsim::connection::communication::{
    CommunicationMessage, CommunicationResponse, ProvideOutbox,
};
use r_ems_extsim::connection::em::{
    EmMessage, EmResponse, FlexResultResponse, ProvideFlexOptions,
};
use r_ems_extsim::connection::ev::{
    EvMessage, EvResponse, ProvideCurrentPrices, ProvideDepartingVehicles,
    ProvideFreeChargingSlots,
};
use r_ems_extsim::connection::primary::PrimaryDataMessage;
use r_ems_extsim::connection::results::{ProvideResults, ResultsMessage, ResultsResponse};
use r_ems_extsim::{
    DataKind, EntityMapping, EvModel, ExtResultContainer, FlexOptions, HostSide, ResultEntity,
};
use r_ems_msg::{DataServiceKind, HostEndpoint, MessageKind, Tick, INIT_TICK};
use tracing::{debug, info, warn};
use uuid::Uuid;

const STATION_CAPACITY: usize = 2;

#[derive(Debug, Default)]
pub struct RunReport {
    pub activations: u64,
    pub primary_values: usize,
}

/// Drive the external simulation from `first_tick` until it stops asking
/// for activations or passes `last_tick`, then terminate it.
pub fn run(
    host: HostSide,
    mapping: Arc<EntityMapping>,
    simulation: &SimulationConfig,
) -> Result<RunReport> {
    let HostSide {
        mut control,
        ev,
        em,
        primary,
        results,
        communication,
    } = host;

    let mut responders = Vec::new();
    if let Some(endpoint) = ev {
        let mapping = Arc::clone(&mapping);
        let mut parked: BTreeMap<Uuid, Vec<EvModel>> = BTreeMap::new();
        responders.push(serve("host-ev", endpoint, move |message| {
            answer_ev(&mapping, &mut parked, message)
        })?);
    }
    if let Some(endpoint) = em {
        responders.push(serve("host-em", endpoint, answer_em)?);
    }
    if let Some(endpoint) = results {
        let mapping = Arc::clone(&mapping);
        responders.push(serve("host-results", endpoint, move |message| {
            answer_results(&mapping, message)
        })?);
    }
    if let Some(endpoint) = communication {
        responders.push(serve("host-communication", endpoint, answer_communication)?);
    }

    let mut report = RunReport::default();
    let mut next = control.activate_and_wait(INIT_TICK)?;
    while let Some(tick) = next {
        if tick > simulation.last_tick {
            info!(tick, last_tick = simulation.last_tick, "requested tick beyond schedule");
            break;
        }
        next = control.activate_and_wait(tick)?;
        report.activations += 1;

        for service in control.take_scheduled_services() {
            match (service, &primary) {
                (DataServiceKind::PrimaryData, Some(inbox)) => {
                    for PrimaryDataMessage::ProvidePrimaryData(data) in inbox.drain() {
                        debug!(tick = data.tick, values = data.values.len(), "primary data received");
                        report.primary_values += data.values.len();
                    }
                }
                (service, _) => debug!(tick, service = service.as_str(), "data service scheduled"),
            }
        }
    }

    control.terminate_and_wait(true)?;
    drop(primary);
    for responder in responders {
        responder
            .join()
            .map_err(|_| anyhow!("host responder panicked"))??;
    }
    Ok(report)
}

/// Answer every message on `endpoint` until the external side hangs up.
fn serve<Tx, Rx, F>(
    name: &str,
    endpoint: HostEndpoint<Tx, Rx>,
    mut answer: F,
) -> Result<JoinHandle<Result<()>>>
where
    Tx: MessageKind + Send + 'static,
    Rx: MessageKind + Send + 'static,
    F: FnMut(Tx) -> Option<Rx> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || -> Result<()> {
            loop {
                let message = match endpoint.receive_from_external() {
                    Ok(message) => message,
                    Err(err) if err.is_disconnect() => return Ok(()),
                    Err(err) => return Err(err.into()),
                };
                if let Some(response) = answer(message) {
                    endpoint.send_to_external(response)?;
                }
            }
        })?;
    Ok(handle)
}

fn answer_ev(
    mapping: &EntityMapping,
    parked: &mut BTreeMap<Uuid, Vec<EvModel>>,
    message: EvMessage,
) -> Option<EvResponse> {
    let stations = move || mapping.entries(DataKind::EvInput).map(|entry| entry.uuid);
    match message {
        EvMessage::RequestFreeChargingSlots(_) => {
            let slots = stations()
                .map(|station| {
                    let used = parked.get(&station).map_or(0, Vec::len);
                    (station, STATION_CAPACITY.saturating_sub(used) as u32)
                })
                .collect();
            Some(ProvideFreeChargingSlots { slots }.into())
        }
        EvMessage::RequestCurrentPrices(_) => {
            let prices = stations().map(|station| (station, 0.29)).collect();
            Some(ProvideCurrentPrices { prices }.into())
        }
        EvMessage::RequestDepartingVehicles(request) => {
            let mut vehicles = BTreeMap::new();
            for (station, leaving) in request.departures {
                let parked = parked.entry(station).or_default();
                let (departed, staying): (Vec<EvModel>, Vec<EvModel>) = parked
                    .drain(..)
                    .partition(|vehicle| leaving.contains(&vehicle.uuid));
                *parked = staying;
                vehicles.insert(station, departed);
            }
            Some(ProvideDepartingVehicles { vehicles }.into())
        }
        EvMessage::ProvideArrivingVehicles(arrivals) => {
            for (station, vehicles) in arrivals.arrivals {
                parked.entry(station).or_default().extend(vehicles);
            }
            None
        }
    }
}

fn answer_em(message: EmMessage) -> Option<EmResponse> {
    match message {
        EmMessage::ProvideSetPoints(set_points) => {
            debug!(tick = set_points.tick, set_points = set_points.set_points.len(), "set points received");
            None
        }
        EmMessage::ProvideEmInput(input) => {
            debug!(tick = input.tick, set_points = input.set_points.len(), "energy management input received");
            None
        }
        EmMessage::RequestFlexOptions(request) => {
            let options = request
                .receivers
                .into_iter()
                .map(|model| {
                    let options = FlexOptions {
                        model,
                        p_ref_kw: 0.0,
                        p_min_kw: -5.0,
                        p_max_kw: 5.0,
                    };
                    (model, vec![options])
                })
                .collect();
            Some(ProvideFlexOptions { options }.into())
        }
        EmMessage::RequestFlexResults(request) => {
            let mut results = ExtResultContainer::new(request.tick, None);
            for id in request.ids {
                results.add_result(
                    id,
                    ResultEntity::Flex {
                        tick: request.tick,
                        p_ref_kw: 0.0,
                        p_min_kw: -5.0,
                        p_max_kw: 5.0,
                    },
                );
            }
            Some(FlexResultResponse { results }.into())
        }
    }
}

fn synthetic_result(mapping: &EntityMapping, id: Uuid, tick: Tick) -> Option<ResultEntity> {
    let hour = tick as f64 / 3600.0;
    if mapping.uuid_to_id(DataKind::ResultGrid, id).is_some() {
        Some(ResultEntity::Node {
            tick,
            v_mag_pu: 1.0 - 0.01 * hour,
            v_ang_deg: -0.5 * hour,
        })
    } else if mapping.uuid_to_id(DataKind::ResultParticipant, id).is_some() {
        Some(ResultEntity::Participant {
            tick,
            p_kw: 3.0 + hour,
            q_kvar: 0.4,
        })
    } else if mapping.uuid_to_id(DataKind::ResultFlex, id).is_some() {
        Some(ResultEntity::Flex {
            tick,
            p_ref_kw: 0.0,
            p_min_kw: -2.0,
            p_max_kw: 2.0,
        })
    } else {
        None
    }
}

fn answer_results(mapping: &EntityMapping, message: ResultsMessage) -> Option<ResultsResponse> {
    let ResultsMessage::RequestResults(request) = message;
    let mut results = ExtResultContainer::new(request.tick, None);
    for id in request.ids {
        match synthetic_result(mapping, id, request.tick) {
            Some(result) => results.add_result(id, result),
            None => warn!(%id, "no result model for requested entity"),
        }
    }
    Some(ProvideResults { results }.into())
}

fn answer_communication(message: CommunicationMessage) -> Option<CommunicationResponse> {
    match message {
        CommunicationMessage::DeliverMessages(delivery) => {
            debug!(tick = delivery.tick, messages = delivery.messages.len(), "messages delivered");
            None
        }
        CommunicationMessage::RequestOutbox(_) => {
            Some(ProvideOutbox::default().into())
        }
    }
}
