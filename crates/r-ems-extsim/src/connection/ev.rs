//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Electric vehicle charging connection."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use r_ems_msg::{HostEndpoint, Tick};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DataLink;
use crate::error::Result;
use crate::mapping::{log_unmapped, DataKind, EntityMapping};

/// Vehicle as exchanged with the charging stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvModel {
    /// Vehicle UUID.
    pub uuid: Uuid,
    /// Human readable vehicle id.
    pub id: String,
    /// Maximum charging power.
    pub p_max_kw: f64,
    /// Battery capacity.
    pub e_storage_kwh: f64,
    /// Energy stored on arrival.
    pub stored_energy_kwh: f64,
    /// Tick the vehicle wants to leave at.
    pub departure_tick: Tick,
}

/// Ask every station for its free charging points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestFreeChargingSlots;

/// Free charging points per station.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvideFreeChargingSlots {
    /// Free points keyed by station UUID.
    pub slots: BTreeMap<Uuid, u32>,
}

/// Ask every station for its current charging price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestCurrentPrices;

/// Current price per station.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideCurrentPrices {
    /// Prices keyed by station UUID.
    pub prices: BTreeMap<Uuid, f64>,
}

/// Station to vehicles that should leave it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestDepartingVehicles {
    /// Vehicle UUIDs keyed by station UUID.
    pub departures: BTreeMap<Uuid, Vec<Uuid>>,
}

/// Vehicles released by their stations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideDepartingVehicles {
    /// Vehicles keyed by station UUID.
    pub vehicles: BTreeMap<Uuid, Vec<EvModel>>,
}

/// Vehicles arriving at their stations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvideArrivingVehicles {
    /// Vehicles keyed by station UUID.
    pub arrivals: BTreeMap<Uuid, Vec<EvModel>>,
    /// Next tick arrivals will be provided for.
    pub next_tick: Option<Tick>,
}

r_ems_msg::message_variants! {
    /// External simulation to EV service.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum EvMessage {
        /// Free slot request.
        RequestFreeChargingSlots(RequestFreeChargingSlots) => "request_free_charging_slots",
        /// Price request.
        RequestCurrentPrices(RequestCurrentPrices) => "request_current_prices",
        /// Departure request.
        RequestDepartingVehicles(RequestDepartingVehicles) => "request_departing_vehicles",
        /// Arrivals.
        ProvideArrivingVehicles(ProvideArrivingVehicles) => "provide_arriving_vehicles",
    }
}

r_ems_msg::message_variants! {
    /// EV service to external simulation.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum EvResponse {
        /// Free slots.
        ProvideFreeChargingSlots(ProvideFreeChargingSlots) => "provide_free_charging_slots",
        /// Prices.
        ProvideCurrentPrices(ProvideCurrentPrices) => "provide_current_prices",
        /// Departed vehicles.
        ProvideDepartingVehicles(ProvideDepartingVehicles) => "provide_departing_vehicles",
    }
}

/// Host end of the EV channel.
pub type EvHost = HostEndpoint<EvMessage, EvResponse>;

/// Charging stations are addressed by their external ids; vehicles keep
/// their own UUIDs.
pub struct ExtEvConnection {
    link: DataLink<EvMessage, EvResponse>,
    mapping: Arc<EntityMapping>,
}

impl ExtEvConnection {
    pub(crate) fn new(link: DataLink<EvMessage, EvResponse>, mapping: Arc<EntityMapping>) -> Self {
        Self { link, mapping }
    }

    /// Free charging points per station, keyed by external station id.
    pub fn request_free_charging_slots(&self) -> Result<BTreeMap<String, u32>> {
        let response: ProvideFreeChargingSlots = self.link.request(RequestFreeChargingSlots)?;
        let translation = self.mapping.to_external(DataKind::EvInput, response.slots);
        translation.log_rejected(self.link.name());
        Ok(translation.mapped)
    }

    /// Current price per station, keyed by external station id.
    pub fn request_current_prices(&self) -> Result<BTreeMap<String, f64>> {
        let response: ProvideCurrentPrices = self.link.request(RequestCurrentPrices)?;
        let translation = self.mapping.to_external(DataKind::EvInput, response.prices);
        translation.log_rejected(self.link.name());
        Ok(translation.mapped)
    }

    /// Ask the stations to release the given vehicles. Unknown stations are
    /// skipped before the request is sent.
    pub fn request_departing_vehicles(
        &self,
        departures: BTreeMap<String, Vec<Uuid>>,
    ) -> Result<BTreeMap<String, Vec<EvModel>>> {
        let request = self.mapping.to_internal(DataKind::EvInput, departures);
        request.log_rejected(self.link.name());
        let response: ProvideDepartingVehicles = self.link.request(RequestDepartingVehicles {
            departures: request.mapped,
        })?;
        let translation = self.mapping.to_external(DataKind::EvInput, response.vehicles);
        translation.log_rejected(self.link.name());
        Ok(translation.mapped)
    }

    /// Hand arriving vehicles to their stations. Returns the station ids that
    /// are not mapped.
    pub fn provide_arriving_vehicles(
        &self,
        arrivals: BTreeMap<String, Vec<EvModel>>,
        next_tick: Option<Tick>,
    ) -> Result<Vec<String>> {
        let translation = self.mapping.to_internal(DataKind::EvInput, arrivals);
        log_unmapped(self.link.name(), DataKind::EvInput, &translation.rejected);
        self.link.send(ProvideArrivingVehicles {
            arrivals: translation.mapped,
            next_tick,
        })?;
        Ok(translation.rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEntry;
    use r_ems_msg::{DataServiceKind, OneWay, ScheduleDataService, TypedChannel};

    fn vehicle(id: &str) -> EvModel {
        EvModel {
            uuid: Uuid::new_v4(),
            id: id.to_owned(),
            p_max_kw: 11.0,
            e_storage_kwh: 60.0,
            stored_energy_kwh: 20.0,
            departure_tick: 7200,
        }
    }

    #[test]
    fn arrivals_are_rekeyed_and_scheduled() {
        let station = Uuid::new_v4();
        let mapping =
            EntityMapping::new([MappingEntry::new(station, "cs-1", DataKind::EvInput)])
                .expect("mapping");
        let (external, host) = TypedChannel::<EvMessage, EvResponse>::new("ev").split();
        let (signal, inbox) = OneWay::<ScheduleDataService>::new("data_services").split();
        let connection = ExtEvConnection::new(
            DataLink::new(external, signal, DataServiceKind::Ev, None),
            Arc::new(mapping),
        );

        let ev = vehicle("car-7");
        let rejected = connection
            .provide_arriving_vehicles(
                BTreeMap::from([
                    ("cs-1".to_owned(), vec![ev.clone()]),
                    ("cs-404".to_owned(), vec![vehicle("car-8")]),
                ]),
                Some(900),
            )
            .expect("provide");
        assert_eq!(rejected, vec!["cs-404".to_owned()]);

        match host.receive_from_external().expect("message") {
            EvMessage::ProvideArrivingVehicles(message) => {
                assert_eq!(message.arrivals, BTreeMap::from([(station, vec![ev])]));
                assert_eq!(message.next_tick, Some(900));
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(
            inbox.drain(),
            vec![ScheduleDataService {
                service: DataServiceKind::Ev
            }]
        );
    }
}
