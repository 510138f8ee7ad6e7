//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Demo external simulation exercising every domain connection."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use r_ems_common::SimulationConfig;
use r_ems_extsim::{
    ControlEndpoint, DataKind, EmSetPoint, EntityMapping, EvModel, ExtCommunicationConnection,
    ExtEmConnection, ExtEvConnection, ExtPrimaryDataConnection, ExtResultDataConnection,
    ExternalSide, ExternalSimulation, ExternalValue, PowerValue,
};
use r_ems_msg::Tick;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct DemoSimulation {
    ev: ExtEvConnection,
    em: ExtEmConnection,
    primary: ExtPrimaryDataConnection,
    results: ExtResultDataConnection,
    communication: ExtCommunicationConnection,
    mapping: Arc<EntityMapping>,
    first_tick: Tick,
    last_tick: Tick,
    resolution: Tick,
    /// Station to parked vehicles and their departure tick.
    parked: BTreeMap<String, Vec<(Uuid, Tick)>>,
}

impl DemoSimulation {
    pub fn from_external(
        external: ExternalSide,
        mapping: Arc<EntityMapping>,
        simulation: &SimulationConfig,
    ) -> Result<(Self, ControlEndpoint)> {
        let ExternalSide {
            control,
            ev,
            em,
            primary,
            results,
            communication,
        } = external;
        let demo = Self {
            ev: ev.context("ev connection not wired")?,
            em: em.context("energy management connection not wired")?,
            primary: primary.context("primary data connection not wired")?,
            results: results.context("results connection not wired")?,
            communication: communication.context("communication connection not wired")?,
            mapping,
            first_tick: simulation.first_tick,
            last_tick: simulation.last_tick,
            resolution: simulation.resolution,
            parked: BTreeMap::new(),
        };
        Ok((demo, control))
    }

    fn next_tick(&self, tick: Tick) -> Option<Tick> {
        Some(tick + self.resolution).filter(|next| *next <= self.last_tick)
    }

    fn step(&self, tick: Tick) -> f64 {
        ((tick - self.first_tick) / self.resolution) as f64
    }

    fn primary_values(&self, tick: Tick) -> BTreeMap<String, ExternalValue> {
        let step = self.step(tick);
        self.mapping
            .entries(DataKind::PrimaryInput)
            .map(|entry| {
                let fields = entry
                    .column_scheme
                    .map(|scheme| scheme.fields())
                    .unwrap_or(&["p"]);
                let value: ExternalValue = fields
                    .iter()
                    .map(|field| ((*field).to_owned(), 1.0 + 0.25 * step))
                    .collect();
                (entry.id.clone(), value)
            })
            .collect()
    }

    fn charge(&mut self, tick: Tick, next_tick: Option<Tick>) -> Result<()> {
        let departures: BTreeMap<String, Vec<Uuid>> = self
            .parked
            .iter_mut()
            .map(|(station, vehicles)| {
                let (leaving, staying): (Vec<_>, Vec<_>) = vehicles
                    .iter()
                    .copied()
                    .partition(|(_, departure)| *departure <= tick);
                *vehicles = staying;
                (station.clone(), leaving.into_iter().map(|(uuid, _)| uuid).collect())
            })
            .filter(|(_, leaving): &(String, Vec<Uuid>)| !leaving.is_empty())
            .collect();
        if !departures.is_empty() {
            let departed = self.ev.request_departing_vehicles(departures)?;
            info!(tick, stations = departed.len(), "vehicles departed");
        }

        let prices = self.ev.request_current_prices()?;
        let slots = self.ev.request_free_charging_slots()?;
        let mut arrivals = BTreeMap::new();
        for (station, free) in slots.into_iter().filter(|(_, free)| *free > 0) {
            let uuid = Uuid::new_v4();
            let departure_tick = tick + 2 * self.resolution;
            debug!(tick, station = %station, free, price = ?prices.get(&station), "vehicle arriving");
            arrivals.insert(
                station.clone(),
                vec![EvModel {
                    uuid,
                    id: format!("ev-{tick}-{station}"),
                    p_max_kw: 11.0,
                    e_storage_kwh: 60.0,
                    stored_energy_kwh: 15.0,
                    departure_tick,
                }],
            );
            self.parked
                .entry(station)
                .or_default()
                .push((uuid, departure_tick));
        }
        if !arrivals.is_empty() {
            self.ev.provide_arriving_vehicles(arrivals, next_tick)?;
        }
        Ok(())
    }

    fn read_results(&self, tick: Tick) -> Result<()> {
        let ids: Vec<String> = [DataKind::ResultGrid, DataKind::ResultParticipant]
            .iter()
            .flat_map(|kind| self.mapping.entries(*kind))
            .map(|entry| entry.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let results = self.results.request_results_by_external(tick, &ids)?;
        for id in results.entities() {
            match results.results(id).last().map(|result| result.kind()) {
                Some(r_ems_extsim::ResultKind::Node) => {
                    debug!(tick, id = %id, v_mag_pu = results.voltage_magnitude(id)?, "node result");
                }
                Some(r_ems_extsim::ResultKind::Participant) => {
                    debug!(tick, id = %id, p_kw = results.active_power(id)?, "participant result");
                }
                other => warn!(tick, id = %id, kind = ?other, "result kind not evaluated"),
            }
        }
        Ok(())
    }
}

impl ExternalSimulation for DemoSimulation {
    fn initialize(&mut self) -> Result<Option<Tick>> {
        info!(
            first_tick = self.first_tick,
            last_tick = self.last_tick,
            resolution = self.resolution,
            "demo simulation initialised"
        );
        Ok(Some(self.first_tick))
    }

    fn do_activity(&mut self, tick: Tick) -> Result<Option<Tick>> {
        let next_tick = self.next_tick(tick);

        let rejected = self
            .primary
            .provide_primary_data(tick, self.primary_values(tick), next_tick)?;
        if !rejected.is_empty() {
            warn!(tick, rejected = ?rejected, "primary values skipped");
        }

        self.charge(tick, next_tick)?;

        let set_points = self
            .mapping
            .entries(DataKind::EmInput)
            .map(|entry| {
                let power = PowerValue::active(-2.0 + 0.5 * self.step(tick));
                (entry.id.clone(), EmSetPoint::new(power))
            })
            .collect();
        self.em.provide_set_points(tick, set_points, next_tick)?;

        self.read_results(tick)?;

        let outbox = self.communication.request_outbox(tick)?;
        debug!(tick, messages = outbox.len(), "outbox collected");

        Ok(next_tick)
    }

    fn on_terminate(&mut self, successful: bool) -> Result<()> {
        let parked: usize = self.parked.values().map(Vec::len).sum();
        info!(successful, parked, "demo simulation terminated");
        Ok(())
    }
}
