//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "Full control handshake between a host handle and an external simulation thread."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::Registry;
use r_ems_common::ChannelConfig;
use r_ems_extsim::connection::primary::PrimaryDataMessage;
use r_ems_extsim::{
    spawn_external_simulation, CoSimulation, ColumnScheme, DataKind, EntityMapping,
    ExtPrimaryDataConnection, ExternalSimulation, ExternalValue, LoopOutcome, MappingEntry,
    PrimaryValue,
};
use r_ems_msg::{ChannelMetrics, DataServiceKind, Tick, INIT_TICK};
use uuid::Uuid;

/// Publishes one active power value per tick, every 900 s until `until`.
struct Meter {
    primary: ExtPrimaryDataConnection,
    until: Tick,
}

impl ExternalSimulation for Meter {
    fn initialize(&mut self) -> Result<Option<Tick>> {
        Ok(Some(0))
    }

    fn do_activity(&mut self, tick: Tick) -> Result<Option<Tick>> {
        let next = Some(tick + 900).filter(|next| *next <= self.until);
        let value = ExternalValue::from([("p".to_owned(), tick as f64 / 900.0)]);
        self.primary
            .provide_primary_data(tick, BTreeMap::from([("meter-1".to_owned(), value)]), next)?;
        Ok(next)
    }
}

fn mapping(meter: Uuid) -> Arc<EntityMapping> {
    Arc::new(
        EntityMapping::new([MappingEntry::new(meter, "meter-1", DataKind::PrimaryInput)
            .with_scheme(ColumnScheme::ActivePower)])
        .expect("mapping"),
    )
}

#[test]
fn host_drives_external_simulation_to_completion() -> Result<()> {
    let meter = Uuid::new_v4();
    let registry = Registry::new();
    let metrics = ChannelMetrics::register(&registry)?;
    let channels = ChannelConfig {
        completion_timeout: Some(Duration::from_secs(5)),
        response_timeout: None,
    };
    let (mut host, external) = CoSimulation::builder(&channels, mapping(meter))
        .with_primary()
        .with_metrics(metrics.clone())
        .build();
    let simulation = Meter {
        primary: external.primary.expect("primary connection"),
        until: 1800,
    };
    let worker = spawn_external_simulation(simulation, external.control, "meter-sim")?;
    let primary = host.primary.take().expect("primary inbox");

    let mut received = Vec::new();
    let mut next = host.control.activate_and_wait(INIT_TICK)?;
    while let Some(tick) = next {
        next = host.control.activate_and_wait(tick)?;
        for service in host.control.take_scheduled_services() {
            assert_eq!(service, DataServiceKind::PrimaryData);
            let PrimaryDataMessage::ProvidePrimaryData(data) = primary.receive()?;
            assert_eq!(data.tick, tick);
            assert_eq!(data.next_tick, next);
            received.push(data.values[&meter]);
        }
    }
    assert!(host.control.is_finished());
    host.control.terminate_and_wait(true)?;

    let outcome = worker.join().expect("join")?;
    assert_eq!(outcome, LoopOutcome::Terminated { successful: true });
    assert_eq!(
        received,
        vec![
            PrimaryValue::ActivePower { p_kw: 0.0 },
            PrimaryValue::ActivePower { p_kw: 1.0 },
            PrimaryValue::ActivePower { p_kw: 2.0 },
        ]
    );
    assert!(metrics.message_count("control", r_ems_msg::Direction::ToExternal) >= 4);
    Ok(())
}

#[test]
fn terminate_before_any_activation_is_acknowledged() -> Result<()> {
    let (mut host, external) =
        CoSimulation::builder(&ChannelConfig::default(), mapping(Uuid::new_v4()))
            .with_primary()
            .build();
    let simulation = Meter {
        primary: external.primary.expect("primary connection"),
        until: 0,
    };
    let worker = spawn_external_simulation(simulation, external.control, "meter-sim")?;

    host.control.terminate_and_wait(false)?;
    assert!(host.control.is_terminated());
    assert_eq!(
        worker.join().expect("join")?,
        LoopOutcome::Terminated { successful: false }
    );
    Ok(())
}

#[test]
fn dropping_the_host_interrupts_the_external_thread() -> Result<()> {
    let (host, external) =
        CoSimulation::builder(&ChannelConfig::default(), mapping(Uuid::new_v4()))
            .with_primary()
            .build();
    let simulation = Meter {
        primary: external.primary.expect("primary connection"),
        until: 0,
    };
    let worker = spawn_external_simulation(simulation, external.control, "meter-sim")?;
    drop(host);
    assert_eq!(worker.join().expect("join")?, LoopOutcome::Interrupted);
    Ok(())
}
