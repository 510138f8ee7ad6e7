//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Synchronisation layer coupling external simulations to the host simulation."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Lock-step coupling of an external simulation to the tick-driven host.
//!
//! The host drives the external side through one control channel
//! ([`ControlHandle`] on the host, [`ExternalSimulationLoop`] on the external
//! thread). Domain data travels on separate typed channels wrapped by the
//! connections in [`connection`], which translate ids with an
//! [`EntityMapping`]. [`CoSimulation::builder`] wires everything up.
#![warn(missing_docs)]

pub mod connection;
pub mod container;
pub mod control;
pub mod cosim;
pub mod error;
pub mod mapping;
pub mod result;
pub mod sim_loop;

pub use connection::{
    CommMessage, CommunicationHost, EmHost, EvHost, EvModel, ExtCommunicationConnection,
    ExtEmConnection, ExtEvConnection, ExtPrimaryDataConnection, ExtResultDataConnection,
    PrimaryDataHost, ResultsHost,
};
pub use container::{
    EmSetPoint, ExtInputContainer, ExternalValue, FlexOptions, FlexRequest, PowerValue,
    PrimaryValue,
};
pub use control::{ControlEndpoint, ControlHandle};
pub use cosim::{CoSimulation, CoSimulationBuilder, ExternalSide, HostSide};
pub use error::{ConversionError, ExtSimError, Result};
pub use mapping::{ColumnScheme, DataKind, EntityMapping, MappingEntry, MappingError, Translation};
pub use result::{ExtResultContainer, ResultEntity, ResultKind};
pub use sim_loop::{
    spawn_external_simulation, ExternalSimulation, ExternalSimulationLoop, LoopOutcome, LoopState,
};
