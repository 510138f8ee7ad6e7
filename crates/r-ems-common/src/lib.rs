//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the co-simulation runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared configuration loading and logging setup for the R-EMS co-simulation
//! workspace.

pub mod config;
pub mod logging;

pub use config::{
    ChannelConfig, CoSimConfig, LoadedCoSimConfig, LoggingConfig, MappingConfig,
    SimulationConfig,
};
pub use logging::{init_tracing, LogFormat};
