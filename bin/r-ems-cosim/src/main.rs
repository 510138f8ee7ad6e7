//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the co-simulation demo runner."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
mod demo;
mod scripted_host;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use r_ems_common::{init_tracing, CoSimConfig};
use r_ems_extsim::{spawn_external_simulation, CoSimulation, EntityMapping, LoopOutcome};
use r_ems_msg::ChannelMetrics;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run an external simulation against a scripted host",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Entity mapping table, overrides mapping.path")]
    mapping: Option<PathBuf>,

    #[arg(long, help = "Print channel metrics in Prometheus text format on exit")]
    print_metrics: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/cosim.toml"));
    let loaded = CoSimConfig::load_with_source(&candidates)?;
    let config = loaded.config;

    init_tracing("r-ems-cosim", &config.logging)?;
    info!(config_path = %loaded.source.display(), simulation = %config.simulation.name, "configuration loaded");

    let mapping = match cli.mapping.as_ref().or(config.mapping.path.as_ref()) {
        Some(path) => EntityMapping::from_csv_path(path, config.mapping.delimiter_byte()?)
            .with_context(|| format!("failed to load entity mapping {}", path.display()))?,
        None => {
            warn!("no entity mapping configured; every external id will be rejected");
            EntityMapping::default()
        }
    };
    let mapping = Arc::new(mapping);
    info!(entities = mapping.len(), "entity mapping loaded");

    let registry = Registry::new();
    let metrics = ChannelMetrics::register(&registry)?;

    let (host, external) = CoSimulation::builder(&config.channels, Arc::clone(&mapping))
        .with_ev()
        .with_em()
        .with_primary()
        .with_results()
        .with_communication()
        .with_metrics(metrics)
        .build();

    let (simulation, control) =
        demo::DemoSimulation::from_external(external, Arc::clone(&mapping), &config.simulation)?;
    let worker = spawn_external_simulation(simulation, control, &config.simulation.name)?;

    let started = Instant::now();
    let report = scripted_host::run(host, Arc::clone(&mapping), &config.simulation)?;
    let outcome = worker
        .join()
        .map_err(|_| anyhow::anyhow!("external simulation thread panicked"))??;

    match outcome {
        LoopOutcome::Terminated { successful } => info!(
            successful,
            activations = report.activations,
            primary_values = report.primary_values,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "co-simulation finished"
        ),
        LoopOutcome::Interrupted => warn!("external simulation interrupted before termination"),
    }

    if cli.print_metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        println!("{}", String::from_utf8(buffer)?);
    }
    Ok(())
}
