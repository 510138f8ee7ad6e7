//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "External side of the control handshake driving simulation callbacks."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::thread::{self, JoinHandle};

use r_ems_msg::{ControlMessage, ControlResponse, MessageKind, Tick, INIT_TICK};
use tracing::{debug, error, info};

use crate::control::ControlEndpoint;
use crate::error::{ExtSimError, Result};

/// Callbacks of an external simulation driven by [`ExternalSimulationLoop`].
///
/// Domain connections are owned by the implementor and used freely from
/// within the callbacks.
pub trait ExternalSimulation {
    /// Prepare the simulation and return the first tick to be activated at.
    fn initialize(&mut self) -> anyhow::Result<Option<Tick>>;

    /// Run `tick` and return the next tick to be activated at, or `None` when
    /// no further activity is requested.
    fn do_activity(&mut self, tick: Tick) -> anyhow::Result<Option<Tick>>;

    /// Release resources once the host terminates the co-simulation.
    fn on_terminate(&mut self, _successful: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<S: ExternalSimulation + ?Sized> ExternalSimulation for Box<S> {
    fn initialize(&mut self) -> anyhow::Result<Option<Tick>> {
        (**self).initialize()
    }

    fn do_activity(&mut self, tick: Tick) -> anyhow::Result<Option<Tick>> {
        (**self).do_activity(tick)
    }

    fn on_terminate(&mut self, successful: bool) -> anyhow::Result<()> {
        (**self).on_terminate(successful)
    }
}

/// Handshake state of the external side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the `INIT_TICK` activation.
    Uninitialized,
    /// Initialised; accepts activations after `last_tick`.
    Running {
        /// Most recently completed tick.
        last_tick: Tick,
    },
    /// Answered `Completed(None)`; only `Terminate` is accepted.
    Finished {
        /// Tick that produced the final completion.
        last_tick: Tick,
    },
    /// Termination acknowledged.
    Terminated,
}

impl LoopState {
    /// State name for log fields and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::Uninitialized => "uninitialized",
            LoopState::Running { .. } => "running",
            LoopState::Finished { .. } => "finished",
            LoopState::Terminated => "terminated",
        }
    }
}

/// How [`ExternalSimulationLoop::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The host terminated the simulation and the ack was sent.
    Terminated {
        /// Flag passed with `Terminate`.
        successful: bool,
    },
    /// The host dropped a channel while the loop was waiting on it.
    Interrupted,
}

/// Serves the control channel on the external thread and dispatches to an
/// [`ExternalSimulation`].
pub struct ExternalSimulationLoop<S> {
    simulation: S,
    endpoint: ControlEndpoint,
    state: LoopState,
}

impl<S: ExternalSimulation> ExternalSimulationLoop<S> {
    /// Loop in the [`LoopState::Uninitialized`] state.
    pub fn new(simulation: S, endpoint: ControlEndpoint) -> Self {
        Self {
            simulation,
            endpoint,
            state: LoopState::Uninitialized,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Serve control messages until termination.
    ///
    /// A disconnect on any channel ends the loop with
    /// [`LoopOutcome::Interrupted`]. Protocol violations and callback failures
    /// are returned as errors and leave the host without a response.
    pub fn run(mut self) -> Result<LoopOutcome> {
        info!(channel = self.endpoint.name(), "external simulation loop started");
        loop {
            let outcome = self
                .endpoint
                .receive_any()
                .map_err(ExtSimError::from)
                .and_then(|message| self.handle(message));
            match outcome {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {}
                Err(err) if err.is_interruption() => {
                    info!(
                        channel = self.endpoint.name(),
                        state = self.state.as_str(),
                        "external simulation interrupted"
                    );
                    return Ok(LoopOutcome::Interrupted);
                }
                Err(err) => {
                    error!(
                        channel = self.endpoint.name(),
                        state = self.state.as_str(),
                        error = %err,
                        "external simulation loop aborted"
                    );
                    return Err(err);
                }
            }
        }
    }

    fn handle(&mut self, message: ControlMessage) -> Result<Option<LoopOutcome>> {
        match (self.state, message) {
            (LoopState::Uninitialized, ControlMessage::Activate { tick: INIT_TICK }) => {
                let next_tick = self
                    .simulation
                    .initialize()
                    .map_err(ExtSimError::Callback)?;
                self.complete(INIT_TICK, next_tick)?;
                Ok(None)
            }
            (LoopState::Running { last_tick }, ControlMessage::Activate { tick })
                if tick < last_tick =>
            {
                Err(ExtSimError::TickRegression {
                    last: last_tick,
                    requested: tick,
                })
            }
            (LoopState::Running { .. }, ControlMessage::Activate { tick }) if tick >= 0 => {
                debug!(channel = self.endpoint.name(), tick, "activity started");
                let next_tick = self
                    .simulation
                    .do_activity(tick)
                    .map_err(ExtSimError::Callback)?;
                self.complete(tick, next_tick)?;
                Ok(None)
            }
            (
                LoopState::Uninitialized | LoopState::Running { .. } | LoopState::Finished { .. },
                ControlMessage::Terminate { successful },
            ) => {
                self.simulation
                    .on_terminate(successful)
                    .map_err(ExtSimError::Callback)?;
                self.endpoint.send_to_host(ControlResponse::TerminationAck)?;
                self.state = LoopState::Terminated;
                info!(channel = self.endpoint.name(), successful, "external simulation terminated");
                Ok(Some(LoopOutcome::Terminated { successful }))
            }
            (state, message) => Err(ExtSimError::ProtocolViolation {
                state: state.as_str(),
                received: message.kind(),
            }),
        }
    }

    fn complete(&mut self, tick: Tick, next_tick: Option<Tick>) -> Result<()> {
        if let Some(next) = next_tick {
            if next <= tick {
                return Err(ExtSimError::NextTickNotAhead {
                    current: tick,
                    next,
                });
            }
        }
        self.endpoint
            .send_to_host(ControlResponse::Completed { next_tick })?;
        self.state = match next_tick {
            Some(_) => LoopState::Running { last_tick: tick },
            None => LoopState::Finished { last_tick: tick },
        };
        debug!(channel = self.endpoint.name(), tick, next_tick = ?next_tick, "activity completed");
        Ok(())
    }
}

/// Run the loop on its own named thread.
pub fn spawn_external_simulation<S>(
    simulation: S,
    endpoint: ControlEndpoint,
    name: &str,
) -> std::io::Result<JoinHandle<Result<LoopOutcome>>>
where
    S: ExternalSimulation + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || ExternalSimulationLoop::new(simulation, endpoint).run())
}
