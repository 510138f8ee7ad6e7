//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Host-side handle for the lock-step control handshake."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Host end of the control channel.
//!
//! [`ControlHandle`] enforces the single-outstanding-request rule before a
//! message ever reaches the queue: a second `Activate` while the first is
//! unanswered fails immediately instead of being pipelined. A response that
//! breaks the handshake (wrong kind, next tick not ahead) is fatal: the
//! handle refuses every further request.

use std::time::Duration;

use r_ems_msg::{
    ChannelError, ControlMessage, ControlResponse, DataServiceKind, ExternalEndpoint,
    HostEndpoint, Inbox, MessageKind, ScheduleDataService, Tick, INIT_TICK,
};
use tracing::{debug, info, warn};

use crate::error::{ExtSimError, Result};

/// Control endpoint consumed by [`crate::ExternalSimulationLoop`].
pub type ControlEndpoint = ExternalEndpoint<ControlResponse, ControlMessage>;

/// Raw host end of the control channel.
pub type ControlHostEndpoint = HostEndpoint<ControlResponse, ControlMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Activate(Tick),
    Terminate,
}

impl Pending {
    fn kind(self) -> &'static str {
        match self {
            Pending::Activate(_) => "activate",
            Pending::Terminate => "terminate",
        }
    }

    fn expected_response(self) -> &'static str {
        match self {
            Pending::Activate(_) => "completed",
            Pending::Terminate => "termination_ack",
        }
    }
}

/// Host end of the lock-step handshake with one external simulation.
///
/// Tracks the open request, the last activated tick and the lifecycle
/// (uninitialized, running, finished, terminated, violated).
pub struct ControlHandle {
    endpoint: ControlHostEndpoint,
    signals: Inbox<ScheduleDataService>,
    completion_timeout: Option<Duration>,
    pending: Option<Pending>,
    last_tick: Option<Tick>,
    next_tick: Option<Tick>,
    finished: bool,
    terminated: bool,
    violated: bool,
}

impl ControlHandle {
    /// Wrap the host control endpoint and the data service signal inbox.
    /// `completion_timeout` bounds every wait in [`Self::await_response`].
    pub fn new(
        endpoint: ControlHostEndpoint,
        signals: Inbox<ScheduleDataService>,
        completion_timeout: Option<Duration>,
    ) -> Self {
        Self {
            endpoint,
            signals,
            completion_timeout,
            pending: None,
            last_tick: None,
            next_tick: None,
            finished: false,
            terminated: false,
            violated: false,
        }
    }

    fn state(&self) -> &'static str {
        if self.violated {
            "violated"
        } else if self.terminated {
            "terminated"
        } else if self.finished {
            "finished"
        } else if self.last_tick.is_none() {
            "uninitialized"
        } else {
            "running"
        }
    }

    /// Ask the external simulation to run `tick`. The first activation must
    /// be [`INIT_TICK`].
    pub fn activate(&mut self, tick: Tick) -> Result<()> {
        if self.violated {
            return Err(ExtSimError::ProtocolViolation {
                state: self.state(),
                received: "activate",
            });
        }
        if let Some(pending) = self.pending {
            return Err(ExtSimError::OutstandingRequest {
                pending: pending.kind(),
            });
        }
        if self.terminated || self.finished {
            return Err(ExtSimError::ProtocolViolation {
                state: self.state(),
                received: "activate",
            });
        }
        match self.last_tick {
            None if tick != INIT_TICK => {
                return Err(ExtSimError::ProtocolViolation {
                    state: self.state(),
                    received: "activate",
                });
            }
            Some(_) if tick == INIT_TICK => {
                return Err(ExtSimError::ProtocolViolation {
                    state: self.state(),
                    received: "activate",
                });
            }
            Some(last) if tick < last => {
                return Err(ExtSimError::TickRegression {
                    last,
                    requested: tick,
                });
            }
            _ => {}
        }

        debug!(channel = self.endpoint.name(), tick, "activating external simulation");
        self.endpoint
            .send_to_external(ControlMessage::Activate { tick })?;
        self.pending = Some(Pending::Activate(tick));
        self.last_tick = Some(tick);
        Ok(())
    }

    /// Ask the external simulation to shut down. Allowed in any state except
    /// after termination or a handshake violation.
    pub fn terminate(&mut self, successful: bool) -> Result<()> {
        if self.violated {
            return Err(ExtSimError::ProtocolViolation {
                state: self.state(),
                received: "terminate",
            });
        }
        if let Some(pending) = self.pending {
            return Err(ExtSimError::OutstandingRequest {
                pending: pending.kind(),
            });
        }
        if self.terminated {
            return Err(ExtSimError::ProtocolViolation {
                state: self.state(),
                received: "terminate",
            });
        }
        info!(channel = self.endpoint.name(), successful, "terminating external simulation");
        self.endpoint
            .send_to_external(ControlMessage::Terminate { successful })?;
        self.pending = Some(Pending::Terminate);
        Ok(())
    }

    /// Wait for the answer to the open request.
    ///
    /// Honours the completion deadline; an elapsed deadline leaves the
    /// request open so the caller can decide to abort.
    pub fn await_response(&mut self) -> Result<ControlResponse> {
        let pending = self.pending.ok_or(ExtSimError::NoOutstandingRequest)?;
        let response = match self
            .endpoint
            .receive_from_external_timeout(self.completion_timeout)
        {
            Ok(response) => response,
            Err(err @ ChannelError::Timeout { .. }) => {
                warn!(
                    channel = self.endpoint.name(),
                    pending = pending.kind(),
                    "external simulation missed completion deadline"
                );
                return Err(err.into());
            }
            Err(err) => {
                self.pending = None;
                return Err(err.into());
            }
        };
        self.pending = None;

        match (pending, response) {
            (Pending::Activate(tick), ControlResponse::Completed { next_tick }) => {
                if let Some(next) = next_tick {
                    if next <= tick {
                        self.violated = true;
                        return Err(ExtSimError::NextTickNotAhead {
                            current: tick,
                            next,
                        });
                    }
                }
                debug!(
                    channel = self.endpoint.name(),
                    tick,
                    next_tick = ?next_tick,
                    "activation completed"
                );
                self.next_tick = next_tick;
                self.finished = next_tick.is_none();
            }
            (Pending::Terminate, ControlResponse::TerminationAck) => {
                info!(channel = self.endpoint.name(), "external simulation terminated");
                self.terminated = true;
                self.next_tick = None;
            }
            (pending, other) => {
                self.violated = true;
                return Err(ExtSimError::UnexpectedControlResponse {
                    expected: pending.expected_response(),
                    actual: other.kind(),
                });
            }
        }
        Ok(response)
    }

    /// Activate `tick` and wait for completion. Returns the next tick the
    /// external simulation asked for.
    pub fn activate_and_wait(&mut self, tick: Tick) -> Result<Option<Tick>> {
        self.activate(tick)?;
        self.await_response()?;
        Ok(self.next_tick)
    }

    /// Terminate and wait for the acknowledgement.
    pub fn terminate_and_wait(&mut self, successful: bool) -> Result<()> {
        self.terminate(successful)?;
        self.await_response().map(|_| ())
    }

    /// Tick the external simulation last asked to be activated at.
    pub fn next_tick(&self) -> Option<Tick> {
        self.next_tick
    }

    /// Tick of the most recent activation.
    pub fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    /// `true` while a request waits for its response.
    pub fn has_outstanding_request(&self) -> bool {
        self.pending.is_some()
    }

    /// `true` once the external simulation answered with `Completed(None)`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `true` once termination was acknowledged.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Drain the data services that received a message since the last call,
    /// in arrival order.
    pub fn take_scheduled_services(&self) -> Vec<DataServiceKind> {
        self.signals
            .drain()
            .into_iter()
            .map(|signal| signal.service)
            .collect()
    }

    /// Block until a data service is scheduled or `timeout` elapses.
    pub fn wait_for_scheduled_service(
        &self,
        timeout: Option<Duration>,
    ) -> Result<DataServiceKind> {
        Ok(self.signals.receive_timeout(timeout)?.service)
    }
}
