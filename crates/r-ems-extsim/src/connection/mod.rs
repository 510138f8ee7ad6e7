//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "external-coupling"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Domain data connections between external simulations and host services."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Domain data connections.
//!
//! Each connection owns the external end of one typed channel. Outgoing data
//! messages are always followed by a [`ScheduleDataService`] signal for the
//! connection's service; without it the host scheduler never picks the
//! message up. Requests block until the host answers with the matching
//! response variant. A request that ends without its response (deadline
//! elapsed or a foreign variant arrived) leaves the link unusable, since a
//! late answer would otherwise be taken for the answer to the next request.

pub mod communication;
pub mod em;
pub mod ev;
pub mod primary;
pub mod results;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use r_ems_msg::{
    DataServiceKind, ExternalEndpoint, MessageKind, Notifier, ScheduleDataService, Variant,
};
use tracing::warn;

use crate::error::{ExtSimError, Result};

pub use communication::{CommMessage, CommunicationHost, ExtCommunicationConnection};
pub use em::{EmHost, ExtEmConnection};
pub use ev::{EvHost, EvModel, ExtEvConnection};
pub use primary::{ExtPrimaryDataConnection, PrimaryDataHost};
pub use results::{ExtResultDataConnection, ResultsHost};

/// External end of a domain channel plus the scheduling signal.
pub(crate) struct DataLink<M, R> {
    endpoint: ExternalEndpoint<M, R>,
    signal: Notifier<ScheduleDataService>,
    service: DataServiceKind,
    response_timeout: Option<Duration>,
    abandoned: AtomicBool,
}

impl<M, R> DataLink<M, R>
where
    M: MessageKind,
    R: MessageKind,
{
    pub(crate) fn new(
        endpoint: ExternalEndpoint<M, R>,
        signal: Notifier<ScheduleDataService>,
        service: DataServiceKind,
        response_timeout: Option<Duration>,
    ) -> Self {
        Self {
            endpoint,
            signal,
            service,
            response_timeout,
            abandoned: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.endpoint.name()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.abandoned.load(Ordering::Acquire) {
            return Err(ExtSimError::AbandonedRequest {
                channel: self.endpoint.name(),
            });
        }
        Ok(())
    }

    /// Queue `message` for the host and schedule the service.
    pub(crate) fn send(&self, message: impl Into<M>) -> Result<()> {
        self.ensure_usable()?;
        self.endpoint.send_to_host(message.into())?;
        self.signal.notify(ScheduleDataService {
            service: self.service,
        })?;
        Ok(())
    }

    /// Send `message` and block until the host answers with `T`.
    pub(crate) fn request<T: Variant<R>>(&self, message: impl Into<M>) -> Result<T> {
        self.send(message)?;
        match self.endpoint.receive_expecting_timeout(self.response_timeout) {
            Ok(response) => Ok(response),
            Err(err) => {
                if !err.is_disconnect() {
                    warn!(
                        channel = self.endpoint.name(),
                        error = %err,
                        "request ended without its response, closing link"
                    );
                    self.abandoned.store(true, Ordering::Release);
                }
                Err(err.into())
            }
        }
    }
}

/// Signal-only sender for one-directional services.
pub(crate) struct SignalLink<M> {
    sender: Notifier<M>,
    signal: Notifier<ScheduleDataService>,
    service: DataServiceKind,
}

impl<M: MessageKind> SignalLink<M> {
    pub(crate) fn new(
        sender: Notifier<M>,
        signal: Notifier<ScheduleDataService>,
        service: DataServiceKind,
    ) -> Self {
        Self {
            sender,
            signal,
            service,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.sender.name()
    }

    pub(crate) fn send(&self, message: impl Into<M>) -> Result<()> {
        self.sender.notify(message.into())?;
        self.signal.notify(ScheduleDataService {
            service: self.service,
        })?;
        Ok(())
    }
}
