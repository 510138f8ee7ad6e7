//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed channel primitives and control protocol messages."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::debug;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// External simulation towards the host.
    ToHost,
    /// Host towards the external simulation.
    ToExternal,
}

impl Direction {
    /// Label value used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToHost => "to_host",
            Direction::ToExternal => "to_external",
        }
    }
}

/// Emit a structured log entry for channel activity.
pub fn log_message(channel: &'static str, direction: Direction, kind: &'static str) {
    debug!(
        channel,
        direction = direction.as_str(),
        kind,
        "co-simulation message"
    );
}

/// Prometheus metric handles for channel activity.
#[derive(Clone)]
pub struct ChannelMetrics {
    messages: IntCounterVec,
    wait: HistogramVec,
}

impl ChannelMetrics {
    /// Register channel metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages = IntCounterVec::new(
            Opts::new(
                "extsim_messages_total",
                "Messages exchanged with external simulations",
            ),
            &["channel", "direction"],
        )?;
        let wait = HistogramVec::new(
            HistogramOpts::new(
                "extsim_wait_seconds",
                "Time spent blocked waiting for the peer on a channel",
            ),
            &["channel"],
        )?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(wait.clone()))?;

        Ok(Self { messages, wait })
    }

    /// Count one message on `channel`.
    pub fn observe_message(&self, channel: &str, direction: Direction) {
        self.messages
            .with_label_values(&[channel, direction.as_str()])
            .inc();
    }

    /// Record how long a blocking receive waited.
    pub fn observe_wait(&self, channel: &str, waited: Duration) {
        self.wait
            .with_label_values(&[channel])
            .observe(waited.as_secs_f64());
    }

    /// Messages counted so far for one channel and direction.
    pub fn message_count(&self, channel: &str, direction: Direction) -> u64 {
        self.messages
            .with_label_values(&[channel, direction.as_str()])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_count() {
        let registry = Registry::new();
        let metrics = ChannelMetrics::register(&registry).expect("register metrics");
        metrics.observe_message("ev", Direction::ToHost);
        metrics.observe_message("ev", Direction::ToHost);
        metrics.observe_wait("ev", Duration::from_millis(3));

        assert_eq!(metrics.message_count("ev", Direction::ToHost), 2);
        assert_eq!(metrics.message_count("ev", Direction::ToExternal), 0);
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "extsim_messages_total"));
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = Registry::new();
        ChannelMetrics::register(&registry).expect("first registration");
        assert!(ChannelMetrics::register(&registry).is_err());
    }
}
