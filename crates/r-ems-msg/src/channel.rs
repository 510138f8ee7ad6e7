//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed channel primitives and control protocol messages."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::error;

use crate::logging::{log_message, ChannelMetrics, Direction};
use crate::{ChannelError, Result};

/// Runtime tag of a message variant, used for logging and mismatch reports.
pub trait MessageKind {
    /// Stable snake_case name of the variant.
    fn kind(&self) -> &'static str;
}

/// A payload type that is exactly one variant of the message enum `E`.
///
/// Implemented by [`message_variants!`](crate::message_variants) so that
/// [`ExternalEndpoint::receive_expecting`] resolves the expected variant at
/// compile time.
pub trait Variant<E>: Sized {
    /// Variant tag, identical to [`MessageKind::kind`] for this variant.
    const KIND: &'static str;

    /// Unwrap the payload, handing the message back if it is another variant.
    fn from_message(message: E) -> std::result::Result<Self, E>;
}

/// Declare a message enum whose variants each wrap a distinct payload type.
///
/// Generates the enum, a [`MessageKind`] impl, `From<Payload>` for the enum and
/// a [`Variant`] impl per payload.
#[macro_export]
macro_rules! message_variants {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident($payload:ty) => $kind:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant($payload),
            )+
        }

        impl $crate::channel::MessageKind for $name {
            fn kind(&self) -> &'static str {
                match self {
                    $( $name::$variant(_) => $kind, )+
                }
            }
        }

        $(
            impl ::core::convert::From<$payload> for $name {
                fn from(payload: $payload) -> Self {
                    $name::$variant(payload)
                }
            }

            impl $crate::channel::Variant<$name> for $payload {
                const KIND: &'static str = $kind;

                #[allow(unreachable_patterns)]
                fn from_message(message: $name) -> ::core::result::Result<Self, $name> {
                    match message {
                        $name::$variant(payload) => Ok(payload),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

/// Builder for a bidirectional channel carrying `Tx` towards the host and `Rx`
/// towards the external simulation.
pub struct TypedChannel<Tx, Rx> {
    name: &'static str,
    metrics: Option<ChannelMetrics>,
    _types: PhantomData<fn() -> (Tx, Rx)>,
}

impl<Tx, Rx> TypedChannel<Tx, Rx>
where
    Tx: MessageKind,
    Rx: MessageKind,
{
    /// Start building a channel with the given name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            metrics: None,
            _types: PhantomData,
        }
    }

    /// Record traffic and wait times on the supplied metrics handles.
    pub fn with_metrics(mut self, metrics: ChannelMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create both endpoints. Both queues are unbounded.
    pub fn split(self) -> (ExternalEndpoint<Tx, Rx>, HostEndpoint<Tx, Rx>) {
        let (to_host, from_external) = channel::unbounded();
        let (to_external, from_host) = channel::unbounded();
        let external = ExternalEndpoint {
            name: self.name,
            to_host,
            from_host,
            metrics: self.metrics.clone(),
        };
        let host = HostEndpoint {
            name: self.name,
            to_external,
            from_external,
            metrics: self.metrics,
        };
        (external, host)
    }
}

/// Endpoint held by the external simulation thread.
pub struct ExternalEndpoint<Tx, Rx> {
    name: &'static str,
    to_host: Sender<Tx>,
    from_host: Receiver<Rx>,
    metrics: Option<ChannelMetrics>,
}

impl<Tx, Rx> ExternalEndpoint<Tx, Rx>
where
    Tx: MessageKind,
    Rx: MessageKind,
{
    /// Channel name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a message to the host-bound queue. Never blocks.
    pub fn send_to_host(&self, message: Tx) -> Result<()> {
        send(
            self.name,
            &self.to_host,
            message,
            Direction::ToHost,
            self.metrics.as_ref(),
        )
    }

    /// Block until the host sends the next message.
    pub fn receive_any(&self) -> Result<Rx> {
        self.receive_any_timeout(None)
    }

    /// Block until the host sends the next message or `timeout` elapses.
    pub fn receive_any_timeout(&self, timeout: Option<Duration>) -> Result<Rx> {
        receive(
            self.name,
            &self.from_host,
            timeout,
            Direction::ToExternal,
            self.metrics.as_ref(),
        )
    }

    /// Block until the next message and require it to be the `T` variant.
    pub fn receive_expecting<T>(&self) -> Result<T>
    where
        T: Variant<Rx>,
    {
        self.receive_expecting_timeout(None)
    }

    /// Bounded variant of [`Self::receive_expecting`].
    pub fn receive_expecting_timeout<T>(&self, timeout: Option<Duration>) -> Result<T>
    where
        T: Variant<Rx>,
    {
        let message = self.receive_any_timeout(timeout)?;
        let actual = message.kind();
        T::from_message(message).map_err(|_| {
            error!(
                channel = self.name,
                expected = T::KIND,
                actual,
                "unexpected response type"
            );
            ChannelError::UnexpectedResponseType {
                channel: self.name,
                expected: T::KIND,
                actual,
            }
        })
    }
}

/// Endpoint held by the host-side service for one channel.
pub struct HostEndpoint<Tx, Rx> {
    name: &'static str,
    to_external: Sender<Rx>,
    from_external: Receiver<Tx>,
    metrics: Option<ChannelMetrics>,
}

impl<Tx, Rx> HostEndpoint<Tx, Rx>
where
    Tx: MessageKind,
    Rx: MessageKind,
{
    /// Channel name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a message to the external-bound queue. Never blocks.
    pub fn send_to_external(&self, message: Rx) -> Result<()> {
        send(
            self.name,
            &self.to_external,
            message,
            Direction::ToExternal,
            self.metrics.as_ref(),
        )
    }

    /// Block until the external simulation sends the next message.
    pub fn receive_from_external(&self) -> Result<Tx> {
        self.receive_from_external_timeout(None)
    }

    /// Block until the next message arrives or `timeout` elapses.
    pub fn receive_from_external_timeout(&self, timeout: Option<Duration>) -> Result<Tx> {
        receive(
            self.name,
            &self.from_external,
            timeout,
            Direction::ToHost,
            self.metrics.as_ref(),
        )
    }

    /// Take the next message if one is already queued.
    pub fn try_receive_from_external(&self) -> Result<Option<Tx>> {
        try_receive(
            self.name,
            &self.from_external,
            Direction::ToHost,
            self.metrics.as_ref(),
        )
    }
}

/// Builder for a one-directional channel from the external simulation to the host.
pub struct OneWay<T> {
    name: &'static str,
    metrics: Option<ChannelMetrics>,
    _types: PhantomData<fn() -> T>,
}

impl<T: MessageKind> OneWay<T> {
    /// Start building a one-directional channel with the given name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            metrics: None,
            _types: PhantomData,
        }
    }

    /// Record traffic on the supplied metrics handles.
    pub fn with_metrics(mut self, metrics: ChannelMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create the sending and receiving halves.
    pub fn split(self) -> (Notifier<T>, Inbox<T>) {
        let (sender, receiver) = channel::unbounded();
        (
            Notifier {
                name: self.name,
                sender,
                metrics: self.metrics.clone(),
            },
            Inbox {
                name: self.name,
                receiver,
                metrics: self.metrics,
            },
        )
    }
}

/// Sending half of a [`OneWay`] channel. Cloneable so several connections can
/// share it.
pub struct Notifier<T> {
    name: &'static str,
    sender: Sender<T>,
    metrics: Option<ChannelMetrics>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: MessageKind> Notifier<T> {
    /// Channel name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a message to the host-bound queue. Never blocks.
    pub fn notify(&self, message: T) -> Result<()> {
        send(
            self.name,
            &self.sender,
            message,
            Direction::ToHost,
            self.metrics.as_ref(),
        )
    }
}

/// Receiving half of a [`OneWay`] channel, held by the host.
pub struct Inbox<T> {
    name: &'static str,
    receiver: Receiver<T>,
    metrics: Option<ChannelMetrics>,
}

impl<T: MessageKind> Inbox<T> {
    /// Channel name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Block until the next message arrives.
    pub fn receive(&self) -> Result<T> {
        self.receive_timeout(None)
    }

    /// Block until the next message arrives or `timeout` elapses.
    pub fn receive_timeout(&self, timeout: Option<Duration>) -> Result<T> {
        receive(
            self.name,
            &self.receiver,
            timeout,
            Direction::ToHost,
            self.metrics.as_ref(),
        )
    }

    /// Take the next message if one is already queued.
    pub fn try_receive(&self) -> Result<Option<T>> {
        try_receive(
            self.name,
            &self.receiver,
            Direction::ToHost,
            self.metrics.as_ref(),
        )
    }

    /// Take every message currently queued. A disconnected sender simply ends
    /// the drain.
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Ok(Some(message)) = self.try_receive() {
            drained.push(message);
        }
        drained
    }
}

fn send<T: MessageKind>(
    name: &'static str,
    sender: &Sender<T>,
    message: T,
    direction: Direction,
    metrics: Option<&ChannelMetrics>,
) -> Result<()> {
    log_message(name, direction, message.kind());
    sender
        .send(message)
        .map_err(|_| ChannelError::Disconnected { channel: name })?;
    if let Some(metrics) = metrics {
        metrics.observe_message(name, direction);
    }
    Ok(())
}

fn receive<T: MessageKind>(
    name: &'static str,
    receiver: &Receiver<T>,
    timeout: Option<Duration>,
    direction: Direction,
    metrics: Option<&ChannelMetrics>,
) -> Result<T> {
    let started = Instant::now();
    let message = match timeout {
        Some(after) => receiver.recv_timeout(after).map_err(|err| match err {
            RecvTimeoutError::Timeout => ChannelError::Timeout {
                channel: name,
                after,
            },
            RecvTimeoutError::Disconnected => ChannelError::Disconnected { channel: name },
        })?,
        None => receiver
            .recv()
            .map_err(|_| ChannelError::Disconnected { channel: name })?,
    };
    if let Some(metrics) = metrics {
        metrics.observe_wait(name, started.elapsed());
        metrics.observe_message(name, direction);
    }
    log_message(name, direction, message.kind());
    Ok(message)
}

fn try_receive<T: MessageKind>(
    name: &'static str,
    receiver: &Receiver<T>,
    direction: Direction,
    metrics: Option<&ChannelMetrics>,
) -> Result<Option<T>> {
    match receiver.try_recv() {
        Ok(message) => {
            if let Some(metrics) = metrics {
                metrics.observe_message(name, direction);
            }
            log_message(name, direction, message.kind());
            Ok(Some(message))
        }
        Err(TryRecvError::Empty) => Ok(None),
        Err(TryRecvError::Disconnected) => Err(ChannelError::Disconnected { channel: name }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Ping(u32);

    #[derive(Debug, Clone, PartialEq)]
    pub struct Pong(u32);

    #[derive(Debug, Clone, PartialEq)]
    pub struct Stop;

    crate::message_variants! {
        #[derive(Debug, Clone, PartialEq)]
        pub enum Upstream {
            Ping(Ping) => "ping",
        }
    }

    crate::message_variants! {
        #[derive(Debug, Clone, PartialEq)]
        pub enum Downstream {
            Pong(Pong) => "pong",
            Stop(Stop) => "stop",
        }
    }

    #[test]
    fn messages_arrive_in_submission_order() {
        let (external, host) = TypedChannel::<Upstream, Downstream>::new("test").split();
        for n in 0..16 {
            host.send_to_external(Pong(n).into()).expect("send");
        }
        for n in 0..16 {
            let pong: Pong = external.receive_expecting().expect("pong");
            assert_eq!(pong, Pong(n));
        }
    }

    #[test]
    fn receive_expecting_rejects_foreign_variant() {
        let (external, host) = TypedChannel::<Upstream, Downstream>::new("test").split();
        host.send_to_external(Stop.into()).expect("send");
        let err = external.receive_expecting::<Pong>().unwrap_err();
        assert_eq!(
            err,
            ChannelError::UnexpectedResponseType {
                channel: "test",
                expected: "pong",
                actual: "stop",
            }
        );
    }

    #[test]
    fn blocking_receive_waits_for_the_other_thread() {
        let (external, host) = TypedChannel::<Upstream, Downstream>::new("test").split();
        let host_thread = thread::spawn(move || {
            let Upstream::Ping(Ping(n)) = host.receive_from_external().expect("ping");
            host.send_to_external(Pong(n + 1).into()).expect("pong");
        });
        external.send_to_host(Ping(41).into()).expect("send");
        let pong: Pong = external.receive_expecting().expect("pong");
        assert_eq!(pong, Pong(42));
        host_thread.join().expect("host thread");
    }

    #[test]
    fn dropped_peer_surfaces_as_disconnect() {
        let (external, host) = TypedChannel::<Upstream, Downstream>::new("test").split();
        drop(host);
        let err = external.receive_any().unwrap_err();
        assert!(err.is_disconnect());
        assert!(external.send_to_host(Ping(1).into()).is_err());
    }

    #[test]
    fn bounded_receive_times_out() {
        let (external, _host) = TypedChannel::<Upstream, Downstream>::new("test").split();
        let err = external
            .receive_any_timeout(Some(Duration::from_millis(5)))
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { channel: "test", .. }));
    }

    #[test]
    fn host_polls_without_blocking() {
        let (external, host) = TypedChannel::<Upstream, Downstream>::new("test").split();
        assert_eq!(host.try_receive_from_external().expect("connected"), None);
        external.send_to_host(Ping(7).into()).expect("send");
        drop(external);
        assert_eq!(
            host.try_receive_from_external().expect("queued before drop"),
            Some(Upstream::Ping(Ping(7)))
        );
        assert!(host.try_receive_from_external().unwrap_err().is_disconnect());
    }

    #[test]
    fn inbox_drain_empties_queue() {
        let (notifier, inbox) = OneWay::<Upstream>::new("signals").split();
        let second = notifier.clone();
        notifier.notify(Ping(1).into()).expect("notify");
        second.notify(Ping(2).into()).expect("notify");
        assert_eq!(inbox.drain().len(), 2);
        assert!(inbox.try_receive().expect("still connected").is_none());
    }
}
