//! Narrow interfaces to the pieces this crate does not implement: the frame
//! codec, the socket transport, and the low-level non-recovering connection.
//! A concrete AMQP stack plugs in by implementing [`Connector`],
//! [`RawConnection`], and [`Session`]; everything above those traits (topology
//! recording, recovery orchestration, channel takeover) lives here.

use crate::consumer::{ConsumerMessage, ConsumerOptions};
use crate::errors::Result;
use crate::exchange::{ExchangeDeclareOptions, ExchangeType};
use crate::queue::{QueueDeclareOptions, QueueDeleteOptions};
use amq_protocol::protocol::basic::AMQPProperties;
use amq_protocol::types::FieldTable;
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A broker address candidate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which party initiated a connection shutdown. Recovery is attempted only
/// for shutdowns the application did not ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownInitiator {
    /// The application called close or abort.
    Application,

    /// The client library shut the connection down (e.g. after missed
    /// heartbeats or an unrecoverable protocol error).
    Library,

    /// The server closed the connection or the socket died.
    Peer,
}

/// Why the transport went away.
#[derive(Clone, Debug)]
pub struct ShutdownReason {
    pub initiator: ShutdownInitiator,
    pub code: u16,
    pub text: String,
}

impl ShutdownReason {
    pub fn is_recoverable(&self) -> bool {
        self.initiator != ShutdownInitiator::Application
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} initiated shutdown (code={} text={})",
            self.initiator, self.code, self.text
        )
    }
}

/// Flow-control notifications forwarded from the current transport.
#[derive(Clone, Debug)]
pub enum ConnectionBlockedNotification {
    /// The server has blocked publishes on this connection.
    Blocked { reason: String },

    /// The server has unblocked the connection.
    Unblocked,
}

/// Lifecycle events a [`RawConnection`] pushes into its event sink.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    Shutdown(ShutdownReason),
    Blocked { reason: String },
    Unblocked,
}

/// Where a transport reports its lifecycle events. Sinks are epoch-tagged so
/// events from a superseded transport can be discarded after takeover.
#[derive(Clone)]
pub struct EventSink {
    epoch: u64,
    tx: Sender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, tx: Sender<(u64, TransportEvent)>) -> EventSink {
        EventSink { epoch, tx }
    }

    /// Deliver an event. Send failures are ignored; the receiving side only
    /// disappears when the owning connection is being torn down.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send((self.epoch, event));
    }
}

/// An established frame-level transport to one endpoint. Opaque to this
/// crate; constructed by [`Connector::create_frame_handler`] and handed back
/// to [`Connector::connect`].
pub trait FrameHandler: Send {
    fn endpoint(&self) -> &Endpoint;
}

/// Connection-level parameters passed to [`Connector::connect`]. The
/// password is supplied separately from [`ConnectionOptions`] because
/// `update_secret` can change it between reconnect attempts.
///
/// [`ConnectionOptions`]: crate::ConnectionOptions
pub struct ConnectArgs<'a> {
    pub virtual_host: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub client_provided_name: Option<&'a str>,
    pub continuation_timeout: Duration,
}

/// Factory for frame handlers and raw connections.
pub trait Connector: Send + Sync {
    /// Open a frame-level transport to one endpoint. Errors propagate to the
    /// caller, which treats them as a failed connect attempt.
    fn create_frame_handler(&self, endpoint: &Endpoint) -> Result<Box<dyn FrameHandler>>;

    /// Perform the protocol handshake over an established frame handler and
    /// return the live connection.
    fn connect(
        &self,
        frame_handler: Box<dyn FrameHandler>,
        args: ConnectArgs,
    ) -> Result<Arc<dyn RawConnection>>;
}

/// The low-level, non-recovering connection. One instance per transport; a
/// replacement instance is created on every recovery attempt.
pub trait RawConnection: Send + Sync {
    fn endpoint(&self) -> Endpoint;
    fn local_port(&self) -> u16;
    fn channel_max(&self) -> u16;
    fn frame_max(&self) -> u32;
    fn heartbeat(&self) -> u16;
    fn is_open(&self) -> bool;
    fn close_reason(&self) -> Option<ShutdownReason>;
    fn server_properties(&self) -> FieldTable;
    fn client_properties(&self) -> FieldTable;
    fn known_hosts(&self) -> Vec<Endpoint>;

    /// Route lifecycle events to the given sink, replacing any previous sink.
    fn set_event_sink(&self, sink: EventSink);

    /// Transfer identity (client-provided name, known-hosts list) from a
    /// defunct predecessor so outside observers see continuity.
    fn take_over(&self, predecessor: &dyn RawConnection) -> Result<()>;

    /// Open a fresh session (wire channel) on this connection.
    fn create_session(&self) -> Result<Box<dyn Session>>;

    fn close(&self, code: u16, text: &str, timeout: Option<Duration>) -> Result<()>;
    fn abort(&self, code: u16, text: &str, timeout: Option<Duration>);
    fn update_secret(&self, new_secret: &str, reason: &str) -> Result<()>;
}

/// A single non-recovering wire channel. Sessions are owned by exactly one
/// channel proxy at a time and are discarded wholesale at takeover.
pub trait Session: Send {
    fn channel_id(&self) -> u16;
    fn is_open(&self) -> bool;

    fn exchange_declare(
        &mut self,
        exchange: &str,
        kind: &ExchangeType,
        options: &ExchangeDeclareOptions,
    ) -> Result<()>;
    fn exchange_delete(&mut self, exchange: &str, if_unused: bool) -> Result<()>;

    /// Declare a queue. Returns the broker-assigned name, which differs from
    /// `queue` when an empty (server-named) declaration was requested.
    fn queue_declare(&mut self, queue: &str, options: &QueueDeclareOptions) -> Result<String>;
    fn queue_delete(&mut self, queue: &str, options: &QueueDeleteOptions) -> Result<Option<u32>>;

    fn queue_bind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<()>;
    fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<()>;
    fn exchange_bind(
        &mut self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<()>;
    fn exchange_unbind(
        &mut self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<()>;

    /// Start a consumer. `consumer_tag` may be empty to let the broker pick;
    /// the actual tag is returned. Deliveries and consumer lifecycle
    /// messages flow through `deliveries`.
    fn basic_consume(
        &mut self,
        queue: &str,
        consumer_tag: &str,
        options: &ConsumerOptions,
        deliveries: Sender<ConsumerMessage>,
    ) -> Result<String>;
    fn basic_cancel(&mut self, consumer_tag: &str) -> Result<()>;

    fn basic_qos(&mut self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<()>;
    fn confirm_select(&mut self) -> Result<()>;
    fn tx_select(&mut self) -> Result<()>;

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
        properties: &AMQPProperties,
        body: &[u8],
    ) -> Result<()>;
    fn basic_ack(&mut self, delivery_tag: u64, multiple: bool) -> Result<()>;
    fn basic_nack(&mut self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()>;
    fn basic_reject(&mut self, delivery_tag: u64, requeue: bool) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
