//! retether is an auto-recovering layer over an AMQP 0-9-1 client stack.
//!
//! It wraps a live broker connection and, on unexpected disconnection,
//! transparently re-establishes the transport, re-opens channels, and
//! re-declares the exchanges, queues, bindings, and consumers the
//! application had set up, so application code observes a transient
//! interruption rather than a reset of all client state.
//!
//! The frame codec and socket transport are not implemented here; a concrete
//! stack plugs in through the [`Connector`], [`RawConnection`], and
//! [`Session`] traits.

mod channel;
mod connection;
mod connection_options;
mod consumer;
mod delivery;
mod endpoints;
mod errors;
mod exchange;
mod notification_listeners;
mod publish;
mod queue;
mod recovery;
mod topology;
mod transport;

#[cfg(test)]
mod integration_tests;

pub use channel::Channel;
pub use connection::Connection;
pub use connection_options::ConnectionOptions;
pub use consumer::{Consumer, ConsumerMessage, ConsumerOptions};
pub use delivery::Delivery;
pub use endpoints::{EndpointSelector, Random, RoundRobin};
pub use errors::{Error, Result};
pub use exchange::{Exchange, ExchangeDeclareOptions, ExchangeType};
pub use notification_listeners::{
    CallbackException, ConsumerTagChange, ListenerGuard, QueueNameChange,
};
pub use publish::Publish;
pub use queue::{Queue, QueueDeclareOptions, QueueDeleteOptions};
pub use topology::{
    BindingKind, RecordedBinding, RecordedConsumer, RecordedExchange, RecordedQueue,
};
pub use transport::{
    ConnectArgs, ConnectionBlockedNotification, Connector, Endpoint, EventSink, FrameHandler,
    RawConnection, Session, ShutdownInitiator, ShutdownReason, TransportEvent,
};

pub use amq_protocol::protocol::basic::AMQPProperties as AmqpProperties;
pub use amq_protocol::types::{AMQPValue as AmqpValue, FieldTable};
