use crate::{Channel, Consumer, ConsumerOptions, Exchange, FieldTable, Result};

/// Options passed to the server when declaring a queue.
///
/// The [`default`](#impl-Default) implementation sets all boolean fields to
/// false and has an empty set of arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeclareOptions {
    /// If true, declares queue as durable (survives server restarts); if false, declares queue as
    /// transient (will be deleted on a server restart).
    pub durable: bool,

    /// If true, declares queue as exclusive: the queue may only be accessed by the current
    /// connection, and it will be deleted when the connection closes.
    pub exclusive: bool,

    /// If true, declares queue as auto-delete: the server will delete it once its last consumer
    /// disconnects.
    pub auto_delete: bool,

    /// Extra arguments; these are optional in general, but may be needed for some plugins or
    /// server-specific features.
    pub arguments: FieldTable,
}

/// Options passed to the server when deleting a queue.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeleteOptions {
    /// If true, the server will only delete the queue if it has no consumers.
    pub if_unused: bool,

    /// If true, the server will only delete the queue if it has no messages.
    pub if_empty: bool,
}

/// Handle for a declared queue.
///
/// The handle carries the name the broker assigned at declaration time. A
/// server-named queue may be redeclared under a different name during
/// recovery; register a
/// [queue-name-changed listener](crate::Connection::register_queue_name_changed_listener)
/// to observe renames.
pub struct Queue<'a> {
    channel: &'a Channel,
    name: String,
}

impl Queue<'_> {
    pub(crate) fn new(channel: &Channel, name: String) -> Queue {
        Queue { channel, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consume(&self, options: ConsumerOptions) -> Result<Consumer> {
        self.channel.basic_consume(self.name(), options)
    }

    pub fn bind<S: Into<String>>(
        &self,
        exchange: &Exchange,
        routing_key: S,
        arguments: FieldTable,
    ) -> Result<()> {
        self.channel
            .queue_bind(self.name(), exchange.name(), routing_key, arguments)
    }

    pub fn unbind<S: Into<String>>(
        &self,
        exchange: &Exchange,
        routing_key: S,
        arguments: FieldTable,
    ) -> Result<()> {
        self.channel
            .queue_unbind(self.name(), exchange.name(), routing_key, arguments)
    }

    pub fn delete(self, options: QueueDeleteOptions) -> Result<Option<u32>> {
        self.channel.queue_delete(self.name(), options)
    }
}
