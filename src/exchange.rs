use crate::{Channel, FieldTable, Publish, Result};

/// Types of AMQP exchanges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeType {
    /// Routes messages to queues whose binding key equals the routing key.
    Direct,

    /// Routes messages to every bound queue, ignoring the routing key.
    Fanout,

    /// Routes messages by pattern-matching the routing key against binding
    /// patterns.
    Topic,

    /// Routes on message header fields instead of the routing key.
    Headers,

    /// A plugin-provided exchange type; should begin with "x-".
    Custom(String),
}

impl AsRef<str> for ExchangeType {
    fn as_ref(&self) -> &str {
        use self::ExchangeType::*;
        match self {
            Direct => "direct",
            Fanout => "fanout",
            Topic => "topic",
            Headers => "headers",
            Custom(s) => s,
        }
    }
}

/// Options passed to the server when declaring an exchange.
///
/// The full option set is recorded alongside the declaration, so a recovered
/// exchange is redeclared with exactly the flags and arguments it was
/// originally created with.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeDeclareOptions {
    /// Declare the exchange as durable; transient exchanges are deleted on a
    /// server restart.
    pub durable: bool,

    /// Delete the exchange once the last binding using it as a source is
    /// removed. The recorded topology applies the same rule client-side.
    pub auto_delete: bool,

    /// Restrict the exchange to exchange-to-exchange bindings; publishers may
    /// not use it directly.
    pub internal: bool,

    /// Optional server- or plugin-specific arguments.
    pub arguments: FieldTable,
}

/// Handle for a declared exchange.
pub struct Exchange<'a> {
    channel: &'a Channel,
    name: String,
}

impl Exchange<'_> {
    pub(crate) fn new(channel: &Channel, name: String) -> Exchange {
        Exchange { channel, name }
    }

    /// The default (empty-named) direct exchange, which needs no declaration.
    pub fn direct(channel: &Channel) -> Exchange {
        let name = "".to_string();
        Exchange { channel, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn publish(&self, publish: Publish) -> Result<()> {
        self.channel.basic_publish(self.name(), publish)
    }

    /// Bind this exchange (as destination) to `source`. Recorded and
    /// re-established during recovery like any queue binding.
    pub fn bind_to_source<S: Into<String>>(
        &self,
        source: &Exchange,
        routing_key: S,
        arguments: FieldTable,
    ) -> Result<()> {
        self.channel
            .exchange_bind(self.name(), source.name(), routing_key, arguments)
    }

    /// Bind `destination` to this exchange (as source).
    pub fn bind_to_destination<S: Into<String>>(
        &self,
        destination: &Exchange,
        routing_key: S,
        arguments: FieldTable,
    ) -> Result<()> {
        self.channel
            .exchange_bind(destination.name(), self.name(), routing_key, arguments)
    }

    pub fn unbind_from_source<S: Into<String>>(
        &self,
        source: &Exchange,
        routing_key: S,
        arguments: FieldTable,
    ) -> Result<()> {
        self.channel
            .exchange_unbind(self.name(), source.name(), routing_key, arguments)
    }

    pub fn unbind_from_destination<S: Into<String>>(
        &self,
        destination: &Exchange,
        routing_key: S,
        arguments: FieldTable,
    ) -> Result<()> {
        self.channel
            .exchange_unbind(destination.name(), self.name(), routing_key, arguments)
    }

    pub fn delete(self, if_unused: bool) -> Result<()> {
        self.channel.exchange_delete(self.name(), if_unused)
    }
}
