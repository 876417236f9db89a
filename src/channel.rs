use crate::consumer::{Consumer, ConsumerMessage, ConsumerOptions};
use crate::delivery::Delivery;
use crate::errors::*;
use crate::exchange::{Exchange, ExchangeDeclareOptions, ExchangeType};
use crate::publish::Publish;
use crate::queue::{Queue, QueueDeclareOptions, QueueDeleteOptions};
use crate::topology::{
    BindingKind, RecordedBinding, RecordedConsumer, RecordedExchange, RecordedQueue,
    TopologyRegistry,
};
use crate::transport::{RawConnection, Session};
use crate::FieldTable;
use log::{debug, trace};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Qos {
    prefetch_size: u32,
    prefetch_count: u16,
}

// Channel-local state the broker forgets when the wire channel dies; replayed
// verbatim onto the replacement session before topology recovery runs.
#[derive(Clone, Copy, Debug, Default)]
struct ChannelState {
    confirms_enabled: bool,
    transactional: bool,
    qos_global: Option<Qos>,
    qos_per_consumer: Option<Qos>,
}

enum SessionSlot {
    Open(Box<dyn Session>),
    Closed,
}

pub(crate) struct ChannelCore {
    channel_number: u16,
    topology: Arc<TopologyRegistry>,
    // Lock order: this is a leaf lock; never taken while holding the channel
    // registry or entities lock.
    session: Mutex<SessionSlot>,
    state: Mutex<ChannelState>,
    unregister: Mutex<Option<Box<dyn FnOnce(u16) + Send>>>,
}

impl ChannelCore {
    pub(crate) fn new(
        channel_number: u16,
        session: Box<dyn Session>,
        topology: Arc<TopologyRegistry>,
        unregister: Box<dyn FnOnce(u16) + Send>,
    ) -> ChannelCore {
        ChannelCore {
            channel_number,
            topology,
            session: Mutex::new(SessionSlot::Open(session)),
            state: Mutex::new(ChannelState::default()),
            unregister: Mutex::new(Some(unregister)),
        }
    }

    pub(crate) fn channel_number(&self) -> u16 {
        self.channel_number
    }

    pub(crate) fn call_session<T>(
        &self,
        f: impl FnOnce(&mut dyn Session) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.session.lock().unwrap();
        match &mut *slot {
            SessionSlot::Open(session) => f(session.as_mut()),
            SessionSlot::Closed => ClientClosedChannelSnafu.fail(),
        }
    }

    /// Swap in a fresh session on the replacement transport and replay
    /// channel-local state: confirm/tx mode first, then prefetch settings.
    /// Consumer re-subscription is driven later by the connection-level
    /// recovery step.
    pub(crate) fn automatically_recover(&self, transport: &dyn RawConnection) -> Result<()> {
        let state = *self.state.lock().unwrap();

        let mut slot = self.session.lock().unwrap();
        if matches!(&*slot, SessionSlot::Closed) {
            // closed concurrently; nothing to recover
            return Ok(());
        }
        let mut session = transport.create_session()?;
        trace!(
            "channel {} reopened as wire channel {}",
            self.channel_number,
            session.channel_id()
        );

        if state.confirms_enabled {
            session.confirm_select()?;
        }
        if state.transactional {
            session.tx_select()?;
        }
        if let Some(qos) = state.qos_global {
            session.basic_qos(qos.prefetch_size, qos.prefetch_count, true)?;
        }
        if let Some(qos) = state.qos_per_consumer {
            session.basic_qos(qos.prefetch_size, qos.prefetch_count, false)?;
        }

        *slot = SessionSlot::Open(session);
        Ok(())
    }

    fn close_impl(&self) -> Result<()> {
        let result = {
            let mut slot = self.session.lock().unwrap();
            match &mut *slot {
                SessionSlot::Open(session) => {
                    let result = session.close();
                    // Mark the channel closed even if close() failed; the
                    // transport is torn down either way and this prevents
                    // drop from trying again.
                    *slot = SessionSlot::Closed;
                    result
                }
                SessionSlot::Closed => return Ok(()),
            }
        };

        if let Some(unregister) = self.unregister.lock().unwrap().take() {
            unregister(self.channel_number);
        }
        for consumer in self.topology.remove_channel_consumers(self.channel_number) {
            let _ = consumer.deliveries.send(ConsumerMessage::ClientClosedChannel);
            self.topology.maybe_delete_auto_delete_queue(&consumer.queue);
        }

        result
    }
}

/// A channel proxy that survives transport replacement.
///
/// Operations the broker remembers across the session (declarations,
/// bindings, consumers, QoS, publisher confirms, transactions) are recorded
/// as they succeed, so the channel can be rebuilt with identical
/// configuration on a replacement transport after an unexpected disconnect.
/// In-flight publishes are not retransmitted.
pub struct Channel {
    core: Arc<ChannelCore>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.core.close_impl();
    }
}

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>) -> Channel {
        Channel { core }
    }

    /// The connection-local number of this channel proxy. Stable across
    /// recovery, unlike the wire channel id underneath.
    pub fn channel_number(&self) -> u16 {
        self.core.channel_number()
    }

    pub fn close(self) -> Result<()> {
        self.core.close_impl()
    }

    /// Declare an exchange and record it for recovery.
    pub fn exchange_declare<S: Into<String>>(
        &self,
        kind: ExchangeType,
        name: S,
        options: ExchangeDeclareOptions,
    ) -> Result<Exchange> {
        let name = name.into();
        self.core
            .call_session(|s| s.exchange_declare(&name, &kind, &options))?;
        self.core.topology.record_exchange(RecordedExchange {
            name: name.clone(),
            kind,
            options,
        });
        Ok(Exchange::new(self, name))
    }

    /// Delete an exchange. The recorded exchange is removed together with
    /// bindings pointing at it; auto-delete sources of those bindings are
    /// cascaded.
    pub fn exchange_delete<S: AsRef<str>>(&self, name: S, if_unused: bool) -> Result<()> {
        let name = name.as_ref();
        self.core
            .call_session(|s| s.exchange_delete(name, if_unused))?;
        self.core.topology.delete_exchange(name);
        Ok(())
    }

    /// Declare a queue and record it for recovery. Pass an empty name to let
    /// the server name the queue; server-named queues are renamed by the
    /// broker on every redeclaration, including the one recovery performs.
    pub fn queue_declare<S: Into<String>>(
        &self,
        name: S,
        options: QueueDeclareOptions,
    ) -> Result<Queue> {
        let requested = name.into();
        let actual = self
            .core
            .call_session(|s| s.queue_declare(&requested, &options))?;
        self.core.topology.record_queue(RecordedQueue {
            name: actual.clone(),
            options,
            server_named: requested.is_empty(),
            channel_number: self.core.channel_number(),
        });
        Ok(Queue::new(self, actual))
    }

    pub fn queue_delete<S: AsRef<str>>(
        &self,
        name: S,
        options: QueueDeleteOptions,
    ) -> Result<Option<u32>> {
        let name = name.as_ref();
        let message_count = self.core.call_session(|s| s.queue_delete(name, &options))?;
        self.core.topology.delete_queue(name);
        Ok(message_count)
    }

    pub fn queue_bind<S0, S1, S2>(
        &self,
        queue: S0,
        exchange: S1,
        routing_key: S2,
        arguments: FieldTable,
    ) -> Result<()>
    where
        S0: Into<String>,
        S1: Into<String>,
        S2: Into<String>,
    {
        let (queue, exchange, routing_key) = (queue.into(), exchange.into(), routing_key.into());
        self.core
            .call_session(|s| s.queue_bind(&queue, &exchange, &routing_key, &arguments))?;
        self.core.topology.record_binding(RecordedBinding {
            source: exchange,
            destination: queue,
            destination_kind: BindingKind::Queue,
            routing_key,
            arguments,
        });
        Ok(())
    }

    pub fn queue_unbind<S0, S1, S2>(
        &self,
        queue: S0,
        exchange: S1,
        routing_key: S2,
        arguments: FieldTable,
    ) -> Result<()>
    where
        S0: Into<String>,
        S1: Into<String>,
        S2: Into<String>,
    {
        let (queue, exchange, routing_key) = (queue.into(), exchange.into(), routing_key.into());
        self.core
            .call_session(|s| s.queue_unbind(&queue, &exchange, &routing_key, &arguments))?;
        self.core.topology.delete_binding(&RecordedBinding {
            source: exchange.clone(),
            destination: queue,
            destination_kind: BindingKind::Queue,
            routing_key,
            arguments,
        });
        self.core.topology.maybe_delete_auto_delete_exchange(&exchange);
        Ok(())
    }

    pub fn exchange_bind<S0, S1, S2>(
        &self,
        destination: S0,
        source: S1,
        routing_key: S2,
        arguments: FieldTable,
    ) -> Result<()>
    where
        S0: Into<String>,
        S1: Into<String>,
        S2: Into<String>,
    {
        let (destination, source, routing_key) =
            (destination.into(), source.into(), routing_key.into());
        self.core
            .call_session(|s| s.exchange_bind(&destination, &source, &routing_key, &arguments))?;
        self.core.topology.record_binding(RecordedBinding {
            source,
            destination,
            destination_kind: BindingKind::Exchange,
            routing_key,
            arguments,
        });
        Ok(())
    }

    pub fn exchange_unbind<S0, S1, S2>(
        &self,
        destination: S0,
        source: S1,
        routing_key: S2,
        arguments: FieldTable,
    ) -> Result<()>
    where
        S0: Into<String>,
        S1: Into<String>,
        S2: Into<String>,
    {
        let (destination, source, routing_key) =
            (destination.into(), source.into(), routing_key.into());
        self.core
            .call_session(|s| s.exchange_unbind(&destination, &source, &routing_key, &arguments))?;
        self.core.topology.delete_binding(&RecordedBinding {
            source: source.clone(),
            destination,
            destination_kind: BindingKind::Exchange,
            routing_key,
            arguments,
        });
        self.core.topology.maybe_delete_auto_delete_exchange(&source);
        Ok(())
    }

    /// Start a consumer on the given queue and record it for recovery.
    pub fn basic_consume<S: Into<String>>(
        &self,
        queue: S,
        options: ConsumerOptions,
    ) -> Result<Consumer> {
        let queue = queue.into();
        let (tx, rx) = crossbeam_channel::unbounded();
        let deliveries = tx.clone();
        let tag = self
            .core
            .call_session(|s| s.basic_consume(&queue, "", &options, deliveries))?;
        debug!("started consumer {} on queue {}", tag, queue);

        let tag_cell = Arc::new(Mutex::new(tag.clone()));
        self.core.topology.record_consumer(RecordedConsumer {
            tag,
            queue,
            options,
            channel_number: self.core.channel_number(),
            deliveries: tx,
            tag_cell: Arc::clone(&tag_cell),
        });
        Ok(Consumer::new(self, tag_cell, rx))
    }

    /// Cancel a consumer and drop its record; the auto-delete rule is applied
    /// to the queue it was consuming from.
    pub fn basic_cancel(&self, consumer: &Consumer) -> Result<()> {
        let tag = consumer.tag_cell().lock().unwrap().clone();
        self.core.call_session(|s| s.basic_cancel(&tag))?;
        if let Some(record) = self.core.topology.delete_consumer(&tag) {
            let _ = record.deliveries.send(ConsumerMessage::ClientCancelled);
            self.core.topology.maybe_delete_auto_delete_queue(&record.queue);
        }
        Ok(())
    }

    /// Set the channel's prefetch window. Recorded as channel-local state and
    /// replayed after a transport replacement.
    pub fn basic_qos(&self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<()> {
        self.core
            .call_session(|s| s.basic_qos(prefetch_size, prefetch_count, global))?;
        let qos = Qos {
            prefetch_size,
            prefetch_count,
        };
        let mut state = self.core.state.lock().unwrap();
        if global {
            state.qos_global = Some(qos);
        } else {
            state.qos_per_consumer = Some(qos);
        }
        Ok(())
    }

    /// Put the channel into publisher-confirms mode. Recorded as
    /// channel-local state and re-enabled after a transport replacement.
    pub fn enable_publisher_confirms(&self) -> Result<()> {
        self.core.call_session(|s| s.confirm_select())?;
        self.core.state.lock().unwrap().confirms_enabled = true;
        Ok(())
    }

    /// Put the channel into transactional mode. Recorded as channel-local
    /// state and re-enabled after a transport replacement.
    pub fn tx_select(&self) -> Result<()> {
        self.core.call_session(|s| s.tx_select())?;
        self.core.state.lock().unwrap().transactional = true;
        Ok(())
    }

    pub fn basic_publish<S: Into<String>>(&self, exchange: S, publish: Publish) -> Result<()> {
        let exchange = exchange.into();
        self.core.call_session(|s| {
            s.basic_publish(
                &exchange,
                &publish.routing_key,
                publish.mandatory,
                publish.immediate,
                &publish.properties,
                publish.body,
            )
        })
    }

    pub fn basic_ack(&self, delivery: &Delivery, multiple: bool) -> Result<()> {
        self.core
            .call_session(|s| s.basic_ack(delivery.delivery_tag(), multiple))
    }

    pub fn basic_nack(&self, delivery: &Delivery, multiple: bool, requeue: bool) -> Result<()> {
        self.core
            .call_session(|s| s.basic_nack(delivery.delivery_tag(), multiple, requeue))
    }

    pub fn basic_reject(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.core
            .call_session(|s| s.basic_reject(delivery.delivery_tag(), requeue))
    }
}
