use crate::{Channel, Delivery, FieldTable, Result};
use crossbeam_channel::Receiver;
use std::cell::Cell;
use std::sync::{Arc, Mutex};

/// Options passed to the server when starting a consumer. Recorded with the
/// subscription so recovery re-subscribes with identical settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConsumerOptions {
    /// Do not deliver messages published on this consumer's own connection.
    pub no_local: bool,

    /// The server considers every delivery acknowledged as soon as it is
    /// sent; the client must not ack.
    pub no_ack: bool,

    /// Require that this consumer is the only one attached to the queue.
    pub exclusive: bool,

    /// Optional server- or plugin-specific arguments.
    pub arguments: FieldTable,
}

/// Messages arriving on a consumer's delivery stream.
// Clippy warns that the Delivery variant is much larger than the others, but
// nearly every instance is a Delivery.
#[allow(clippy::large_enum_variant)]
#[derive(Clone, Debug)]
pub enum ConsumerMessage {
    /// A delivered message.
    Delivery(Delivery),

    /// The client cancelled the consumer, e.g. via
    /// [`Consumer::cancel`](struct.Consumer.html#method.cancel).
    ClientCancelled,

    /// The server cancelled the consumer, e.g. because its queue was deleted.
    ServerCancelled,

    /// The channel owning this consumer was closed by the client.
    ClientClosedChannel,

    /// The connection owning this consumer was closed by the client.
    ClientClosedConnection,
}

/// A message consumer associated with an AMQP queue.
///
/// The delivery stream survives connection recovery: after a successful
/// recovery pass the consumer is re-subscribed on the replacement transport
/// and deliveries resume on the same receiver. The broker may issue a
/// different tag at re-subscription, in which case
/// [`consumer_tag`](#method.consumer_tag) reports the new tag from then on.
pub struct Consumer<'a> {
    channel: &'a Channel,
    tag: Arc<Mutex<String>>,
    rx: Receiver<ConsumerMessage>,
    cancelled: Cell<bool>,
}

impl Drop for Consumer<'_> {
    fn drop(&mut self) {
        let _ = self.cancel();
    }
}

impl Consumer<'_> {
    pub(crate) fn new(
        channel: &Channel,
        tag: Arc<Mutex<String>>,
        rx: Receiver<ConsumerMessage>,
    ) -> Consumer {
        Consumer {
            channel,
            tag,
            rx,
            cancelled: Cell::new(false),
        }
    }

    /// The current consumer tag. This is the tag assigned at subscription
    /// time, or the replacement tag the broker issued during the most recent
    /// recovery.
    pub fn consumer_tag(&self) -> String {
        self.tag.lock().unwrap().clone()
    }

    pub(crate) fn tag_cell(&self) -> &Arc<Mutex<String>> {
        &self.tag
    }

    /// The `crossbeam_channel::Receiver` on which messages are delivered. The
    /// sending side lives in the recorded subscription and is dropped at
    /// cancellation, so the stream ends once a non-`Delivery` message has
    /// been received.
    #[inline]
    pub fn receiver(&self) -> &Receiver<ConsumerMessage> {
        &self.rx
    }

    /// Cancel this consumer.
    ///
    /// Does not consume `self` because cancellation is inherently racy; the
    /// server may still be sending deliveries while the cancel is in flight.
    /// Second and later calls return `Ok`; capture the first call's `Err` if
    /// you care about cancellation failures.
    pub fn cancel(&self) -> Result<()> {
        if self.cancelled.get() {
            return Ok(());
        }
        self.cancelled.set(true);
        self.channel.basic_cancel(self)
    }

    /// Calls [`Delivery::ack`](struct.Delivery.html#method.ack) on `delivery` using the channel
    /// that contains this consumer.
    #[inline]
    pub fn ack(&self, delivery: &Delivery) -> Result<()> {
        delivery.ack(self.channel, false)
    }

    /// Calls [`Delivery::reject`](struct.Delivery.html#method.reject) on `delivery` using the
    /// channel that contains this consumer.
    #[inline]
    pub fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        delivery.reject(self.channel, requeue)
    }
}
