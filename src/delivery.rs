use crate::{AmqpProperties, Channel, Result};

/// A message delivered to a consumer.
#[derive(Clone, Debug)]
pub struct Delivery {
    delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub content: Vec<u8>,
    pub properties: AmqpProperties,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        exchange: String,
        routing_key: String,
        content: Vec<u8>,
        properties: AmqpProperties,
    ) -> Delivery {
        Delivery {
            delivery_tag,
            redelivered,
            exchange,
            routing_key,
            content,
            properties,
        }
    }

    #[inline]
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    #[inline]
    pub fn ack(&self, channel: &Channel, multiple: bool) -> Result<()> {
        channel.basic_ack(self, multiple)
    }

    #[inline]
    pub fn nack(&self, channel: &Channel, multiple: bool, requeue: bool) -> Result<()> {
        channel.basic_nack(self, multiple, requeue)
    }

    #[inline]
    pub fn reject(&self, channel: &Channel, requeue: bool) -> Result<()> {
        channel.basic_reject(self, requeue)
    }
}
