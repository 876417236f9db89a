use crate::AmqpProperties;

/// A message to be published, bundled with its routing and delivery flags.
pub struct Publish<'a> {
    pub body: &'a [u8],
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: AmqpProperties,
}

impl<'a> Publish<'a> {
    pub fn new<S: Into<String>>(body: &'a [u8], routing_key: S) -> Publish<'a> {
        Publish {
            body,
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
            properties: AmqpProperties::default(),
        }
    }

    pub fn with_properties<S: Into<String>>(
        body: &'a [u8],
        routing_key: S,
        properties: AmqpProperties,
    ) -> Publish<'a> {
        Publish {
            body,
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
            properties,
        }
    }
}
