//! The in-memory mirror of everything the application has declared on the
//! broker. Channel proxies tee successful declarations in here; the recovery
//! pass walks snapshots of it to rebuild server-side state on a replacement
//! transport.

use crate::consumer::{ConsumerMessage, ConsumerOptions};
use crate::exchange::{ExchangeDeclareOptions, ExchangeType};
use crate::queue::QueueDeclareOptions;
use crossbeam_channel::Sender;
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A recorded exchange declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedExchange {
    pub name: String,
    pub kind: ExchangeType,
    pub options: ExchangeDeclareOptions,
}

/// A recorded queue declaration. `name` is the current broker-side name; for
/// server-named queues it changes across recovery.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedQueue {
    pub name: String,
    pub options: QueueDeclareOptions,
    pub server_named: bool,
    pub channel_number: u16,
}

/// What kind of entity the destination of a binding is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Queue,
    Exchange,
}

/// A recorded binding. Identity is the full 4-tuple plus destination kind;
/// bindings form a set.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedBinding {
    pub source: String,
    pub destination: String,
    pub destination_kind: BindingKind,
    pub routing_key: String,
    pub arguments: crate::FieldTable,
}

/// A recorded consumer subscription. Keyed by tag in the registry; the tag
/// may be re-issued by the broker during recovery, in which case the entry is
/// re-keyed and the shared `tag_cell` (also held by the application's
/// `Consumer` handle) is updated.
#[derive(Clone)]
pub struct RecordedConsumer {
    pub tag: String,
    pub queue: String,
    pub options: ConsumerOptions,
    pub channel_number: u16,
    pub(crate) deliveries: Sender<ConsumerMessage>,
    pub(crate) tag_cell: Arc<Mutex<String>>,
}

impl fmt::Debug for RecordedConsumer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RecordedConsumer")
            .field("tag", &self.tag)
            .field("queue", &self.queue)
            .field("options", &self.options)
            .field("channel_number", &self.channel_number)
            .finish()
    }
}

/// Point-in-time copy of the four collections, taken under the entities lock
/// so replay can iterate without holding it.
#[derive(Clone, Debug, Default)]
pub(crate) struct TopologySnapshot {
    pub(crate) exchanges: Vec<RecordedExchange>,
    pub(crate) queues: Vec<RecordedQueue>,
    pub(crate) bindings: Vec<RecordedBinding>,
    pub(crate) consumers: Vec<RecordedConsumer>,
}

#[derive(Default)]
struct Entities {
    exchanges: IndexMap<String, RecordedExchange>,
    queues: IndexMap<String, RecordedQueue>,
    bindings: Vec<RecordedBinding>,
    consumers: IndexMap<String, RecordedConsumer>,
}

/// Thread-safe store of recorded exchanges, queues, bindings, and consumers.
///
/// All four collections live under one mutex (the entities lock). Every
/// method acquires and releases it; none performs I/O while holding it.
/// Composite operations (auto-delete cascades, queue renames) are therefore
/// atomic with respect to every other registry observer.
pub(crate) struct TopologyRegistry {
    entities: Mutex<Entities>,
}

impl TopologyRegistry {
    pub(crate) fn new() -> TopologyRegistry {
        TopologyRegistry {
            entities: Mutex::new(Entities::default()),
        }
    }

    /// Record an exchange declaration. Last writer wins.
    pub(crate) fn record_exchange(&self, exchange: RecordedExchange) {
        let mut e = self.entities.lock().unwrap();
        e.exchanges.insert(exchange.name.clone(), exchange);
    }

    /// Record a queue declaration. Last writer wins.
    pub(crate) fn record_queue(&self, queue: RecordedQueue) {
        let mut e = self.entities.lock().unwrap();
        e.queues.insert(queue.name.clone(), queue);
    }

    /// Record a binding. Bindings form a set; re-recording an identical
    /// binding is a no-op.
    pub(crate) fn record_binding(&self, binding: RecordedBinding) {
        let mut e = self.entities.lock().unwrap();
        if !e.bindings.contains(&binding) {
            e.bindings.push(binding);
        }
    }

    /// Record a consumer. A record already present under the same tag wins,
    /// matching broker behavior for duplicate tags.
    pub(crate) fn record_consumer(&self, consumer: RecordedConsumer) {
        let mut e = self.entities.lock().unwrap();
        e.consumers.entry(consumer.tag.clone()).or_insert(consumer);
    }

    /// Remove an exchange, drop bindings pointing at it, and cascade the
    /// auto-delete rule to the sources of those bindings.
    pub(crate) fn delete_exchange(&self, name: &str) {
        let mut e = self.entities.lock().unwrap();
        e.exchanges.shift_remove(name);
        remove_bindings_to(&mut e, name, BindingKind::Exchange);
    }

    /// Remove a queue, drop bindings pointing at it, and cascade the
    /// auto-delete rule to the sources of those bindings.
    pub(crate) fn delete_queue(&self, name: &str) {
        let mut e = self.entities.lock().unwrap();
        e.queues.shift_remove(name);
        remove_bindings_to(&mut e, name, BindingKind::Queue);
    }

    /// Remove a single binding. Unbind alone does not cascade; callers that
    /// want the auto-delete rule applied to the source invoke
    /// [`maybe_delete_auto_delete_exchange`](Self::maybe_delete_auto_delete_exchange)
    /// afterwards.
    pub(crate) fn delete_binding(&self, binding: &RecordedBinding) {
        let mut e = self.entities.lock().unwrap();
        e.bindings.retain(|b| b != binding);
    }

    /// Remove a consumer record, returning it so the caller can evaluate the
    /// auto-delete rule for its queue.
    pub(crate) fn delete_consumer(&self, tag: &str) -> Option<RecordedConsumer> {
        let mut e = self.entities.lock().unwrap();
        e.consumers.shift_remove(tag)
    }

    /// Remove the exchange if it is recorded as auto-delete and no recorded
    /// binding uses it as a source.
    pub(crate) fn maybe_delete_auto_delete_exchange(&self, name: &str) {
        let mut e = self.entities.lock().unwrap();
        maybe_delete_auto_delete_exchange(&mut e, name);
    }

    /// Remove the queue if it is recorded as auto-delete and no recorded
    /// consumer references it.
    pub(crate) fn maybe_delete_auto_delete_queue(&self, name: &str) {
        let mut e = self.entities.lock().unwrap();
        let in_use = e.consumers.values().any(|c| c.queue == name);
        if in_use {
            return;
        }
        let auto_delete = e
            .queues
            .get(name)
            .map(|q| q.options.auto_delete)
            .unwrap_or(false);
        if auto_delete {
            e.queues.shift_remove(name);
        }
    }

    /// Re-key a queue after the broker assigned it a new name during
    /// recovery. In one atomic step: the queue entry moves to the new name,
    /// every binding destined for the old name is rewritten, and every
    /// consumer consuming from the old name is rewritten. No observer can see
    /// the intermediate state.
    pub(crate) fn rename_queue(&self, old_name: &str, new_name: &str) {
        let mut e = self.entities.lock().unwrap();
        if let Some(mut queue) = e.queues.shift_remove(old_name) {
            queue.name = new_name.to_string();
            e.queues.insert(new_name.to_string(), queue);
        }
        for binding in e.bindings.iter_mut() {
            if binding.destination_kind == BindingKind::Queue && binding.destination == old_name {
                binding.destination = new_name.to_string();
            }
        }
        for consumer in e.consumers.values_mut() {
            if consumer.queue == old_name {
                consumer.queue = new_name.to_string();
            }
        }
    }

    /// Re-key a consumer after the broker issued a different tag during
    /// recovery. Updates the shared tag cell so application-held handles
    /// observe the new tag.
    pub(crate) fn rekey_consumer(&self, old_tag: &str, new_tag: &str) {
        let mut e = self.entities.lock().unwrap();
        if let Some(mut consumer) = e.consumers.shift_remove(old_tag) {
            consumer.tag = new_tag.to_string();
            *consumer.tag_cell.lock().unwrap() = new_tag.to_string();
            e.consumers.insert(new_tag.to_string(), consumer);
        }
    }

    /// Remove and return every consumer owned by the given channel; used when
    /// a channel proxy closes.
    pub(crate) fn remove_channel_consumers(&self, channel_number: u16) -> Vec<RecordedConsumer> {
        let mut e = self.entities.lock().unwrap();
        let tags: Vec<String> = e
            .consumers
            .values()
            .filter(|c| c.channel_number == channel_number)
            .map(|c| c.tag.clone())
            .collect();
        tags.iter()
            .filter_map(|tag| e.consumers.shift_remove(tag))
            .collect()
    }

    pub(crate) fn snapshot(&self) -> TopologySnapshot {
        let e = self.entities.lock().unwrap();
        TopologySnapshot {
            exchanges: e.exchanges.values().cloned().collect(),
            queues: e.queues.values().cloned().collect(),
            bindings: e.bindings.clone(),
            consumers: e.consumers.values().cloned().collect(),
        }
    }

    pub(crate) fn exchange_count(&self) -> usize {
        self.entities.lock().unwrap().exchanges.len()
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.entities.lock().unwrap().queues.len()
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.entities.lock().unwrap().bindings.len()
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.entities.lock().unwrap().consumers.len()
    }
}

// Shared tail of delete_exchange/delete_queue: drop bindings whose
// destination is the deleted entity, then apply the auto-delete rule to each
// dropped binding's source.
fn remove_bindings_to(e: &mut Entities, destination: &str, kind: BindingKind) {
    let mut orphaned_sources = Vec::new();
    e.bindings.retain(|b| {
        if b.destination_kind == kind && b.destination == destination {
            orphaned_sources.push(b.source.clone());
            false
        } else {
            true
        }
    });
    for source in orphaned_sources {
        maybe_delete_auto_delete_exchange(e, &source);
    }
}

fn maybe_delete_auto_delete_exchange(e: &mut Entities, name: &str) {
    let in_use = e.bindings.iter().any(|b| b.source == name);
    if in_use {
        return;
    }
    let auto_delete = e
        .exchanges
        .get(name)
        .map(|x| x.options.auto_delete)
        .unwrap_or(false);
    if auto_delete {
        e.exchanges.shift_remove(name);
    }
}
