//! The recovery worker: detects involuntary transport loss, rebuilds the
//! transport against the next candidate endpoint, re-opens channel proxies,
//! and replays recorded topology in dependency order.

use crate::channel::ChannelCore;
use crate::connection::ConnectionCore;
use crate::errors::*;
use crate::notification_listeners::{ConsumerTagChange, QueueNameChange};
use crate::topology::{BindingKind, RecordedBinding, RecordedConsumer, RecordedQueue};
use crate::transport::{
    ConnectionBlockedNotification, EventSink, RawConnection, Session, TransportEvent,
};
use crossbeam_channel::{select, Receiver, RecvTimeoutError};
use log::{debug, trace, warn};
use std::sync::Arc;

pub(crate) enum ControlMessage {
    Stop,
}

enum LoopOutcome {
    Recovered,
    Stopped,
}

/// Worker entry point. Runs until the connection is closed (stop request or
/// application-initiated shutdown) or every event sender is gone.
pub(crate) fn run(
    core: Arc<ConnectionCore>,
    events: Receiver<(u64, TransportEvent)>,
    control: Receiver<ControlMessage>,
) {
    loop {
        select! {
            recv(events) -> msg => {
                let (epoch, event) = match msg {
                    Ok(msg) => msg,
                    Err(_) => return,
                };
                if epoch != core.current_epoch() {
                    trace!("discarding event from superseded transport (epoch {})", epoch);
                    continue;
                }
                match event {
                    TransportEvent::Blocked { reason } => {
                        core.events
                            .emit_blocked(&ConnectionBlockedNotification::Blocked { reason });
                    }
                    TransportEvent::Unblocked => {
                        core.events.emit_blocked(&ConnectionBlockedNotification::Unblocked);
                    }
                    TransportEvent::Shutdown(reason) => {
                        core.events.emit_shutdown(&reason);
                        if !reason.is_recoverable() || core.is_closed() {
                            core.mark_closed();
                            return;
                        }
                        debug!("transport lost: {}; beginning recovery", reason);
                        if let LoopOutcome::Stopped = recover_until_connected(&core, &control) {
                            return;
                        }
                    }
                }
            },
            recv(control) -> msg => {
                match msg {
                    Ok(ControlMessage::Stop) | Err(_) => {
                        core.mark_closed();
                        return;
                    }
                }
            },
        }
    }
}

// Retry attempts at a fixed interval until one succeeds or a stop request
// arrives. Failed attempts are reported through connection_recovery_error and
// never escape the worker.
fn recover_until_connected(core: &Arc<ConnectionCore>, control: &Receiver<ControlMessage>) -> LoopOutcome {
    loop {
        if stop_requested(control) {
            core.mark_closed();
            return LoopOutcome::Stopped;
        }
        match attempt(core) {
            Ok(()) => {
                debug!("recovery succeeded");
                core.events.emit_recovery_succeeded();
                return LoopOutcome::Recovered;
            }
            Err(err) => {
                warn!("recovery attempt failed: {}", err);
                core.events.emit_recovery_error(&err);
                match control.recv_timeout(core.options.network_recovery_interval) {
                    Ok(ControlMessage::Stop) => {
                        core.mark_closed();
                        return LoopOutcome::Stopped;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        core.mark_closed();
                        return LoopOutcome::Stopped;
                    }
                }
            }
        }
    }
}

fn stop_requested(control: &Receiver<ControlMessage>) -> bool {
    matches!(control.try_recv(), Ok(ControlMessage::Stop))
}

// One full recovery pass: build the replacement transport, take over from the
// defunct one, re-open channels, replay topology.
fn attempt(core: &Arc<ConnectionCore>) -> Result<()> {
    let old = core.current_transport()?;
    let new = core.connect_transport()?;
    debug!("replacement transport established to {}", new.endpoint());

    new.take_over(old.as_ref())?;
    let epoch = core.bump_epoch();
    new.set_event_sink(EventSink::new(epoch, core.event_sender()));
    core.install_transport(Arc::clone(&new))?;

    let channels = core.channel_snapshot();
    for channel in &channels {
        channel.automatically_recover(new.as_ref())?;
    }

    if core.options.topology_recovery_enabled {
        recover_topology(core, new.as_ref(), &channels)?;
    }
    Ok(())
}

// Replay recorded topology in dependency order: exchanges, queues, bindings,
// consumers. Each step iterates over a fresh snapshot so queue renames made
// by the queue step are visible to the binding and consumer steps. Individual
// failures are reported and skipped; they never abort the pass.
fn recover_topology(
    core: &Arc<ConnectionCore>,
    transport: &dyn RawConnection,
    channels: &[Arc<ChannelCore>],
) -> Result<()> {
    let mut replay = transport.create_session()?;

    for exchange in core.topology.snapshot().exchanges {
        trace!("recovering exchange {}", exchange.name);
        if let Err(err) =
            replay.exchange_declare(&exchange.name, &exchange.kind, &exchange.options)
        {
            report_failure(core, format!("exchange {}", exchange.name), err);
        }
    }

    for queue in core.topology.snapshot().queues {
        if let Err(err) = recover_queue(core, replay.as_mut(), channels, &queue) {
            report_failure(core, format!("queue {}", queue.name), err);
        }
    }

    for binding in core.topology.snapshot().bindings {
        if let Err(err) = recover_binding(replay.as_mut(), &binding) {
            report_failure(
                core,
                format!("binding {} -> {}", binding.source, binding.destination),
                err,
            );
        }
    }

    for consumer in core.topology.snapshot().consumers {
        if let Err(err) = recover_consumer(core, channels, &consumer) {
            report_failure(core, format!("consumer {}", consumer.tag), err);
        }
    }

    Ok(())
}

// Redeclare one queue. Server-named queues come back under a fresh name; the
// rename is propagated to dependent bindings and consumers in one atomic
// registry step before the notification fires.
fn recover_queue(
    core: &Arc<ConnectionCore>,
    replay: &mut dyn Session,
    channels: &[Arc<ChannelCore>],
    queue: &RecordedQueue,
) -> Result<()> {
    trace!("recovering queue {}", queue.name);
    let declared = queue.name.clone();
    let requested = if queue.server_named {
        ""
    } else {
        queue.name.as_str()
    };

    let new_name = match owning_channel(channels, queue.channel_number) {
        Some(channel) => channel.call_session(|s| s.queue_declare(requested, &queue.options))?,
        None => replay.queue_declare(requested, &queue.options)?,
    };

    if new_name != declared {
        debug!("queue {} recovered as {}", declared, new_name);
        core.topology.rename_queue(&declared, &new_name);
        core.events.emit_queue_name_changed(&QueueNameChange {
            old_name: declared,
            new_name,
        });
    }
    Ok(())
}

fn recover_binding(replay: &mut dyn Session, binding: &RecordedBinding) -> Result<()> {
    trace!(
        "recovering binding {} -> {}",
        binding.source,
        binding.destination
    );
    match binding.destination_kind {
        BindingKind::Queue => replay.queue_bind(
            &binding.destination,
            &binding.source,
            &binding.routing_key,
            &binding.arguments,
        ),
        BindingKind::Exchange => replay.exchange_bind(
            &binding.destination,
            &binding.source,
            &binding.routing_key,
            &binding.arguments,
        ),
    }
}

// Re-subscribe one consumer on its owning channel. A re-issued tag re-keys
// the registry (and the tag cell shared with the application's handle) before
// the notification fires.
fn recover_consumer(
    core: &Arc<ConnectionCore>,
    channels: &[Arc<ChannelCore>],
    consumer: &RecordedConsumer,
) -> Result<()> {
    trace!("recovering consumer {} on {}", consumer.tag, consumer.queue);
    let channel = owning_channel(channels, consumer.channel_number).ok_or(
        Error::OwningChannelUnavailable {
            channel_id: consumer.channel_number,
        },
    )?;

    let deliveries = consumer.deliveries.clone();
    let new_tag = channel.call_session(|s| {
        s.basic_consume(&consumer.queue, &consumer.tag, &consumer.options, deliveries)
    })?;

    if new_tag != consumer.tag {
        debug!("consumer {} recovered as {}", consumer.tag, new_tag);
        core.topology.rekey_consumer(&consumer.tag, &new_tag);
        core.events.emit_consumer_tag_changed(&ConsumerTagChange {
            old_tag: consumer.tag.clone(),
            new_tag,
        });
    }
    Ok(())
}

fn owning_channel(channels: &[Arc<ChannelCore>], number: u16) -> Option<&Arc<ChannelCore>> {
    channels.iter().find(|c| c.channel_number() == number)
}

fn report_failure(core: &Arc<ConnectionCore>, context: String, cause: Error) {
    let err = Error::TopologyRecovery {
        context,
        source: Box::new(cause),
    };
    warn!("{}", err);
    core.events.emit_recovery_error(&err);
}
