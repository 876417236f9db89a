use crate::channel::{Channel, ChannelCore};
use crate::connection_options::ConnectionOptions;
use crate::endpoints::EndpointCycler;
use crate::errors::*;
use crate::notification_listeners::{
    CallbackException, ConsumerTagChange, EventHub, ListenerGuard, QueueNameChange,
};
use crate::recovery::{self, ControlMessage};
use crate::topology::TopologyRegistry;
use crate::transport::{
    ConnectArgs, ConnectionBlockedNotification, Connector, Endpoint, EventSink, RawConnection,
    ShutdownReason, TransportEvent,
};
use crate::FieldTable;
use crossbeam_channel::Sender;
use log::debug;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

const REPLY_SUCCESS: u16 = 200;

struct TransportSlot {
    raw: Option<Arc<dyn RawConnection>>,
    closed: bool,
}

pub(crate) struct ConnectionCore {
    connector: Arc<dyn Connector>,
    pub(crate) options: ConnectionOptions,
    password: Mutex<String>,
    pub(crate) cycler: EndpointCycler,
    // The swap lock. `raw` is only absent after disposal; during a transport
    // swap the replacement is written in a single store under this lock.
    transport: Mutex<TransportSlot>,
    // Channel registry lock. Always acquired before the entities lock inside
    // `topology`, never after.
    channels: Mutex<Vec<Arc<ChannelCore>>>,
    pub(crate) topology: Arc<TopologyRegistry>,
    pub(crate) events: Arc<EventHub>,
    event_tx: Sender<(u64, TransportEvent)>,
    control_tx: Sender<ControlMessage>,
    epoch: AtomicU64,
    next_channel_number: AtomicU16,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionCore {
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn event_sender(&self) -> Sender<(u64, TransportEvent)> {
        self.event_tx.clone()
    }

    pub(crate) fn current_transport(&self) -> Result<Arc<dyn RawConnection>> {
        let slot = self.transport.lock().unwrap();
        if slot.closed {
            return AlreadyClosedSnafu.fail();
        }
        match &slot.raw {
            Some(raw) => Ok(Arc::clone(raw)),
            None => DisposedSnafu.fail(),
        }
    }

    /// Install the replacement transport. Fails if the connection was closed
    /// while the attempt was in flight.
    pub(crate) fn install_transport(&self, raw: Arc<dyn RawConnection>) -> Result<()> {
        let mut slot = self.transport.lock().unwrap();
        if slot.closed {
            return AlreadyClosedSnafu.fail();
        }
        slot.raw = Some(raw);
        Ok(())
    }

    pub(crate) fn mark_closed(&self) {
        self.transport.lock().unwrap().closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.transport.lock().unwrap().closed
    }

    pub(crate) fn channel_snapshot(&self) -> Vec<Arc<ChannelCore>> {
        self.channels.lock().unwrap().clone()
    }

    pub(crate) fn connect_transport(&self) -> Result<Arc<dyn RawConnection>> {
        let frame_handler = self
            .cycler
            .select_one(|endpoint| self.connector.create_frame_handler(endpoint))?;
        let password = self.password.lock().unwrap().clone();
        self.connector.connect(
            frame_handler,
            ConnectArgs {
                virtual_host: &self.options.virtual_host,
                username: &self.options.username,
                password: &password,
                client_provided_name: self.options.client_provided_name.as_deref(),
                continuation_timeout: self.options.continuation_timeout,
            },
        )
    }

    fn remove_channel(&self, channel_number: u16) {
        self.channels
            .lock()
            .unwrap()
            .retain(|core| core.channel_number() != channel_number);
    }

    fn stop_recovery_loop(&self) {
        let _ = self.control_tx.send(ControlMessage::Stop);
    }

    fn join_worker(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// An auto-recovering AMQP connection.
///
/// Wraps a live broker connection and, when the transport is lost for any
/// reason other than an application-initiated close, transparently
/// re-establishes it: a replacement transport is built against the next
/// candidate endpoint, open channels are re-opened with their recorded
/// configuration, and the recorded topology (exchanges, queues, bindings,
/// consumers) is re-declared. Application code observes at most a transient
/// interruption.
///
/// Lifecycle transitions are observable through the `register_*_listener`
/// methods; every listener is invoked through a wrapper that captures panics
/// and reroutes them to the
/// [`callback_exception`](#method.register_callback_exception_listener)
/// listeners instead of unwinding into library threads.
pub struct Connection {
    core: Arc<ConnectionCore>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close_impl(REPLY_SUCCESS, "goodbye", None, true);
    }
}

impl Connection {
    /// Establish the initial transport and start the recovery worker.
    pub fn open(connector: Arc<dyn Connector>, options: ConnectionOptions) -> Result<Connection> {
        let cycler = EndpointCycler::new(
            options.endpoints.clone(),
            Arc::clone(&options.endpoint_selector),
        )?;
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let core = Arc::new(ConnectionCore {
            connector,
            password: Mutex::new(options.password.clone()),
            options,
            cycler,
            transport: Mutex::new(TransportSlot {
                raw: None,
                closed: false,
            }),
            channels: Mutex::new(Vec::new()),
            topology: Arc::new(TopologyRegistry::new()),
            events: Arc::new(EventHub::new()),
            event_tx,
            control_tx,
            epoch: AtomicU64::new(0),
            next_channel_number: AtomicU16::new(1),
            worker: Mutex::new(None),
        });

        let raw = core.connect_transport()?;
        let epoch = core.bump_epoch();
        raw.set_event_sink(EventSink::new(epoch, core.event_sender()));
        debug!("connected to {}", raw.endpoint());
        core.transport.lock().unwrap().raw = Some(raw);

        let worker_core = Arc::clone(&core);
        let handle = Builder::new()
            .name("recovery".to_string())
            .spawn(move || recovery::run(worker_core, event_rx, control_rx))
            .map_err(|source| Error::Io { source })?;
        *core.worker.lock().unwrap() = Some(handle);

        Ok(Connection { core })
    }

    /// True when the current transport is open. False while disconnected
    /// (recovery pending or in progress) and after close.
    pub fn is_open(&self) -> bool {
        match self.core.current_transport() {
            Ok(raw) => raw.is_open(),
            Err(_) => false,
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        Ok(self.core.current_transport()?.endpoint())
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.core.current_transport()?.local_port())
    }

    pub fn channel_max(&self) -> Result<u16> {
        Ok(self.core.current_transport()?.channel_max())
    }

    pub fn frame_max(&self) -> Result<u32> {
        Ok(self.core.current_transport()?.frame_max())
    }

    pub fn heartbeat(&self) -> Result<u16> {
        Ok(self.core.current_transport()?.heartbeat())
    }

    pub fn server_properties(&self) -> Result<FieldTable> {
        Ok(self.core.current_transport()?.server_properties())
    }

    pub fn client_properties(&self) -> Result<FieldTable> {
        Ok(self.core.current_transport()?.client_properties())
    }

    pub fn known_hosts(&self) -> Result<Vec<Endpoint>> {
        Ok(self.core.current_transport()?.known_hosts())
    }

    pub fn close_reason(&self) -> Option<ShutdownReason> {
        self.core
            .current_transport()
            .ok()
            .and_then(|raw| raw.close_reason())
    }

    /// Rotate the secret used to authenticate. The new secret is pushed to
    /// the live transport and stored for use by subsequent reconnects.
    pub fn update_secret(&self, new_secret: &str, reason: &str) -> Result<()> {
        let raw = self.core.current_transport()?;
        raw.update_secret(new_secret, reason)?;
        *self.core.password.lock().unwrap() = new_secret.to_string();
        Ok(())
    }

    /// Open a new channel proxy on the current transport and register it for
    /// recovery.
    pub fn create_channel(&self) -> Result<Channel> {
        let raw = self.core.current_transport()?;
        let session = raw.create_session()?;
        let channel_number = self.core.next_channel_number.fetch_add(1, Ordering::SeqCst);

        let unregister_core = Arc::downgrade(&self.core);
        let core = Arc::new(ChannelCore::new(
            channel_number,
            session,
            Arc::clone(&self.core.topology),
            Box::new(move |number| {
                if let Some(core) = unregister_core.upgrade() {
                    core.remove_channel(number);
                }
            }),
        ));
        self.core.channels.lock().unwrap().push(Arc::clone(&core));
        Ok(Channel::new(core))
    }

    /// Close the connection cleanly: stop the recovery loop, then forward the
    /// close to the transport. Further liveness-dependent calls fail with
    /// [`Error::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        self.close_impl(REPLY_SUCCESS, "goodbye", None, false)
    }

    /// Close with an explicit reply code, text, and timeout.
    pub fn close_with(&self, code: u16, text: &str, timeout: Option<Duration>) -> Result<()> {
        self.close_impl(code, text, timeout, false)
    }

    /// Close, ignoring any errors from the transport.
    pub fn abort(&self) {
        let _ = self.close_impl(REPLY_SUCCESS, "goodbye", None, true);
    }

    /// Abort with an explicit reply code, text, and timeout.
    pub fn abort_with(&self, code: u16, text: &str, timeout: Option<Duration>) {
        let _ = self.close_impl(code, text, timeout, true);
    }

    fn close_impl(
        &self,
        code: u16,
        text: &str,
        timeout: Option<Duration>,
        abort: bool,
    ) -> Result<()> {
        let raw = {
            let mut slot = self.core.transport.lock().unwrap();
            if slot.closed {
                return if abort { Ok(()) } else { AlreadyClosedSnafu.fail() };
            }
            slot.closed = true;
            slot.raw.clone()
        };

        debug!("closing connection");
        self.core.stop_recovery_loop();

        let result = match raw {
            Some(raw) if raw.is_open() => {
                if abort {
                    raw.abort(code, text, timeout);
                    Ok(())
                } else {
                    raw.close(code, text, timeout)
                }
            }
            _ => Ok(()),
        };

        self.core.join_worker();
        result
    }

    /// Number of exchanges currently recorded for recovery.
    pub fn recorded_exchange_count(&self) -> usize {
        self.core.topology.exchange_count()
    }

    /// Number of queues currently recorded for recovery.
    pub fn recorded_queue_count(&self) -> usize {
        self.core.topology.queue_count()
    }

    /// Number of bindings currently recorded for recovery.
    pub fn recorded_binding_count(&self) -> usize {
        self.core.topology.binding_count()
    }

    /// Number of consumers currently recorded for recovery.
    pub fn recorded_consumer_count(&self) -> usize {
        self.core.topology.consumer_count()
    }

    /// Register a listener invoked at the end of each successful recovery
    /// pass.
    pub fn register_recovery_succeeded_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.core
            .events
            .recovery_succeeded
            .register(move |_: &()| listener())
    }

    /// Register a listener invoked for every caught recovery failure, both
    /// failed reconnect attempts and per-entity topology recovery errors.
    pub fn register_recovery_error_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.core.events.recovery_error.register(listener)
    }

    /// Register a listener invoked when a server-named queue is redeclared
    /// under a different name during recovery.
    pub fn register_queue_name_changed_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&QueueNameChange) + Send + Sync + 'static,
    {
        self.core.events.queue_name_changed.register(listener)
    }

    /// Register a listener invoked when a consumer is re-subscribed under a
    /// different tag during recovery.
    pub fn register_consumer_tag_changed_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&ConsumerTagChange) + Send + Sync + 'static,
    {
        self.core.events.consumer_tag_changed.register(listener)
    }

    /// Register a listener for transport shutdown notifications, regardless
    /// of initiator.
    pub fn register_shutdown_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&ShutdownReason) + Send + Sync + 'static,
    {
        self.core.events.shutdown.register(listener)
    }

    /// Register a listener for connection-blocked/unblocked notifications
    /// forwarded from the current transport.
    pub fn register_blocked_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&ConnectionBlockedNotification) + Send + Sync + 'static,
    {
        self.core.events.blocked.register(listener)
    }

    /// Register a listener for panics captured in other listeners.
    pub fn register_callback_exception_listener<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&CallbackException) + Send + Sync + 'static,
    {
        self.core.events.callback_exception.register(listener)
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<ConnectionCore> {
        &self.core
    }
}
