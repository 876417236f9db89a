use crate::errors::Error;
use crate::transport::{ConnectionBlockedNotification, ShutdownReason};
use log::error;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Payload of a `queue_name_changed_after_recovery` notification: a
/// server-named queue came back from redeclaration under a different name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueNameChange {
    pub old_name: String,
    pub new_name: String,
}

/// Payload of a `consumer_tag_changed_after_recovery` notification: the
/// broker issued a different tag when a consumer was re-subscribed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerTagChange {
    pub old_tag: String,
    pub new_tag: String,
}

/// A panic captured while running a user-registered listener.
#[derive(Clone, Debug)]
pub struct CallbackException {
    /// Which event kind the panicking listener was registered for.
    pub context: &'static str,
    /// The panic payload, rendered as a string.
    pub message: String,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A registry of callbacks for one event kind. Every callback is invoked
/// through a wrapper that captures panics and routes them to the
/// `callback_exception` registry, so a misbehaving listener cannot take down
/// the emitting thread.
pub(crate) struct NotificationListeners<T> {
    context: &'static str,
    inner: Arc<Mutex<Inner<T>>>,
}

struct Inner<T> {
    next_id: u64,
    listeners: HashMap<u64, Callback<T>>,
}

impl<T: 'static> NotificationListeners<T> {
    pub(crate) fn new(context: &'static str) -> Self {
        NotificationListeners {
            context,
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    pub(crate) fn register<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Arc::new(listener));

        let inner = Arc::downgrade(&self.inner);
        ListenerGuard {
            unregister: Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.lock().unwrap().listeners.remove(&id);
                }
            }),
        }
    }

    /// Invoke every registered listener with `note`. Panics are captured and
    /// reported through `faults` (when given) rather than unwinding into the
    /// caller. The listener map lock is not held while callbacks run.
    pub(crate) fn broadcast(&self, note: &T, faults: Option<&NotificationListeners<CallbackException>>) {
        let callbacks: Vec<Callback<T>> = {
            let inner = self.inner.lock().unwrap();
            inner.listeners.values().cloned().collect()
        };
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(note))) {
                let message = panic_message(payload);
                error!("{} listener panicked: {}", self.context, message);
                if let Some(faults) = faults {
                    faults.broadcast(
                        &CallbackException {
                            context: self.context,
                            message,
                        },
                        None,
                    );
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Keeps a registered listener alive. Dropping the guard unregisters the
/// listener.
pub struct ListenerGuard {
    unregister: Box<dyn FnOnce() + Send>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let unregister = std::mem::replace(&mut self.unregister, Box::new(|| ()));
        unregister();
    }
}

/// All per-event registries for one connection, plus typed emit helpers that
/// route listener panics to the `callback_exception` registry.
pub(crate) struct EventHub {
    pub(crate) recovery_succeeded: NotificationListeners<()>,
    pub(crate) recovery_error: NotificationListeners<Error>,
    pub(crate) queue_name_changed: NotificationListeners<QueueNameChange>,
    pub(crate) consumer_tag_changed: NotificationListeners<ConsumerTagChange>,
    pub(crate) shutdown: NotificationListeners<ShutdownReason>,
    pub(crate) blocked: NotificationListeners<ConnectionBlockedNotification>,
    pub(crate) callback_exception: NotificationListeners<CallbackException>,
}

impl EventHub {
    pub(crate) fn new() -> EventHub {
        EventHub {
            recovery_succeeded: NotificationListeners::new("recovery_succeeded"),
            recovery_error: NotificationListeners::new("connection_recovery_error"),
            queue_name_changed: NotificationListeners::new("queue_name_changed_after_recovery"),
            consumer_tag_changed: NotificationListeners::new("consumer_tag_changed_after_recovery"),
            shutdown: NotificationListeners::new("connection_shutdown"),
            blocked: NotificationListeners::new("connection_blocked"),
            callback_exception: NotificationListeners::new("callback_exception"),
        }
    }

    pub(crate) fn emit_recovery_succeeded(&self) {
        self.recovery_succeeded
            .broadcast(&(), Some(&self.callback_exception));
    }

    pub(crate) fn emit_recovery_error(&self, err: &Error) {
        self.recovery_error
            .broadcast(err, Some(&self.callback_exception));
    }

    pub(crate) fn emit_queue_name_changed(&self, change: &QueueNameChange) {
        self.queue_name_changed
            .broadcast(change, Some(&self.callback_exception));
    }

    pub(crate) fn emit_consumer_tag_changed(&self, change: &ConsumerTagChange) {
        self.consumer_tag_changed
            .broadcast(change, Some(&self.callback_exception));
    }

    pub(crate) fn emit_shutdown(&self, reason: &ShutdownReason) {
        self.shutdown.broadcast(reason, Some(&self.callback_exception));
    }

    pub(crate) fn emit_blocked(&self, note: &ConnectionBlockedNotification) {
        self.blocked.broadcast(note, Some(&self.callback_exception));
    }
}
