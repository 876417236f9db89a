use super::{test_options, with_cluster, with_cluster_options, RECV_TIMEOUT};
use crate::errors::Error;
use crate::{
    ConsumerOptions, Endpoint, ExchangeDeclareOptions, ExchangeType, FieldTable,
    QueueDeclareOptions, ShutdownInitiator,
};
use crossbeam_channel::{unbounded, Receiver, Sender};

fn capture<T: Send + 'static>() -> (Sender<T>, Receiver<T>) {
    unbounded()
}

#[test]
fn simple_reconnect_preserves_topology() {
    with_cluster(|cluster, conn| {
        let ch = conn.create_channel().unwrap();
        let x = ch
            .exchange_declare(
                ExchangeType::Direct,
                "x",
                ExchangeDeclareOptions::default(),
            )
            .unwrap();
        let q = ch.queue_declare("q", QueueDeclareOptions::default()).unwrap();
        q.bind(&x, "k", FieldTable::default()).unwrap();
        let consumer = q.consume(ConsumerOptions::default()).unwrap();
        let original_tag = consumer.consumer_tag();

        let (done_tx, done_rx) = capture();
        let _g = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });

        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        // exactly one recovery pass
        assert!(done_rx.try_recv().is_err());

        // replacement transport on the next endpoint in the list
        assert_eq!(cluster.connection_count(), 2);
        assert_eq!(cluster.current().fake_endpoint().host, "broker-b");
        assert!(cluster.current().was_taken_over());
        assert!(conn.is_open());

        // registry structurally unchanged
        assert_eq!(conn.recorded_exchange_count(), 1);
        assert_eq!(conn.recorded_queue_count(), 1);
        assert_eq!(conn.recorded_binding_count(), 1);
        assert_eq!(conn.recorded_consumer_count(), 1);
        assert_eq!(consumer.consumer_tag(), original_tag);
    });
}

#[test]
fn server_named_queue_rename_propagates() {
    with_cluster(|cluster, conn| {
        let ch = conn.create_channel().unwrap();
        let x = ch
            .exchange_declare(
                ExchangeType::Direct,
                "x",
                ExchangeDeclareOptions::default(),
            )
            .unwrap();
        let q = ch.queue_declare("", QueueDeclareOptions::default()).unwrap();
        assert_eq!(q.name(), "amq.gen-001");
        q.bind(&x, "k", FieldTable::default()).unwrap();
        let consumer = q.consume(ConsumerOptions::default()).unwrap();
        assert_eq!(consumer.consumer_tag(), "ct-1");

        cluster.reissue_tags();

        let (done_tx, done_rx) = capture();
        let _g0 = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });
        let (rename_tx, rename_rx) = capture();
        let _g1 = conn.register_queue_name_changed_listener(move |change| {
            let _ = rename_tx.send(change.clone());
        });
        let (retag_tx, retag_rx) = capture();
        let _g2 = conn.register_consumer_tag_changed_listener(move |change| {
            let _ = retag_tx.send(change.clone());
        });

        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        let snapshot = conn.core().topology.snapshot();
        assert_eq!(snapshot.queues.len(), 1);
        assert_eq!(snapshot.queues[0].name, "amq.gen-002");
        assert!(snapshot.queues[0].server_named);
        assert_eq!(snapshot.bindings.len(), 1);
        assert_eq!(snapshot.bindings[0].destination, "amq.gen-002");
        assert_eq!(snapshot.consumers.len(), 1);
        assert_eq!(snapshot.consumers[0].queue, "amq.gen-002");
        assert_eq!(snapshot.consumers[0].tag, "ct-2");

        // the application-held handle observes the new tag
        assert_eq!(consumer.consumer_tag(), "ct-2");

        let rename = rename_rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(rename.old_name, "amq.gen-001");
        assert_eq!(rename.new_name, "amq.gen-002");

        let retag = retag_rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(retag.old_tag, "ct-1");
        assert_eq!(retag.new_tag, "ct-2");
    });
}

#[test]
fn partial_topology_failure_is_isolated() {
    with_cluster(|cluster, conn| {
        let ch = conn.create_channel().unwrap();
        let x1 = ch
            .exchange_declare(
                ExchangeType::Direct,
                "x1",
                ExchangeDeclareOptions::default(),
            )
            .unwrap();
        let x2 = ch
            .exchange_declare(
                ExchangeType::Direct,
                "x2",
                ExchangeDeclareOptions::default(),
            )
            .unwrap();
        let q = ch.queue_declare("q", QueueDeclareOptions::default()).unwrap();
        q.bind(&x1, "k", FieldTable::default()).unwrap();
        q.bind(&x2, "k", FieldTable::default()).unwrap();

        cluster.break_exchange("x2");

        let (done_tx, done_rx) = capture();
        let _g0 = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });
        let (err_tx, err_rx) = capture();
        let _g1 = conn.register_recovery_error_listener(move |err: &Error| {
            let _ = err_tx.send(err.to_string());
        });

        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        let errors: Vec<String> = err_rx.try_iter().collect();
        assert_eq!(errors.len(), 2, "got: {:?}", errors);
        assert!(errors[0].contains("exchange x2"));
        assert!(errors[1].contains("binding x2 -> q"));

        // x1, q, and the (x1, q) binding were replayed on the new transport
        let ops = cluster.current().ops();
        assert!(ops.contains(&"exchange_declare x1 direct".to_string()));
        assert!(ops.contains(&"queue_declare q".to_string()));
        assert!(ops.contains(&"queue_bind q x1 k".to_string()));

        // registry unchanged: the failed entities stay recorded for the next
        // recovery pass
        assert_eq!(conn.recorded_exchange_count(), 2);
        assert_eq!(conn.recorded_queue_count(), 1);
        assert_eq!(conn.recorded_binding_count(), 2);
    });
}

#[test]
fn exchange_to_exchange_bindings_are_recovered() {
    with_cluster(|cluster, conn| {
        let ch = conn.create_channel().unwrap();
        let upstream = ch
            .exchange_declare(
                ExchangeType::Topic,
                "upstream",
                ExchangeDeclareOptions::default(),
            )
            .unwrap();
        let downstream = ch
            .exchange_declare(
                ExchangeType::Topic,
                "downstream",
                ExchangeDeclareOptions::default(),
            )
            .unwrap();
        downstream
            .bind_to_source(&upstream, "app.#", FieldTable::default())
            .unwrap();
        assert_eq!(conn.recorded_binding_count(), 1);

        let (done_tx, done_rx) = capture();
        let _g = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });

        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        let ops = cluster.current().ops();
        assert!(ops.contains(&"exchange_bind downstream upstream app.#".to_string()));
        assert_eq!(conn.recorded_binding_count(), 1);

        // unbind afterwards drops the recorded binding again
        downstream
            .unbind_from_source(&upstream, "app.#", FieldTable::default())
            .unwrap();
        assert_eq!(conn.recorded_binding_count(), 0);
    });
}

#[test]
fn deleting_queue_cascades_to_auto_delete_exchange() {
    with_cluster(|_cluster, conn| {
        let ch = conn.create_channel().unwrap();
        let e = ch
            .exchange_declare(
                ExchangeType::Fanout,
                "e",
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..ExchangeDeclareOptions::default()
                },
            )
            .unwrap();
        let q = ch.queue_declare("q", QueueDeclareOptions::default()).unwrap();
        q.bind(&e, "", FieldTable::default()).unwrap();

        ch.queue_delete("q", Default::default()).unwrap();

        assert_eq!(conn.recorded_queue_count(), 0);
        assert_eq!(conn.recorded_binding_count(), 0);
        assert_eq!(conn.recorded_exchange_count(), 0);
    });
}

#[test]
fn application_close_suppresses_recovery() {
    with_cluster(|cluster, conn| {
        let (done_tx, done_rx) = capture();
        let _g = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });

        conn.close().unwrap();

        assert!(!conn.is_open());
        match conn.create_channel().unwrap_err() {
            Error::AlreadyClosed => (),
            err => panic!("unexpected error {}", err),
        }
        match conn.close().unwrap_err() {
            Error::AlreadyClosed => (),
            err => panic!("unexpected error {}", err),
        }

        // terminal: no replacement transport, no recovery notification
        assert!(done_rx.try_recv().is_err());
        assert_eq!(cluster.connection_count(), 1);
    });
}

#[test]
fn reconnect_cycles_endpoints_until_one_accepts() {
    with_cluster(|cluster, conn| {
        let (done_tx, done_rx) = capture();
        let _g0 = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });
        let (err_tx, err_rx) = capture();
        let _g1 = conn.register_recovery_error_listener(move |err: &Error| {
            let _ = err_tx.send(err.to_string());
        });

        cluster.refuse_next(2);
        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        let errors: Vec<String> = err_rx.try_iter().collect();
        assert_eq!(errors.len(), 2, "got: {:?}", errors);
        assert!(errors.iter().all(|e| e.contains("failed to connect")));

        // initial connect, then one attempt per retry in round-robin order
        let hosts: Vec<String> = cluster
            .attempted_endpoints()
            .into_iter()
            .map(|ep: Endpoint| ep.host)
            .collect();
        assert_eq!(hosts, vec!["broker-a", "broker-b", "broker-a", "broker-b"]);
        assert_eq!(cluster.connection_count(), 2);
        assert_eq!(cluster.current().fake_endpoint().host, "broker-b");
    });
}

#[test]
fn disabled_topology_recovery_skips_replay() {
    let options = test_options().topology_recovery_enabled(false);
    with_cluster_options(options, |cluster, conn| {
        let ch = conn.create_channel().unwrap();
        let x = ch
            .exchange_declare(
                ExchangeType::Direct,
                "x",
                ExchangeDeclareOptions::default(),
            )
            .unwrap();
        let q = ch.queue_declare("q", QueueDeclareOptions::default()).unwrap();
        q.bind(&x, "k", FieldTable::default()).unwrap();

        let (done_tx, done_rx) = capture();
        let _g = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });

        cluster.fail_current(ShutdownInitiator::Library);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        // transport and channels came back, but nothing was redeclared
        assert_eq!(cluster.connection_count(), 2);
        let ops = cluster.current().ops();
        assert!(!ops.iter().any(|op| op.starts_with("exchange_declare")));
        assert!(!ops.iter().any(|op| op.starts_with("queue_declare")));

        // records are kept for the next enabled pass (if re-enabled) and for
        // the application's own bookkeeping
        assert_eq!(conn.recorded_exchange_count(), 1);
        assert_eq!(conn.recorded_queue_count(), 1);
        assert_eq!(conn.recorded_binding_count(), 1);
    });
}

#[test]
fn updated_secret_is_used_by_reconnect() {
    with_cluster(|cluster, conn| {
        conn.update_secret("s3cret", "rotation").unwrap();

        let (done_tx, done_rx) = capture();
        let _g = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });

        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        assert_eq!(
            cluster.presented_passwords(),
            vec!["guest".to_string(), "s3cret".to_string()]
        );
    });
}

#[test]
fn blocked_notifications_are_forwarded() {
    use crate::ConnectionBlockedNotification;

    with_cluster(|cluster, conn| {
        let (tx, rx) = capture();
        let _g = conn.register_blocked_listener(move |note: &ConnectionBlockedNotification| {
            let _ = tx.send(note.clone());
        });

        cluster.block_current("low on memory");
        match rx.recv_timeout(RECV_TIMEOUT).unwrap() {
            ConnectionBlockedNotification::Blocked { reason } => {
                assert_eq!(reason, "low on memory")
            }
            note => panic!("unexpected notification {:?}", note),
        }

        cluster.unblock_current();
        match rx.recv_timeout(RECV_TIMEOUT).unwrap() {
            ConnectionBlockedNotification::Unblocked => (),
            note => panic!("unexpected notification {:?}", note),
        }
    });
}

#[test]
fn panicking_listener_is_isolated() {
    with_cluster(|cluster, conn| {
        let _g0 = conn.register_recovery_succeeded_listener(|| {
            panic!("listener misbehaved");
        });
        let (done_tx, done_rx) = capture();
        let _g1 = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });
        let (fault_tx, fault_rx) = capture();
        let _g2 = conn.register_callback_exception_listener(move |fault| {
            let _ = fault_tx.send(fault.message.clone());
        });

        cluster.fail_current(ShutdownInitiator::Peer);

        // the panic was captured, rerouted, and did not stop the broadcast
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
        let fault = fault_rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert!(fault.contains("listener misbehaved"));
        assert!(conn.is_open());
    });
}

#[test]
fn consecutive_failures_recover_each_time() {
    with_cluster(|cluster, conn| {
        let ch = conn.create_channel().unwrap();
        ch.queue_declare("q", QueueDeclareOptions::default()).unwrap();

        let (done_tx, done_rx) = capture();
        let _g = conn.register_recovery_succeeded_listener(move || {
            let _ = done_tx.send(());
        });

        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
        cluster.fail_current(ShutdownInitiator::Peer);
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();

        assert_eq!(cluster.connection_count(), 3);
        assert_eq!(conn.recorded_queue_count(), 1);
        assert!(conn.is_open());
    });
}
