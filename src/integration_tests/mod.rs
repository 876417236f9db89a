//! End-to-end scenarios driven through the public API against a scriptable
//! in-process transport stack.

use self::fake::FakeCluster;
use crate::{Connection, ConnectionOptions, Endpoint};
use std::sync::Arc;
use std::time::Duration;

mod recovery;

/// Generous upper bound for waiting on recovery notifications; actual waits
/// are bounded by the 10ms recovery interval.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn two_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("broker-a", 5672),
        Endpoint::new("broker-b", 5672),
    ]
}

fn test_options() -> ConnectionOptions {
    ConnectionOptions::default()
        .endpoints(two_endpoints())
        .network_recovery_interval(Duration::from_millis(10))
}

fn with_cluster<F: FnOnce(&FakeCluster, &Connection)>(f: F) {
    with_cluster_options(test_options(), f)
}

fn with_cluster_options<F: FnOnce(&FakeCluster, &Connection)>(options: ConnectionOptions, f: F) {
    init_logging();
    let cluster = FakeCluster::new();
    let conn = Connection::open(Arc::new(cluster.clone()), options).unwrap();
    f(&cluster, &conn);
}
