use crate::endpoints::{EndpointSelector, RoundRobin};
use crate::transport::Endpoint;
use std::sync::Arc;
use std::time::Duration;

/// Options that control the recovering connection.
///
/// `ConnectionOptions` uses the builder pattern. The default settings are
/// equivalent to
///
/// ```rust
/// use retether::ConnectionOptions;
///
/// # fn default_connection_options() -> ConnectionOptions {
/// ConnectionOptions::default()
///     .credentials("guest", "guest")
///     .virtual_host("/")
///     .client_provided_name::<String>(None)
///     .topology_recovery_enabled(true)
///     .network_recovery_interval(std::time::Duration::from_secs(5))
///     .continuation_timeout(std::time::Duration::from_secs(20))
/// # }
/// ```
///
/// with an empty endpoint list and a round-robin endpoint selector.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) virtual_host: String,
    pub(crate) client_provided_name: Option<String>,
    pub(crate) topology_recovery_enabled: bool,
    pub(crate) network_recovery_interval: Duration,
    pub(crate) continuation_timeout: Duration,
    pub(crate) endpoint_selector: Arc<dyn EndpointSelector>,
}

impl Default for ConnectionOptions {
    // NOTE: If we change this, make sure to change the doc comment above.
    fn default() -> Self {
        ConnectionOptions {
            endpoints: Vec::new(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            client_provided_name: None,
            topology_recovery_enabled: true,
            network_recovery_interval: Duration::from_secs(5),
            continuation_timeout: Duration::from_secs(20),
            endpoint_selector: Arc::new(RoundRobin::new()),
        }
    }
}

impl ConnectionOptions {
    /// Sets the list of candidate endpoints. One is selected per connect
    /// attempt by the configured [`endpoint_selector`](#method.endpoint_selector).
    pub fn endpoints(self, endpoints: Vec<Endpoint>) -> Self {
        ConnectionOptions { endpoints, ..self }
    }

    /// Sets the credentials presented at handshake. The password may later be
    /// rotated with [`Connection::update_secret`](crate::Connection::update_secret);
    /// reconnect attempts always use the most recent secret.
    pub fn credentials<U: Into<String>, P: Into<String>>(self, username: U, password: P) -> Self {
        ConnectionOptions {
            username: username.into(),
            password: password.into(),
            ..self
        }
    }

    /// Sets the AMQP virtual host.
    pub fn virtual_host<T: Into<String>>(self, virtual_host: T) -> Self {
        ConnectionOptions {
            virtual_host: virtual_host.into(),
            ..self
        }
    }

    /// Sets the client-provided connection name, which survives recovery and
    /// is transferred onto each replacement transport.
    pub fn client_provided_name<T: Into<String>>(self, name: Option<T>) -> Self {
        ConnectionOptions {
            client_provided_name: name.map(Into::into),
            ..self
        }
    }

    /// Enables or disables topology replay after a reconnect. When disabled,
    /// recovery still re-establishes the transport and re-opens channels, but
    /// exchanges, queues, bindings, and consumers are not re-declared.
    pub fn topology_recovery_enabled(self, topology_recovery_enabled: bool) -> Self {
        ConnectionOptions {
            topology_recovery_enabled,
            ..self
        }
    }

    /// Sets the fixed delay between failed recovery attempts.
    pub fn network_recovery_interval(self, network_recovery_interval: Duration) -> Self {
        ConnectionOptions {
            network_recovery_interval,
            ..self
        }
    }

    /// Sets the timeout passed to the underlying connection for synchronous
    /// protocol operations.
    pub fn continuation_timeout(self, continuation_timeout: Duration) -> Self {
        ConnectionOptions {
            continuation_timeout,
            ..self
        }
    }

    /// Sets the strategy used to pick the endpoint for each connect attempt.
    pub fn endpoint_selector(self, endpoint_selector: Arc<dyn EndpointSelector>) -> Self {
        ConnectionOptions {
            endpoint_selector,
            ..self
        }
    }
}
