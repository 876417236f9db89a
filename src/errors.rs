use snafu::Snafu;
use std::{io, result};

/// A type alias for handling errors throughout retether.
pub type Result<T> = result::Result<T, Error>;

/// Specific error cases returned by retether.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The connection has been closed; operations that need a live transport
    /// are rejected.
    #[snafu(display("connection is no longer open"))]
    AlreadyClosed,

    /// The connection has been disposed; no further operations are possible.
    #[snafu(display("connection has been disposed"))]
    Disposed,

    /// The channel has been closed by the client.
    #[snafu(display("channel has been closed"))]
    ClientClosedChannel,

    /// The underlying transport went away while an operation was in flight.
    #[snafu(display("underlying transport closed unexpectedly"))]
    UnexpectedTransportClose,

    /// An I/O error occurred; the underlying cause will be an `io::Error`.
    #[snafu(display("I/O error"))]
    Io { source: io::Error },

    /// Establishing a transport to the given endpoint failed.
    #[snafu(display("failed to connect to {}: {}", endpoint, message))]
    ConnectFailure { endpoint: String, message: String },

    /// The server closed the connection with the given reply code and text.
    #[snafu(display("server closed connection (code={} message={})", code, message))]
    ServerClosedConnection { code: u16, message: String },

    /// The server closed the given channel with the given reply code and text.
    #[snafu(display(
        "server closed channel {} (code={} message={})",
        channel_id,
        code,
        message
    ))]
    ServerClosedChannel {
        channel_id: u16,
        code: u16,
        message: String,
    },

    /// No endpoints were configured, so there is nothing to connect to.
    #[snafu(display("endpoint list is empty"))]
    NoEndpoints,

    /// A recorded consumer's owning channel is no longer registered, so the
    /// consumer cannot be re-subscribed.
    #[snafu(display("owning channel {} is no longer available", channel_id))]
    OwningChannelUnavailable { channel_id: u16 },

    /// Recovering a single recorded entity failed. Carries a description of
    /// the entity and the underlying cause; other entities continue to be
    /// recovered.
    #[snafu(display("topology recovery of {} failed: {}", context, source))]
    TopologyRecovery {
        context: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
}
