use std::time::Duration;

/// Errors that can occur in the transport layer.
///
/// None of these are fatal to the coordinator: a failed publish is logged
/// and abandoned, and the inbox keeps polling through broker outages.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The broker client rejected a publish request.
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// The broker client rejected a subscribe request.
    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// A publish didn't complete within the configured bound.
    #[error("publish to {topic} timed out after {after:?}")]
    Timeout { topic: String, after: Duration },

    /// Reading the TLS material for the broker connection failed.
    #[error("failed to read {what}: {source}")]
    Credentials {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The transport was shut down and will deliver nothing further.
    #[error("transport closed")]
    Closed,
}
