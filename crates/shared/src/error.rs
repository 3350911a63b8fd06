use thiserror::Error;

/// Failure of a single contract invocation. Every variant is recoverable: the
/// session stays where it was and the caller may submit again with fresh input.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("invalid invocation request: {0}")]
    Validation(String),
    #[error("transport failure talking to executor: {0}")]
    Transport(String),
    #[error("executor failed to sign the transaction: {0}")]
    Signing(String),
    #[error("executor rejected the call: {0}")]
    Rejected(String),
}

/// Failure to arm a feed subscription. Mid-stream trouble (undecodable
/// frames, connection loss) is reported through the delivery handler instead,
/// so subscribing is the only fallible feed operation.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to connect event feed: {0}")]
    Connect(String),
}
