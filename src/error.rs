use thiserror::Error;

/// Failure classes of the bridge core.
///
/// `Auth`, `Send` and `Sink` failures are local to one session attempt, one
/// job or one event and never abort anything beyond their own unit of work.
/// `Data` failures abort the current cycle or handler without a partial
/// commit. `Disconnected` is session-fatal and left to the supervisor.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("sink delivery failed: {0}")]
    Sink(String),

    #[error("datastore error: {0}")]
    Data(#[from] sqlx::Error),

    #[error("session disconnected: {0}")]
    Disconnected(String),
}

impl BridgeError {
    pub fn sink(err: reqwest::Error) -> Self {
        BridgeError::Sink(err.to_string())
    }

    pub fn send(err: reqwest::Error) -> Self {
        BridgeError::Send(err.to_string())
    }
}
