use thiserror::Error;

/// Inbound bytes that can't be turned into a [`crate::share::Share`]
#[derive(Debug, Error)]
pub enum MalformedShare {
    #[error("Failed to decode share: {0}")]
    Decoding(#[from] bincode::Error),
    #[error("Layer {layer} has dims {dims:?} but {values} values")]
    InconsistentLayer {
        layer: usize,
        dims: Vec<u32>,
        values: usize,
    },
}

/// Shares of one batch disagree on the model layout
///
/// Clients are expected to be configured with the same model, so this is
/// an operator error rather than something a round can recover from.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Cannot aggregate an empty batch")]
    EmptyBatch,
    #[error("Client {client} sent {found} layers, expected {expected}")]
    LayerCount {
        client: usize,
        expected: usize,
        found: usize,
    },
    #[error("Client {client} sent layer {layer} with shape {found:?}, expected {expected:?}")]
    LayerShape {
        client: usize,
        layer: usize,
        expected: Vec<u32>,
        found: Vec<u32>,
    },
}

/// Failure to finish a round whose batch was already drained
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("Inconsistent client configuration, round abandoned: {0}")]
    ShapeMismatch(#[from] AggregationError),
    #[error("Failed to encode aggregated model: {0}")]
    ModelEncoding(#[source] bincode::Error),
    #[error("Broadcast failed, round completed without delivery: {0:#}")]
    Broadcast(#[source] anyhow::Error),
}

/// Failure of a single submission passing through the coordinator
///
/// None of these leave the buffer in a half-updated state: by the time a
/// [`SubmitError::Round`] is returned the share was appended and the batch
/// was drained.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Round {round} failed: {source}")]
    Round {
        round: u64,
        /// Shares left in the buffer for the next round
        carried_over: usize,
        #[source]
        source: RoundError,
    },
    #[error("Submission was interrupted: {0}")]
    Interrupted(#[source] tokio::task::JoinError),
}
