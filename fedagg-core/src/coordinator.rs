//! Round coordinator
//!
//! Ties the [`RoundBuffer`] and the [`AggregationEngine`] together. Every
//! submission goes through [`RoundCoordinator::submit`], which holds a single
//! lock over the buffer and the cost counters for the whole transition,
//! including combining and broadcasting a completed round. Submissions that
//! arrive in the meantime wait for the lock and then form the next round.

use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use fedagg_logging::LOG_ROUND;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use crate::aggregation::AggregationEngine;
use crate::error::{RoundError, SubmitError};
use crate::fixed_point::FixedPointCodec;
use crate::round_buffer::RoundBuffer;
use crate::share::{Share, Submission};

/// Delivers an aggregated model to every participating client
#[async_trait]
pub trait IBroadcast: Debug + Send + Sync {
    async fn broadcast(&self, model: Vec<u8>) -> anyhow::Result<()>;
}

pub type DynBroadcast = Arc<dyn IBroadcast>;

/// Traffic volume seen by the coordinator, never reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CostCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    pub quorum: usize,
    pub buffered: usize,
    pub rounds_completed: u64,
    #[serde(flatten)]
    pub counters: CostCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    /// Zero based index of the completed round
    pub round: u64,
    pub model_bytes: usize,
    /// Bytes sent for this round, counting the model once per client
    pub bytes_sent: u64,
    /// Shares left in the buffer for the next round
    pub carried_over: usize,
    pub counters: CostCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The share is waiting for the round to fill up
    Buffered { buffered: usize, quorum: usize },
    /// This submission completed a round
    Completed(RoundSummary),
}

#[derive(Debug)]
struct RoundState {
    buffer: RoundBuffer,
    counters: CostCounters,
    rounds_completed: u64,
}

#[derive(Debug)]
pub struct RoundCoordinator {
    engine: AggregationEngine,
    broadcast: DynBroadcast,
    state: Mutex<RoundState>,
    rounds_tx: watch::Sender<u64>,
}

impl RoundCoordinator {
    pub fn new(quorum: NonZeroUsize, codec: FixedPointCodec, broadcast: DynBroadcast) -> Self {
        let (rounds_tx, _) = watch::channel(0);
        Self {
            engine: AggregationEngine::new(codec),
            broadcast,
            state: Mutex::new(RoundState {
                buffer: RoundBuffer::new(quorum),
                counters: CostCounters::default(),
                rounds_completed: 0,
            }),
            rounds_tx,
        }
    }

    /// Watch the number of completed rounds
    pub fn subscribe_rounds(&self) -> watch::Receiver<u64> {
        self.rounds_tx.subscribe()
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let state = self.state.lock().await;
        CoordinatorStatus {
            quorum: state.buffer.quorum().get(),
            buffered: state.buffer.len(),
            rounds_completed: state.rounds_completed,
            counters: state.counters,
        }
    }

    /// Adds a share to the current round, completing the round if it is the
    /// last one missing
    ///
    /// The transition runs on its own task, so dropping the returned future
    /// (e.g. because the submitting client went away) does not abandon a
    /// drained round halfway through its broadcast.
    pub async fn submit(
        self: &Arc<Self>,
        submission: Submission,
    ) -> Result<SubmitOutcome, SubmitError> {
        let coordinator = Arc::clone(self);
        match tokio::spawn(async move { coordinator.transition(submission).await }).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(SubmitError::Interrupted(err)),
        }
    }

    /// Errors are returned without undoing anything already done: the share
    /// stays appended, a drained batch stays drained.
    async fn transition(&self, submission: Submission) -> Result<SubmitOutcome, SubmitError> {
        let Submission {
            sender,
            share,
            wire_len,
        } = submission;

        let mut state = self.state.lock().await;

        state.buffer.append(share);
        state.counters.bytes_received += wire_len as u64;

        let quorum = state.buffer.quorum().get();
        info!(
            target: LOG_ROUND,
            %sender,
            wire_len,
            buffered = state.buffer.len(),
            quorum,
            "Share received"
        );

        let Some(batch) = state.buffer.try_drain_round() else {
            return Ok(SubmitOutcome::Buffered {
                buffered: state.buffer.len(),
                quorum,
            });
        };

        let round = state.rounds_completed;
        state.rounds_completed += 1;
        // `status()` waits for the lock, so it never lags behind the watch
        self.rounds_tx.send_replace(state.rounds_completed);
        let carried_over = state.buffer.len();

        let model_bytes = self
            .finalize_round(&mut state.counters, round, batch, quorum)
            .await
            .map_err(|source| SubmitError::Round {
                round,
                carried_over,
                source,
            })?;

        info!(
            target: LOG_ROUND,
            round,
            carried_over,
            download_cost = state.counters.bytes_received,
            upload_cost = state.counters.bytes_sent,
            "Round completed"
        );

        Ok(SubmitOutcome::Completed(RoundSummary {
            round,
            model_bytes,
            bytes_sent: model_bytes as u64 * quorum as u64,
            carried_over,
            counters: state.counters,
        }))
    }

    /// Combines a drained batch and broadcasts the model, returns the size
    /// of the broadcast model
    async fn finalize_round(
        &self,
        counters: &mut CostCounters,
        round: u64,
        batch: Vec<Share>,
        num_clients: usize,
    ) -> Result<usize, RoundError> {
        let model = self.engine.combine(batch).inspect_err(|err| {
            error!(
                target: LOG_ROUND,
                round,
                %err,
                "Shares disagree on the model layout, clients are misconfigured"
            );
        })?;
        let model_bytes = model.to_bytes().map_err(RoundError::ModelEncoding)?;
        let model_len = model_bytes.len();

        if let Err(err) = self.broadcast.broadcast(model_bytes).await {
            warn!(
                target: LOG_ROUND,
                round,
                err = %format!("{err:#}"),
                "Broadcast failed, round is completed regardless"
            );
            return Err(RoundError::Broadcast(err));
        }

        // one logical send per client
        counters.bytes_sent += model_len as u64 * num_clients as u64;

        Ok(model_len)
    }
}
