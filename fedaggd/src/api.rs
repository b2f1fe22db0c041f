use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{Extensions, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fedagg_core::task::TaskGroup;
use fedagg_core::{
    CoordinatorStatus, MalformedShare, RoundCoordinator, RoundError, SenderId, SubmitError,
    SubmitOutcome, Submission,
};
use fedagg_logging::LOG_NET_API;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::metrics::{
    BUFFERED_SHARES, BYTES_RECEIVED_TOTAL, BYTES_SENT_TOTAL, ROUNDS_COMPLETED_TOTAL,
    SUBMISSION_DURATION_SECONDS, SUBMISSIONS_TOTAL,
};

pub const RECV_ENDPOINT: &str = "/recv";
pub const STATUS_ENDPOINT: &str = "/status";

/// Errors a submission can end with, as seen by the submitting client
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    MalformedShare(#[from] MalformedShare),
    #[error("{0}")]
    Submit(#[from] SubmitError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MalformedShare(_) => StatusCode::BAD_REQUEST,
            ApiError::Submit(SubmitError::Round {
                source: RoundError::Broadcast(_),
                ..
            }) => StatusCode::BAD_GATEWAY,
            ApiError::Submit(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            ApiError::MalformedShare(_) => "malformed",
            ApiError::Submit(SubmitError::Round { source, .. }) => match source {
                RoundError::ShapeMismatch(_) => "shape_mismatch",
                RoundError::ModelEncoding(_) => "model_encoding",
                RoundError::Broadcast(_) => "broadcast_failed",
            },
            ApiError::Submit(SubmitError::Interrupted(_)) => "interrupted",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// What a finished submission did to the coordinator, as far as metrics care
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubmissionEffect {
    result: &'static str,
    /// Buffer length right after the submission, if known
    buffered: Option<usize>,
    drained_round: bool,
    bytes_sent: u64,
}

impl SubmissionEffect {
    fn of(result: &Result<SubmitOutcome, ApiError>) -> Self {
        match result {
            Ok(SubmitOutcome::Buffered { buffered, .. }) => Self {
                result: "ok",
                buffered: Some(*buffered),
                drained_round: false,
                bytes_sent: 0,
            },
            Ok(SubmitOutcome::Completed(summary)) => Self {
                result: "ok",
                buffered: Some(summary.carried_over),
                drained_round: true,
                bytes_sent: summary.bytes_sent,
            },
            Err(err @ ApiError::Submit(SubmitError::Round { carried_over, .. })) => Self {
                result: err.metric_label(),
                buffered: Some(*carried_over),
                drained_round: true,
                bytes_sent: 0,
            },
            Err(err) => Self {
                result: err.metric_label(),
                buffered: None,
                drained_round: false,
                bytes_sent: 0,
            },
        }
    }

    fn record(&self) {
        SUBMISSIONS_TOTAL.with_label_values(&[self.result]).inc();
        if let Some(buffered) = self.buffered {
            BUFFERED_SHARES.set(buffered as i64);
        }
        if self.drained_round {
            ROUNDS_COMPLETED_TOTAL.inc();
        }
        BYTES_SENT_TOTAL.inc_by(self.bytes_sent);
    }
}

/// Routes of the submission API, shares larger than `max_share_bytes` are
/// refused with `413`
pub fn router(coordinator: Arc<RoundCoordinator>, max_share_bytes: usize) -> Router {
    Router::new()
        .route(RECV_ENDPOINT, post(recv))
        .route(STATUS_ENDPOINT, get(status))
        .layer(DefaultBodyLimit::max(max_share_bytes))
        .with_state(coordinator)
}

async fn recv(
    State(coordinator): State<Arc<RoundCoordinator>>,
    extensions: Extensions,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let start = Instant::now();
    let sender = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(SenderId::unknown, |ConnectInfo(addr)| SenderId::new(*addr));

    let result = submit(&coordinator, sender, &body).await;

    SUBMISSION_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());
    SubmissionEffect::of(&result).record();
    if let Err(err) = &result {
        warn!(target: LOG_NET_API, %sender, %err, "Submission failed");
    }

    result.map(|_| Json(json!({ "response": "ok" })))
}

async fn submit(
    coordinator: &Arc<RoundCoordinator>,
    sender: SenderId,
    body: &[u8],
) -> Result<SubmitOutcome, ApiError> {
    let submission = Submission::from_bytes(sender, body)?;
    BYTES_RECEIVED_TOTAL.inc_by(submission.wire_len as u64);
    debug!(target: LOG_NET_API, %sender, len = body.len(), "Share received");

    Ok(coordinator.submit(submission).await?)
}

async fn status(State(coordinator): State<Arc<RoundCoordinator>>) -> Json<CoordinatorStatus> {
    Json(coordinator.status().await)
}

/// Binds the submission API and serves it until the task group shuts down,
/// returns the bound address
pub async fn run_api_server(
    bind: SocketAddr,
    coordinator: Arc<RoundCoordinator>,
    max_share_bytes: usize,
    task_group: &TaskGroup,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    let app = router(coordinator, max_share_bytes);

    let shutdown_rx = task_group.make_handle().make_shutdown_rx();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    task_group.spawn("Submission API", |_| async move {
        let graceful = serve.with_graceful_shutdown(shutdown_rx);

        match graceful.await {
            Err(err) => {
                warn!(target: LOG_NET_API, %err, "Error shutting down submission API");
            }
            _ => {
                info!(target: LOG_NET_API, "Successfully shut down submission API");
            }
        }
    });
    info!(target: LOG_NET_API, listen = %local_addr, "Started submission API");

    Ok(local_addr)
}

#[cfg(test)]
mod tests;
