use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode};
use fedagg_core::{DynBroadcast, FixedPointCodec, IBroadcast, Layer, RoundCoordinator, Share};
use fedagg_core::{RoundError, SubmitError};
use serde_json::Value;
use tower::ServiceExt;

use super::{ApiError, RECV_ENDPOINT, STATUS_ENDPOINT, SubmissionEffect, router};
use crate::config::DEFAULT_MAX_SHARE_BYTES;
use crate::metrics::{ROUNDS_COMPLETED_TOTAL, SUBMISSIONS_TOTAL};

#[derive(Debug, Default)]
struct CountingBroadcast {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl IBroadcast for CountingBroadcast {
    async fn broadcast(&self, _model: Vec<u8>) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("nobody listening");
        }
        Ok(())
    }
}

fn app(quorum: usize) -> (Router, Arc<CountingBroadcast>) {
    app_with_limit(quorum, DEFAULT_MAX_SHARE_BYTES)
}

fn app_with_limit(quorum: usize, max_share_bytes: usize) -> (Router, Arc<CountingBroadcast>) {
    let broadcast = Arc::new(CountingBroadcast::default());
    let coordinator = RoundCoordinator::new(
        NonZeroUsize::new(quorum).expect("non zero"),
        FixedPointCodec::default(),
        broadcast.clone() as DynBroadcast,
    );
    (router(Arc::new(coordinator), max_share_bytes), broadcast)
}

fn share_bytes(value: u64) -> Vec<u8> {
    Share::new(vec![Layer::flat(vec![value, value])]).to_bytes()
}

async fn send_share(app: &Router, body: Vec<u8>) -> anyhow::Result<Response<Body>> {
    Ok(app
        .clone()
        .oneshot(
            Request::post(RECV_ENDPOINT)
                .header("content-type", "application/octet-stream")
                .body(Body::from(body))?,
        )
        .await?)
}

async fn post_share(app: &Router, body: Vec<u8>) -> anyhow::Result<(StatusCode, Value)> {
    let response = send_share(app, body).await?;
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&body)?))
}

async fn get_status(app: &Router) -> anyhow::Result<Value> {
    let response = app
        .clone()
        .oneshot(Request::get(STATUS_ENDPOINT).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[test_log::test(tokio::test)]
async fn acknowledges_and_completes_round() -> anyhow::Result<()> {
    let (app, broadcast) = app(2);

    let (status, body) = post_share(&app, share_bytes(10)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "ok");
    assert_eq!(broadcast.calls.load(Ordering::SeqCst), 0);

    let (status, _) = post_share(&app, share_bytes(10)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(broadcast.calls.load(Ordering::SeqCst), 1);

    let status = get_status(&app).await?;
    assert_eq!(status["quorum"], 2);
    assert_eq!(status["buffered"], 0);
    assert_eq!(status["rounds_completed"], 1);
    assert_eq!(status["bytes_received"], 2 * share_bytes(10).len() as u64);
    assert!(status["bytes_sent"].as_u64().is_some_and(|sent| sent > 0));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn malformed_share_is_rejected_without_touching_buffer() -> anyhow::Result<()> {
    let (app, _broadcast) = app(2);

    let (status, body) = post_share(&app, b"garbage".to_vec()).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());

    let status = get_status(&app).await?;
    assert_eq!(status["buffered"], 0);
    assert_eq!(status["bytes_received"], 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn broadcast_failure_is_reported_to_the_completing_client() -> anyhow::Result<()> {
    let (app, broadcast) = app(1);
    broadcast.fail.store(true, Ordering::SeqCst);

    let (status, body) = post_share(&app, share_bytes(1)).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|err| err.contains("nobody listening"))
    );

    let status = get_status(&app).await?;
    assert_eq!(status["rounds_completed"], 1);
    assert_eq!(status["bytes_sent"], 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn inconsistent_shapes_fail_the_round() -> anyhow::Result<()> {
    let (app, broadcast) = app(2);

    post_share(&app, share_bytes(1)).await?;
    let wide = Share::new(vec![Layer::flat(vec![1, 2, 3])]).to_bytes();
    let (status, _) = post_share(&app, wide).await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(broadcast.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn accepts_shares_of_large_models() -> anyhow::Result<()> {
    let (app, _broadcast) = app(2);
    // 3 MiB of values, above axum's default body limit
    let large = Share::new(vec![Layer::flat(vec![7; 393_216])]).to_bytes();

    let (status, body) = post_share(&app, large.clone()).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "ok");

    let status = get_status(&app).await?;
    assert_eq!(status["buffered"], 1);
    assert_eq!(status["bytes_received"], large.len() as u64);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn share_above_limit_is_refused() -> anyhow::Result<()> {
    let (app, _broadcast) = app_with_limit(2, 1024);
    let large = Share::new(vec![Layer::flat(vec![7; 1024])]).to_bytes();

    let response = send_share(&app, large).await?;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(get_status(&app).await?["buffered"], 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn failed_round_is_counted_in_metrics() -> anyhow::Result<()> {
    let (app, broadcast) = app(2);
    broadcast.fail.store(true, Ordering::SeqCst);
    let failed = SUBMISSIONS_TOTAL.with_label_values(&["broadcast_failed"]);
    let rounds_before = ROUNDS_COMPLETED_TOTAL.get();
    let failed_before = failed.get();

    post_share(&app, share_bytes(1)).await?;
    let (status, _) = post_share(&app, share_bytes(1)).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    // the registry is shared with concurrently running tests
    assert!(ROUNDS_COMPLETED_TOTAL.get() > rounds_before);
    assert!(failed.get() > failed_before);
    assert_eq!(get_status(&app).await?["rounds_completed"], 1);
    Ok(())
}

#[test]
fn failed_round_reports_drained_buffer() {
    let result = Err(ApiError::Submit(SubmitError::Round {
        round: 3,
        carried_over: 1,
        source: RoundError::Broadcast(anyhow::format_err!("client down")),
    }));

    assert_eq!(
        SubmissionEffect::of(&result),
        SubmissionEffect {
            result: "broadcast_failed",
            buffered: Some(1),
            drained_round: true,
            bytes_sent: 0,
        }
    );
}
