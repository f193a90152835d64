//! # Pipeline Tests for the P2P Gatekeeper (qc-18)
//!
//! Drive whole sessions through admission, envelope and authorization with a
//! scripted coordinator and a manual clock.
//!
//! ## Test Categories
//!
//! 1. **Framing** - short frames, heartbeats, envelope shape, headers
//! 2. **Admission** - penalties, rate limits, blacklist, subnet density, purge
//! 3. **Authorization** - privileged peers, forgers, readiness, endpoint limits
//! 4. **Coordinator Failures** - timeouts and errors terminate without penalty

use proptest::prelude::*;
use qc_18_p2p_gatekeeper::domain::error::{AdmissionRejection, AuthorizationFailure};
use qc_18_p2p_gatekeeper::domain::handlers::HandlerCatalog;
use qc_18_p2p_gatekeeper::ipc::CoordinatorRequest;
use qc_18_p2p_gatekeeper::test_utils::default_catalog;
use qc_18_p2p_gatekeeper::{
    CoordinatorError, Frame, FrameOutcome, GatekeeperConfig, GatekeeperWorker, ManualTimeSource,
    MockCoordinator, PeerSession, PolicyConfig, TerminationReason, Violation,
};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// TEST HELPERS
// =============================================================================

struct Harness {
    worker: GatekeeperWorker,
    mock: Arc<MockCoordinator>,
    time: ManualTimeSource,
}

async fn harness_with(mock: MockCoordinator, config: GatekeeperConfig) -> Harness {
    let mock = Arc::new(mock);
    let time = ManualTimeSource::new();
    let worker = GatekeeperWorker::bootstrap(config, mock.clone(), Arc::new(time.clone()))
        .await
        .expect("bootstrap");
    Harness { worker, mock, time }
}

async fn harness() -> Harness {
    harness_with(MockCoordinator::new(), GatekeeperConfig::default()).await
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn text(value: Value) -> Frame {
    Frame::Text(value.to_string())
}

fn handshake() -> Frame {
    text(json!({"event": "#handshake", "data": {}}))
}

fn call(event: &str, payload: Value, cid: Option<u64>) -> Frame {
    let mut envelope = json!({
        "event": event,
        "data": {"data": payload, "headers": {"version": "3.0.0", "port": 4002}},
    });
    if let Some(cid) = cid {
        envelope["cid"] = json!(cid);
    }
    text(envelope)
}

async fn established(h: &Harness, remote: &str) -> PeerSession {
    let mut session = h.worker.admit(addr(remote)).await.expect("admitted");
    assert_eq!(session.handle_frame(handshake()).await, FrameOutcome::Continue);
    session
}

fn reply(outcome: FrameOutcome) -> Value {
    match outcome {
        FrameOutcome::Reply(text) => serde_json::from_str(&text).expect("reply is json"),
        other => panic!("expected reply, got {other:?}"),
    }
}

fn violation(outcome: &FrameOutcome) -> Option<&Violation> {
    match outcome {
        FrameOutcome::Terminate(TerminationReason::Violation(v)) => Some(v),
        _ => None,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// FRAMING
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn short_frames_terminate_and_penalize(frame in proptest::collection::vec(any::<u8>(), 0..10)) {
        prop_assume!(frame.as_slice() != b"#2");

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (outcome, penalized) = rt.block_on(async {
            let h = harness().await;
            let mut session = established(&h, "10.0.0.1:5000").await;
            let outcome = session.handle_frame(Frame::Binary(frame.clone())).await;
            (outcome, h.worker.state().penalties.is_penalized(&ip("10.0.0.1")))
        });

        prop_assert!(
            matches!(violation(&outcome), Some(Violation::FrameTooShort { .. })),
            "unexpected outcome {:?}", outcome
        );
        prop_assert!(penalized);
    }
}

#[tokio::test]
async fn test_heartbeats_closer_than_one_second_terminate() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    assert_eq!(session.handle_frame(Frame::Text("#2".into())).await, FrameOutcome::Continue);
    h.time.advance(Duration::from_millis(500));
    let outcome = session.handle_frame(Frame::Text("#2".into())).await;
    assert_eq!(violation(&outcome), Some(&Violation::HeartbeatFlood));
}

#[tokio::test]
async fn test_heartbeats_one_second_apart_are_accepted() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    for _ in 0..3 {
        assert_eq!(session.handle_frame(Frame::Text("#2".into())).await, FrameOutcome::Continue);
        h.time.advance(Duration::from_secs(1));
    }
}

#[tokio::test]
async fn test_event_segment_count() {
    let h = harness().await;

    for (event, remote) in [
        ("p2p.peer", "10.0.0.1:5000"),
        ("p2p.peer.getPeers.extra", "10.0.0.2:5000"),
    ] {
        let mut session = established(&h, remote).await;
        let outcome = session.handle_frame(call(event, json!({}), Some(1))).await;
        assert!(
            matches!(violation(&outcome), Some(Violation::MalformedOperation(_))),
            "{event}: {outcome:?}"
        );
    }

    let mut session = established(&h, "10.0.0.3:5000").await;
    let outcome = session
        .handle_frame(call("p2p.peer.getPeers", json!({}), Some(1)))
        .await;
    assert_eq!(reply(outcome)["rid"], 1);
}

#[tokio::test]
async fn test_extra_top_level_key_terminates() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let frame = text(json!({"event": "p2p.peer.getPeers", "data": {}, "cid": 1, "extra": true}));
    let outcome = session.handle_frame(frame).await;
    assert_eq!(violation(&outcome), Some(&Violation::UnexpectedKey("extra".into())));
    assert_eq!(h.mock.call_count("dispatch"), 0);
}

#[tokio::test]
async fn test_headers_shape() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let good = text(json!({
        "event": "p2p.peer.getPeers",
        "data": {"data": {}, "headers": {"version": "2.0.0", "port": 4002}},
        "cid": 3
    }));
    assert_eq!(reply(session.handle_frame(good).await)["rid"], 3);

    let nested = text(json!({
        "event": "p2p.peer.getPeers",
        "data": {"data": {}, "headers": {"version": {"major": 2}}},
        "cid": 4
    }));
    let outcome = session.handle_frame(nested).await;
    assert!(matches!(violation(&outcome), Some(Violation::Headers(_))));
}

#[tokio::test]
async fn test_handshake_replay_terminates() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session.handle_frame(handshake()).await;
    assert_eq!(violation(&outcome), Some(&Violation::HandshakeReplay));
}

#[tokio::test]
async fn test_disconnect_carrying_cid_terminates_and_penalizes() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session
        .handle_frame(text(json!({"event": "#disconnect", "cid": 5})))
        .await;
    assert_eq!(violation(&outcome), Some(&Violation::InvalidCid));
    assert!(h.worker.state().penalties.is_penalized(&ip("10.0.0.1")));
}

#[tokio::test]
async fn test_frames_after_termination_are_not_processed() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    session.handle_frame(Frame::Pong).await;
    let outcome = session.handle_frame(call("p2p.peer.getPeers", json!({}), Some(1))).await;
    assert_eq!(outcome, FrameOutcome::Close);
    assert_eq!(h.mock.call_count("dispatch"), 0);
}

#[tokio::test]
async fn test_payload_schema_mismatch_terminates() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session
        .handle_frame(call("p2p.peer.getBlocks", json!({"lastBlockHeight": "tall"}), Some(1)))
        .await;
    assert!(matches!(violation(&outcome), Some(Violation::Schema(_))));
}

// =============================================================================
// ADMISSION
// =============================================================================

#[tokio::test]
async fn test_recent_violation_blocks_admission_for_sixty_seconds() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;
    session.handle_frame(Frame::Text("garbage".into())).await;
    drop(session);

    assert_eq!(
        h.worker.admit(addr("10.0.0.1:5001")).await.err(),
        Some(AdmissionRejection::Penalized)
    );

    h.time.advance(Duration::from_secs(59));
    assert!(h.worker.admit(addr("10.0.0.1:5002")).await.is_err());

    h.time.advance(Duration::from_secs(1));
    assert!(h.worker.admit(addr("10.0.0.1:5003")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_purge_makes_penalized_ip_admissible() {
    let h = harness().await;
    let _purge = h.worker.spawn_maintenance();

    let mut session = established(&h, "10.0.0.1:5000").await;
    session.handle_frame(Frame::Ping).await;
    drop(session);
    assert!(h.worker.admit(addr("10.0.0.1:5001")).await.is_err());

    tokio::time::sleep(Duration::from_secs(3601)).await;
    assert!(h.worker.admit(addr("10.0.0.1:5002")).await.is_ok());
}

#[tokio::test]
async fn test_rate_limited_ip_is_rejected() {
    let h = harness().await;
    h.mock.set_blocked(true);

    assert_eq!(
        h.worker.admit(addr("10.0.0.1:5000")).await.err(),
        Some(AdmissionRejection::RateLimited)
    );
}

#[tokio::test]
async fn test_blacklisted_ip_is_rejected() {
    let policy = PolicyConfig::from_raw(&["10.0.0.66"], 0);
    let h = harness_with(MockCoordinator::new().with_policy(policy), GatekeeperConfig::default()).await;

    assert_eq!(
        h.worker.admit(addr("10.0.0.66:5000")).await.err(),
        Some(AdmissionRejection::Blacklisted)
    );
    assert!(h.worker.admit(addr("10.0.0.67:5000")).await.is_ok());
}

#[tokio::test]
async fn test_subnet_density_limit() {
    let policy = PolicyConfig::from_raw::<&str>(&[], 2);
    let h = harness_with(MockCoordinator::new().with_policy(policy), GatekeeperConfig::default()).await;

    let first = h.worker.admit(addr("10.1.1.1:5000")).await.unwrap();
    let _second = h.worker.admit(addr("10.1.1.2:5000")).await.unwrap();

    assert!(matches!(
        h.worker.admit(addr("10.1.1.3:5000")).await,
        Err(AdmissionRejection::SubnetFlood { count: 2, max: 2, .. })
    ));
    assert!(h.worker.admit(addr("10.1.2.1:5000")).await.is_ok());

    drop(first);
    assert!(h.worker.admit(addr("10.1.1.3:5000")).await.is_ok());
}

#[tokio::test]
async fn test_admission_coordinator_failure_refuses_connection() {
    let h = harness().await;
    h.mock.set_failure(Some(CoordinatorError::ChannelClosed));

    assert_eq!(
        h.worker.admit(addr("10.0.0.1:5000")).await.err(),
        Some(AdmissionRejection::Coordinator(CoordinatorError::ChannelClosed))
    );
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

#[tokio::test]
async fn test_post_block_requires_known_peer_or_forger() {
    let h = harness().await;
    let block = json!({"block": "00ff00ff"});

    let mut session = established(&h, "10.0.0.1:5000").await;
    let outcome = session.handle_frame(call("p2p.peer.postBlock", block.clone(), Some(1))).await;
    assert_eq!(
        outcome,
        FrameOutcome::Terminate(TerminationReason::Unauthorized(
            AuthorizationFailure::NotPeerOrForger
        ))
    );
    assert!(!h.worker.state().penalties.is_penalized(&ip("10.0.0.1")));

    h.mock.set_peer_or_forger(true);
    let mut session = established(&h, "10.0.0.1:5001").await;
    let outcome = session.handle_frame(call("p2p.peer.postBlock", block, Some(2))).await;
    assert_eq!(reply(outcome), json!({"rid": 2, "data": {"ok": true}}));
}

#[tokio::test]
async fn test_internal_calls_require_authorized_forger() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session
        .handle_frame(call("p2p.internal.getCurrentRound", json!({}), Some(1)))
        .await;
    assert_eq!(
        outcome,
        FrameOutcome::Terminate(TerminationReason::Unauthorized(
            AuthorizationFailure::ForgerNotAuthorized
        ))
    );
    assert_eq!(h.mock.call_count("dispatch"), 0);

    h.mock.set_forger_authorized(true);
    let mut session = established(&h, "10.0.0.1:5001").await;
    let outcome = session
        .handle_frame(call("p2p.internal.getCurrentRound", json!({}), Some(2)))
        .await;
    assert_eq!(reply(outcome)["rid"], 2);
}

#[tokio::test]
async fn test_not_ready_is_recoverable() {
    let h = harness().await;
    h.mock.set_ready(false);
    let mut session = established(&h, "10.0.0.1:5000").await;

    let answer = reply(session.handle_frame(call("p2p.peer.getStatus", json!({}), Some(7))).await);
    assert_eq!(answer["rid"], 7);
    assert_eq!(answer["error"]["name"], "AppNotReadyError");
    assert!(answer.get("data").is_none());

    h.mock.set_ready(true);
    let answer = reply(session.handle_frame(call("p2p.peer.getStatus", json!({}), Some(8))).await);
    assert_eq!(answer, json!({"rid": 8, "data": {"ok": true}}));
}

#[tokio::test]
async fn test_endpoint_rate_limit_terminates_without_penalty() {
    let h = harness().await;
    h.mock.set_endpoint_limited(true);
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session.handle_frame(call("p2p.peer.getPeers", json!({}), Some(1))).await;
    assert_eq!(
        outcome,
        FrameOutcome::Terminate(TerminationReason::Unauthorized(
            AuthorizationFailure::EndpointRateLimited("p2p.peer.getPeers".into())
        ))
    );
    assert!(!h.worker.state().penalties.is_penalized(&ip("10.0.0.1")));
}

#[tokio::test]
async fn test_dispatch_carries_remote_address_and_accepts_peer() {
    let h = harness().await;
    h.mock.set_accept_fails(true);
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session.handle_frame(call("p2p.peer.getPeers", json!({}), Some(1))).await;
    assert_eq!(reply(outcome)["data"], json!({"ok": true}));
    settle().await;

    let calls = h.mock.calls();
    let dispatched = calls
        .iter()
        .find_map(|c| match c {
            CoordinatorRequest::Dispatch { event, payload } => Some((event.clone(), payload.clone())),
            _ => None,
        })
        .expect("dispatched");
    assert_eq!(dispatched.0, "p2p.peer.getPeers");
    assert_eq!(dispatched.1["headers"]["remoteAddress"], "10.0.0.1");
    assert_eq!(dispatched.1["headers"]["port"], 4002);

    // acceptNewPeer failure is only logged
    assert_eq!(h.mock.call_count("acceptNewPeer"), 1);
    assert!(!session.connection().is_terminated());
}

#[tokio::test]
async fn test_calls_without_cid_get_no_reply() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session.handle_frame(call("p2p.peer.getPeers", json!({}), None)).await;
    assert_eq!(outcome, FrameOutcome::Continue);
    assert_eq!(h.mock.call_count("dispatch"), 1);
}

#[tokio::test]
async fn test_missing_payload_terminates() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let frame = text(json!({"event": "p2p.peer.getPeers", "data": {"headers": {}}, "cid": 1}));
    let outcome = session.handle_frame(frame).await;
    assert_eq!(violation(&outcome), Some(&Violation::InvalidData));
}

#[tokio::test]
async fn test_unknown_version_terminates_without_penalty() {
    let mut catalog: HandlerCatalog = default_catalog();
    catalog.insert("v9".into(), ["getPeers".to_string()].into_iter().collect());
    let h = harness_with(MockCoordinator::new().with_handlers(catalog), GatekeeperConfig::default()).await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let outcome = session.handle_frame(call("p2p.v9.getPeers", json!({}), Some(1))).await;
    assert_eq!(
        outcome,
        FrameOutcome::Terminate(TerminationReason::Unauthorized(
            AuthorizationFailure::UnsupportedVersion("v9".into())
        ))
    );
    assert!(!h.worker.state().penalties.is_penalized(&ip("10.0.0.1")));
}

#[tokio::test]
async fn test_overlong_operation_name_is_a_violation() {
    let handler = "h".repeat(130);
    let mut catalog: HandlerCatalog = default_catalog();
    catalog.insert("peer".into(), [handler.clone()].into_iter().collect());
    let h = harness_with(MockCoordinator::new().with_handlers(catalog), GatekeeperConfig::default()).await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    let event = format!("p2p.peer.{handler}");
    let outcome = session.handle_frame(call(&event, json!({}), Some(1))).await;
    assert!(matches!(
        violation(&outcome),
        Some(Violation::OperationTooLong { max: 128, .. })
    ));
    assert!(h.worker.state().penalties.is_penalized(&ip("10.0.0.1")));
}

// =============================================================================
// COORDINATOR FAILURES
// =============================================================================

#[tokio::test]
async fn test_coordinator_error_terminates_without_penalty() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;
    h.mock.set_failure(Some(CoordinatorError::Remote {
        code: -32000,
        message: "down".into(),
    }));

    let outcome = session.handle_frame(call("p2p.peer.getPeers", json!({}), Some(1))).await;
    assert!(matches!(
        outcome,
        FrameOutcome::Terminate(TerminationReason::Coordinator(CoordinatorError::Remote { .. }))
    ));
    assert!(!h.worker.state().penalties.is_penalized(&ip("10.0.0.1")));
}

#[tokio::test]
async fn test_violations_are_mirrored_to_coordinator_log() {
    let h = harness().await;
    let mut session = established(&h, "10.0.0.1:5000").await;

    session.handle_frame(Frame::Text("#9".into())).await;
    settle().await;
    assert_eq!(h.mock.call_count("log"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_log_delivery_is_abandoned_after_timeout() {
    let h = harness().await;
    h.mock.set_log_stalls(true);
    let mut session = established(&h, "10.0.0.1:5000").await;
    let idle = Arc::strong_count(&h.mock);

    session.handle_frame(Frame::Text("#9".into())).await;
    settle().await;
    assert_eq!(h.mock.call_count("log"), 1);
    assert_eq!(Arc::strong_count(&h.mock), idle + 1);

    tokio::time::sleep(GatekeeperConfig::default().coordinator_timeout + Duration::from_secs(1))
        .await;
    settle().await;
    assert_eq!(Arc::strong_count(&h.mock), idle);
}
