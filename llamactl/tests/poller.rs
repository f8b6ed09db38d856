mod common;

use std::time::Duration;

use common::{StubServer, WaitConfig, closed_port, wait_for};
use llamactl::{BroadcastHub, Error, MetricsPoller, PollerOptions};
use llamactl_shared::{HubEvent, ModelStatus, TelemetryStatus};
use std::sync::atomic::Ordering;
use tokio::sync::watch;

const TICK: Duration = Duration::from_millis(20);

fn poller() -> (BroadcastHub, MetricsPoller) {
    let hub = BroadcastHub::new();
    let poller = MetricsPoller::new(
        hub.clone(),
        PollerOptions {
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    );
    (hub, poller)
}

#[tokio::test]
async fn test_successful_poll_publishes_sample() {
    let stub = StubServer::start("llamacpp_tokens_predicted 10\n").await;
    let (hub, poller) = poller();
    let (_sub, mut events) = hub.subscribe_channel();

    poller.register_model("m1", "127.0.0.1", stub.port);
    assert_eq!(poller.status("m1"), TelemetryStatus::Starting);
    poller.start_polling("m1", TICK).unwrap();

    let p = &poller;
    wait_for(WaitConfig::with_description("first sample"), || async move {
        p.metrics("m1").is_some()
    })
    .await
    .unwrap();

    assert_eq!(poller.metrics("m1").unwrap().tokens.predicted, 10.0);
    assert_eq!(poller.status("m1"), TelemetryStatus::Running);

    match events.recv().await {
        Some(HubEvent::MetricsUpdate {
            model_name,
            sample,
            recent_history,
        }) => {
            assert_eq!(model_name, "m1");
            assert_eq!(sample.tokens.predicted, 10.0);
            assert!(!recent_history.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    poller.stop_polling("m1");
    assert!(!poller.is_polling("m1"));
}

#[tokio::test]
async fn test_failures_keep_history() {
    let stub = StubServer::start("llamacpp_slots_busy 1\nllamacpp_slots_idle 1\n").await;
    let (_hub, poller) = poller();
    poller.register_model("m1", "127.0.0.1", stub.port);
    poller.start_polling("m1", TICK).unwrap();

    let p = &poller;
    wait_for(WaitConfig::with_description("first sample"), || async move {
        !p.history("m1", 10).is_empty()
    })
    .await
    .unwrap();

    stub.failing.store(true, Ordering::SeqCst);
    wait_for(WaitConfig::with_description("error status"), || async move {
        p.status("m1") == TelemetryStatus::Error
    })
    .await
    .unwrap();

    let kept = poller.history("m1", 300);
    assert!(!kept.is_empty());
    assert_eq!(kept.last().unwrap().slots.total, 2.0);

    let summary = poller.all_status().remove("m1").unwrap();
    assert!(summary.last_error.is_some());
    assert!(poller.is_polling("m1"));

    // recovers on the next good tick
    stub.failing.store(false, Ordering::SeqCst);
    wait_for(WaitConfig::with_description("recovery"), || async move {
        p.status("m1") == TelemetryStatus::Running
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_slow_endpoint_times_out_without_overlap() {
    let timeout = Duration::from_millis(100);
    let stub = StubServer::start_slow("llamacpp_tokens_predicted 1\n", Duration::from_millis(400)).await;
    let poller = MetricsPoller::new(
        BroadcastHub::new(),
        PollerOptions {
            request_timeout: timeout,
            ..Default::default()
        },
    );
    poller.register_model("m1", "127.0.0.1", stub.port);
    poller.start_polling("m1", TICK).unwrap();

    let s = &stub;
    wait_for(WaitConfig::with_description("repeated polls"), || async move {
        s.hits() >= 4
    })
    .await
    .unwrap();

    // every earlier request has timed out by now, and the loop is still going
    assert_eq!(poller.status("m1"), TelemetryStatus::Error);
    assert!(poller.is_polling("m1"));
    assert!(poller.history("m1", 10).is_empty());
    assert!(poller.all_status()["m1"].last_error.is_some());

    // a fixed-rate timer would fire every TICK while requests hang
    let arrivals = stub.arrivals();
    assert!(arrivals.len() >= 4);
    for pair in arrivals.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= timeout / 2, "polls overlapped, gap {gap:?}");
    }

    poller.stop_polling("m1");
    assert!(!poller.is_polling("m1"));
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let port = closed_port().await;
    let (_hub, poller) = poller();
    poller.register_model("m1", "127.0.0.1", port);
    poller.start_polling("m1", TICK).unwrap();

    let p = &poller;
    wait_for(WaitConfig::with_description("error status"), || async move {
        p.status("m1") == TelemetryStatus::Error
    })
    .await
    .unwrap();
    assert!(poller.history("m1", 10).is_empty());
    assert!(poller.metrics("m1").is_none());
    poller.unregister_model("m1");
}

#[tokio::test]
async fn test_gate_blocks_requests_until_running() {
    let stub = StubServer::start("llamacpp_tokens_predicted 1\n").await;
    let (_hub, poller) = poller();
    let (status_tx, status_rx) = watch::channel(ModelStatus::Starting);

    poller.register_supervised("m1", "127.0.0.1", stub.port, status_rx);
    poller.start_polling("m1", TICK).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stub.hits(), 0);
    assert_eq!(poller.status("m1"), TelemetryStatus::Starting);

    status_tx.send_replace(ModelStatus::Running);
    let s = &stub;
    wait_for(WaitConfig::with_description("first request"), || async move {
        s.hits() > 0
    })
    .await
    .unwrap();

    status_tx.send_replace(ModelStatus::Stopping);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = stub.hits();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stub.hits(), settled);
}

#[tokio::test]
async fn test_start_polling_unregistered() {
    let (_hub, poller) = poller();
    let err = poller.start_polling("ghost", TICK).unwrap_err();
    assert!(matches!(err, Error::NotRegistered(name) if name == "ghost"));
    assert_eq!(poller.status("ghost"), TelemetryStatus::Unknown);
}

#[tokio::test]
async fn test_unregister_drops_history() {
    let stub = StubServer::start("llamacpp_tokens_predicted 3\n").await;
    let (_hub, poller) = poller();
    poller.register_model("m1", "127.0.0.1", stub.port);
    poller.start_polling("m1", TICK).unwrap();

    let p = &poller;
    wait_for(WaitConfig::with_description("first sample"), || async move {
        p.metrics("m1").is_some()
    })
    .await
    .unwrap();

    poller.stop_polling("m1");
    poller.stop_polling("m1");
    assert!(poller.metrics("m1").is_some());

    poller.unregister_model("m1");
    poller.unregister_model("m1");
    assert!(poller.metrics("m1").is_none());
    assert_eq!(poller.status("m1"), TelemetryStatus::Unknown);
}
