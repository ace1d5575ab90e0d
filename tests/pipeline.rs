//! End-to-end pipeline behaviour against in-memory feeds

use std::sync::Arc;
use std::time::Duration;

use depth_pulse::websocket::ChannelConnector;
use depth_pulse::{
    parse_snapshot, FeedError, HistoryConfig, Instrument, PipelineController, PipelineMetrics,
    PipelinePhase, ReconnectPolicy, ReconnectingConnector,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

fn depth(best_bid: u32, best_ask: u32) -> String {
    format!(
        r#"{{"lastUpdateId":{best_bid},"bids":[["{best_bid}","2"],["{}","1"]],"asks":[["{best_ask}","1"],["{}","1"]]}}"#,
        best_bid - 1,
        best_ask + 1
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

fn controller_with(
    channels: &Arc<ChannelConnector>,
    instrument: Instrument,
) -> PipelineController {
    PipelineController::new(
        channels.clone(),
        instrument,
        HistoryConfig::default(),
        None,
    )
}

#[test]
fn test_concrete_scenario_payload() {
    let raw = r#"{"bids":[["100","1"],["99","2"]],"asks":[["101","1"],["102","3"]]}"#;
    let snapshot = assert_ok!(parse_snapshot(raw, 10, chrono::Utc::now()));
    assert_eq!(depth_pulse::orderbook::spread(&snapshot), dec!(1));
    let ratio = depth_pulse::orderbook::imbalance(&snapshot).unwrap();
    assert!((ratio + dec!(0.142857)).abs() < dec!(0.000001));
}

#[tokio::test]
async fn test_switch_resets_state_before_new_messages() {
    let channels = Arc::new(ChannelConnector::default());
    let mut controller = controller_with(&channels, Instrument::Btc);
    controller.start();

    for i in 0..5 {
        assert!(channels.send(0, Ok(depth(100 + i, 102 + i))));
    }
    settle().await;
    let before = controller.state();
    assert_eq!(before.updates, 5);
    assert!(!before.spread_history.is_empty());

    controller.switch_instrument(Instrument::Eth);

    // nothing from either feed has been processed since the switch
    let after = controller.state();
    assert_eq!(after.instrument, Instrument::Eth);
    assert_eq!(after.phase, PipelinePhase::SwitchingInstrument);
    assert_eq!(after.label, "ETH-USD");
    assert!(after.snapshot.is_none());
    assert!(after.spread_history.is_empty());
    assert_eq!(after.updates, 0);
    assert_eq!(after.spread, Decimal::ZERO);
    assert_eq!(channels.instruments(), vec![Instrument::Btc, Instrument::Eth]);

    // a late btc frame must not leak into the eth state
    let _ = channels.send(0, Ok(depth(1, 500)));
    settle().await;
    assert!(controller.state().snapshot.is_none());

    assert!(channels.send(1, Ok(depth(3000, 3001))));
    settle().await;
    let eth = controller.state();
    assert_eq!(eth.phase, PipelinePhase::Streaming);
    assert_eq!(eth.updates, 1);
    assert_eq!(eth.spread, dec!(1));
    assert_eq!(eth.spread_history.len(), 1);
}

#[tokio::test]
async fn test_switch_to_same_instrument_is_noop() {
    let channels = Arc::new(ChannelConnector::default());
    let mut controller = controller_with(&channels, Instrument::Btc);
    controller.start();
    assert!(channels.send(0, Ok(depth(10, 11))));
    settle().await;

    controller.switch_instrument(Instrument::Btc);
    assert_eq!(channels.opened(), 1);
    assert_eq!(controller.state().updates, 1);
}

#[tokio::test]
async fn test_subscribers_see_each_replacement() {
    let channels = Arc::new(ChannelConnector::default());
    let mut controller = controller_with(&channels, Instrument::Ltc);
    let mut rx = controller.subscribe();
    controller.start();

    assert!(channels.send(0, Ok(depth(70, 72))));
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            rx.changed().await.unwrap();
            if rx.borrow().phase == PipelinePhase::Streaming {
                break;
            }
        }
    })
    .await
    .expect("state never reached streaming");

    let state = rx.borrow().clone();
    assert_eq!(state.spread, dec!(2));
    // bids 2 + 1, asks 1 + 1
    assert_eq!(state.imbalance, Some(dec!(0.2)));
}

#[tokio::test]
async fn test_transport_error_keeps_stale_snapshot() {
    let channels = Arc::new(ChannelConnector::default());
    let mut controller = controller_with(&channels, Instrument::Btc);
    controller.start();

    assert!(channels.send(0, Ok(depth(100, 101))));
    assert!(channels.send(0, Err(FeedError::WebSocketConnection("reset".into()))));
    settle().await;

    let state = controller.state();
    assert_eq!(state.phase, PipelinePhase::Disconnected);
    assert!(state.snapshot.is_some());
    assert_eq!(state.spread, dec!(1));
    assert!(state.last_error.unwrap().contains("reset"));

    // manual reconnect opens a fresh feed for the same instrument
    controller.start();
    assert_eq!(controller.phase(), PipelinePhase::Connecting);
    assert_eq!(channels.instruments(), vec![Instrument::Btc, Instrument::Btc]);
    assert!(channels.send(1, Ok(depth(100, 103))));
    settle().await;
    let state = controller.state();
    assert_eq!(state.phase, PipelinePhase::Streaming);
    assert_eq!(state.spread, dec!(3));
    assert_eq!(state.updates, 2);
}

#[tokio::test]
async fn test_reconnect_policy_resumes_streaming() {
    let channels = Arc::new(ChannelConnector::default());
    let metrics = Arc::new(PipelineMetrics::new().unwrap());
    let connector = ReconnectingConnector::new(
        channels.clone(),
        ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            max_attempts: 5,
            jitter_ratio: 0.1,
        },
    )
    .with_metrics(metrics.clone());
    let mut controller = PipelineController::new(
        Arc::new(connector),
        Instrument::Xrp,
        HistoryConfig::default(),
        Some(metrics.clone()),
    );
    controller.start();
    settle().await;

    assert!(channels.send(0, Ok(depth(50, 51))));
    assert!(channels.send(0, Err(FeedError::ConnectionTimeout)));
    settle().await;
    // a retry is scheduled, so the feed is not given up yet
    let state = controller.state();
    assert_eq!(state.phase, PipelinePhase::Reconnecting);
    assert!(state.snapshot.is_some());
    assert!(state.last_error.unwrap().contains("Connection timeout"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(channels.opened(), 2);
    assert!(channels.send(1, Ok(depth(50, 52))));
    settle().await;

    let state = controller.state();
    assert_eq!(state.phase, PipelinePhase::Streaming);
    assert_eq!(state.updates, 2);
    assert_eq!(state.spread_history.len(), 2);

    let text = metrics.render().unwrap();
    assert!(text.contains("depth_pulse_snapshots_total{instrument=\"xrp\"} 2"));
    assert!(text.contains("kind=\"connection_timeout\""));
    assert!(text.contains("kind=\"reconnecting\""));
}

#[tokio::test]
async fn test_exhausted_reconnects_end_disconnected() {
    let channels = Arc::new(ChannelConnector::default());
    let connector = ReconnectingConnector::new(
        channels.clone(),
        ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(5),
            max_attempts: 1,
            jitter_ratio: 0.0,
        },
    );
    let mut controller = PipelineController::new(
        Arc::new(connector),
        Instrument::Eth,
        HistoryConfig::default(),
        None,
    );
    controller.start();
    settle().await;

    assert!(channels.send(0, Ok(depth(10, 12))));
    assert!(channels.send(0, Err(FeedError::ConnectionTimeout)));
    settle().await;
    assert_eq!(channels.opened(), 2);
    assert_eq!(controller.phase(), PipelinePhase::Reconnecting);

    assert!(channels.send(1, Err(FeedError::ConnectionTimeout)));
    settle().await;
    let state = controller.state();
    assert_eq!(state.phase, PipelinePhase::Disconnected);
    assert_eq!(state.spread, dec!(2));
    assert_eq!(channels.opened(), 2);

    // selecting the same pair again starts over
    controller.switch_instrument(Instrument::Eth);
    settle().await;
    assert_eq!(channels.opened(), 3);
}

#[tokio::test]
async fn test_drop_closes_feed() {
    let channels = Arc::new(ChannelConnector::default());
    let mut controller = controller_with(&channels, Instrument::Btc);
    controller.start();
    let rx = controller.subscribe();
    drop(controller);

    assert_eq!(rx.borrow().phase, PipelinePhase::Idle);
    let _ = channels.send(0, Ok(depth(1, 2)));
    settle().await;
    assert!(rx.borrow().snapshot.is_none());
    assert_eq!(rx.borrow().updates, 0);
}
