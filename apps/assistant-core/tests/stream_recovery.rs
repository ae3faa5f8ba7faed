//! Stream Recovery Integration Tests
//!
//! Drives the stream client through silent stalls, transport errors, and
//! fatal auth failures under the paused tokio clock: virtual minutes of
//! idle time run in milliseconds.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use assistant_core::broker::mock::{MockMarketStream, RecordingAlertSink, StreamStep};
use assistant_core::{
    AlertSink, BrokerError, QuoteStreamClient, QuoteUpdate, StreamSettings, StreamState,
};

fn update(symbol: &str) -> QuoteUpdate {
    QuoteUpdate {
        symbol: symbol.to_string(),
        bid: Some(dec!(500.00)),
        ask: Some(dec!(500.05)),
        last: Some(dec!(500.02)),
    }
}

fn client_with(
    stream: MockMarketStream,
) -> (
    Arc<QuoteStreamClient<MockMarketStream>>,
    Arc<RecordingAlertSink>,
) {
    let alerts = Arc::new(RecordingAlertSink::new());
    let client = Arc::new(QuoteStreamClient::new(
        stream,
        StreamSettings::default(),
        Arc::clone(&alerts) as Arc<dyn AlertSink>,
    ));
    (client, alerts)
}

// =============================================================================
// Silent stall detection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn silent_stall_forces_one_restart_per_cooldown_window() {
    let (client, _alerts) = client_with(MockMarketStream::new());
    client.start().await.unwrap();
    client
        .subscribe_options(&["OPT1".to_string()])
        .await
        .unwrap();

    let stream = client.market_stream();
    assert_eq!(stream.login_count(), 1);

    // Stale threshold is 5 minutes, watchdog ticks every 60s: the first
    // forced restart lands on the tick at t=360s.
    tokio::time::sleep(Duration::from_secs(370)).await;
    assert_eq!(stream.login_count(), 2);

    // Still inside the 60s cooldown window: no further restart.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(stream.login_count(), 2);

    // Next tick after the cooldown: exactly one more.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(stream.login_count(), 3);

    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restart_reissues_retained_subscriptions() {
    let (client, _alerts) = client_with(MockMarketStream::new());
    client.start().await.unwrap();
    client
        .subscribe_options(&["OPT1".to_string(), "OPT2".to_string()])
        .await
        .unwrap();
    client
        .subscribe_equities(&["spy".to_string()])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(370)).await;

    let stream = client.market_stream();
    assert_eq!(stream.login_count(), 2);

    // The rebuild re-issued everything the demand set retains.
    let calls = stream.subscribe_calls();
    let resubscribed: Vec<_> = calls.iter().skip(2).collect();
    assert!(
        resubscribed
            .iter()
            .any(|(_, symbols)| symbols == &vec!["OPT1".to_string(), "OPT2".to_string()])
    );
    assert!(
        resubscribed
            .iter()
            .any(|(_, symbols)| symbols == &vec!["SPY".to_string()])
    );

    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn fresh_messages_keep_the_watchdog_quiet() {
    let stream = MockMarketStream::new();
    // A message delivered at startup keeps the gap small for a while.
    stream.push_step(StreamStep::Update(update("SPY")));
    let (client, _alerts) = client_with(stream);
    client.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(client.market_stream().login_count(), 1);
    assert_eq!(client.last("SPY"), Some(dec!(500.02)));

    client.stop().await;
}

// =============================================================================
// Transport errors
// =============================================================================

#[tokio::test(start_paused = true)]
async fn transport_error_reconnects_with_backoff_and_resubscribes() {
    let stream = MockMarketStream::new();
    stream.push_step(StreamStep::Update(update("SPY")));
    stream.push_step(StreamStep::Error(BrokerError::Transport(
        "connection reset by peer".to_string(),
    )));
    let (client, _alerts) = client_with(stream);
    client.start().await.unwrap();
    client
        .subscribe_options(&["OPT1".to_string()])
        .await
        .unwrap();

    // Enough virtual time for the backoff delay (about 1s) and the rebuild.
    tokio::time::sleep(Duration::from_secs(10)).await;

    let stream = client.market_stream();
    assert_eq!(stream.login_count(), 2);
    assert_eq!(client.state(), StreamState::Streaming);
    // The quote survived the reconnect (cache is in-memory, not per-session).
    assert_eq!(client.last("SPY"), Some(dec!(500.02)));
    // Subscriptions were restored on the new session.
    assert!(
        stream
            .subscribe_calls()
            .iter()
            .skip(1)
            .any(|(_, symbols)| symbols == &vec!["OPT1".to_string()])
    );

    client.stop().await;
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_alerts_exactly_once() {
    let stream = MockMarketStream::new();
    // Every receive fails, and every relogin fails too: continuous failure.
    for _ in 0..1000 {
        stream.push_step(StreamStep::Error(BrokerError::Transport(
            "connection reset by peer".to_string(),
        )));
        stream.fail_next_login(BrokerError::Transport("unreachable".to_string()));
    }
    let (client, alerts) = client_with(stream);
    client.start().await.unwrap();

    // Far past the 5-minute persistent-failure threshold.
    tokio::time::sleep(Duration::from_secs(900)).await;

    let persistent: Vec<_> = alerts
        .messages()
        .into_iter()
        .filter(|m| m.contains("failing"))
        .collect();
    assert_eq!(persistent.len(), 1, "alert must fire exactly once");

    client.stop().await;
}

// =============================================================================
// Fatal auth failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn auth_error_mid_stream_is_fatal_and_not_retried() {
    let stream = MockMarketStream::new();
    stream.push_step(StreamStep::Error(BrokerError::AuthenticationFailed(
        "refresh token invalid".to_string(),
    )));
    let (client, alerts) = client_with(stream);
    client.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(client.state(), StreamState::Failed);
    assert_eq!(alerts.messages().len(), 1);
    // No relogin attempts after a credentials failure.
    assert_eq!(client.market_stream().login_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn auth_error_during_rebuild_is_fatal() {
    let stream = MockMarketStream::new();
    stream.push_step(StreamStep::Error(BrokerError::Transport(
        "connection reset by peer".to_string(),
    )));
    stream.fail_next_login(BrokerError::AuthenticationFailed(
        "refresh token invalid".to_string(),
    ));
    let (client, alerts) = client_with(stream);
    client.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(client.state(), StreamState::Failed);
    assert_eq!(alerts.messages().len(), 1);
    assert_eq!(client.market_stream().login_count(), 2);
}
