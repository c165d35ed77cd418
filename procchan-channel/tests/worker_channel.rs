//! End-to-end tests driving the echo worker binary through a real channel

use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use procchan_channel::{
    ChannelConfig, ChannelError, ChannelEvent, ChannelEvents, ChannelState, ExitInfo,
    LaunchOptions, ThrottlePolicy, WorkerChannel,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn echo_worker() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_procchan-echo-worker"))
}

fn echo_channel(args: &[&str], config: ChannelConfig) -> (WorkerChannel, ChannelEvents) {
    WorkerChannel::new(
        echo_worker(),
        LaunchOptions::default().with_args(args),
        config,
    )
}

async fn next_event(events: &mut ChannelEvents) -> Option<ChannelEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a channel event")
}

async fn next_message(events: &mut ChannelEvents) -> Bytes {
    match next_event(events).await {
        Some(ChannelEvent::Message(payload)) => payload,
        other => panic!("expected a message, got {:?}", other),
    }
}

/// Collect the remaining events; the stream ends when the channel is done
async fn remaining_events(events: &mut ChannelEvents) -> Vec<ChannelEvent> {
    let mut rest = Vec::new();
    while let Some(event) = next_event(events).await {
        rest.push(event);
    }
    rest
}

fn exits(events: &[ChannelEvent]) -> Vec<ExitInfo> {
    events
        .iter()
        .filter_map(|event| match event {
            ChannelEvent::Exit(info) => Some(*info),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_binary_payloads_round_trip_in_order() {
    let (mut channel, mut events) = echo_channel(&[], ChannelConfig::default());
    channel.start();
    assert!(channel.pid().is_some());

    let payloads: Vec<Bytes> = vec![
        Bytes::new(),
        Bytes::from((0..=255u8).collect::<Vec<_>>()),
        Bytes::from_static(b"terminate"),
        Bytes::from_static(b"line one\nline two\r\n\0"),
    ];
    for payload in &payloads {
        channel.send(payload.clone());
    }

    for expected in &payloads {
        assert_eq!(&next_message(&mut events).await, expected);
    }

    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Exited);

    let rest = remaining_events(&mut events).await;
    assert_eq!(exits(&rest), vec![ExitInfo { code: Some(0), signal: None }]);
}

#[tokio::test]
async fn test_order_survives_saturated_transport() {
    let config = ChannelConfig {
        high_water_mark: 1,
        throttle_policy: ThrottlePolicy::Signal,
        ..Default::default()
    };
    let (mut channel, mut events) = echo_channel(&[], config);
    channel.start();

    let count = 500u32;
    for i in 0..count {
        channel.send(Bytes::copy_from_slice(&i.to_be_bytes()));
    }

    for i in 0..count {
        let payload = next_message(&mut events).await;
        assert_eq!(payload.as_ref(), i.to_be_bytes());
    }

    channel.stop().await;
    assert_eq!(exits(&remaining_events(&mut events).await).len(), 1);
}

#[tokio::test]
async fn test_throttle_after_every_write_still_delivers_everything() {
    let config = ChannelConfig {
        throttle_policy: ThrottlePolicy::AlwaysAfterWrite,
        ..Default::default()
    };
    let (mut channel, mut events) = echo_channel(&[], config);
    channel.start();

    for i in 0..100u8 {
        channel.send(vec![i; (i as usize) * 10]);
    }
    for i in 0..100u8 {
        assert_eq!(next_message(&mut events).await, vec![i; (i as usize) * 10]);
    }

    channel.stop().await;
}

#[tokio::test]
async fn test_sends_before_start_are_delivered() {
    let (mut channel, mut events) = echo_channel(&[], ChannelConfig::default());
    assert_eq!(channel.state(), ChannelState::Created);

    channel.send(Bytes::from_static(b"early"));
    channel.start();

    assert_eq!(next_message(&mut events).await, Bytes::from_static(b"early"));
    channel.stop().await;
}

#[tokio::test]
async fn test_crash_is_reported_once_and_stop_does_not_hang() {
    let (mut channel, mut events) =
        echo_channel(&["--exit-after", "0", "--exit-code", "3"], ChannelConfig::default());
    channel.start();

    match next_event(&mut events).await {
        Some(ChannelEvent::Exit(info)) => assert_eq!(info.code, Some(3)),
        other => panic!("expected exit, got {:?}", other),
    }
    assert!(next_event(&mut events).await.is_none());

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(2), channel.stop())
        .await
        .expect("stop after exit must return promptly");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(channel.state(), ChannelState::Exited);

    // A second stop is just as quick, and late sends are dropped quietly
    channel.stop().await;
    channel.send(Bytes::from_static(b"too late"));
}

#[tokio::test]
async fn test_worker_exit_after_replies_keeps_messages_before_exit() {
    let (mut channel, mut events) =
        echo_channel(&["--exit-after", "2", "--exit-code", "7"], ChannelConfig::default());
    channel.start();

    channel.send(Bytes::from_static(b"a"));
    channel.send(Bytes::from_static(b"b"));

    assert_eq!(next_message(&mut events).await, Bytes::from_static(b"a"));
    assert_eq!(next_message(&mut events).await, Bytes::from_static(b"b"));

    let rest = remaining_events(&mut events).await;
    assert_eq!(exits(&rest), vec![ExitInfo { code: Some(7), signal: None }]);
    channel.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_unresponsive_worker_is_interrupted_after_timeout() {
    let shutdown_timeout = Duration::from_millis(300);
    let config = ChannelConfig {
        shutdown_timeout,
        ..Default::default()
    };
    let (mut channel, mut events) = echo_channel(&["--ignore-terminate"], config);
    channel.start();

    // Make sure the worker is up before asking it to go away
    channel.send(Bytes::from_static(b"ping"));
    assert_eq!(next_message(&mut events).await, Bytes::from_static(b"ping"));

    let started = Instant::now();
    channel.stop().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= shutdown_timeout, "killed too early: {:?}", elapsed);
    assert!(elapsed < shutdown_timeout + Duration::from_secs(2), "killed too late: {:?}", elapsed);

    let rest = remaining_events(&mut events).await;
    assert_eq!(exits(&rest), vec![ExitInfo { code: None, signal: Some(2) }]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_ignoring_interrupt_is_killed_after_grace() {
    let shutdown_timeout = Duration::from_millis(200);
    let kill_grace = Duration::from_millis(300);
    let config = ChannelConfig {
        shutdown_timeout,
        kill_grace,
        ..Default::default()
    };
    let (mut channel, mut events) =
        echo_channel(&["--ignore-terminate", "--ignore-interrupt"], config);
    channel.start();

    // The interrupt listener is in place once the worker answers
    channel.send(Bytes::from_static(b"ping"));
    assert_eq!(next_message(&mut events).await, Bytes::from_static(b"ping"));

    let started = Instant::now();
    channel.stop().await;
    let elapsed = started.elapsed();

    let budget = shutdown_timeout + kill_grace;
    assert!(elapsed >= budget, "killed too early: {:?}", elapsed);
    assert!(elapsed < budget + Duration::from_secs(2), "killed too late: {:?}", elapsed);
    assert_eq!(channel.state(), ChannelState::Exited);

    let rest = remaining_events(&mut events).await;
    assert_eq!(exits(&rest), vec![ExitInfo { code: None, signal: Some(9) }]);
}

#[tokio::test]
async fn test_unbounded_shutdown_timeout_waits_for_exit() {
    let config = ChannelConfig {
        shutdown_timeout: Duration::MAX,
        kill_grace: Duration::MAX,
        ..Default::default()
    };
    let (mut channel, mut events) = echo_channel(&[], config);
    channel.start();

    channel.send(Bytes::from_static(b"hello"));
    assert_eq!(next_message(&mut events).await, Bytes::from_static(b"hello"));

    tokio::time::timeout(EVENT_TIMEOUT, channel.stop())
        .await
        .expect("stop with an unbounded timeout must still return on exit");
    assert_eq!(channel.state(), ChannelState::Exited);

    let rest = remaining_events(&mut events).await;
    assert_eq!(exits(&rest), vec![ExitInfo { code: Some(0), signal: None }]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_queued_payloads_are_dropped_on_stop() {
    let config = ChannelConfig {
        shutdown_timeout: Duration::from_millis(600),
        high_water_mark: 1,
        throttle_policy: ThrottlePolicy::Signal,
        ..Default::default()
    };
    let (mut channel, mut events) =
        echo_channel(&["--ignore-terminate", "--delay-ms", "100"], config);
    channel.start();

    // The first payload saturates the transport; the rest wait in the queue
    let count = 10u8;
    for i in 0..count {
        channel.send(vec![i]);
    }
    channel.stop().await;
    channel.send(Bytes::from_static(b"after stop"));

    let rest = remaining_events(&mut events).await;
    let echoed: Vec<Bytes> = rest
        .iter()
        .filter_map(|event| match event {
            ChannelEvent::Message(payload) => Some(payload.clone()),
            _ => None,
        })
        .collect();

    assert!(!echoed.is_empty());
    assert!(echoed.len() <= 2, "queued payloads reached the worker: {:?}", echoed);
    for (i, payload) in echoed.iter().enumerate() {
        assert_eq!(payload.as_ref(), [i as u8]);
    }
    assert_eq!(exits(&rest), vec![ExitInfo { code: None, signal: Some(2) }]);
}

#[tokio::test]
async fn test_cooperative_worker_exits_before_timeout() {
    let config = ChannelConfig {
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let (mut channel, mut events) = echo_channel(&[], config);
    channel.start();

    channel.send(Bytes::from_static(b"warm up"));
    next_message(&mut events).await;

    let started = Instant::now();
    channel.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let rest = remaining_events(&mut events).await;
    assert_eq!(exits(&rest), vec![ExitInfo { code: Some(0), signal: None }]);
}

#[tokio::test]
async fn test_messages_in_flight_during_stop_are_delivered() {
    let (mut channel, mut events) = echo_channel(&["--delay-ms", "100"], ChannelConfig::default());
    channel.start();

    channel.send(Bytes::from_static(b"slow"));
    channel.stop().await;

    let rest = remaining_events(&mut events).await;
    assert_eq!(rest.len(), 2, "unexpected events: {:?}", rest);
    assert_eq!(rest[0], ChannelEvent::Message(Bytes::from_static(b"slow")));
    assert!(matches!(rest[1], ChannelEvent::Exit(_)));
}

#[tokio::test]
async fn test_state_transitions() {
    let (mut channel, mut events) = echo_channel(&[], ChannelConfig::default());
    let mut states = channel.subscribe_state();
    assert_eq!(channel.state(), ChannelState::Created);

    channel.start();
    tokio::time::timeout(
        EVENT_TIMEOUT,
        states.wait_for(|state| matches!(state, ChannelState::Running(_))),
    )
    .await
    .unwrap()
    .unwrap();

    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Exited);
    remaining_events(&mut events).await;
}

#[tokio::test]
async fn test_spawn_failure_is_an_error_event() {
    let (mut channel, mut events) = WorkerChannel::new(
        "/nonexistent/procchan/worker",
        LaunchOptions::default(),
        ChannelConfig::default(),
    );
    channel.start();

    match next_event(&mut events).await {
        Some(ChannelEvent::Error(ChannelError::SpawnError(_))) => {}
        other => panic!("expected spawn error, got {:?}", other),
    }
    assert!(next_event(&mut events).await.is_none());
    assert_eq!(channel.state(), ChannelState::Exited);
    assert!(channel.pid().is_none());

    tokio::time::timeout(Duration::from_secs(1), channel.stop())
        .await
        .expect("stop on a channel that never spawned must return");
}

#[tokio::test]
async fn test_dropped_handle_shuts_worker_down() {
    let (mut channel, mut events) = echo_channel(&[], ChannelConfig::default());
    channel.start();
    channel.send(Bytes::from_static(b"bye"));
    assert_eq!(next_message(&mut events).await, Bytes::from_static(b"bye"));

    drop(channel);

    let rest = remaining_events(&mut events).await;
    assert_eq!(exits(&rest), vec![ExitInfo { code: Some(0), signal: None }]);
}
