//! E2E failover tests over the loopback wire
//!
//! The whole generate-replicate-capture-recover chain runs on a paused tokio
//! clock: 1000 frames at 100 fps take ten virtual seconds and every latency
//! is exactly the configured path delay.

use approx::assert_relative_eq;
use frertester::config::AppConfig;
use frertester::session::{self, SimulationConfig};
use frertester::shutdown;
use frertester::PathId;
use std::time::Duration;

fn config(cut_after: Option<Duration>, cut_path: PathId) -> SimulationConfig {
    SimulationConfig {
        stream_id: 1,
        count: 1000,
        rate_fps: 100.0,
        cut_after,
        cut_path,
        ..SimulationConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_healthy_paths_eliminate_every_copy() {
    let (_shutdown_tx, shutdown_rx) = shutdown::channel();
    let outcome = session::simulate(&AppConfig::default(), &config(None, PathId::B), shutdown_rx)
        .await
        .unwrap();

    assert_eq!(outcome.generator.sent, 1000);
    assert!(!outcome.generator.cancelled);
    assert_eq!(outcome.dropped, 0);

    let stream = outcome.report.stream(1).unwrap();
    assert_eq!(stream.accepted_count, 1000);
    assert_eq!(stream.duplicate_count, 1000);
    assert_eq!(stream.out_of_window_count, 0);
    assert_eq!(stream.duplicate_rate, 0.5);
    assert_eq!(stream.loss.missing, 0);
    assert!(stream.failover_events.is_empty());

    // Path B is faster, so it wins every race
    assert_eq!(stream.path_utilization[&PathId::B], 1000);
    assert_eq!(stream.path_utilization[&PathId::A], 0);
    assert_eq!(stream.paths[&PathId::A].duplicates, 1000);
    assert_eq!(stream.latency_histogram.min_us, Some(100.0));
    assert_eq!(stream.latency_histogram.max_us, Some(100.0));
    assert_relative_eq!(stream.paths[&PathId::A].latency.mean_us.unwrap(), 250.0);
}

#[tokio::test(start_paused = true)]
async fn test_cut_path_fails_over_without_loss() {
    let (_shutdown_tx, shutdown_rx) = shutdown::channel();
    let outcome = session::simulate(
        &AppConfig::default(),
        &config(Some(Duration::from_secs(5)), PathId::B),
        shutdown_rx,
    )
    .await
    .unwrap();

    let stream = outcome.report.stream(1).unwrap();
    assert_eq!(stream.accepted_count, 1000);
    assert_eq!(stream.loss.missing, 0);
    assert_eq!(stream.loss.loss_rate, 0.0);
    assert_eq!(stream.reset_count, 0);

    let via_b = stream.path_utilization[&PathId::B];
    let via_a = stream.path_utilization[&PathId::A];
    assert_eq!(via_a + via_b, 1000);
    assert!((499..=501).contains(&via_b), "via B: {via_b}");
    assert_eq!(outcome.dropped + via_b, 1000);
    assert!(stream.paths[&PathId::B].down);

    assert_eq!(stream.failover_events.len(), 1);
    let event = &stream.failover_events[0];
    assert_eq!(event.failed_path, Some(PathId::B));
    // Last B arrival to the next frame accepted from A: one interval plus
    // the delay difference between the paths
    assert_eq!(event.duration, 10_000 + 250 - 100);
    assert!(Duration::from_micros(event.duration) < Duration::from_millis(1000));

    let [capture_a, capture_b] = [&outcome.captures[0], &outcome.captures[1]];
    assert_eq!(capture_a.received, 1000);
    assert_eq!(capture_b.received, via_b);
}

#[tokio::test(start_paused = true)]
async fn test_cutting_the_slow_path_is_invisible_to_the_stream() {
    let (_shutdown_tx, shutdown_rx) = shutdown::channel();
    let outcome = session::simulate(
        &AppConfig::default(),
        &config(Some(Duration::from_secs(2)), PathId::A),
        shutdown_rx,
    )
    .await
    .unwrap();

    let stream = outcome.report.stream(1).unwrap();
    assert_eq!(stream.accepted_count, 1000);
    assert_eq!(stream.path_utilization[&PathId::B], 1000);
    assert!(stream.duplicate_count < 1000);
    // A never delivered an accepted frame, so only its silence is reported
    assert!(stream
        .failover_events
        .iter()
        .all(|e| e.failed_path == Some(PathId::A)));
}
