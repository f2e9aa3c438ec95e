//! In-process replicated network
//!
//! Stands in for switch-side replication in simulations and tests: every
//! frame given to the [`WireSink`] is copied onto each path, delayed by that
//! path's fixed one-way latency and delivered by the path's [`WireSource`].
//! A path can be cut and restored at runtime through its [`PathControl`];
//! frames sent while it is cut are dropped.

use super::capture::{CaptureSource, CapturedBytes, SourceError};
use super::generator::{SinkError, TransmitSink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn default_path_a_delay_us() -> u64 {
    250
}

fn default_path_b_delay_us() -> u64 {
    100
}

/// One-way delay of each path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireConfig {
    #[serde(default = "default_path_a_delay_us")]
    pub path_a_delay_us: u64,
    #[serde(default = "default_path_b_delay_us")]
    pub path_b_delay_us: u64,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            path_a_delay_us: default_path_a_delay_us(),
            path_b_delay_us: default_path_b_delay_us(),
        }
    }
}

/// Runtime switch for one path
#[derive(Debug, Clone)]
pub struct PathControl {
    up: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl PathControl {
    fn new() -> Self {
        Self {
            up: Arc::new(AtomicBool::new(true)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stop delivering frames on this path
    pub fn cut(&self) {
        if self.up.swap(false, Ordering::SeqCst) {
            tracing::info!("wire_path_cut");
        }
    }

    pub fn restore(&self) {
        if !self.up.swap(true, Ordering::SeqCst) {
            tracing::info!("wire_path_restored");
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    /// Frames dropped while cut
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct InFlight {
    bytes: Vec<u8>,
    deliver_at: Instant,
}

#[derive(Debug)]
struct Lane {
    tx: mpsc::UnboundedSender<InFlight>,
    delay: Duration,
    control: PathControl,
}

/// Sending end: replicates every frame onto all paths
#[derive(Debug)]
pub struct WireSink {
    lanes: Vec<Lane>,
}

impl TransmitSink for WireSink {
    async fn transmit(&mut self, frame: Vec<u8>) -> Result<(), SinkError> {
        let now = Instant::now();
        let mut open = 0;
        for lane in &self.lanes {
            if lane.tx.is_closed() {
                continue;
            }
            open += 1;
            if !lane.control.is_up() {
                lane.control.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let in_flight = InFlight {
                bytes: frame.clone(),
                deliver_at: now + lane.delay,
            };
            if lane.tx.send(in_flight).is_err() {
                open -= 1;
            }
        }
        if open == 0 {
            return Err(SinkError::Unavailable("all wire paths closed".to_string()));
        }
        Ok(())
    }
}

/// Receiving end of one path
#[derive(Debug)]
pub struct WireSource {
    rx: mpsc::UnboundedReceiver<InFlight>,
}

impl CaptureSource for WireSource {
    async fn next_frame(&mut self) -> Result<Option<CapturedBytes>, SourceError> {
        match self.rx.recv().await {
            Some(in_flight) => {
                tokio::time::sleep_until(in_flight.deliver_at).await;
                Ok(Some(CapturedBytes::new(in_flight.bytes)))
            }
            // Sink dropped and everything in flight delivered
            None => Ok(None),
        }
    }
}

/// A two-path wire; destructure to take the parts
#[derive(Debug)]
pub struct LoopbackWire {
    pub sink: WireSink,
    pub path_a: WireSource,
    pub path_b: WireSource,
    pub control_a: PathControl,
    pub control_b: PathControl,
}

impl LoopbackWire {
    pub fn new(config: &WireConfig) -> Self {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let control_a = PathControl::new();
        let control_b = PathControl::new();

        let sink = WireSink {
            lanes: vec![
                Lane {
                    tx: tx_a,
                    delay: Duration::from_micros(config.path_a_delay_us),
                    control: control_a.clone(),
                },
                Lane {
                    tx: tx_b,
                    delay: Duration::from_micros(config.path_b_delay_us),
                    control: control_b.clone(),
                },
            ],
        };

        Self {
            sink,
            path_a: WireSource { rx: rx_a },
            path_b: WireSource { rx: rx_b },
            control_a,
            control_b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_replicates_with_path_delay() {
        let LoopbackWire {
            mut sink,
            mut path_a,
            mut path_b,
            ..
        } = LoopbackWire::new(&WireConfig::default());

        let start = Instant::now();
        sink.transmit(vec![1, 2, 3]).await.unwrap();

        let b = path_b.next_frame().await.unwrap().unwrap();
        assert_eq!(b.bytes, vec![1, 2, 3]);
        assert_eq!(start.elapsed(), Duration::from_micros(100));

        let a = path_a.next_frame().await.unwrap().unwrap();
        assert_eq!(a.bytes, vec![1, 2, 3]);
        assert_eq!(start.elapsed(), Duration::from_micros(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cut_path_drops_frames() {
        let LoopbackWire {
            mut sink,
            mut path_a,
            mut path_b,
            control_b,
            ..
        } = LoopbackWire::new(&WireConfig::default());

        control_b.cut();
        sink.transmit(vec![7]).await.unwrap();
        control_b.restore();
        sink.transmit(vec![8]).await.unwrap();
        drop(sink);

        assert_eq!(control_b.dropped(), 1);
        assert_eq!(path_b.next_frame().await.unwrap().unwrap().bytes, vec![8]);
        assert!(path_b.next_frame().await.unwrap().is_none());
        assert_eq!(path_a.next_frame().await.unwrap().unwrap().bytes, vec![7]);
        assert_eq!(path_a.next_frame().await.unwrap().unwrap().bytes, vec![8]);
        assert!(path_a.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sink_unavailable_when_all_paths_closed() {
        let LoopbackWire {
            mut sink,
            path_a,
            path_b,
            ..
        } = LoopbackWire::new(&WireConfig::default());
        drop(path_a);
        drop(path_b);

        assert!(matches!(
            sink.transmit(vec![0]).await,
            Err(SinkError::Unavailable(_))
        ));
    }
}
