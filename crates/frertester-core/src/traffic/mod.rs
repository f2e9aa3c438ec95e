//! Traffic generation, capture and transports
//!
//! - [`generator`]: paced emission of tagged frames onto a [`TransmitSink`]
//! - [`capture`]: one task per path reading a [`CaptureSource`] into the
//!   pipeline intake
//! - [`wire`]: in-process replicated network with per-path delay and cut
//! - [`udp`]: frames carried as UDP datagrams

pub mod capture;
pub mod generator;
pub mod udp;
pub mod wire;

pub use capture::{CaptureSource, CapturedBytes, DualPathCapture, SourceError};
pub use generator::{FrameGenerator, GeneratorConfig, SinkError, TransmitSink};
