//! Frames carried as UDP datagrams
//!
//! One raw Ethernet frame per datagram. The sender replicates each frame to
//! every configured target, so two targets give two disjoint paths when the
//! network in between routes them separately.

use super::capture::{CaptureSource, CapturedBytes, SourceError};
use super::generator::{SinkError, TransmitSink};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Largest datagram accepted on receive
const MAX_DATAGRAM: usize = 65_536;

/// Sends every frame to each target
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
}

impl UdpSink {
    /// Bind an ephemeral local socket for sending to `targets`
    ///
    /// The socket is left unconnected so an unreachable target does not
    /// surface as an error on a later send.
    pub async fn connect(targets: Vec<SocketAddr>) -> Result<Self, SinkError> {
        let first = targets
            .first()
            .ok_or_else(|| SinkError::Unavailable("no UDP target configured".to_string()))?;
        let unspecified: IpAddr = if first.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
        tracing::info!(?targets, local = %socket.local_addr()?, "udp_sink_ready");
        Ok(Self { socket, targets })
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }
}

impl TransmitSink for UdpSink {
    async fn transmit(&mut self, frame: Vec<u8>) -> Result<(), SinkError> {
        for target in &self.targets {
            self.socket.send_to(&frame, *target).await?;
        }
        Ok(())
    }
}

/// Receives frames on a bound UDP socket
#[derive(Debug)]
pub struct UdpSource {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpSource {
    pub async fn bind(addr: SocketAddr) -> Result<Self, SourceError> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            SourceError::Unavailable(format!("cannot bind {addr}: {e}"))
        })?;
        tracing::info!(local = %socket.local_addr()?, "udp_source_bound");
        Ok(Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SourceError> {
        Ok(self.socket.local_addr()?)
    }
}

impl CaptureSource for UdpSource {
    async fn next_frame(&mut self) -> Result<Option<CapturedBytes>, SourceError> {
        let (len, _peer) = self.socket.recv_from(&mut self.buf).await?;
        Ok(Some(CapturedBytes::new(self.buf[..len].to_vec())))
    }
}
