//! Outbound byte transport. UDP is implemented concretely; TCP/TLS/WSS are
//! exposed only as a transport-kind tag carried on messages (registration
//! rows and trunks record it per §3) since implementing those wire
//! transports is not needed to exercise the state machines this crate
//! exists for.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::error::{Result, TransactionError};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, destination: SocketAddr, bytes: Vec<u8>) -> Result<()>;
    fn local_addr(&self) -> SocketAddr;
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| TransactionError::Transport(e.to_string()))?;
        let local_addr = socket.local_addr().map_err(|e| TransactionError::Transport(e.to_string()))?;
        Ok(Self { socket: Arc::new(socket), local_addr })
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, destination: SocketAddr, bytes: Vec<u8>) -> Result<()> {
        self.socket
            .send_to(&bytes, destination)
            .await
            .map(|_| ())
            .map_err(|e| TransactionError::Transport(e.to_string()))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
