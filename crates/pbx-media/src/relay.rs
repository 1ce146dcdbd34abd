//! PT-whitelisted RTP pass-through relay between two UDP sockets.
//!
//! Only PCMU/PCMA pass-through is in scope (§1 Non-goals) — packets are
//! forwarded byte-for-byte, never transcoded; only the payload type is
//! inspected to decide whether to forward at all.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::trace;

/// RTP payload type lives in the low 7 bits of the second header byte.
fn packet_payload_type(packet: &[u8]) -> Option<u8> {
    packet.get(1).map(|b| b & 0x7f)
}

pub struct RelayHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Spawn the two forwarding directions for one call's media session.
/// `whitelist` is the set of payload types allowed through — the
/// negotiated codec plus the telephone-event PT, per §4.8 step 5.
pub fn spawn_relay(
    caller_socket: Arc<UdpSocket>,
    caller_remote: SocketAddr,
    callee_socket: Arc<UdpSocket>,
    callee_remote: SocketAddr,
    whitelist: Vec<u8>,
) -> RelayHandle {
    let whitelist_a = whitelist.clone();
    let a_to_b = {
        let caller_socket = caller_socket.clone();
        let callee_socket = callee_socket.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                let Ok((len, _from)) = caller_socket.recv_from(&mut buf).await else { break };
                if packet_payload_type(&buf[..len]).map(|pt| whitelist_a.contains(&pt)).unwrap_or(false) {
                    let _ = callee_socket.send_to(&buf[..len], callee_remote).await;
                } else {
                    trace!("dropped non-whitelisted RTP packet (caller->callee)");
                }
            }
        })
    };

    let whitelist_b = whitelist;
    let b_to_a = tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        loop {
            let Ok((len, _from)) = callee_socket.recv_from(&mut buf).await else { break };
            if packet_payload_type(&buf[..len]).map(|pt| whitelist_b.contains(&pt)).unwrap_or(false) {
                let _ = caller_socket.send_to(&buf[..len], caller_remote).await;
            } else {
                trace!("dropped non-whitelisted RTP packet (callee->caller)");
            }
        }
    });

    RelayHandle { tasks: vec![a_to_b, b_to_a] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_payload_type_from_second_header_byte() {
        // marker bit set, PT=8 (PCMA)
        let packet = [0x80, 0x88, 0, 0];
        assert_eq!(packet_payload_type(&packet), Some(8));
    }
}
