//! Two-phase media bridging (§4.8).
//!
//! `MediaBridge::allocate` is phase 1, called once the caller's SDP offer
//! is in hand and before forking. It returns a `MediaSession` the caller
//! holds alongside the Pending Call / Dialog, plus the rewritten SDP body
//! to send on to the callee leg(s). `MediaSession::complete` is phase 2,
//! called once a callee answers with its own SDP; it negotiates the
//! codec, rewrites the callee's SDP for the 200 OK back to the original
//! caller, and starts the RTP relay.
//!
//! Port-pair naming: the "caller-leg" port is where the *caller* is told
//! (via the phase-2-rewritten answer) to send RTP, so packets arriving
//! there came from the caller and are relayed to the callee's real
//! address. The "callee-leg" port is where the *callee* is told (via the
//! phase-1-rewritten offer) to send RTP, so packets arriving there came
//! from the callee and are relayed to the caller's real address.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::info;

use pbx_sip::Sdp;

use crate::codec::{self, NegotiatedCodec};
use crate::error::{MediaError, Result};
use crate::ports::PortAllocator;
use crate::relay::{spawn_relay, RelayHandle};

pub struct MediaBridge {
    allocator: Arc<PortAllocator>,
    proxy_ip: IpAddr,
}

impl MediaBridge {
    pub fn new(proxy_ip: IpAddr, rtp_port_min: u16, rtp_port_max: u16) -> Self {
        Self { allocator: Arc::new(PortAllocator::new(rtp_port_min, rtp_port_max)), proxy_ip }
    }

    /// Phase 1: parse the caller's offer, allocate a caller-leg/callee-leg
    /// RTP port pair, and return the session plus the rewritten offer to
    /// forward to the callee leg(s).
    pub async fn allocate(&self, caller_sdp_body: &str, call_id: &str) -> Result<(MediaSession, String)> {
        let caller_sdp = Sdp::parse(caller_sdp_body)?;

        let (caller_rtp, caller_rtcp) = self.allocator.allocate_pair()?;
        let (callee_rtp, callee_rtcp) = match self.allocator.allocate_pair() {
            Ok(pair) => pair,
            Err(e) => {
                self.allocator.release_pair(caller_rtp);
                return Err(e);
            }
        };

        let caller_remote = resolve_remote(&caller_sdp)?;

        let mut rewritten = caller_sdp.clone();
        rewritten.set_connection_address(&self.proxy_ip.to_string());
        rewritten.set_audio_port(callee_rtp);

        let session = MediaSession {
            call_id: call_id.to_string(),
            proxy_ip: self.proxy_ip,
            allocator: self.allocator.clone(),
            caller_rtp_port: caller_rtp,
            caller_rtcp_port: caller_rtcp,
            callee_rtp_port: callee_rtp,
            callee_rtcp_port: callee_rtcp,
            caller_sdp,
            caller_remote,
            state: Mutex::new(None),
        };

        info!(call_id, caller_rtp, callee_rtp, "media session allocated");
        Ok((session, rewritten.to_string_crlf()))
    }
}

struct RunningRelay {
    relay: RelayHandle,
}

/// Live state for one call's media bridge, owned by the Dialog (or the
/// Pending Call before it graduates). Releasing frees both port pairs.
pub struct MediaSession {
    call_id: String,
    proxy_ip: IpAddr,
    allocator: Arc<PortAllocator>,
    caller_rtp_port: u16,
    caller_rtcp_port: u16,
    callee_rtp_port: u16,
    callee_rtcp_port: u16,
    /// The caller's original, pre-rewrite offer — needed in phase 2 for
    /// codec negotiation against the callee's answer.
    caller_sdp: Sdp,
    caller_remote: SocketAddr,
    state: Mutex<Option<RunningRelay>>,
}

impl MediaSession {
    pub fn caller_rtp_port(&self) -> u16 {
        self.caller_rtp_port
    }

    pub fn callee_rtp_port(&self) -> u16 {
        self.callee_rtp_port
    }

    /// Phase 2: negotiate the codec against the callee's answer, rewrite
    /// it for the 200 OK back to the caller, and start relaying RTP
    /// between the two legs.
    pub async fn complete(&self, callee_sdp_body: &str) -> Result<(String, NegotiatedCodec)> {
        let callee_sdp = Sdp::parse(callee_sdp_body)?;
        let negotiated = codec::negotiate(&self.caller_sdp, &callee_sdp)?;
        let callee_remote = resolve_remote(&callee_sdp)?;

        let mut rewritten = callee_sdp.clone();
        rewritten.set_connection_address(&self.proxy_ip.to_string());
        rewritten.set_audio_port(self.caller_rtp_port);

        let mut whitelist = vec![negotiated.callee_payload_type];
        if let Some(pt) = callee_sdp.telephone_event_pt() {
            whitelist.push(pt);
        }

        let caller_socket = Arc::new(
            UdpSocket::bind(("0.0.0.0", self.caller_rtp_port))
                .await
                .map_err(|e| MediaError::Transport(e.to_string()))?,
        );
        let callee_socket = Arc::new(
            UdpSocket::bind(("0.0.0.0", self.callee_rtp_port))
                .await
                .map_err(|e| MediaError::Transport(e.to_string()))?,
        );

        let relay = spawn_relay(caller_socket, self.caller_remote, callee_socket, callee_remote, whitelist);
        *self.state.lock() = Some(RunningRelay { relay });

        info!(call_id = %self.call_id, codec = %negotiated.codec_name, "media relay started");
        Ok((rewritten.to_string_crlf(), negotiated))
    }

    /// Stop the relay (if running) and free both port pairs. Idempotent —
    /// safe to call after a phase-1-only failure, and safe on drop.
    pub fn release(&self) {
        if let Some(running) = self.state.lock().take() {
            running.relay.stop();
        }
        self.allocator.release_pair(self.caller_rtp_port);
        self.allocator.release_pair(self.callee_rtp_port);
        let _ = self.caller_rtcp_port;
        let _ = self.callee_rtcp_port;
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn resolve_remote(sdp: &Sdp) -> Result<SocketAddr> {
    let addr = sdp.connection_address().ok_or_else(|| MediaError::Transport("missing c= line".into()))?;
    let port = sdp.audio_port()?;
    format!("{addr}:{port}").parse().map_err(|_| MediaError::Transport(format!("invalid media address {addr}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLER_OFFER: &str = "v=0\r\nc=IN IP4 203.0.113.10\r\nm=audio 30000 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n";
    const CALLEE_ANSWER: &str = "v=0\r\nc=IN IP4 203.0.113.20\r\nm=audio 40000 RTP/AVP 8\r\na=rtpmap:8 PCMA/8000\r\n";

    #[tokio::test]
    async fn allocate_rewrites_offer_and_reserves_two_port_pairs() {
        let bridge = MediaBridge::new("198.51.100.1".parse().unwrap(), 30000, 30020);
        let (session, rewritten) = bridge.allocate(CALLER_OFFER, "call-1").await.unwrap();

        let rewritten_sdp = Sdp::parse(&rewritten).unwrap();
        assert_eq!(rewritten_sdp.connection_address(), Some("198.51.100.1"));
        assert_eq!(rewritten_sdp.audio_port().unwrap(), session.callee_rtp_port());
        assert_ne!(session.caller_rtp_port(), session.callee_rtp_port());

        session.release();
    }

    #[tokio::test]
    async fn complete_negotiates_codec_and_rewrites_answer() {
        let bridge = MediaBridge::new("198.51.100.1".parse().unwrap(), 30100, 30120);
        let (session, _offer) = bridge.allocate(CALLER_OFFER, "call-2").await.unwrap();

        let (answer, negotiated) = session.complete(CALLEE_ANSWER).await.unwrap();
        assert_eq!(negotiated.codec_name, "PCMA");

        let answer_sdp = Sdp::parse(&answer).unwrap();
        assert_eq!(answer_sdp.connection_address(), Some("198.51.100.1"));
        assert_eq!(answer_sdp.audio_port().unwrap(), session.caller_rtp_port());

        session.release();
    }

    #[tokio::test]
    async fn release_frees_ports_for_reuse() {
        let bridge = MediaBridge::new("198.51.100.1".parse().unwrap(), 30200, 30204);
        let (session, _) = bridge.allocate(CALLER_OFFER, "call-3").await.unwrap();
        session.release();
        // with only two pairs available in this tiny range, a second
        // allocation only succeeds if release() actually returned them.
        assert!(bridge.allocate(CALLER_OFFER, "call-4").await.is_ok());
    }
}
