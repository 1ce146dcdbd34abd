//! The transaction manager §1 Non-goals assumes is available: server and
//! client transactions over a UDP transport, raw out-of-transaction writes
//! for ACK-for-2xx (§6), and a dispatch loop that hands brand-new requests
//! to whatever method router the PBX core registers.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use pbx_sip::{Method, Request, Response, StatusCode};

use crate::codec::{self, Decoded};
use crate::error::{Result, TransactionError};
use crate::events::{ClientTransactionEvent, IncomingRequest};
use crate::key::{new_branch, TransactionKey};
use crate::server_tx::ServerTransaction;
use crate::transport::Transport;

struct ClientTxState {
    destination: SocketAddr,
    original_request: Request,
    sender: mpsc::Sender<ClientTransactionEvent>,
}

pub struct TransactionManager {
    transport: Arc<dyn Transport>,
    server_dest: DashMap<TransactionKey, SocketAddr>,
    server_request: DashMap<TransactionKey, Request>,
    client_txs: DashMap<TransactionKey, ClientTxState>,
    incoming_tx: mpsc::UnboundedSender<IncomingRequest>,
}

impl TransactionManager {
    pub fn new(transport: Arc<dyn Transport>) -> (Arc<Self>, mpsc::UnboundedReceiver<IncomingRequest>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            transport,
            server_dest: DashMap::new(),
            server_request: DashMap::new(),
            client_txs: DashMap::new(),
            incoming_tx,
        });
        (manager, incoming_rx)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Register a server transaction for an inbound request. Idempotent on
    /// retransmissions of the same branch+method.
    pub async fn create_server_transaction(&self, request: Request, source: SocketAddr) -> Result<ServerTransaction> {
        let key = TransactionKey::for_request(&request);
        self.server_dest.insert(key.clone(), source);
        self.server_request.insert(key.clone(), request.clone());
        Ok(ServerTransaction::new(key, request))
    }

    /// Send a response on a server transaction. Terminates the transaction
    /// once a final (>=200) response has gone out.
    pub async fn send_response(&self, id: &TransactionKey, response: Response) -> Result<()> {
        let dest = *self
            .server_dest
            .get(id)
            .ok_or_else(|| TransactionError::UnknownTransaction(id.to_string()))?;
        self.transport.send(dest, codec::encode_response(&response)).await?;
        if response.status.0 >= 200 {
            self.server_dest.remove(id);
            self.server_request.remove(id);
        }
        Ok(())
    }

    /// Start a client transaction for an INVITE or non-INVITE request,
    /// ensuring a fresh Via/branch is present, and return a channel of
    /// provisional/final/transport-error events.
    pub async fn create_client_transaction(
        &self,
        mut request: Request,
        destination: SocketAddr,
    ) -> Result<(TransactionKey, mpsc::Receiver<ClientTransactionEvent>)> {
        ensure_fresh_via(&mut request, self.transport.local_addr());
        let key = TransactionKey::for_request(&request);

        let (tx, rx) = mpsc::channel(8);
        self.client_txs.insert(
            key.clone(),
            ClientTxState { destination, original_request: request.clone(), sender: tx.clone() },
        );

        let bytes = codec::encode_request(&request);
        if let Err(e) = self.transport.send(destination, bytes).await {
            let _ = tx.send(ClientTransactionEvent::TransportError(e.to_string())).await;
        }

        Ok((key, rx))
    }

    /// Send a request with no associated transaction — the ACK-for-2xx
    /// write-request path §6 requires, and the fire-and-forget forked
    /// CANCEL.
    pub async fn send_raw(&self, destination: SocketAddr, request: &Request) -> Result<()> {
        self.transport.send(destination, codec::encode_request(request)).await
    }

    /// Build and send a CANCEL for an in-progress client transaction per
    /// RFC 3261 §9.1: same Call-ID/From/To/Request-URI, a fresh Via/branch,
    /// sent on its own transaction that is torn down right after dispatch.
    pub async fn cancel_client_transaction(&self, id: &TransactionKey) -> Result<()> {
        let Some((_, state)) = self.client_txs.remove(id) else {
            return Ok(());
        };
        let original = &state.original_request;
        let mut cancel = Request::new(Method::Cancel, original.request_uri.clone());
        cancel.headers.push("Call-ID", original.headers.get("Call-ID").unwrap_or_default());
        cancel.headers.push("From", original.headers.get("From").unwrap_or_default());
        cancel.headers.push("To", original.headers.get("To").unwrap_or_default());
        let (seq, _) = original.cseq().unwrap_or((1, Method::Invite));
        cancel.headers.push("CSeq", format!("{seq} CANCEL"));
        cancel.headers.push("Max-Forwards", "70");
        cancel
            .headers
            .push("Via", format!("SIP/2.0/UDP {};branch={}", self.transport.local_addr(), new_branch()));

        debug!(transaction = %id, "sending CANCEL for non-winning fork leg");
        self.transport.send(state.destination, codec::encode_request(&cancel)).await
    }

    pub fn terminate_client_transaction(&self, id: &TransactionKey) {
        self.client_txs.remove(id);
    }

    /// Handle one datagram read off the socket: route responses to the
    /// waiting client transaction, forward brand-new requests to whoever
    /// is consuming the incoming-request channel.
    pub async fn dispatch_incoming(&self, bytes: &[u8], source: SocketAddr) {
        let decoded = match codec::decode(bytes, source) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "dropping malformed SIP datagram");
                return;
            }
        };

        match decoded {
            Decoded::Response(response) => self.route_response(response),
            Decoded::Request(request) => {
                trace!(method = %request.method, "incoming request");
                let _ = self.incoming_tx.send(IncomingRequest { request });
            }
        }
    }

    fn route_response(&self, response: Response) {
        let branch = response
            .headers
            .get("Via")
            .and_then(|via| via.split(';').find_map(|p| p.trim().strip_prefix("branch=")))
            .unwrap_or_default()
            .to_string();

        let Some(key) = self
            .client_txs
            .iter()
            .map(|e| e.key().clone())
            .find(|k| k.branch == branch)
        else {
            trace!(branch, "response for unknown/expired client transaction");
            return;
        };

        let is_final = response.status.0 >= 200;
        if let Some(state) = self.client_txs.get(&key) {
            let sender = state.sender.clone();
            let event = if response.status.is_provisional() {
                ClientTransactionEvent::Provisional(response)
            } else {
                ClientTransactionEvent::Final(response)
            };
            tokio::spawn(async move {
                let _ = sender.send(event).await;
            });
        }
        if is_final {
            self.client_txs.remove(&key);
        }
    }

    /// Run the UDP receive loop, dispatching every datagram. Exits only
    /// when the socket errors out.
    pub async fn run(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; 65536];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, source)) => {
                    self.dispatch_incoming(&buf[..len], source).await;
                }
                Err(e) => {
                    warn!(error = %e, "UDP receive loop stopped");
                    break;
                }
            }
        }
    }
}

fn ensure_fresh_via(request: &mut Request, local_addr: SocketAddr) {
    let needs_branch = request
        .headers
        .get("Via")
        .map(|via| !via.contains("branch="))
        .unwrap_or(true);
    if needs_branch {
        let transport = request.via_transport().to_ascii_uppercase();
        request.headers.remove_first("Via");
        request
            .headers
            .push("Via", format!("SIP/2.0/{transport} {local_addr};branch={}", new_branch()));
    }
}

/// Convenience helpers mirroring `rvoip_transaction_core::utils::response_builders`.
pub mod response_builders {
    use super::*;

    pub fn create_response(request: &Request, status: StatusCode) -> Response {
        Response::to_request(request, status).expect("request missing required headers for response")
    }
}
