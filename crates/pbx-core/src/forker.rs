//! Forker (C7): parallel INVITE fan-out, first-180/183-relay-once,
//! first-2xx-wins with CANCEL to every other leg.

use std::net::SocketAddr;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use pbx_sip::{Method, Request, Response, SipUri};
use pbx_transaction::{ClientTransactionEvent, TransactionKey, TransactionManager};

use crate::error::{PbxError, Result};

/// One contact to fan an INVITE out to. `destination` is the transport
/// address actually dialed — already NAT-rewritten from the registration's
/// observed source address when the target came from a Registration.
#[derive(Debug, Clone)]
pub struct ForkTarget {
    pub contact_uri: SipUri,
    pub destination: SocketAddr,
}

pub struct WinningLeg {
    pub key: TransactionKey,
    pub destination: SocketAddr,
    pub contact_uri: SipUri,
    pub response: Response,
}

pub struct ForkResult {
    pub answered: bool,
    pub all_busy: bool,
    pub winning: Option<WinningLeg>,
}

/// `Fork(incoming INVITE, callerTx, contacts, callID, sdpOverride?)` (§4.7).
/// `sdp_override`, when present, replaces the incoming INVITE's body on
/// every forked leg (the media-proxy-rewritten offer from C8 phase 1).
pub async fn fork(
    txn: &TransactionManager,
    caller_request: &Request,
    caller_tx_key: &TransactionKey,
    targets: Vec<ForkTarget>,
    sdp_override: Option<Vec<u8>>,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<ForkResult> {
    let leg_count = targets.len();
    if leg_count == 0 {
        return Ok(ForkResult { answered: false, all_busy: false, winning: None });
    }

    let (agg_tx, mut agg_rx) = mpsc::channel(leg_count * 4);
    let mut legs: Vec<(TransactionKey, ForkTarget)> = Vec::with_capacity(leg_count);

    for target in targets {
        let body = sdp_override.clone().unwrap_or_else(|| caller_request.body.clone());
        let leg_request = build_leg_request(caller_request, target.contact_uri.clone(), body);
        let (key, mut rx) = txn.create_client_transaction(leg_request, target.destination).await?;
        legs.push((key.clone(), target));

        let agg_tx = agg_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let is_final = matches!(
                    event,
                    ClientTransactionEvent::Final(_) | ClientTransactionEvent::TransportError(_) | ClientTransactionEvent::Timeout
                );
                if agg_tx.send((key.clone(), event)).await.is_err() || is_final {
                    break;
                }
            }
        });
    }
    drop(agg_tx);

    let mut provisional_relayed = false;
    let mut busy_count = 0usize;
    let mut failed_count = 0usize;
    let mut outstanding = leg_count;

    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_ok() && *cancel_rx.borrow() {
                    info!(legs = leg_count, "fork cancelled, sending CANCEL to every outstanding leg");
                    for (key, _) in &legs {
                        let _ = txn.cancel_client_transaction(key).await;
                    }
                    return Err(PbxError::CallCancelled);
                }
            }
            event = agg_rx.recv() => {
                let Some((key, event)) = event else {
                    return Ok(ForkResult { answered: false, all_busy: busy_count == leg_count, winning: None });
                };
                match event {
                    ClientTransactionEvent::Provisional(resp) => {
                        if !provisional_relayed && (resp.status.0 == 180 || resp.status.0 == 183) {
                            provisional_relayed = true;
                            relay_provisional(txn, caller_request, caller_tx_key, &resp).await;
                        }
                    }
                    ClientTransactionEvent::Final(resp) if resp.status.is_success() => {
                        for (other_key, _) in &legs {
                            if *other_key != key {
                                let _ = txn.cancel_client_transaction(other_key).await;
                            }
                        }
                        let (_, target) = legs.into_iter().find(|(k, _)| *k == key).expect("winning key was just observed");
                        return Ok(ForkResult {
                            answered: true,
                            all_busy: false,
                            winning: Some(WinningLeg {
                                key,
                                destination: target.destination,
                                contact_uri: target.contact_uri,
                                response: resp,
                            }),
                        });
                    }
                    ClientTransactionEvent::Final(resp) => {
                        if resp.status.0 == 486 {
                            busy_count += 1;
                        } else {
                            failed_count += 1;
                        }
                        outstanding -= 1;
                        debug!(status = resp.status.0, busy_count, failed_count, outstanding, "fork leg terminated");
                        if outstanding == 0 {
                            return Ok(ForkResult { answered: false, all_busy: busy_count == leg_count, winning: None });
                        }
                    }
                    ClientTransactionEvent::TransportError(reason) => {
                        warn!(reason, "fork leg transport error");
                        failed_count += 1;
                        outstanding -= 1;
                        if outstanding == 0 {
                            return Ok(ForkResult { answered: false, all_busy: busy_count == leg_count, winning: None });
                        }
                    }
                    ClientTransactionEvent::Timeout => {
                        failed_count += 1;
                        outstanding -= 1;
                        if outstanding == 0 {
                            return Ok(ForkResult { answered: false, all_busy: busy_count == leg_count, winning: None });
                        }
                    }
                }
            }
        }
    }
}

pub(crate) async fn relay_provisional(
    txn: &TransactionManager,
    caller_request: &Request,
    caller_tx_key: &TransactionKey,
    leg_response: &Response,
) {
    let Ok(mut relayed) = Response::to_request(caller_request, leg_response.status) else { return };
    if leg_response.status.0 == 183 && !leg_response.body.is_empty() {
        let content_type = leg_response.headers.get("Content-Type").unwrap_or("application/sdp").to_string();
        relayed = relayed.with_body(&content_type, leg_response.body.clone());
    }
    let _ = txn.send_response(caller_tx_key, relayed).await;
}

fn build_leg_request(original: &Request, target_uri: SipUri, body: Vec<u8>) -> Request {
    let mut request = Request::new(Method::Invite, target_uri);
    request.headers.push("Call-ID", original.headers.get("Call-ID").unwrap_or_default());
    request.headers.push("From", original.headers.get("From").unwrap_or_default());
    request.headers.push("To", original.headers.get("To").unwrap_or_default());
    let (seq, _) = original.cseq().unwrap_or((1, Method::Invite));
    request.headers.push("CSeq", format!("{seq} INVITE"));
    request.headers.push("Max-Forwards", "70");
    if !body.is_empty() {
        request.headers.push("Content-Type", "application/sdp");
        request.headers.push("Content-Length", body.len().to_string());
        request.body = body;
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_transaction::UdpTransport;

    fn sample_invite() -> Request {
        let mut req = Request::new(Method::Invite, SipUri::parse("sip:101@pbx.example").unwrap());
        req.headers.push("Call-ID", "call-1");
        req.headers.push("CSeq", "1 INVITE");
        req.headers.push("From", "<sip:100@pbx.example>;tag=abc");
        req.headers.push("To", "<sip:101@pbx.example>");
        req.headers.push("Via", "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK1");
        req
    }

    #[test]
    fn leg_request_carries_override_body_and_preserves_call_id() {
        let original = sample_invite();
        let leg = build_leg_request(&original, SipUri::parse("sip:101@10.0.0.9:5060").unwrap(), b"v=0\r\n".to_vec());
        assert_eq!(leg.headers.get("Call-ID"), Some("call-1"));
        assert_eq!(leg.body, b"v=0\r\n");
        assert_eq!(leg.headers.get("Content-Type"), Some("application/sdp"));
    }

    #[tokio::test]
    async fn empty_target_list_is_neither_answered_nor_all_busy() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (txn, _incoming) = TransactionManager::new(std::sync::Arc::new(transport));
        let original = sample_invite();
        let caller_key = TransactionKey::for_request(&original);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let result = fork(&txn, &original, &caller_key, Vec::new(), None, cancel_rx).await.unwrap();
        assert!(!result.answered);
        assert!(!result.all_busy);
    }
}
