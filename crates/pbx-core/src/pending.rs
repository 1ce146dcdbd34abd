//! Pending Call Manager (C9, part 1): calls between INVITE receipt and
//! answer/failure. Mutually exclusive with the Dialog manager on the same
//! Call-ID (§4.9) — the INVITE handler enforces graduation in one place.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::info;

use pbx_sip::{Response, StatusCode};
use pbx_transaction::{response_builders, ServerTransaction, TransactionManager};

use pbx_media::MediaSession;

/// A call in flight: the caller's original server transaction plus enough
/// to cancel every outstanding fork leg and release any allocated media.
pub struct PendingCall {
    pub call_id: String,
    pub caller_tx: ServerTransaction,
    /// Dropped or set to fire fork cancellation (§5 "every multi-leg
    /// operation uses a context/cancellation token").
    pub cancel: watch::Sender<bool>,
    pub media: Option<Arc<MediaSession>>,
}

pub struct PendingCallManager {
    calls: DashMap<String, PendingCall>,
    txn: Arc<TransactionManager>,
}

impl PendingCallManager {
    pub fn new(txn: Arc<TransactionManager>) -> Self {
        Self { calls: DashMap::new(), txn }
    }

    pub fn insert(&self, call: PendingCall) {
        self.calls.insert(call.call_id.clone(), call);
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    /// Removes and returns the entry so the caller can graduate it into a
    /// Dialog (Answered) without the manager racing against itself.
    pub fn remove(&self, call_id: &str) -> Option<PendingCall> {
        self.calls.remove(call_id).map(|(_, call)| call)
    }

    /// `Cancel(callID)` (§4.9): removes the entry, fires fork-cancel,
    /// releases any attached bridge, and sends 487 on the caller's
    /// original INVITE server transaction.
    pub async fn cancel(&self, call_id: &str) -> bool {
        let Some(call) = self.remove(call_id) else { return false };
        let _ = call.cancel.send(true);
        if let Some(media) = &call.media {
            media.release();
        }
        let response = Response::to_request(call.caller_tx.request(), StatusCode::REQUEST_TERMINATED)
            .unwrap_or_else(|_| Response::new(StatusCode::REQUEST_TERMINATED));
        let _ = self.txn.send_response(call.caller_tx.id(), response).await;
        info!(call_id, "pending call cancelled");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_remove_round_trips() {
        let (tx, _rx) = watch::channel(false);
        let req = pbx_sip::Request::new(pbx_sip::Method::Invite, pbx_sip::SipUri::parse("sip:101@pbx").unwrap());
        let key = pbx_transaction::TransactionKey::new(pbx_sip::Method::Invite);
        let caller_tx = ServerTransaction::new(key, req);

        let transport = pbx_transaction::UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (txn, _incoming) = TransactionManager::new(Arc::new(transport));
        let manager = PendingCallManager::new(txn);

        manager.insert(PendingCall { call_id: "call-1".into(), caller_tx, cancel: tx, media: None });
        assert!(manager.contains("call-1"));
        assert!(manager.remove("call-1").is_some());
        assert!(!manager.contains("call-1"));
    }
}
