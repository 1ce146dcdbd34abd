//! BYE/CANCEL Handler (C12): tears down a dialog or an in-flight fork,
//! relays the hangup to the other leg, and finalizes the CDR (§4.12).

use std::net::SocketAddr;

use tracing::{info, warn};

use pbx_sip::{Method, Request, StatusCode};
use pbx_transaction::{response_builders, TransactionManager};

use crate::cdr::{CdrStore, Disposition};
use crate::database::DatabaseManager;
use crate::dialog::{Dialog, DialogLeg, DialogManager};
use crate::pending::PendingCallManager;

pub struct ByeCancelHandler {
    pub txn: std::sync::Arc<TransactionManager>,
    pub dialogs: std::sync::Arc<DialogManager>,
    pub pending: std::sync::Arc<PendingCallManager>,
    pub cdrs: std::sync::Arc<CdrStore>,
    pub db: std::sync::Arc<DatabaseManager>,
}

impl ByeCancelHandler {
    /// `HandleBye(req)` (§4.12): 481 if no dialog exists, else 200 OK to the
    /// BYE, an in-dialog BYE to the other leg, media release, and a
    /// finalized CDR.
    pub async fn handle_bye(&self, request: Request, source: SocketAddr) {
        let caller_tx = match self.txn.create_server_transaction(request.clone(), source).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "failed to create server transaction for BYE");
                return;
            }
        };
        let call_id = request.call_id().unwrap_or_default().to_string();

        let Some(dialog) = self.dialogs.remove(&call_id) else {
            let response = response_builders::create_response(&request, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);
            let _ = self.txn.send_response(caller_tx.id(), response).await;
            return;
        };

        let ok = response_builders::create_response(&request, StatusCode::OK);
        let _ = self.txn.send_response(caller_tx.id(), ok).await;

        let from_caller = request.from_tag().as_deref() == Some(dialog.caller.from_tag.as_str());
        let cause = if from_caller { "caller_hangup" } else { "callee_hangup" };
        self.teardown(dialog, from_caller, Disposition::Answered, cause).await;

        info!(call_id, from_caller, "call torn down by BYE");
    }

    /// `HandleCancel(req)` (§4.12): always 200 to the CANCEL itself, then
    /// either cancels the in-flight fork or, on the race where the call was
    /// already answered, tears the dialog down exactly like a caller BYE.
    pub async fn handle_cancel(&self, request: Request, source: SocketAddr) {
        let cancel_tx = match self.txn.create_server_transaction(request.clone(), source).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "failed to create server transaction for CANCEL");
                return;
            }
        };
        let ok = response_builders::create_response(&request, StatusCode::OK);
        let _ = self.txn.send_response(cancel_tx.id(), ok).await;

        let call_id = request.call_id().unwrap_or_default().to_string();

        if self.pending.cancel(&call_id).await {
            self.cdrs.with_mut(&call_id, |cdr| cdr.finalize(Disposition::Cancelled, "caller_cancel"));
            self.persist_cdr(&call_id);
            info!(call_id, "pending call cancelled");
            return;
        }

        if let Some(dialog) = self.dialogs.remove(&call_id) {
            warn!(call_id, "CANCEL raced an already-answered dialog, tearing down as a caller hangup");
            self.teardown(dialog, true, Disposition::Cancelled, "caller_cancel").await;
        }
    }

    /// Send an in-dialog BYE to whichever leg didn't originate the hangup,
    /// release the bridge, and finalize the CDR with `disposition` — the
    /// race where a CANCEL beat the answer still tears down like a BYE, but
    /// must record `Cancelled`, not `Answered` (§8).
    async fn teardown(&self, dialog: Dialog, from_caller: bool, disposition: Disposition, cause: &str) {
        let (target_leg, source_leg) = if from_caller { (&dialog.callee, &dialog.caller) } else { (&dialog.caller, &dialog.callee) };

        if let Some(bye) = build_in_dialog_bye(&dialog.call_id, target_leg, source_leg) {
            if let Ok(destination) = target_leg.remote_target.parse::<SocketAddr>() {
                match self.txn.create_client_transaction(bye, destination).await {
                    Ok((_key, mut rx)) => {
                        tokio::spawn(async move {
                            // Fire-and-forget: the caller already has its 200 OK,
                            // we just drain the transaction so it terminates cleanly.
                            while rx.recv().await.is_some() {}
                        });
                    }
                    Err(e) => warn!(call_id = %dialog.call_id, error = %e, "failed to relay BYE to other leg"),
                }
            } else {
                warn!(call_id = %dialog.call_id, "other leg has no transport destination, BYE not relayed");
            }
        }

        dialog.media.release();

        self.cdrs.with_mut(&dialog.call_id, |cdr| cdr.finalize(disposition, cause));
        self.persist_cdr(&dialog.call_id);
    }

    fn persist_cdr(&self, call_id: &str) {
        if let Some(cdr) = self.cdrs.take_finalized(call_id) {
            let db = self.db.clone();
            tokio::spawn(async move {
                if let Err(e) = db.insert_cdr(&cdr).await {
                    warn!(call_id = %cdr.call_id, error = %e, "failed to persist CDR");
                }
            });
        }
    }
}

/// Build the BYE the PBX sends to `target`, addressing itself with the
/// identity/tag it already used on that leg (§4.12). `source` is unused
/// today but kept for symmetry with the caller/callee pairing above.
fn build_in_dialog_bye(call_id: &str, target: &DialogLeg, _source: &DialogLeg) -> Option<Request> {
    let request_uri = pbx_sip::SipUri::parse(&target.contact_uri).ok()?;
    let mut bye = Request::new(Method::Bye, request_uri);
    bye.headers.push("Call-ID", call_id);
    bye.headers.push("From", format!("{};tag={}", target.local_identity, target.from_tag));
    bye.headers.push("To", format!("<{}>;tag={}", target.contact_uri.trim_start_matches('<').trim_end_matches('>'), target.to_tag));
    bye.headers.push("CSeq", "2 BYE");
    bye.headers.push("Max-Forwards", "70");
    Some(bye)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_leg(tag: &str, contact: &str) -> DialogLeg {
        DialogLeg {
            extension_id: None,
            registration_id: None,
            contact_uri: contact.into(),
            from_tag: format!("from-{tag}"),
            to_tag: format!("to-{tag}"),
            remote_target: "10.0.0.1:5060".into(),
            local_identity: format!("<sip:{tag}@pbx.example>"),
        }
    }

    #[tokio::test]
    async fn build_in_dialog_bye_addresses_the_target_leg() {
        let callee = sample_leg("callee", "sip:102@10.0.0.9:5060");
        let caller = sample_leg("caller", "sip:101@10.0.0.5:5060");
        let bye = build_in_dialog_bye("call-1", &callee, &caller).unwrap();
        assert_eq!(bye.method, Method::Bye);
        assert_eq!(bye.request_uri.user.as_deref(), Some("102"));
        assert!(bye.headers.get("From").unwrap().contains("tag=from-callee"));
        assert!(bye.headers.get("To").unwrap().contains("tag=to-callee"));
    }

    #[tokio::test]
    async fn cancel_with_no_pending_or_dialog_is_a_no_op() {
        let transport = pbx_transaction::UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (txn, _incoming) = TransactionManager::new(Arc::new(transport));
        let handler = ByeCancelHandler {
            txn: txn.clone(),
            dialogs: Arc::new(DialogManager::new()),
            pending: Arc::new(PendingCallManager::new(txn)),
            cdrs: Arc::new(CdrStore::new()),
            db: Arc::new(crate::database::DatabaseManager::new("sqlite::memory:").await.unwrap()),
        };

        let mut req = Request::new(Method::Cancel, pbx_sip::SipUri::parse("sip:101@pbx").unwrap());
        req.headers.push("Call-ID", "unknown-call");
        req.headers.push("From", "<sip:100@pbx>;tag=abc");
        req.headers.push("To", "<sip:101@pbx>");
        req.headers.push("CSeq", "1 CANCEL");
        req.headers.push("Via", "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK1");
        handler.handle_cancel(req, "10.0.0.5:5060".parse().unwrap()).await;
    }

    #[tokio::test]
    async fn bye_with_unknown_call_id_gets_481() {
        let transport = pbx_transaction::UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (txn, _incoming) = TransactionManager::new(Arc::new(transport));
        let handler = ByeCancelHandler {
            txn: txn.clone(),
            dialogs: Arc::new(DialogManager::new()),
            pending: Arc::new(PendingCallManager::new(txn)),
            cdrs: Arc::new(CdrStore::new()),
            db: Arc::new(crate::database::DatabaseManager::new("sqlite::memory:").await.unwrap()),
        };

        let mut req = Request::new(Method::Bye, pbx_sip::SipUri::parse("sip:101@pbx").unwrap());
        req.headers.push("Call-ID", "unknown-call");
        req.headers.push("From", "<sip:100@pbx>;tag=abc");
        req.headers.push("To", "<sip:101@pbx>;tag=def");
        req.headers.push("CSeq", "1 BYE");
        req.headers.push("Via", "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK1");
        handler.handle_bye(req, "10.0.0.5:5060".parse().unwrap()).await;
    }
}
