//! INVITE Router (C10): classification, 100 Trying, and dispatch to the
//! internal, inbound, or outbound call paths.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use pbx_media::MediaBridge;
use pbx_push::PushGatewayClient;
use pbx_registrar::types::{Extension, Registration};
use pbx_registrar::{DigestAuthenticator, ExtensionLookup, IpAuthMatcher, Registrar, RegistrationNotifier};
use pbx_sip::{Method, Request, Response, SipUri, StatusCode};
use pbx_transaction::{key::new_branch, response_builders, TransactionManager};

use crate::cdr::{Cdr, CdrStore, Disposition};
use crate::database::DatabaseManager;
use crate::dialog::{Dialog, DialogLeg, DialogManager, Direction};
use crate::error::{map_media_completion_failure, PbxError, Result};
use crate::forker::{self, ForkResult, ForkTarget};
use crate::outbound::{self, TrunkDirectory};
use crate::pending::{PendingCall, PendingCallManager};
use crate::push_wake;

/// Number-keyed extension lookup, the piece `pbx_registrar::ExtensionLookup`
/// (username-keyed, for REGISTER/digest auth) does not provide. The same
/// concrete extension store is expected to implement both traits; they are
/// kept separate rather than one extending the other so callers can pass
/// plain `&dyn` references without relying on trait-object upcasting.
pub trait ExtensionDirectory: Send + Sync {
    fn find_by_number(&self, number: &str) -> Option<Extension>;
}

pub struct InviteRouter {
    pub txn: Arc<TransactionManager>,
    pub ip_auth: Arc<IpAuthMatcher>,
    pub digest_auth: Arc<DigestAuthenticator>,
    pub extensions_by_username: Arc<dyn ExtensionLookup>,
    pub extensions_by_number: Arc<dyn ExtensionDirectory>,
    pub registrar: Arc<Registrar>,
    pub notifier: Arc<RegistrationNotifier>,
    pub push_client: Arc<PushGatewayClient>,
    pub trunks: Arc<dyn TrunkDirectory>,
    pub media: Arc<MediaBridge>,
    pub dialogs: Arc<DialogManager>,
    pub pending: Arc<PendingCallManager>,
    pub cdrs: Arc<CdrStore>,
    pub db: Arc<DatabaseManager>,
    pub ring_timeout: Duration,
    pub push_wait_timeout: Duration,
}

enum Classification {
    Inbound { trunk_id: u64 },
    Internal { caller: Extension, target: Extension },
    Outbound { caller: Extension, dialed: String },
}

impl InviteRouter {
    /// `HandleInvite(req, tx)` (§4.10). Sends every response itself; the
    /// caller (the method dispatcher) fires this and forgets.
    pub async fn handle_invite(&self, request: Request, source: SocketAddr) {
        let caller_tx = match self.txn.create_server_transaction(request.clone(), source).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "failed to create server transaction for INVITE");
                return;
            }
        };
        let caller_key = caller_tx.id().clone();

        let classification = match self.classify(&request, source) {
            Ok(c) => c,
            Err(e) => {
                let response = response_builders::create_response(&request, e.status_code());
                let _ = self.txn.send_response(&caller_key, response).await;
                return;
            }
        };

        let trying = response_builders::create_response(&request, StatusCode::TRYING);
        let _ = self.txn.send_response(&caller_key, trying).await;

        let call_id = request.call_id().unwrap_or_default().to_string();

        let result = match classification {
            Classification::Inbound { trunk_id } => {
                self.handle_inbound(caller_tx, request, trunk_id, &call_id).await
            }
            Classification::Internal { caller, target } => {
                self.handle_internal(caller_tx, request, caller, target, &call_id).await
            }
            Classification::Outbound { caller, dialed } => {
                self.handle_outbound(caller_tx, request, caller, dialed, &call_id).await
            }
        };

        if let Err(e) = result {
            warn!(call_id = %call_id, error = %e, "INVITE failed");
        }
    }

    fn classify(&self, request: &Request, source: SocketAddr) -> Result<Classification> {
        let (trunk_id, _name) = self.ip_auth.match_ip(&source.to_string());
        if trunk_id != 0 {
            return Ok(Classification::Inbound { trunk_id });
        }

        let (extension, early_response) = self.digest_auth.authenticate(request, &source.to_string(), self.extensions_by_username.as_ref());
        let Some(caller) = extension else {
            return Err(classify_auth_failure(early_response));
        };

        let called_number = request.request_uri.user.clone().unwrap_or_default();
        match self.extensions_by_number.find_by_number(&called_number) {
            Some(target) => Ok(Classification::Internal { caller, target }),
            None => Ok(Classification::Outbound { caller, dialed: called_number }),
        }
    }

    async fn handle_internal(
        &self,
        caller_tx: pbx_transaction::ServerTransaction,
        request: Request,
        caller: Extension,
        target: Extension,
        call_id: &str,
    ) -> Result<()> {
        if target.dnd {
            return self.finish_unanswered(caller_tx, &request, StatusCode::BUSY_HERE, call_id, Disposition::Busy, "dnd").await;
        }

        let mut registrations = self.registrar.active_registrations(target.id);
        if registrations.is_empty() {
            if let Some(push_token) = self.registrar.push_token_for(target.id) {
                let woke = push_wake::wake_and_wait(
                    &self.notifier,
                    &self.push_client,
                    target.id,
                    &push_token.token,
                    push_token.platform,
                    &caller.number,
                    call_id,
                    self.push_wait_timeout,
                )
                .await;
                if woke {
                    registrations = self.registrar.active_registrations(target.id);
                }
            }
        }

        if registrations.is_empty() {
            return self
                .finish_unanswered(caller_tx, &request, StatusCode::TEMPORARILY_UNAVAILABLE, call_id, Disposition::NoAnswer, "no_registrations")
                .await;
        }

        if self.dialogs.active_call_count_for_extension(target.id) >= registrations.len() {
            return self.finish_unanswered(caller_tx, &request, StatusCode::BUSY_HERE, call_id, Disposition::Busy, "all_busy").await;
        }

        let targets: Vec<ForkTarget> = registrations.iter().filter_map(registration_to_target).collect();
        let target_id = target.id;
        self.ring_and_complete(
            caller_tx,
            request,
            Direction::Internal,
            0,
            targets,
            caller.display_name,
            caller.number,
            target.number,
            call_id,
            Some(caller.id),
            target_id,
        )
        .await
    }

    async fn handle_inbound(
        &self,
        caller_tx: pbx_transaction::ServerTransaction,
        request: Request,
        trunk_id: u64,
        call_id: &str,
    ) -> Result<()> {
        // The flow-graph engine (inbound-number records) is out of scope
        // here; inbound routing rings a matching extension directly.
        let called_number = request.request_uri.user.clone().unwrap_or_default();
        let Some(target) = self.extensions_by_number.find_by_number(&called_number) else {
            return self
                .finish_unanswered(caller_tx, &request, StatusCode::NOT_FOUND, call_id, Disposition::Failed, "unknown_destination")
                .await;
        };

        if target.dnd {
            return self.finish_unanswered(caller_tx, &request, StatusCode::BUSY_HERE, call_id, Disposition::Busy, "dnd").await;
        }

        let registrations = self.registrar.active_registrations(target.id);
        if registrations.is_empty() {
            return self
                .finish_unanswered(caller_tx, &request, StatusCode::TEMPORARILY_UNAVAILABLE, call_id, Disposition::NoAnswer, "no_registrations")
                .await;
        }

        if self.dialogs.active_call_count_for_extension(target.id) >= registrations.len() {
            return self.finish_unanswered(caller_tx, &request, StatusCode::BUSY_HERE, call_id, Disposition::Busy, "all_busy").await;
        }

        let targets: Vec<ForkTarget> = registrations.iter().filter_map(registration_to_target).collect();
        let caller_id_number = request.headers.get("From").and_then(extract_aor_user).unwrap_or_default();
        let target_id = target.id;
        self.ring_and_complete(
            caller_tx,
            request,
            Direction::Inbound,
            trunk_id,
            targets,
            String::new(),
            caller_id_number,
            target.number,
            call_id,
            None,
            target_id,
        )
        .await
    }

    async fn handle_outbound(
        &self,
        caller_tx: pbx_transaction::ServerTransaction,
        request: Request,
        caller: Extension,
        dialed: String,
        call_id: &str,
    ) -> Result<()> {
        let trunks = outbound::select_trunks(self.trunks.as_ref());
        if trunks.is_empty() {
            return self
                .finish_unanswered(caller_tx, &request, StatusCode::SERVICE_UNAVAILABLE, call_id, Disposition::Failed, "no_trunks")
                .await;
        }

        self.cdrs.start(Cdr::new(call_id, "outbound", trunks.first().map(|t| t.id).unwrap_or(0)));
        self.cdrs.with_mut(call_id, |cdr| {
            cdr.caller_id_name = caller.display_name.clone();
            cdr.caller_id_number = caller.number.clone();
            cdr.called_number = dialed.clone();
        });

        let (caller_sdp, media) = match self.media.allocate(&String::from_utf8_lossy(&request.body), call_id).await {
            Ok((session, body)) => (body, Arc::new(session)),
            Err(_) => {
                self.cdrs.with_mut(call_id, |cdr| cdr.finalize(Disposition::Failed, "media_alloc_failed"));
                self.persist_cdr(call_id);
                return self
                    .finish_unanswered(caller_tx, &request, StatusCode::SERVER_INTERNAL_ERROR, call_id, Disposition::Failed, "media_alloc_failed")
                    .await;
            }
        };

        let caller_key = caller_tx.id().clone();
        let result = outbound::outbound_invite(
            &self.txn,
            &request,
            &caller_key,
            trunks,
            &self.dialogs,
            &caller,
            &dialed,
            Some(caller_sdp.into_bytes()),
            call_id,
            self.ring_timeout,
        )
        .await?;

        let Some(answered) = result.answered else {
            media.release();
            let status = result.failure_status.unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
            self.cdrs.with_mut(call_id, |cdr| cdr.finalize(Disposition::Failed, "trunk_exhausted"));
            self.persist_cdr(call_id);
            return self.finish_unanswered(caller_tx, &request, status, call_id, Disposition::Failed, "trunk_exhausted").await;
        };

        let callee_body = String::from_utf8_lossy(&answered.response.body).to_string();
        let (answer_sdp, _codec) = match media.complete(&callee_body).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                return self
                    .fail_after_answer(&caller_key, &request, &answered.response, answered.destination, &media, call_id, &e)
                    .await;
            }
        };

        send_ack(&self.txn, &answered.response, answered.destination).await;

        let to_tag = new_branch();
        let caller_response = Response::to_request(&request, StatusCode::OK)?
            .with_to_tag(&to_tag)
            .with_body("application/sdp", answer_sdp.into_bytes());
        self.txn.send_response(&caller_key, caller_response).await?;

        self.cdrs.with_mut(call_id, |cdr| cdr.mark_answered());

        let dialog = Dialog {
            call_id: call_id.to_string(),
            direction: Direction::Outbound,
            trunk_id: answered.trunk_id,
            caller: DialogLeg {
                extension_id: Some(caller.id),
                registration_id: None,
                contact_uri: request.headers.get("Contact").unwrap_or_default().to_string(),
                from_tag: request.from_tag().unwrap_or_default(),
                to_tag,
                remote_target: request.source.map(|s| s.to_string()).unwrap_or_default(),
                local_identity: strip_tag(request.headers.get("To").unwrap_or_default()),
            },
            callee: DialogLeg {
                extension_id: None,
                registration_id: None,
                contact_uri: answered.response.headers.get("Contact").unwrap_or_default().to_string(),
                from_tag: answered.local_from_tag.clone(),
                to_tag: header_tag(&answered.response, "To").unwrap_or_default(),
                remote_target: format!("{}", answered.destination),
                local_identity: answered.local_identity.clone(),
            },
            caller_id_name: caller.display_name,
            caller_id_number: caller.number,
            called_number: dialed,
            start_time: chrono::Utc::now(),
            answer_time: chrono::Utc::now(),
            media,
        };
        self.dialogs.insert(dialog);
        info!(call_id, "outbound call answered");
        Ok(())
    }

    /// Shared Allocate→Fork→ACK→Complete→relay sequence for internal and
    /// inbound calls (§4.10 step 3, both bullets share this tail).
    #[allow(clippy::too_many_arguments)]
    async fn ring_and_complete(
        &self,
        caller_tx: pbx_transaction::ServerTransaction,
        request: Request,
        direction: Direction,
        trunk_id: u64,
        targets: Vec<ForkTarget>,
        caller_id_name: String,
        caller_id_number: String,
        called_number: String,
        call_id: &str,
        caller_extension_id: Option<u64>,
        target_extension_id: u64,
    ) -> Result<()> {
        if targets.is_empty() {
            return self
                .finish_unanswered(caller_tx, &request, StatusCode::TEMPORARILY_UNAVAILABLE, call_id, Disposition::NoAnswer, "no_targets")
                .await;
        }

        self.cdrs.start(Cdr::new(call_id, if matches!(direction, Direction::Internal) { "internal" } else { "inbound" }, trunk_id));
        self.cdrs.with_mut(call_id, |cdr| {
            cdr.caller_id_name = caller_id_name.clone();
            cdr.caller_id_number = caller_id_number.clone();
            cdr.called_number = called_number.clone();
        });

        let (offer_sdp, media) = match self.media.allocate(&String::from_utf8_lossy(&request.body), call_id).await {
            Ok((session, body)) => (body, Arc::new(session)),
            Err(_) => {
                self.persist_cdr(call_id);
                return self
                    .finish_unanswered(caller_tx, &request, StatusCode::SERVER_INTERNAL_ERROR, call_id, Disposition::Failed, "media_alloc_failed")
                    .await;
            }
        };

        let caller_key = caller_tx.id().clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.pending.insert(PendingCall {
            call_id: call_id.to_string(),
            caller_tx,
            cancel: cancel_tx,
            media: Some(media.clone()),
        });

        let fork_outcome = timeout(
            self.ring_timeout,
            forker::fork(&self.txn, &request, &caller_key, targets, Some(offer_sdp.into_bytes()), cancel_rx),
        )
        .await;

        let fork_result = match fork_outcome {
            Ok(Ok(result)) => result,
            Ok(Err(PbxError::CallCancelled)) => return Ok(()),
            Ok(Err(e)) => {
                self.pending.remove(call_id);
                media.release();
                self.cdrs.with_mut(call_id, |cdr| cdr.finalize(Disposition::Failed, "fork_error"));
                self.persist_cdr(call_id);
                return Err(e);
            }
            Err(_) => ForkResult { answered: false, all_busy: false, winning: None },
        };

        if self.pending.remove(call_id).is_none() {
            // Raced with a CANCEL that already tore this call down.
            media.release();
            return Ok(());
        }

        if !fork_result.answered {
            media.release();
            let (status, disposition, cause) = if fork_result.all_busy {
                (StatusCode::BUSY_HERE, Disposition::Busy, "callee_busy")
            } else {
                (StatusCode::TEMPORARILY_UNAVAILABLE, Disposition::NoAnswer, "no_answer")
            };
            self.cdrs.with_mut(call_id, |cdr| cdr.finalize(disposition, cause));
            self.persist_cdr(call_id);
            let response = response_builders::create_response(&request, status);
            self.txn.send_response(&caller_key, response).await?;
            return Ok(());
        }

        let winning = fork_result.winning.expect("answered implies a winning leg");
        let callee_body = String::from_utf8_lossy(&winning.response.body).to_string();
        let (answer_sdp, _codec) = match media.complete(&callee_body).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                return self
                    .fail_after_answer(&caller_key, &request, &winning.response, winning.destination, &media, call_id, &e)
                    .await;
            }
        };

        send_ack(&self.txn, &winning.response, winning.destination).await;

        let to_tag = new_branch();
        let caller_response = Response::to_request(&request, StatusCode::OK)?
            .with_to_tag(&to_tag)
            .with_body("application/sdp", answer_sdp.into_bytes());
        self.txn.send_response(&caller_key, caller_response).await?;

        self.cdrs.with_mut(call_id, |cdr| cdr.mark_answered());

        let dialog = Dialog {
            call_id: call_id.to_string(),
            direction,
            trunk_id,
            caller: DialogLeg {
                extension_id: caller_extension_id,
                registration_id: None,
                contact_uri: request.headers.get("Contact").unwrap_or_default().to_string(),
                from_tag: request.from_tag().unwrap_or_default(),
                to_tag,
                remote_target: request.source.map(|s| s.to_string()).unwrap_or_default(),
                local_identity: strip_tag(request.headers.get("To").unwrap_or_default()),
            },
            callee: DialogLeg {
                extension_id: Some(target_extension_id),
                registration_id: None,
                contact_uri: winning.contact_uri.to_string(),
                from_tag: request.from_tag().unwrap_or_default(),
                to_tag: header_tag(&winning.response, "To").unwrap_or_default(),
                remote_target: format!("{}", winning.destination),
                local_identity: strip_tag(request.headers.get("From").unwrap_or_default()),
            },
            caller_id_name,
            caller_id_number,
            called_number,
            start_time: chrono::Utc::now(),
            answer_time: chrono::Utc::now(),
            media,
        };
        self.dialogs.insert(dialog);
        info!(call_id, "call answered");
        Ok(())
    }

    async fn finish_unanswered(
        &self,
        caller_tx: pbx_transaction::ServerTransaction,
        request: &Request,
        status: StatusCode,
        call_id: &str,
        disposition: Disposition,
        cause: &str,
    ) -> Result<()> {
        if self.cdrs.with_mut(call_id, |cdr| cdr.finalize(disposition, cause)).is_some() {
            self.persist_cdr(call_id);
        }
        let response = response_builders::create_response(request, status);
        self.txn.send_response(caller_tx.id(), response).await?;
        Ok(())
    }

    /// The callee leg already answered when `MediaSession::complete` failed
    /// (codec negotiation or relay startup); the caller still needs exactly
    /// one final response (§8) and the answered leg must not be left
    /// dangling until `Drop` — ACK it, then BYE it.
    async fn fail_after_answer(
        &self,
        caller_key: &pbx_transaction::TransactionKey,
        request: &Request,
        callee_response: &Response,
        callee_destination: SocketAddr,
        media: &pbx_media::MediaSession,
        call_id: &str,
        error: &pbx_media::MediaError,
    ) -> Result<()> {
        warn!(call_id, error = %error, "media completion failed after callee answered, tearing down callee leg");
        media.release();
        send_ack(&self.txn, callee_response, callee_destination).await;
        send_leg_bye(&self.txn, callee_response, callee_destination).await;

        self.cdrs.with_mut(call_id, |cdr| cdr.finalize(Disposition::Failed, "media_complete_failed"));
        self.persist_cdr(call_id);

        let status = map_media_completion_failure(error);
        let response = response_builders::create_response(request, status);
        self.txn.send_response(caller_key, response).await?;
        Ok(())
    }

    /// Hand a finalized CDR off to the database without blocking the call
    /// path on the write.
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

fn classify_auth_failure(response: Option<Response>) -> PbxError {
    match response.map(|r| r.status.0) {
        Some(403) => PbxError::AuthBlocked,
        Some(400) => PbxError::AuthBadRequest,
        _ => PbxError::AuthChallenge,
    }
}

fn registration_to_target(registration: &Registration) -> Option<ForkTarget> {
    let mut contact_uri = SipUri::parse(&registration.contact_uri).ok()?;
    let destination: SocketAddr = format!("{}:{}", registration.source_ip, registration.source_port).parse().ok()?;
    contact_uri = contact_uri.with_host_port(registration.source_ip.clone(), registration.source_port);
    Some(ForkTarget { contact_uri, destination })
}

/// `Response` carries no tag-extraction helper of its own (only `Request`
/// does); both sides of a dialog need it once the callee leg answers.
pub(crate) fn header_tag(response: &Response, header: &str) -> Option<String> {
    response
        .headers
        .get(header)?
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("tag=").map(|t| t.trim_matches('"').to_string()))
}

/// Strip a `;tag=...` parameter from a From/To header value, keeping the
/// display-name/URI portion so it can be reused verbatim with a new tag
/// when the PBX originates an in-dialog request on this leg (§4.12).
pub(crate) fn strip_tag(header: &str) -> String {
    header.split(';').filter(|p| !p.trim_start().starts_with("tag=")).collect::<Vec<_>>().join(";")
}

fn extract_aor_user(from_header: &str) -> Option<String> {
    let start = from_header.find("sip:").or_else(|| from_header.find("sips:"))?;
    SipUri::parse(from_header[start..].split(|c| c == '>' || c == ';').next()?).ok()?.user
}

/// ACK for a 2xx is sent out-of-transaction (§6) — RFC 3261 routes it as a
/// brand-new request correlated only by the dialog, never via the INVITE
/// client transaction that already terminated on receiving the 2xx.
async fn send_ack(txn: &TransactionManager, response: &Response, destination: SocketAddr) {
    let request_uri = response
        .headers
        .get("Contact")
        .and_then(|c| SipUri::parse(c.trim_start_matches('<').trim_end_matches('>')).ok())
        .unwrap_or_else(|| SipUri::new(destination.ip().to_string()).with_port(destination.port()));

    let mut ack = Request::new(Method::Ack, request_uri);
    ack.headers.push("Call-ID", response.headers.get("Call-ID").unwrap_or_default());
    ack.headers.push("From", response.headers.get("From").unwrap_or_default());
    ack.headers.push("To", response.headers.get("To").unwrap_or_default());
    let cseq_num = response
        .headers
        .get("CSeq")
        .and_then(|c| c.split_whitespace().next())
        .unwrap_or("1");
    ack.headers.push("CSeq", format!("{cseq_num} ACK"));
    ack.headers.push("Max-Forwards", "70");
    let _ = txn.send_raw(destination, &ack).await;
}

/// BYE toward a leg the PBX originated as UAC (an answered fork winner or
/// trunk callee whose media never completed). The response already carries
/// this leg's own From/To verbatim, so only the CSeq needs to advance past
/// the INVITE's — unlike `bye_cancel.rs`'s tag-rewriting for a `DialogLeg`,
/// there is no tag to swap.
async fn send_leg_bye(txn: &TransactionManager, response: &Response, destination: SocketAddr) {
    let request_uri = response
        .headers
        .get("Contact")
        .and_then(|c| SipUri::parse(c.trim_start_matches('<').trim_end_matches('>')).ok())
        .unwrap_or_else(|| SipUri::new(destination.ip().to_string()).with_port(destination.port()));

    let mut bye = Request::new(Method::Bye, request_uri);
    bye.headers.push("Call-ID", response.headers.get("Call-ID").unwrap_or_default());
    bye.headers.push("From", response.headers.get("From").unwrap_or_default());
    bye.headers.push("To", response.headers.get("To").unwrap_or_default());
    let cseq_num: u32 = response
        .headers
        .get("CSeq")
        .and_then(|c| c.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(1);
    bye.headers.push("CSeq", format!("{} BYE", cseq_num + 1));
    bye.headers.push("Max-Forwards", "70");

    match txn.create_client_transaction(bye, destination).await {
        Ok((_key, mut rx)) => {
            tokio::spawn(async move {
                while rx.recv().await.is_some() {}
            });
        }
        Err(e) => warn!(error = %e, "failed to send BYE tearing down unfinished callee leg"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_registrar::types::Transport;

    #[test]
    fn registration_to_target_rewrites_contact_to_observed_source() {
        let registration = Registration {
            id: 1,
            extension_id: 1,
            contact_uri: "sip:101@192.168.1.50:5061".into(),
            transport: Transport::Udp,
            user_agent: String::new(),
            source_ip: "203.0.113.9".into(),
            source_port: 34567,
            expires_at: chrono::Utc::now(),
            push_token: None,
            push_platform: None,
            push_device_id: None,
        };
        let target = registration_to_target(&registration).unwrap();
        assert_eq!(target.destination.to_string(), "203.0.113.9:34567");
        assert_eq!(target.contact_uri.host, "203.0.113.9");
        assert_eq!(target.contact_uri.port, Some(34567));
    }

    #[test]
    fn extracts_aor_user_from_from_header() {
        assert_eq!(extract_aor_user(r#""Carrier" <sip:15551234567@carrier.example>;tag=abc"#).as_deref(), Some("15551234567"));
    }
}
