//! Outbound & Trunk INVITE (C11): trunk selection, prefix rules, digest
//! re-auth on 401/407, and the trunk-failover decision table (§4.11).

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use pbx_registrar::types::Extension;
use pbx_sip::{Method, Request, Response, SipUri, StatusCode};
use pbx_transaction::{ClientTransactionEvent, TransactionKey, TransactionManager};
use pbx_trunk::{apply_prefix_rules, build_authorization, Trunk, TrunkStatus};

use crate::dialog::DialogManager;
use crate::error::{is_callee_level_failure, map_trunk_failure, PbxError, Result};
use crate::forker::relay_provisional;

pub trait TrunkDirectory: Send + Sync {
    /// Enabled trunks, ascending priority is applied by the caller.
    fn enabled_trunks(&self) -> Vec<Trunk>;
    fn runtime_status(&self, trunk_id: u64) -> Option<TrunkStatus>;
}

pub struct AnsweredLeg {
    pub trunk_id: u64,
    pub destination: SocketAddr,
    pub response: Response,
    /// The tag the PBX used in its own From header toward this trunk, and
    /// the AOR it presented — the BYE/CANCEL handler needs both to rebuild
    /// an in-dialog request without re-deriving caller-ID policy (§4.12).
    pub local_from_tag: String,
    pub local_identity: String,
}

pub struct OutboundResult {
    pub answered: Option<AnsweredLeg>,
    pub failure_status: Option<StatusCode>,
}

/// `SelectTrunks` (§4.11): enabled, not failed/disabled, credentials
/// available, sorted by ascending priority.
pub fn select_trunks(directory: &dyn TrunkDirectory) -> Vec<Trunk> {
    let mut candidates: Vec<Trunk> = directory
        .enabled_trunks()
        .into_iter()
        .filter(|t| {
            !matches!(directory.runtime_status(t.id), Some(TrunkStatus::Failed) | Some(TrunkStatus::Disabled))
        })
        .filter(|t| t.trunk_type == pbx_trunk::TrunkType::Ip || !t.credentials.password.is_empty())
        .collect();
    candidates.sort_by_key(|t| t.priority);
    candidates
}

fn resolve_caller_id(trunk: &Trunk, extension: &Extension) -> (String, String) {
    let name = if trunk.caller_id_name.is_empty() { extension.display_name.clone() } else { trunk.caller_id_name.clone() };
    let number = if trunk.caller_id_number.is_empty() { extension.number.clone() } else { trunk.caller_id_number.clone() };
    (name, number)
}

/// Walk `trunks` in order until one answers, a callee-level failure is
/// seen, or the list is exhausted (§4.11).
pub async fn outbound_invite(
    txn: &TransactionManager,
    caller_request: &Request,
    caller_tx_key: &TransactionKey,
    trunks: Vec<Trunk>,
    dialogs: &DialogManager,
    caller_ext: &Extension,
    dialed_raw: &str,
    sdp_override: Option<Vec<u8>>,
    call_id: &str,
    per_trunk_deadline: Duration,
) -> Result<OutboundResult> {
    if trunks.is_empty() {
        return Err(PbxError::NoTrunksAvailable);
    }

    let mut provisional_relayed = false;
    let mut last_status: Option<StatusCode> = None;

    for trunk in &trunks {
        if trunk.max_channels > 0 && dialogs.active_call_count_for_trunk(trunk.id) >= trunk.max_channels as usize {
            info!(trunk = %trunk.name, "trunk at max_channels, skipping");
            continue;
        }

        let Some(destination) = tokio::net::lookup_host((trunk.host.as_str(), trunk.port)).await.ok().and_then(|mut i| i.next())
        else {
            warn!(trunk = %trunk.name, "DNS resolution failed, trying next trunk");
            continue;
        };

        let dialed = apply_prefix_rules(dialed_raw, trunk.prefix_strip, &trunk.prefix_add);
        let (caller_id_name, caller_id_number) = resolve_caller_id(trunk, caller_ext);
        let body = sdp_override.clone().unwrap_or_else(|| caller_request.body.clone());
        let from_tag = pbx_transaction::key::new_branch();
        let local_identity = format!("sip:{caller_id_number}@{}", trunk.host);

        let request = build_trunk_invite(trunk, &dialed, &caller_id_name, &caller_id_number, &from_tag, call_id, body.clone(), None);

        match attempt_leg(txn, caller_request, caller_tx_key, trunk, destination, request, per_trunk_deadline, &mut provisional_relayed).await {
            LegOutcome::Answered(response) => {
                return Ok(OutboundResult {
                    answered: Some(AnsweredLeg {
                        trunk_id: trunk.id,
                        destination,
                        response,
                        local_from_tag: from_tag,
                        local_identity,
                    }),
                    failure_status: None,
                });
            }
            LegOutcome::Challenge(challenge_header, is_proxy) => {
                let request_uri = format!("sip:{dialed}@{}", trunk.host);
                let auth = build_authorization(trunk, &challenge_header, "INVITE", &request_uri);
                let header_name = if is_proxy { "Proxy-Authorization" } else { "Authorization" };
                let retry =
                    build_trunk_invite(trunk, &dialed, &caller_id_name, &caller_id_number, &from_tag, call_id, body, Some((header_name, auth)));

                match attempt_leg(txn, caller_request, caller_tx_key, trunk, destination, retry, per_trunk_deadline, &mut provisional_relayed).await
                {
                    LegOutcome::Answered(response) => {
                        return Ok(OutboundResult {
                            answered: Some(AnsweredLeg {
                                trunk_id: trunk.id,
                                destination,
                                response,
                                local_from_tag: from_tag,
                                local_identity,
                            }),
                            failure_status: None,
                        });
                    }
                    LegOutcome::Failed(status) => {
                        last_status = Some(status);
                        if is_callee_level_failure(status.0) {
                            return Ok(OutboundResult { answered: None, failure_status: Some(map_trunk_failure(status.0)) });
                        }
                    }
                    LegOutcome::Challenge(..) => {
                        last_status = Some(StatusCode::SERVICE_UNAVAILABLE);
                    }
                }
            }
            LegOutcome::Failed(status) => {
                last_status = Some(status);
                if is_callee_level_failure(status.0) {
                    return Ok(OutboundResult { answered: None, failure_status: Some(map_trunk_failure(status.0)) });
                }
            }
        }
    }

    let status = last_status.map(|s| map_trunk_failure(s.0)).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    Ok(OutboundResult { answered: None, failure_status: Some(status) })
}

enum LegOutcome {
    Answered(Response),
    /// (challenge header value, is_proxy_auth)
    Challenge(String, bool),
    Failed(StatusCode),
}

async fn attempt_leg(
    txn: &TransactionManager,
    caller_request: &Request,
    caller_tx_key: &TransactionKey,
    trunk: &Trunk,
    destination: SocketAddr,
    request: Request,
    deadline: Duration,
    provisional_relayed: &mut bool,
) -> LegOutcome {
    let (_key, mut rx) = match txn.create_client_transaction(request, destination).await {
        Ok(v) => v,
        Err(e) => {
            warn!(trunk = %trunk.name, error = %e, "failed to start client transaction");
            return LegOutcome::Failed(StatusCode::BAD_GATEWAY);
        }
    };

    let outcome = timeout(deadline, async {
        loop {
            match rx.recv().await {
                Some(ClientTransactionEvent::Provisional(resp)) => {
                    if !*provisional_relayed && (resp.status.0 == 180 || resp.status.0 == 183) {
                        *provisional_relayed = true;
                        relay_provisional(txn, caller_request, caller_tx_key, &resp).await;
                    }
                }
                Some(ClientTransactionEvent::Final(resp)) => {
                    if resp.status.is_success() {
                        return LegOutcome::Answered(resp);
                    }
                    if resp.status.0 == 401 || resp.status.0 == 407 {
                        let is_proxy = resp.status.0 == 407;
                        let header_name = if is_proxy { "Proxy-Authenticate" } else { "WWW-Authenticate" };
                        if let Some(header) = resp.headers.get(header_name) {
                            return LegOutcome::Challenge(header.to_string(), is_proxy);
                        }
                    }
                    return LegOutcome::Failed(resp.status);
                }
                Some(ClientTransactionEvent::TransportError(_)) | None => return LegOutcome::Failed(StatusCode::BAD_GATEWAY),
                Some(ClientTransactionEvent::Timeout) => return LegOutcome::Failed(StatusCode::SERVICE_UNAVAILABLE),
            }
        }
    })
    .await;

    outcome.unwrap_or(LegOutcome::Failed(StatusCode::SERVICE_UNAVAILABLE))
}

fn build_trunk_invite(
    trunk: &Trunk,
    dialed: &str,
    caller_id_name: &str,
    caller_id_number: &str,
    from_tag: &str,
    call_id: &str,
    body: Vec<u8>,
    extra_auth: Option<(&str, String)>,
) -> Request {
    let request_uri = SipUri::new(trunk.host.clone()).with_port(trunk.port).with_user(dialed.to_string());
    let mut request = Request::new(Method::Invite, request_uri);
    let from_aor = format!("sip:{caller_id_number}@{}", trunk.host);
    request.headers.push("From", format!(r#""{caller_id_name}" <{from_aor}>;tag={from_tag}"#));
    request.headers.push("To", format!("<sip:{dialed}@{}>", trunk.host));
    request.headers.push("Call-ID", call_id);
    request.headers.push("CSeq", "1 INVITE");
    request.headers.push("Max-Forwards", "70");
    if !body.is_empty() {
        request.headers.push("Content-Type", "application/sdp");
        request.headers.push("Content-Length", body.len().to_string());
        request.body = body;
    }
    if let Some((name, value)) = extra_auth {
        request.headers.push(name, value);
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_trunk::{TrunkCredentials, TrunkType};

    fn sample_trunk(id: u64, priority: i32) -> Trunk {
        Trunk {
            id,
            name: format!("trunk-{id}"),
            trunk_type: TrunkType::Register,
            enabled: true,
            host: "carrier.example".into(),
            port: 5060,
            transport: pbx_trunk::TrunkTransport::Udp,
            credentials: TrunkCredentials { username: "user".into(), auth_username: None, password: "secret".into() },
            registered_expiry: 300,
            remote_hosts: Vec::new(),
            priority,
            max_channels: 0,
            caller_id_name: String::new(),
            caller_id_number: String::new(),
            prefix_strip: 1,
            prefix_add: "0044".into(),
        }
    }

    struct FakeDirectory(Vec<Trunk>);
    impl TrunkDirectory for FakeDirectory {
        fn enabled_trunks(&self) -> Vec<Trunk> {
            self.0.clone()
        }
        fn runtime_status(&self, _trunk_id: u64) -> Option<TrunkStatus> {
            Some(TrunkStatus::Registered)
        }
    }

    #[test]
    fn select_trunks_sorts_by_ascending_priority() {
        let directory = FakeDirectory(vec![sample_trunk(2, 20), sample_trunk(1, 10)]);
        let selected = select_trunks(&directory);
        assert_eq!(selected.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn prefix_rule_rewrites_uk_mobile_to_e164() {
        let trunk = sample_trunk(1, 10);
        let dialed = apply_prefix_rules("07700900000", trunk.prefix_strip, &trunk.prefix_add);
        assert_eq!(dialed, "00447700900000");
    }
}
