//! Trunk Registrar (C5): one task per enabled trunk. Register-type trunks
//! run an outbound REGISTER loop with digest re-auth and exponential
//! backoff; IP-type trunks run an OPTIONS health probe and register their
//! ACL with C2 instead of registering.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use pbx_registrar::IpAuthMatcher;
use pbx_sip::{Method, Request, SipUri};
use pbx_transaction::{ClientTransactionEvent, TransactionManager};

use crate::backoff::BackoffState;
use crate::types::{Trunk, TrunkRuntimeState, TrunkStatus, TrunkType};

const OPTIONS_INTERVAL: StdDuration = StdDuration::from_secs(30);
const OPTIONS_DEADLINE: StdDuration = StdDuration::from_secs(5);
const REGISTER_DEADLINE: StdDuration = StdDuration::from_secs(10);
const UNREGISTER_DEADLINE: StdDuration = StdDuration::from_secs(5);
const DEFAULT_REGISTER_EXPIRY: u32 = 300;

struct TaskHandles {
    trunk: Trunk,
    cancel: watch::Sender<bool>,
    registered: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Owns every running trunk task and the shared runtime-state table §3
/// calls out as "not persisted".
pub struct TrunkRegistrar {
    txn: Arc<TransactionManager>,
    ip_auth: Arc<IpAuthMatcher>,
    states: DashMap<u64, Arc<Mutex<TrunkRuntimeState>>>,
    tasks: DashMap<u64, TaskHandles>,
}

/// A lightweight clone-out used by callers that only need to read state
/// without holding the registrar.
pub type TrunkRegistrarHandle = Arc<TrunkRegistrar>;

impl TrunkRegistrar {
    pub fn new(txn: Arc<TransactionManager>, ip_auth: Arc<IpAuthMatcher>) -> Self {
        Self { txn, ip_auth, states: DashMap::new(), tasks: DashMap::new() }
    }

    pub fn runtime_state(&self, trunk_id: u64) -> Option<TrunkRuntimeState> {
        self.states.get(&trunk_id).map(|s| s.lock().clone())
    }

    /// Start the registration loop (type=register) or health loop
    /// (type=ip) for a newly created or re-enabled trunk. Replaces any
    /// task already running for this trunk id.
    pub async fn start_trunk(self: &Arc<Self>, trunk: Trunk) {
        if let Some((_, old)) = self.tasks.remove(&trunk.id) {
            let _ = old.cancel.send(true);
            old.join.abort();
        }

        let state = Arc::new(Mutex::new(TrunkRuntimeState::initial(trunk.trunk_type)));
        self.states.insert(trunk.id, state.clone());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let registered = Arc::new(AtomicBool::new(false));

        let join = match trunk.trunk_type {
            TrunkType::Register => {
                let registrar = self.clone();
                let trunk2 = trunk.clone();
                let state2 = state.clone();
                let registered2 = registered.clone();
                let mut cancel_rx2 = cancel_rx.clone();
                tokio::spawn(async move {
                    registrar.registration_loop(trunk2, state2, registered2, &mut cancel_rx2).await;
                })
            }
            TrunkType::Ip => {
                self.ip_auth.add_trunk(trunk.id, &trunk.name, trunk.priority, &trunk.remote_hosts);
                let registrar = self.clone();
                let trunk2 = trunk.clone();
                let state2 = state.clone();
                let mut cancel_rx2 = cancel_rx.clone();
                tokio::spawn(async move {
                    registrar.health_loop(trunk2, state2, &mut cancel_rx2).await;
                })
            }
        };

        self.tasks.insert(trunk.id, TaskHandles { trunk, cancel: cancel_tx, registered, join });
    }

    /// Stop a trunk: cancel its loop, best-effort un-register if currently
    /// registered, and remove its ACL from C2 if it was IP-type.
    pub async fn stop_trunk(&self, trunk_id: u64) {
        let Some((_, handles)) = self.tasks.remove(&trunk_id) else { return };
        let _ = handles.cancel.send(true);

        if handles.trunk.trunk_type == TrunkType::Ip {
            self.ip_auth.remove_trunk(trunk_id);
        } else if handles.registered.load(Ordering::Acquire) {
            if let Some(destination) = resolve(&handles.trunk).await {
                let call_id = format!("unreg-{}", trunk_id);
                let request = build_register(&handles.trunk, 0, self.txn.local_addr(), 1, &call_id, None);
                let _ = send_and_wait(&self.txn, destination, request, UNREGISTER_DEADLINE).await;
            }
        }

        handles.join.abort();
        if let Some(state) = self.states.get(&trunk_id) {
            state.lock().set_disabled();
        }
        info!(trunk_id, "trunk stopped");
    }

    async fn registration_loop(
        self: Arc<Self>,
        trunk: Trunk,
        state: Arc<Mutex<TrunkRuntimeState>>,
        registered: Arc<AtomicBool>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) {
        let mut backoff = BackoffState::new();
        let call_id = format!("reg-{}-{}", trunk.id, new_tag());
        let mut cseq: u32 = 1;
        let requested = if trunk.registered_expiry > 0 { trunk.registered_expiry } else { DEFAULT_REGISTER_EXPIRY };

        loop {
            if *cancel_rx.borrow() {
                return;
            }
            state.lock().set_registering();

            let Some(destination) = resolve(&trunk).await else {
                state.lock().set_failed("DNS resolution failed");
                registered.store(false, Ordering::Release);
                if sleep_or_cancel(backoff.next_delay(), cancel_rx).await {
                    return;
                }
                continue;
            };

            match self.register_once(&trunk, destination, requested, &call_id, &mut cseq).await {
                Ok(granted) => {
                    state.lock().set_registered(Utc::now() + ChronoDuration::seconds(granted as i64));
                    registered.store(true, Ordering::Release);
                    backoff.reset();
                    info!(trunk = %trunk.name, granted, "trunk registered");
                    let sleep_for = StdDuration::from_secs_f64(granted as f64 * 0.8);
                    if sleep_or_cancel(sleep_for, cancel_rx).await {
                        return;
                    }
                }
                Err(e) => {
                    warn!(trunk = %trunk.name, error = %e, "trunk registration failed");
                    state.lock().set_failed(e.to_string());
                    registered.store(false, Ordering::Release);
                    if sleep_or_cancel(backoff.next_delay(), cancel_rx).await {
                        return;
                    }
                }
            }
        }
    }

    /// One REGISTER attempt, including a single digest re-auth round trip
    /// on 401/407. Returns the granted expiry in seconds.
    async fn register_once(
        &self,
        trunk: &Trunk,
        destination: SocketAddr,
        requested: u32,
        call_id: &str,
        cseq: &mut u32,
    ) -> crate::error::Result<u32> {
        let request = build_register(trunk, requested, self.txn.local_addr(), *cseq, call_id, None);
        *cseq += 1;
        let response = send_and_wait(&self.txn, destination, request, REGISTER_DEADLINE).await?;

        if response.status.0 == 401 || response.status.0 == 407 {
            let header_name = if response.status.0 == 401 { "WWW-Authenticate" } else { "Proxy-Authenticate" };
            let challenge = response
                .headers
                .get(header_name)
                .ok_or_else(|| crate::error::TrunkError::Transport("challenge missing auth header".into()))?;
            let auth = build_authorization(trunk, challenge, "REGISTER", &request_uri_string(trunk));

            let retry = build_register(trunk, requested, self.txn.local_addr(), *cseq, call_id, Some(auth));
            *cseq += 1;
            let retried = send_and_wait(&self.txn, destination, retry, REGISTER_DEADLINE).await?;
            return finish_register(&retried, requested);
        }

        finish_register(&response, requested)
    }

    async fn health_loop(
        self: Arc<Self>,
        trunk: Trunk,
        state: Arc<Mutex<TrunkRuntimeState>>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            if *cancel_rx.borrow() {
                return;
            }

            let healthy = match resolve(&trunk).await {
                Some(destination) => {
                    let request = build_options(&trunk, self.txn.local_addr());
                    matches!(
                        send_and_wait(&self.txn, destination, request, OPTIONS_DEADLINE).await,
                        Ok(resp) if resp.status.is_success()
                    )
                }
                None => false,
            };

            state.lock().record_options_probe(healthy);
            if sleep_or_cancel(OPTIONS_INTERVAL, cancel_rx).await {
                return;
            }
        }
    }
}

/// Sleeps for `dur` unless cancellation is signaled first; returns `true`
/// if cancelled.
async fn sleep_or_cancel(dur: StdDuration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => false,
        result = cancel_rx.changed() => result.is_err() || *cancel_rx.borrow(),
    }
}

async fn resolve(trunk: &Trunk) -> Option<SocketAddr> {
    tokio::net::lookup_host((trunk.host.as_str(), trunk.port)).await.ok()?.next()
}

async fn send_and_wait(
    txn: &Arc<TransactionManager>,
    destination: SocketAddr,
    request: Request,
    deadline: StdDuration,
) -> crate::error::Result<pbx_sip::Response> {
    let (_key, mut rx) = txn.create_client_transaction(request, destination).await?;
    let outcome = timeout(deadline, async {
        loop {
            match rx.recv().await {
                Some(ClientTransactionEvent::Provisional(_)) => continue,
                Some(ClientTransactionEvent::Final(resp)) => return Ok(resp),
                Some(ClientTransactionEvent::TransportError(e)) => {
                    return Err(crate::error::TrunkError::Transport(e))
                }
                Some(ClientTransactionEvent::Timeout) | None => {
                    return Err(crate::error::TrunkError::Transport("no response".into()))
                }
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => Err(crate::error::TrunkError::Transport("timed out waiting for response".into())),
    }
}

fn finish_register(response: &pbx_sip::Response, requested: u32) -> crate::error::Result<u32> {
    if !response.status.is_success() {
        return Err(crate::error::TrunkError::Transport(format!(
            "trunk registration rejected: {} {}",
            response.status.0,
            response.status.reason()
        )));
    }

    let from_contact = response.headers.get("Contact").and_then(|c| {
        c.split(';').skip(1).find_map(|p| p.trim().strip_prefix("expires=")).and_then(|v| v.parse().ok())
    });
    let from_header = response.headers.get("Expires").and_then(|v| v.trim().parse().ok());
    Ok(from_contact.or(from_header).unwrap_or(requested))
}

fn request_uri_string(trunk: &Trunk) -> String {
    SipUri::new(trunk.host.clone()).with_port(trunk.port).with_user(trunk.credentials.username.clone()).to_string()
}

fn build_register(
    trunk: &Trunk,
    expiry: u32,
    local_addr: SocketAddr,
    cseq: u32,
    call_id: &str,
    authorization: Option<String>,
) -> Request {
    let request_uri = SipUri::new(trunk.host.clone()).with_port(trunk.port);
    let mut req = Request::new(Method::Register, request_uri);
    let aor = format!("sip:{}@{}", trunk.credentials.username, trunk.host);

    req.headers.push("From", format!("<{aor}>;tag={}", new_tag()));
    req.headers.push("To", format!("<{aor}>"));
    req.headers.push("Call-ID", call_id);
    req.headers.push("CSeq", format!("{cseq} REGISTER"));
    req.headers.push(
        "Via",
        format!(
            "SIP/2.0/{} {local_addr};branch={}",
            trunk.transport.as_str().to_ascii_uppercase(),
            pbx_transaction::key::new_branch()
        ),
    );
    req.headers.push("Max-Forwards", "70");
    req.headers.push("Contact", format!("<sip:{}@{local_addr}>;expires={expiry}", trunk.credentials.username));
    req.headers.push("Expires", expiry.to_string());
    if let Some(auth) = authorization {
        req.headers.push("Authorization", auth);
    }
    req
}

fn build_options(trunk: &Trunk, local_addr: SocketAddr) -> Request {
    let request_uri = SipUri::new(trunk.host.clone()).with_port(trunk.port);
    let mut req = Request::new(Method::Options, request_uri);
    let aor = format!("sip:{}@{}", trunk.credentials.username, trunk.host);
    req.headers.push("From", format!("<{aor}>;tag={}", new_tag()));
    req.headers.push("To", format!("<{aor}>"));
    req.headers.push("Call-ID", format!("opt-{}-{}", trunk.id, new_tag()));
    req.headers.push("CSeq", "1 OPTIONS");
    req.headers.push(
        "Via",
        format!(
            "SIP/2.0/{} {local_addr};branch={}",
            trunk.transport.as_str().to_ascii_uppercase(),
            pbx_transaction::key::new_branch()
        ),
    );
    req.headers.push("Max-Forwards", "70");
    req
}

/// Compute a fresh `Authorization` header for a 401/407 challenge,
/// choosing `auth_username` over `username` per §4.5. Exposed for reuse by
/// outbound trunk INVITE re-auth (§4.11), which faces the same challenge
/// shape on a different method.
pub fn build_authorization(trunk: &Trunk, challenge: &str, method: &str, uri: &str) -> String {
    let (realm, nonce, opaque, qop) = parse_challenge(challenge);
    let username = trunk.credentials.digest_username().to_string();

    let (qop, cnonce, nc) = if qop.is_some() {
        (qop, Some(new_tag()), Some("00000001".to_string()))
    } else {
        (None, None, None)
    };

    let params = pbx_sip::digest::DigestParams {
        username: username.clone(),
        realm,
        nonce,
        uri: uri.to_string(),
        response: String::new(),
        opaque: opaque.clone(),
        algorithm: Some("MD5".to_string()),
        qop: qop.clone(),
        cnonce: cnonce.clone(),
        nc: nc.clone(),
    };
    let response = pbx_sip::digest::compute_response(&params, method, &trunk.credentials.password);

    let mut header = format!(
        r#"Digest username="{username}", realm="{}", nonce="{}", uri="{uri}", response="{response}""#,
        params.realm, params.nonce
    );
    if let Some(opaque) = opaque {
        header.push_str(&format!(r#", opaque="{opaque}""#));
    }
    if let (Some(qop), Some(cnonce), Some(nc)) = (qop, cnonce, nc) {
        header.push_str(&format!(r#", qop={qop}, cnonce="{cnonce}", nc={nc}"#));
    }
    header
}

/// Extracts realm/nonce/opaque/qop from a `WWW-Authenticate`/
/// `Proxy-Authenticate` challenge header. Unlike
/// `pbx_sip::digest::parse_digest_header` this tolerates the fields a
/// challenge carries (no username/uri/response).
pub fn parse_challenge(header: &str) -> (String, String, Option<String>, Option<String>) {
    let mut realm = String::new();
    let mut nonce = String::new();
    let mut opaque = None;
    let mut qop = None;

    let body = header.trim().strip_prefix("Digest").map(str::trim).unwrap_or(header.trim());
    for part in body.split(',') {
        let Some((k, v)) = part.split_once('=') else { continue };
        let v = v.trim().trim_matches('"').to_string();
        match k.trim().to_ascii_lowercase().as_str() {
            "realm" => realm = v,
            "nonce" => nonce = v,
            "opaque" => opaque = Some(v),
            "qop" => qop = Some(v.split(',').next().unwrap_or(&v).trim().to_string()),
            _ => {}
        }
    }
    (realm, nonce, opaque, qop)
}

fn new_tag() -> String {
    let mut rng = rand::thread_rng();
    (0..12).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_realm_and_nonce_from_challenge() {
        let header = r#"Digest realm="carrier.example", nonce="abc123", opaque="op1", algorithm=MD5"#;
        let (realm, nonce, opaque, qop) = parse_challenge(header);
        assert_eq!(realm, "carrier.example");
        assert_eq!(nonce, "abc123");
        assert_eq!(opaque.as_deref(), Some("op1"));
        assert_eq!(qop, None);
    }

    #[test]
    fn parses_qop_auth_challenge() {
        let header = r#"Digest realm="carrier.example", nonce="abc123", qop="auth", algorithm=MD5"#;
        let (_, _, _, qop) = parse_challenge(header);
        assert_eq!(qop.as_deref(), Some("auth"));
    }

    #[test]
    fn finish_register_prefers_contact_expires_over_header_and_requested() {
        let mut resp = pbx_sip::Response::new(pbx_sip::StatusCode::OK);
        resp.headers.push("Contact", "<sip:trunk@1.2.3.4>;expires=120");
        resp.headers.push("Expires", "300");
        assert_eq!(finish_register(&resp, 600).unwrap(), 120);
    }

    #[test]
    fn finish_register_falls_back_to_requested() {
        let resp = pbx_sip::Response::new(pbx_sip::StatusCode::OK);
        assert_eq!(finish_register(&resp, 600).unwrap(), 600);
    }
}
