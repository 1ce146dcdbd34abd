//! Registrar (C4): `HandleRegister`, per-contact storage, expiry reaper.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, info};

use pbx_sip::{Request, Response, StatusCode};
use pbx_transaction::response_builders;

use crate::digest_auth::{DigestAuthenticator, ExtensionLookup};
use crate::error::{RegistrarError, Result};
use crate::notifier::RegistrationNotifier;
use crate::types::{Extension, PushParams, PushPlatform, PushToken, Registration, Transport};

const MIN_EXPIRY: i64 = 60;
const MAX_EXPIRY: i64 = 86_400;
const DEFAULT_EXPIRY: i64 = 3600;

pub struct Registrar {
    extensions: Arc<dyn ExtensionLookup>,
    auth: Arc<DigestAuthenticator>,
    notifier: Arc<RegistrationNotifier>,
    /// extension-id -> contact-uri -> Registration. Nested so idempotent
    /// re-register and per-contact removal are both O(1).
    registrations: DashMap<u64, DashMap<String, Registration>>,
    push_tokens: DashMap<(u64, String), PushToken>,
    next_registration_id: std::sync::atomic::AtomicU64,
    running: RwLock<bool>,
}

impl Registrar {
    pub fn new(
        extensions: Arc<dyn ExtensionLookup>,
        auth: Arc<DigestAuthenticator>,
        notifier: Arc<RegistrationNotifier>,
    ) -> Self {
        Self {
            extensions,
            auth,
            notifier,
            registrations: DashMap::new(),
            push_tokens: DashMap::new(),
            next_registration_id: std::sync::atomic::AtomicU64::new(1),
            running: RwLock::new(false),
        }
    }

    pub fn active_registrations(&self, extension_id: u64) -> Vec<Registration> {
        self.registrations
            .get(&extension_id)
            .map(|m| m.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    pub fn push_token_for(&self, extension_id: u64) -> Option<PushToken> {
        self.push_tokens.iter().find(|e| e.key().0 == extension_id).map(|e| e.value().clone())
    }

    pub fn handle_register(&self, request: &Request, source: &str) -> Result<Response> {
        let (extension, early_response) = self.auth.authenticate(request, source, self.extensions.as_ref());
        let Some(extension) = extension else {
            return early_response.ok_or(RegistrarError::AuthChallenge);
        };

        let contact = request
            .headers
            .get("Contact")
            .ok_or_else(|| RegistrarError::MissingHeader("Contact".into()))?;

        if contact.trim() == "*" {
            self.registrations.remove(&extension.id);
            info!(extension = %extension.number, "un-registered all contacts");
            return Ok(response_builders::create_response(request, StatusCode::OK));
        }

        let contact_uri = extract_contact_uri(contact);
        let expiry = expiry_from_headers(request, contact);

        if expiry == 0 {
            if let Some(bucket) = self.registrations.get(&extension.id) {
                bucket.remove(&contact_uri);
            }
            info!(extension = %extension.number, %contact_uri, "un-registered contact");
            return Ok(response_builders::create_response(request, StatusCode::OK));
        }

        let clamped = expiry.clamp(MIN_EXPIRY, MAX_EXPIRY);
        let bucket = self.registrations.entry(extension.id).or_insert_with(DashMap::new);

        // idempotent re-register: remove any pre-existing row for this
        // contact before the capacity check.
        bucket.remove(&contact_uri);
        if bucket.len() as u32 >= extension.max_registrations {
            return Ok(response_builders::create_response(request, StatusCode::FORBIDDEN));
        }

        let transport = Transport::from_via(&request.via_transport());
        let (source_ip, source_port) = split_source(source);
        let push = parse_push_params(contact, &request.request_uri.to_string());

        let registration = Registration {
            id: self.next_registration_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            extension_id: extension.id,
            contact_uri: contact_uri.clone(),
            transport,
            user_agent: request.headers.get("User-Agent").unwrap_or_default().to_string(),
            source_ip,
            source_port,
            expires_at: Utc::now() + ChronoDuration::seconds(clamped),
            push_token: push.as_ref().map(|p| p.token.clone()),
            push_platform: push.as_ref().map(|p| p.platform),
            push_device_id: push.as_ref().map(|p| p.device_id.clone()),
        };
        bucket.insert(contact_uri.clone(), registration);
        drop(bucket);

        if let Some(push) = push {
            self.push_tokens.insert(
                (extension.id, push.device_id.clone()),
                PushToken {
                    extension_id: extension.id,
                    device_id: push.device_id,
                    token: push.token,
                    platform: push.platform,
                    last_app_version: None,
                },
            );
        }

        debug!(extension = %extension.number, %contact_uri, clamped, "registered contact");
        self.notifier.notify(extension.id);

        Ok(response_builders::create_response(request, StatusCode::OK)
            .with_header("Contact", format!("{contact_uri};expires={clamped}"))
            .with_header("Expires", clamped.to_string()))
    }

    /// Expiry reaper: removes rows whose expiry has passed and sweeps C3's
    /// nonce store.
    pub fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        self.registrations.retain(|_, bucket| {
            bucket.retain(|_, reg| {
                let keep = !reg.is_expired(now);
                if !keep {
                    removed += 1;
                }
                keep
            });
            !bucket.is_empty()
        });
        self.auth.cleanup();
        removed
    }

    pub async fn start_reaper(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
        }
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let removed = self.reap_expired();
                if removed > 0 {
                    info!(removed, "reaped expired registrations");
                }
            }
        });
    }
}

fn split_source(source: &str) -> (String, u16) {
    match source.rsplit_once(':') {
        Some((ip, port)) => (ip.to_string(), port.parse().unwrap_or(0)),
        None => (source.to_string(), 0),
    }
}

fn extract_contact_uri(contact: &str) -> String {
    let without_params = contact.split(';').next().unwrap_or(contact).trim();
    without_params.trim_start_matches('<').trim_end_matches('>').to_string()
}

/// Contact ";expires" param, else Expires header, else the default.
fn expiry_from_headers(request: &Request, contact: &str) -> i64 {
    let from_contact: Option<i64> = contact
        .split(';')
        .skip(1)
        .find_map(|p| p.trim().strip_prefix("expires=").and_then(|v| v.parse().ok()));
    from_contact
        .or_else(|| request.headers.get("Expires").and_then(|v| v.trim().parse().ok()))
        .unwrap_or(DEFAULT_EXPIRY)
}

/// Push params from Contact header params and URI params (`pn-tok`,
/// `pn-type`, `pn-device`); all three must be present to register a token.
fn parse_push_params(contact: &str, _request_uri: &str) -> Option<PushParams> {
    let mut token = None;
    let mut platform = None;
    let mut device_id = None;

    for segment in contact.split(|c| c == ';' || c == '?') {
        let segment = segment.trim();
        if let Some(v) = segment.strip_prefix("pn-tok=") {
            token = Some(v.trim_matches('"').to_string());
        } else if let Some(v) = segment.strip_prefix("pn-type=") {
            platform = PushPlatform::parse(v.trim_matches('"'));
        } else if let Some(v) = segment.strip_prefix("pn-device=") {
            device_id = Some(v.trim_matches('"').to_string());
        }
    }

    match (token, platform, device_id) {
        (Some(token), Some(platform), Some(device_id)) => Some(PushParams { token, platform, device_id }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brute_force::BruteForceGuard;
    use pbx_sip::{Method, SipUri};

    struct FakeLookup(Extension);
    impl ExtensionLookup for FakeLookup {
        fn find_by_username(&self, username: &str) -> Option<Extension> {
            (username == self.0.sip_username).then(|| self.0.clone())
        }
    }

    fn test_extension() -> Extension {
        Extension {
            id: 1,
            number: "101".into(),
            display_name: "Alice".into(),
            sip_username: "101".into(),
            sip_password: "secret".into(),
            max_registrations: 1,
            dnd: false,
        }
    }

    fn build_registrar() -> (Arc<Registrar>, Extension) {
        let extension = test_extension();
        let lookup: Arc<dyn ExtensionLookup> = Arc::new(FakeLookup(extension.clone()));
        let guard = Arc::new(BruteForceGuard::new());
        let auth = Arc::new(DigestAuthenticator::new("pbx.example", "op1", guard));
        let notifier = Arc::new(RegistrationNotifier::new());
        (Arc::new(Registrar::new(lookup, auth, notifier)), extension)
    }

    fn authed_register(contact: &str, expires: Option<&str>) -> Request {
        let mut req = Request::new(Method::Register, SipUri::parse("sip:pbx.example").unwrap());
        req.headers.push("Call-ID", "abc");
        req.headers.push("CSeq", "1 REGISTER");
        req.headers.push("From", "<sip:101@pbx.example>;tag=1");
        req.headers.push("To", "<sip:101@pbx.example>");
        req.headers.push("Via", "SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK1");
        req.headers.push("Contact", contact);
        if let Some(e) = expires {
            req.headers.push("Expires", e);
        }
        req
    }

    #[test]
    fn expiry_clamped_to_bounds() {
        assert_eq!(DEFAULT_EXPIRY.clamp(MIN_EXPIRY, MAX_EXPIRY), DEFAULT_EXPIRY);
        assert_eq!(30i64.clamp(MIN_EXPIRY, MAX_EXPIRY), MIN_EXPIRY);
        assert_eq!(999_999i64.clamp(MIN_EXPIRY, MAX_EXPIRY), MAX_EXPIRY);
    }

    #[test]
    fn extracts_bare_contact_uri() {
        assert_eq!(extract_contact_uri("<sip:101@10.0.0.5:5060>;expires=3600"), "sip:101@10.0.0.5:5060");
    }

    #[test]
    fn parses_push_params_only_when_all_present() {
        let contact = "<sip:101@10.0.0.5>;pn-tok=\"abc\";pn-type=apns;pn-device=\"dev1\"";
        let parsed = parse_push_params(contact, "").unwrap();
        assert_eq!(parsed.token, "abc");
        assert_eq!(parsed.device_id, "dev1");

        let partial = "<sip:101@10.0.0.5>;pn-tok=\"abc\"";
        assert!(parse_push_params(partial, "").is_none());
    }

    fn dig(header: &str) -> pbx_sip::digest::DigestParams {
        pbx_sip::digest::parse_digest_header(header).unwrap()
    }

    #[test]
    fn full_register_round_trip_challenges_then_accepts() {
        let (registrar, extension) = build_registrar();

        let first = authed_register("<sip:101@10.0.0.5:5060>;expires=3600", None);
        let challenge = registrar.handle_register(&first, "10.0.0.5:5060").unwrap();
        assert_eq!(challenge.status.0, 401);
        let www_auth = challenge.headers.get("WWW-Authenticate").unwrap();
        let nonce = www_auth.split("nonce=\"").nth(1).unwrap().split('"').next().unwrap();

        let mut params = dig(&format!(
            r#"Digest username="101", realm="pbx.example", nonce="{nonce}", uri="sip:pbx.example", response="""#
        ));
        params.response = crate::digest_auth::answer_challenge(&params, "REGISTER", &extension.sip_password);

        let mut second = authed_register("<sip:101@10.0.0.5:5060>;expires=3600", None);
        second.headers.push(
            "Authorization",
            format!(
                r#"Digest username="101", realm="pbx.example", nonce="{nonce}", uri="sip:pbx.example", response="{}""#,
                params.response
            ),
        );

        let ok = registrar.handle_register(&second, "10.0.0.5:5060").unwrap();
        assert_eq!(ok.status.0, 200);
        assert_eq!(ok.headers.get("Expires"), Some("3600"));
        assert_eq!(registrar.active_registrations(extension.id).len(), 1);
    }
}
