//! Digest authenticator (C3): nonce issuance/validation and credential
//! checking, feeding the brute-force guard (C1) on every outcome.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use pbx_sip::digest::{self, DigestParams};
use pbx_sip::{Request, Response, StatusCode};
use pbx_transaction::response_builders;

use crate::brute_force::BruteForceGuard;
use crate::types::Extension;

const NONCE_TTL: Duration = Duration::from_secs(5 * 60);

/// A lookup of SIP username -> Extension, provided by whatever owns the
/// extension store (kept abstract here so this crate has no persistence
/// dependency of its own).
pub trait ExtensionLookup: Send + Sync {
    fn find_by_username(&self, username: &str) -> Option<Extension>;
}

pub struct DigestAuthenticator {
    realm: String,
    opaque: String,
    nonces: Mutex<HashMap<String, Instant>>,
    guard: std::sync::Arc<BruteForceGuard>,
}

impl DigestAuthenticator {
    pub fn new(realm: impl Into<String>, opaque: impl Into<String>, guard: std::sync::Arc<BruteForceGuard>) -> Self {
        Self { realm: realm.into(), opaque: opaque.into(), nonces: Mutex::new(HashMap::new()), guard }
    }

    /// Sends a 401 Unauthorized with a fresh nonce.
    pub fn challenge(&self, request: &Request) -> Response {
        let nonce = digest::generate_nonce();
        self.nonces.lock().insert(nonce.clone(), Instant::now());
        let header = digest::challenge_header(&self.realm, &nonce, &self.opaque);
        response_builders::create_response(request, StatusCode::UNAUTHORIZED)
            .with_header("WWW-Authenticate", header)
    }

    fn nonce_is_fresh(&self, nonce: &str) -> bool {
        let nonces = self.nonces.lock();
        match nonces.get(nonce) {
            Some(issued) => issued.elapsed() <= NONCE_TTL,
            None => false,
        }
    }

    fn consume_nonce(&self, nonce: &str) {
        self.nonces.lock().remove(nonce);
    }

    /// Returns `Ok(Some(extension))` on success, `Ok(None)` when this
    /// function itself already sent a response (challenge/block/error),
    /// carried back to the caller via `response`.
    pub fn authenticate(
        &self,
        request: &Request,
        source: &str,
        lookup: &dyn ExtensionLookup,
    ) -> (Option<Extension>, Option<Response>) {
        if self.guard.is_blocked(source) {
            return (None, Some(response_builders::create_response(request, StatusCode::FORBIDDEN)));
        }

        let Some(auth_header) = request.headers.get("Authorization") else {
            return (None, Some(self.challenge(request)));
        };

        let params = match digest::parse_digest_header(auth_header) {
            Ok(p) => p,
            Err(_) => {
                self.guard.record_failure(source);
                return (None, Some(response_builders::create_response(request, StatusCode::BAD_REQUEST)));
            }
        };

        if !self.nonce_is_fresh(&params.nonce) {
            debug!(%source, "stale or unknown nonce, re-challenging");
            return (None, Some(self.challenge(request)));
        }

        let Some(extension) = lookup.find_by_username(&params.username) else {
            self.guard.record_failure(source);
            return (None, Some(response_builders::create_response(request, StatusCode::FORBIDDEN)));
        };

        let expected = digest::compute_response(&params, request.method.as_str(), &extension.sip_password);

        if !digest::responses_match(&expected, &params.response) {
            self.guard.record_failure(source);
            return (None, Some(self.challenge(request)));
        }

        self.consume_nonce(&params.nonce);
        self.guard.record_success(source);
        (Some(extension), None)
    }

    pub fn cleanup(&self) {
        self.nonces.lock().retain(|_, issued| issued.elapsed() <= NONCE_TTL);
        self.guard.cleanup();
    }
}

/// Quick digest-response check for outbound re-auth (C5/C11), where there
/// is no nonce store — the server issued the nonce, we just answer it.
pub fn answer_challenge(params: &DigestParams, method: &str, password: &str) -> String {
    digest::compute_response(params, method, password)
}
