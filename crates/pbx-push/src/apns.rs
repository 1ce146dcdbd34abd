//! APNs token-based provider authentication (§6): an ES256 JWT signed
//! with the team's `.p8` key, `kid`=KeyID, `iss`=TeamID, refreshed at 50
//! minutes of its 60-minute validity.
//!
//! The push-gateway service itself picks between the APNs and FCM legs
//! server-side (§1 Non-goals — the gateway is an external collaborator);
//! this module exists so the shape of what the gateway is contractually
//! expected to send is exercised by tests against §6, not so the PBX core
//! calls APNs directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{PushError, Result};

/// APNs provider tokens are valid for 60 minutes; kept here for
/// documentation even though refresh is driven by `REFRESH_AFTER`.
#[allow(dead_code)]
const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
const REFRESH_AFTER: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Clone)]
pub struct ApnsConfig {
    pub key_id: String,
    pub team_id: String,
    pub bundle_id: String,
    /// PEM-encoded PKCS#8 EC private key (the `.p8` file contents).
    pub private_key_pem: String,
}

impl ApnsConfig {
    pub fn topic(&self) -> String {
        format!("{}.voip", self.bundle_id)
    }
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    iat: i64,
}

struct CachedToken {
    token: String,
    issued_at: Instant,
}

/// Caches the signed JWT and regenerates it once it is past
/// `REFRESH_AFTER` into its validity window, rather than on every push.
pub struct ApnsAuthenticator {
    config: ApnsConfig,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ApnsAuthenticator {
    pub fn new(config: ApnsConfig) -> Result<Arc<Self>> {
        let encoding_key = EncodingKey::from_ec_pem(config.private_key_pem.as_bytes())
            .map_err(|e| PushError::Jwt(e.to_string()))?;
        Ok(Arc::new(Self { config, encoding_key, cached: Mutex::new(None) }))
    }

    pub fn topic(&self) -> String {
        self.config.topic()
    }

    /// Returns a cached token if still within its refresh window, else
    /// mints and caches a new one.
    pub fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock();
        if let Some(existing) = cached.as_ref() {
            if existing.issued_at.elapsed() < REFRESH_AFTER {
                return Ok(existing.token.clone());
            }
        }

        let mut header = Header::new(jsonwebtoken::Algorithm::ES256);
        header.kid = Some(self.config.key_id.clone());
        let claims = Claims { iss: self.config.team_id.clone(), iat: unix_timestamp() };
        let token = encode(&header, &claims, &self.encoding_key).map_err(|e| PushError::Jwt(e.to_string()))?;

        *cached = Some(CachedToken { token: token.clone(), issued_at: Instant::now() });
        Ok(token)
    }
}

/// Kept separate from the `chrono` clock the rest of the crate uses so
/// JWT `iat` stays a plain Unix epoch integer per the APNs spec.
fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// APNs VoIP push headers (§6): `apns-push-type: voip`,
/// `apns-priority: 10`, `apns-expiration: 0`.
pub fn voip_headers(authenticator: &ApnsAuthenticator) -> Result<Vec<(&'static str, String)>> {
    Ok(vec![
        ("authorization", format!("bearer {}", authenticator.token()?)),
        ("apns-push-type", "voip".to_string()),
        ("apns-priority", "10".to_string()),
        ("apns-expiration", "0".to_string()),
        ("apns-topic", authenticator.topic()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_appends_voip_suffix() {
        let config = ApnsConfig {
            key_id: "KEY1".into(),
            team_id: "TEAM1".into(),
            bundle_id: "com.example.phone".into(),
            private_key_pem: String::new(),
        };
        assert_eq!(config.topic(), "com.example.phone.voip");
    }
}
