//! Push-gateway HTTP client (§6), rate-limited via C14. The gateway
//! itself is an external collaborator (§1 Non-goals) — this is only the
//! client-side contract: `POST /v1/push` plus the license endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::error::{PushError, Result};
use crate::rate_limiter::{self, RateLimiter};
use crate::types::{
    Envelope, LicenseActivateRequest, LicenseStatus, LicenseValidateRequest, PushAck, PushPlatform, PushRequest,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PushGatewayConfig {
    pub base_url: String,
    pub license_key: String,
}

pub struct PushGatewayClient {
    config: PushGatewayConfig,
    http: Client,
    limiter: Arc<RateLimiter>,
}

/// Outcome of a push attempt. A rate-limit or gateway-side failure is
/// still `Ok` — §4.13 step 2 treats those as "log and proceed", never as
/// a reason to fail the caller's SIP transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    RateLimited,
    GatewayError(String),
}

impl PushGatewayClient {
    pub fn new(config: PushGatewayConfig, limiter: Arc<RateLimiter>) -> Self {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build().unwrap_or_else(|_| Client::new());
        Self { config, http, limiter }
    }

    /// `POST /v1/push` (§6, §4.13 step 2). Never returns `Err` for a
    /// gateway-side problem — those are folded into `PushOutcome` so the
    /// push-wake wait can still proceed per §7 `Pushfail`.
    pub async fn send_push(
        &self,
        push_token: &str,
        push_platform: PushPlatform,
        caller_id: &str,
        call_id: &str,
    ) -> PushOutcome {
        if !self.limiter.allow(&rate_limiter::key_for(Some(&self.config.license_key), "n/a")) {
            warn!(%call_id, "push gateway rate-limited this license key");
            return PushOutcome::RateLimited;
        }

        let body = PushRequest {
            license_key: self.config.license_key.clone(),
            push_token: push_token.to_string(),
            push_platform,
            caller_id: caller_id.to_string(),
            call_id: call_id.to_string(),
        };

        match self.post::<PushRequest, PushAck>("/v1/push", &body).await {
            Ok(_) => {
                info!(%call_id, "push gateway accepted delivery");
                PushOutcome::Delivered
            }
            Err(e) => {
                warn!(%call_id, error = %e, "push gateway delivery failed");
                PushOutcome::GatewayError(e.to_string())
            }
        }
    }

    pub async fn validate_license(&self, license_key: &str) -> Result<LicenseStatus> {
        self.post("/v1/license/validate", &LicenseValidateRequest { license_key: license_key.to_string() }).await
    }

    pub async fn activate_license(
        &self,
        license_key: &str,
        instance_id: &str,
        hostname: &str,
        version: &str,
    ) -> Result<LicenseStatus> {
        let body = LicenseActivateRequest {
            license_key: license_key.to_string(),
            instance_id: instance_id.to_string(),
            hostname: hostname.to_string(),
            version: version.to_string(),
        };
        self.post("/v1/license/activate", &body).await
    }

    pub async fn license_status(&self) -> Result<LicenseStatus> {
        let url = format!("{}/v1/license/status", self.config.base_url);
        let response = self.http.get(&url).send().await.map_err(|e| PushError::Transport(e.to_string()))?;
        self.envelope(response).await
    }

    async fn post<B: serde::Serialize, T: serde::de::DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", self.config.base_url);
        let response = self.http.post(&url).json(body).send().await.map_err(|e| PushError::Transport(e.to_string()))?;
        self.envelope(response).await
    }

    async fn envelope<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let envelope: Envelope<T> =
            response.json().await.map_err(|e| PushError::Transport(format!("malformed response body: {e}")))?;

        if status.is_success() {
            envelope.data.ok_or_else(|| PushError::GatewayServerError("missing data field on success".into()))
        } else if status.as_u16() == 429 {
            Err(PushError::RateLimited)
        } else if status.is_client_error() {
            Err(PushError::GatewayClientError(envelope.error.unwrap_or_else(|| status.to_string())))
        } else {
            Err(PushError::GatewayServerError(envelope.error.unwrap_or_else(|| status.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimiterConfig;

    #[test]
    fn rate_limited_outcome_is_distinguishable_from_delivered() {
        assert_ne!(PushOutcome::Delivered, PushOutcome::RateLimited);
    }

    #[tokio::test]
    async fn rate_limiter_blocks_before_any_http_call() {
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            rate: 0.0,
            burst: 0.0,
            max_age: Duration::from_secs(60),
        }));
        let client = PushGatewayClient::new(
            PushGatewayConfig { base_url: "http://127.0.0.1:1".into(), license_key: "lic-1".into() },
            limiter,
        );
        let outcome = client.send_push("tok", PushPlatform::Fcm, "+15551234567", "call-1").await;
        assert_eq!(outcome, PushOutcome::RateLimited);
    }
}
