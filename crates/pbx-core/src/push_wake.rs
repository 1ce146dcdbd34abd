//! Push-Wake Coordinator (C13): subscribes before sending the push so the
//! wake can never be missed (§4.6 ordering guarantee), then waits for the
//! REGISTER that follows.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use pbx_push::{PushGatewayClient, PushOutcome, PushPlatform};
use pbx_registrar::RegistrationNotifier;

/// `PushWake(extensionID, pushToken, platform, callerID, callID, timeout)`
/// (§4.13). Returns true if a REGISTER arrived before the deadline.
pub async fn wake_and_wait(
    notifier: &Arc<RegistrationNotifier>,
    push_client: &PushGatewayClient,
    extension_id: u64,
    push_token: &str,
    platform: PushPlatform,
    caller_id: &str,
    call_id: &str,
    wait_timeout: Duration,
) -> bool {
    let mut handle = notifier.subscribe(extension_id);

    match push_client.send_push(push_token, platform, caller_id, call_id).await {
        PushOutcome::Delivered => info!(%call_id, extension_id, "push delivered, waiting for register"),
        PushOutcome::RateLimited => warn!(%call_id, extension_id, "push rate-limited, waiting anyway"),
        PushOutcome::GatewayError(reason) => warn!(%call_id, extension_id, %reason, "push gateway error, waiting anyway"),
    }

    let woke = handle.wait(wait_timeout).await;
    if !woke {
        info!(%call_id, extension_id, "push-wake timed out");
    }
    woke
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_push::{PushGatewayConfig, RateLimiter, RateLimiterConfig};

    #[tokio::test]
    async fn wake_times_out_without_a_matching_register() {
        let notifier = Arc::new(RegistrationNotifier::new());
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig { rate: 0.0, burst: 0.0, max_age: Duration::from_secs(60) }));
        let client = PushGatewayClient::new(
            PushGatewayConfig { base_url: "http://127.0.0.1:1".into(), license_key: "lic-1".into() },
            limiter,
        );

        let woke = wake_and_wait(&notifier, &client, 1, "tok", PushPlatform::Apns, "+15551234567", "call-1", Duration::from_millis(20)).await;
        assert!(!woke);
    }

    #[tokio::test]
    async fn notify_before_deadline_wakes_the_waiter() {
        let notifier = Arc::new(RegistrationNotifier::new());
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig { rate: 0.0, burst: 0.0, max_age: Duration::from_secs(60) }));
        let client = PushGatewayClient::new(
            PushGatewayConfig { base_url: "http://127.0.0.1:1".into(), license_key: "lic-1".into() },
            limiter,
        );

        let notifier2 = notifier.clone();
        let waiter = tokio::spawn(async move {
            wake_and_wait(&notifier2, &client, 7, "tok", PushPlatform::Fcm, "+15551234567", "call-2", Duration::from_secs(2)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.notify(7);
        assert!(waiter.await.unwrap());
    }
}
