//! Push-gateway HTTP client (C13's collaborator), rate limiter (C14),
//! and the APNs/FCM payload shapes the gateway's contract (§6) specifies.

pub mod apns;
pub mod error;
pub mod fcm;
pub mod gateway;
pub mod rate_limiter;
pub mod types;

pub use error::{PushError, Result};
pub use gateway::{PushGatewayClient, PushGatewayConfig, PushOutcome};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use types::{PushLog, PushPlatform, PushRequest};
