//! Wire shapes for the push-gateway HTTP contract (§6) and the push log
//! entries §3 requires persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushPlatform {
    Fcm,
    Apns,
}

impl PushPlatform {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fcm" => Some(PushPlatform::Fcm),
            "apns" => Some(PushPlatform::Apns),
            _ => None,
        }
    }
}

/// `POST /v1/push` request body (§6).
#[derive(Debug, Clone, Serialize)]
pub struct PushRequest {
    pub license_key: String,
    pub push_token: String,
    pub push_platform: PushPlatform,
    pub caller_id: String,
    pub call_id: String,
}

/// `{"data":..., "error":"..."}` response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushAck {
    pub delivered: bool,
}

/// A row in the §6 `push_logs` persistence table.
#[derive(Debug, Clone)]
pub struct PushLog {
    pub license_key: String,
    pub platform: PushPlatform,
    pub call_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseValidateRequest {
    pub license_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LicenseStatus {
    pub valid: bool,
    pub tier: Option<String>,
    pub max_extensions: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseActivateRequest {
    pub license_key: String,
    pub instance_id: String,
    pub hostname: String,
    pub version: String,
}
