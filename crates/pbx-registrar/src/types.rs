//! Data model for §3: Extension, Registration, Push Token.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
    Wss,
}

impl Transport {
    pub fn from_via(via_transport: &str) -> Self {
        match via_transport.to_ascii_uppercase().as_str() {
            "TCP" => Transport::Tcp,
            "TLS" => Transport::Tls,
            "WSS" | "WS" => Transport::Wss,
            _ => Transport::Udp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

/// Identity of a local phone line, provisioned externally. Password is
/// assumed already encrypted-at-rest by the persistence layer; this type
/// carries whatever form that layer hands back.
#[derive(Debug, Clone)]
pub struct Extension {
    pub id: u64,
    pub number: String,
    pub display_name: String,
    pub sip_username: String,
    pub sip_password: String,
    pub max_registrations: u32,
    pub dnd: bool,
}

/// A single active binding of one contact URI to an extension.
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: u64,
    pub extension_id: u64,
    pub contact_uri: String,
    pub transport: Transport,
    pub user_agent: String,
    pub source_ip: String,
    pub source_port: u16,
    pub expires_at: DateTime<Utc>,
    pub push_token: Option<String>,
    pub push_platform: Option<PushPlatform>,
    pub push_device_id: Option<String>,
}

impl Registration {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Survives registration expiry so a woken app can still be reached.
#[derive(Debug, Clone)]
pub struct PushToken {
    pub extension_id: u64,
    pub device_id: String,
    pub token: String,
    pub platform: PushPlatform,
    pub last_app_version: Option<String>,
}

/// Push params parsed off a REGISTER's Contact header, if present.
#[derive(Debug, Clone)]
pub struct PushParams {
    pub token: String,
    pub platform: PushPlatform,
    pub device_id: String,
}
