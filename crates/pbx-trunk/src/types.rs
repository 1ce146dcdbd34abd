//! §3 data model: Trunk, Trunk Runtime State, Backoff State.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkType {
    Register,
    Ip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrunkCredentials {
    pub username: String,
    pub auth_username: Option<String>,
    pub password: String,
}

impl TrunkCredentials {
    /// Digest auth uses `auth_username` when set, else `username` (§4.5).
    pub fn digest_username(&self) -> &str {
        self.auth_username.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone)]
pub struct Trunk {
    pub id: u64,
    pub name: String,
    pub trunk_type: TrunkType,
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub credentials: TrunkCredentials,
    pub registered_expiry: u32,
    /// Required for type=ip: IPs/CIDRs this trunk is reachable from.
    pub remote_hosts: Vec<String>,
    pub priority: i32,
    pub max_channels: u32,
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub prefix_strip: usize,
    pub prefix_add: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkStatus {
    Registering,
    Registered,
    Failed,
    Disabled,
    Unregistered,
}

#[derive(Debug, Clone)]
pub struct TrunkRuntimeState {
    pub status: TrunkStatus,
    pub last_error: Option<String>,
    pub retry_attempt: u32,
    pub failed_at: Option<DateTime<Utc>>,
    pub registered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_options_at: Option<DateTime<Utc>>,
    pub options_healthy: bool,
}

impl TrunkRuntimeState {
    pub fn initial(trunk_type: TrunkType) -> Self {
        let status = match trunk_type {
            TrunkType::Ip => TrunkStatus::Unregistered,
            TrunkType::Register => TrunkStatus::Registering,
        };
        Self {
            status,
            last_error: None,
            retry_attempt: 0,
            failed_at: None,
            registered_at: None,
            expires_at: None,
            last_options_at: None,
            options_healthy: false,
        }
    }

    pub fn set_registering(&mut self) {
        self.status = TrunkStatus::Registering;
    }

    pub fn set_registered(&mut self, expires_at: DateTime<Utc>) {
        self.status = TrunkStatus::Registered;
        self.registered_at = Some(Utc::now());
        self.expires_at = Some(expires_at);
        self.last_error = None;
        self.retry_attempt = 0;
    }

    pub fn set_failed(&mut self, error: impl Into<String>) {
        self.status = TrunkStatus::Failed;
        self.last_error = Some(error.into());
        self.failed_at = Some(Utc::now());
    }

    pub fn set_disabled(&mut self) {
        self.status = TrunkStatus::Disabled;
    }

    pub fn record_options_probe(&mut self, healthy: bool) {
        self.last_options_at = Some(Utc::now());
        self.options_healthy = healthy;
        self.status = if healthy { TrunkStatus::Registered } else { TrunkStatus::Failed };
        if !healthy {
            self.failed_at = Some(Utc::now());
        }
    }
}

/// Prefix rules for outbound dialed-number rewriting (§4.11 step 2).
/// `applyPrefixRules(n, 0, "") == n` — idempotent with no-op rules.
pub fn apply_prefix_rules(number: &str, prefix_strip: usize, prefix_add: &str) -> String {
    let stripped = if prefix_strip >= number.chars().count() {
        String::new()
    } else {
        number.chars().skip(prefix_strip).collect()
    };
    format!("{prefix_add}{stripped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_rule_is_idempotent() {
        assert_eq!(apply_prefix_rules("07700900000", 0, ""), "07700900000");
    }

    #[test]
    fn strip_then_add_rewrites_uk_mobile_to_e164() {
        assert_eq!(apply_prefix_rules("07700900000", 1, "0044"), "00447700900000");
    }

    #[test]
    fn strip_past_end_yields_empty_then_prepends_add() {
        assert_eq!(apply_prefix_rules("123", 10, "9"), "9");
    }
}
