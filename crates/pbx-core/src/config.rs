//! PBX configuration bundle (§6 CLI/env), loaded once at startup and
//! handed down as `Arc<PbxConfig>`.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbxConfig {
    pub sip: SipConfig,
    pub media: MediaConfig,
    pub auth: AuthConfig,
    pub trunk: TrunkConfig,
    pub push: PushConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipConfig {
    pub host: IpAddr,
    pub port: u16,
    pub tls_port: u16,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Seconds a forked leg is allowed to ring before the INVITE handler
    /// times out the fork (§5 ring-timeout).
    pub ring_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub proxy_ip: IpAddr,
    pub rtp_port_min: u16,
    pub rtp_port_max: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub realm: String,
    pub opaque: String,
    pub nonce_ttl_secs: u64,
    pub brute_force_window_secs: u64,
    pub brute_force_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrunkConfig {
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub options_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub gateway_base_url: String,
    pub license_key: String,
    /// Seconds C13 waits for a post-push REGISTER before giving up (§4.13).
    pub push_wait_timeout_secs: u64,
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub data_dir: PathBuf,
    pub url: String,
}

impl Default for PbxConfig {
    fn default() -> Self {
        Self {
            sip: SipConfig {
                host: "0.0.0.0".parse().unwrap(),
                port: 5060,
                tls_port: 5061,
                tls_cert: None,
                tls_key: None,
                ring_timeout_secs: 180,
            },
            media: MediaConfig {
                proxy_ip: "127.0.0.1".parse().unwrap(),
                rtp_port_min: 30000,
                rtp_port_max: 40000,
            },
            auth: AuthConfig {
                realm: "pbx.local".into(),
                opaque: "pbx-core".into(),
                nonce_ttl_secs: 300,
                brute_force_window_secs: 600,
                brute_force_threshold: 10,
            },
            trunk: TrunkConfig { backoff_base_secs: 5, backoff_cap_secs: 300, options_interval_secs: 30 },
            push: PushConfig {
                gateway_base_url: "https://push.example.invalid".into(),
                license_key: String::new(),
                push_wait_timeout_secs: 20,
                rate_limit_per_sec: 1.0,
                rate_limit_burst: 5.0,
            },
            database: DatabaseConfig { data_dir: PathBuf::from("./data"), url: "sqlite://./data/pbx.db".into() },
        }
    }
}

impl PbxConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub async fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = PbxConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed = PbxConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(parsed.sip.port, config.sip.port);
        assert_eq!(parsed.push.push_wait_timeout_secs, config.push.push_wait_timeout_secs);
    }
}
