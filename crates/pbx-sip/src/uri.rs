//! Minimal `sip:`/`sips:` URI representation.
//!
//! Only the pieces the PBX core actually inspects or rewrites are modeled:
//! scheme, user, host, port and a flat parameter list. Header/body escaping
//! rules beyond what the core touches are not implemented.

use std::fmt;

use crate::error::{Result, SipError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub secure: bool,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: Vec<(String, String)>,
}

impl SipUri {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            secure: false,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        if let Some(existing) = self.params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            existing.1 = value.into();
        } else {
            self.params.push((name.to_string(), value.into()));
        }
    }

    /// Replace host and port in place — used when NAT-rewriting a forked
    /// leg's Request-URI to the registration's observed source address.
    pub fn with_host_port(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = Some(port);
        self
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix('<').and_then(|s| s.strip_suffix('>')).unwrap_or(s);

        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| SipError::InvalidUri(s.to_string()))?;
        let secure = match scheme {
            "sip" => false,
            "sips" => true,
            other => return Err(SipError::InvalidUri(format!("unsupported scheme {other}"))),
        };

        let mut params_split = rest.splitn(2, ';');
        let userhost = params_split.next().unwrap_or("");
        let param_str = params_split.next().unwrap_or("");

        let (user, hostport) = match userhost.split_once('@') {
            Some((u, h)) => (Some(u.to_string()), h),
            None => (None, userhost),
        };

        let (host, port) = if let Some(idx) = hostport.rfind(':') {
            // avoid splitting IPv6 literals; the PBX never needs those here
            let (h, p) = hostport.split_at(idx);
            let p = &p[1..];
            match p.parse::<u16>() {
                Ok(port) => (h.to_string(), Some(port)),
                Err(_) => (hostport.to_string(), None),
            }
        } else {
            (hostport.to_string(), None)
        };

        let params = if param_str.is_empty() {
            Vec::new()
        } else {
            param_str
                .split(';')
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (p.to_string(), String::new()),
                })
                .collect()
        };

        Ok(Self { secure, user, host, port, params })
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", if self.secure { "sips" } else { "sip" })?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for (k, v) in &self.params {
            if v.is_empty() {
                write!(f, ";{k}")?;
            } else {
                write!(f, ";{k}={v}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_uri() {
        let uri = SipUri::parse("sip:101@10.0.0.1:5060").unwrap();
        assert_eq!(uri.user.as_deref(), Some("101"));
        assert_eq!(uri.host, "10.0.0.1");
        assert_eq!(uri.port, Some(5060));
    }

    #[test]
    fn parses_angle_brackets_and_params() {
        let uri = SipUri::parse("<sip:trunk@carrier.example;transport=tcp>").unwrap();
        assert_eq!(uri.host, "carrier.example");
        assert_eq!(uri.param("transport"), Some("tcp"));
    }

    #[test]
    fn rewrites_host_port_for_nat() {
        let uri = SipUri::parse("sip:101@10.0.0.1:5060").unwrap().with_host_port("203.0.113.9", 34567);
        assert_eq!(uri.to_string(), "sip:101@203.0.113.9:34567");
    }
}
