//! RFC 7616 MD5-profile digest authentication: parsing `Authorization` /
//! `WWW-Authenticate` / `Proxy-Authenticate` parameters and computing the
//! expected response hash. Algorithm is always MD5 per §4.3 — the realm is
//! fixed per deployment and carried in by the caller.

use std::collections::HashMap;
use std::fmt::Write as _;

use rand::RngCore;

use crate::error::{Result, SipError};

#[derive(Debug, Clone, Default)]
pub struct DigestParams {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
    pub cnonce: Option<String>,
    pub nc: Option<String>,
}

/// Parse the parameter list of a `Digest ...` Authorization/credentials
/// header value (the `Digest` scheme token itself must already be
/// stripped by the caller or is tolerated here as a no-op prefix).
pub fn parse_digest_header(value: &str) -> Result<DigestParams> {
    let value = value.trim();
    let value = value.strip_prefix("Digest").map(str::trim).unwrap_or(value);

    let mut map: HashMap<String, String> = HashMap::new();
    for part in split_params(value) {
        let (k, v) = part
            .split_once('=')
            .ok_or_else(|| SipError::Digest(format!("malformed parameter: {part}")))?;
        let v = v.trim().trim_matches('"').to_string();
        map.insert(k.trim().to_ascii_lowercase(), v);
    }

    let take = |k: &str| map.get(k).cloned();
    Ok(DigestParams {
        username: take("username").ok_or_else(|| SipError::Digest("missing username".into()))?,
        realm: take("realm").ok_or_else(|| SipError::Digest("missing realm".into()))?,
        nonce: take("nonce").ok_or_else(|| SipError::Digest("missing nonce".into()))?,
        uri: take("uri").ok_or_else(|| SipError::Digest("missing uri".into()))?,
        response: take("response").ok_or_else(|| SipError::Digest("missing response".into()))?,
        opaque: take("opaque"),
        algorithm: take("algorithm"),
        qop: take("qop"),
        cnonce: take("cnonce"),
        nc: take("nc"),
    })
}

/// Split a comma-separated parameter list while respecting quoted commas.
fn split_params(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            ',' if !in_quotes => {
                if !cur.trim().is_empty() {
                    parts.push(cur.trim().to_string());
                }
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        parts.push(cur.trim().to_string());
    }
    parts
}

fn md5_hex(input: &str) -> String {
    let digest = md5::compute(input.as_bytes());
    let mut out = String::with_capacity(32);
    for byte in digest.0 {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Compute the expected digest response for the given method/credentials.
/// Covers both the plain (no qop) and `qop=auth` variants; the PBX side
/// only ever issues challenges without qop (§4.3), but trunk registrars we
/// talk to (§4.5) may send qop=auth challenges we must answer correctly.
pub fn compute_response(params: &DigestParams, method: &str, password: &str) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", params.username, params.realm, password));
    let ha2 = md5_hex(&format!("{method}:{}", params.uri));

    match (&params.qop, &params.cnonce, &params.nc) {
        (Some(qop), Some(cnonce), Some(nc)) => {
            md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}", params.nonce))
        }
        _ => md5_hex(&format!("{ha1}:{}:{ha2}", params.nonce)),
    }
}

/// Constant-time comparison of two digest response strings.
pub fn responses_match(expected: &str, received: &str) -> bool {
    if expected.len() != received.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.bytes().zip(received.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// A fresh 16-byte nonce, hex-encoded, per §4.3.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Build a `WWW-Authenticate` (or `Proxy-Authenticate`) header value.
pub fn challenge_header(realm: &str, nonce: &str, opaque: &str) -> String {
    format!(r#"Digest realm="{realm}", nonce="{nonce}", opaque="{opaque}", algorithm=MD5"#)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_response() {
        let mut params = DigestParams {
            username: "101".into(),
            realm: "pbx.example".into(),
            nonce: "abc123".into(),
            uri: "sip:101@pbx.example".into(),
            response: String::new(),
            ..Default::default()
        };
        let expected = compute_response(&params, "REGISTER", "hunter2");
        params.response = expected.clone();
        let recomputed = compute_response(&params, "REGISTER", "hunter2");
        assert!(responses_match(&expected, &recomputed));
    }

    #[test]
    fn wrong_password_does_not_match() {
        let params = DigestParams {
            username: "101".into(),
            realm: "pbx.example".into(),
            nonce: "abc123".into(),
            uri: "sip:101@pbx.example".into(),
            response: "deadbeef".into(),
            ..Default::default()
        };
        let expected = compute_response(&params, "REGISTER", "hunter2");
        assert!(!responses_match(&expected, &params.response));
    }

    #[test]
    fn parses_quoted_params_with_embedded_commas_absent() {
        let header = r#"Digest username="101", realm="pbx.example", nonce="n1", uri="sip:101@pbx.example", response="deadbeef", opaque="op1""#;
        let parsed = parse_digest_header(header).unwrap();
        assert_eq!(parsed.username, "101");
        assert_eq!(parsed.opaque.as_deref(), Some("op1"));
    }
}
