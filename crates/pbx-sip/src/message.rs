use std::net::SocketAddr;

use crate::error::{Result, SipError};
use crate::headers::Headers;
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::SipUri;

/// An inbound or outbound SIP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub request_uri: SipUri,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// The address the request was actually received from, as observed by
    /// the transport layer — this is what NAT-aware contact rewriting and
    /// IP-auth matching key off, never the header-carried address.
    pub source: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, request_uri: SipUri) -> Self {
        Self { method, request_uri, headers: Headers::new(), body: Vec::new(), source: None }
    }

    pub fn call_id(&self) -> Result<&str> {
        self.headers.get("Call-ID").ok_or_else(|| SipError::MissingHeader("Call-ID".into()))
    }

    pub fn cseq(&self) -> Result<(u32, Method)> {
        let raw = self.headers.get("CSeq").ok_or_else(|| SipError::MissingHeader("CSeq".into()))?;
        let (num, method) = raw
            .trim()
            .split_once(' ')
            .ok_or_else(|| SipError::InvalidHeader { header: "CSeq".into(), value: raw.into() })?;
        let num: u32 = num
            .parse()
            .map_err(|_| SipError::InvalidHeader { header: "CSeq".into(), value: raw.into() })?;
        Ok((num, Method::parse(method.trim())?))
    }

    pub fn from_tag(&self) -> Option<String> {
        tag_param(self.headers.get("From")?)
    }

    pub fn to_tag(&self) -> Option<String> {
        tag_param(self.headers.get("To")?)
    }

    /// Topmost Via's transport token, lower-cased, defaulting to "udp" per
    /// §4.4 step 5.
    pub fn via_transport(&self) -> String {
        self.headers
            .get("Via")
            .and_then(|via| via.split(';').next())
            .and_then(|proto| proto.rsplit('/').next())
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "udp".to_string())
    }

    pub fn max_forwards(&self) -> u32 {
        self.headers.get("Max-Forwards").and_then(|v| v.trim().parse().ok()).unwrap_or(70)
    }
}

/// A SIP response being built or relayed.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: Headers::new(), body: Vec::new() }
    }

    /// Build the dialog-correlated skeleton of a response to `req`: same
    /// Call-ID/CSeq/From, To with the tag it already has (callers add one
    /// for 2xx/provisional-with-early-dialog responses via `with_to_tag`).
    pub fn to_request(req: &Request, status: StatusCode) -> Result<Self> {
        let mut resp = Response::new(status);
        resp.headers.push("Via", req.headers.get("Via").unwrap_or_default());
        for via in req.headers.get_all("Via").skip(1) {
            resp.headers.push("Via", via);
        }
        resp.headers.push("Call-ID", req.call_id()?);
        resp.headers.push("CSeq", req.headers.get("CSeq").unwrap_or_default());
        resp.headers.push("From", req.headers.get("From").unwrap_or_default());
        resp.headers.push("To", req.headers.get("To").unwrap_or_default());
        Ok(resp)
    }

    pub fn with_to_tag(mut self, tag: &str) -> Self {
        if let Some(to) = self.headers.get("To").map(str::to_string) {
            if tag_param(&to).is_none() {
                self.headers.set("To", format!("{to};tag={tag}"));
            }
        }
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.set("Content-Type", content_type);
        self.headers.set("Content-Length", body.len().to_string());
        self.body = body;
        self
    }
}

fn tag_param(header_value: &str) -> Option<String> {
    header_value
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("tag=").map(|t| t.trim_matches('"').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tags_and_transport() {
        let mut req = Request::new(Method::Invite, SipUri::parse("sip:101@pbx").unwrap());
        req.headers.push("From", "\"Caller\" <sip:100@pbx>;tag=abc123");
        req.headers.push("To", "<sip:101@pbx>");
        req.headers.push("Via", "SIP/2.0/TCP 10.0.0.1:5060;branch=z9hG4bK1");
        req.headers.push("Call-ID", "abc-def");
        req.headers.push("CSeq", "1 INVITE");

        assert_eq!(req.from_tag().as_deref(), Some("abc123"));
        assert_eq!(req.to_tag(), None);
        assert_eq!(req.via_transport(), "tcp");
        assert_eq!(req.cseq().unwrap(), (1, Method::Invite));
    }
}
