//! Wire encoding/decoding of SIP requests and responses. Intentionally
//! tolerant: the transport layer this crate stands in for (§1 Non-goals)
//! would normally own this, but the core still needs *some* concrete byte
//! format to drive the UDP send/receive loop.

use std::net::SocketAddr;

use pbx_sip::{Headers, Method, Request, Response, SipUri, StatusCode};

use crate::error::{Result, TransactionError};

pub enum Decoded {
    Request(Request),
    Response(Response),
}

pub fn decode(bytes: &[u8], source: SocketAddr) -> Result<Decoded> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.split("\r\n");
    let start_line = lines.next().unwrap_or_default();

    let (header_lines, body): (Vec<&str>, &str) = {
        let rest = &text[start_line.len()..];
        let rest = rest.strip_prefix("\r\n").unwrap_or(rest);
        match rest.find("\r\n\r\n") {
            Some(idx) => (rest[..idx].split("\r\n").filter(|l| !l.is_empty()).collect(), &rest[idx + 4..]),
            None => (rest.split("\r\n").filter(|l| !l.is_empty()).collect(), ""),
        }
    };

    let mut headers = Headers::new();
    for line in header_lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push(name.trim(), value.trim());
        }
    }

    if start_line.starts_with("SIP/2.0") {
        let mut parts = start_line.splitn(3, ' ');
        let _version = parts.next();
        let code: u16 = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| TransactionError::Transport("malformed status line".into()))?;
        let mut resp = Response::new(StatusCode(code));
        resp.headers = headers;
        resp.body = body.as_bytes().to_vec();
        Ok(Decoded::Response(resp))
    } else {
        let mut parts = start_line.splitn(3, ' ');
        let method = parts.next().ok_or_else(|| TransactionError::Transport("empty request".into()))?;
        let uri = parts.next().ok_or_else(|| TransactionError::Transport("missing request-uri".into()))?;
        let method = Method::parse(method)?;
        let request_uri = SipUri::parse(uri)?;
        let mut req = Request::new(method, request_uri);
        req.headers = headers;
        req.body = body.as_bytes().to_vec();
        req.source = Some(source);
        Ok(Decoded::Request(req))
    }
}

pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut out = format!("{} {} SIP/2.0\r\n", request.method, request.request_uri);
    for (name, value) in request.headers.iter() {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if request.headers.get("Content-Length").is_none() {
        out.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&request.body);
    bytes
}

pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut out = format!("SIP/2.0 {} {}\r\n", response.status.0, response.status.reason());
    for (name, value) in response.headers.iter() {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if response.headers.get("Content-Length").is_none() {
        out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&response.body);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn round_trips_a_request() {
        let uri = SipUri::parse("sip:101@pbx.example").unwrap();
        let mut req = Request::new(Method::Invite, uri);
        req.headers.push("Call-ID", "abc");
        req.headers.push("CSeq", "1 INVITE");
        let bytes = encode_request(&req);
        let source = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5060);
        match decode(&bytes, source).unwrap() {
            Decoded::Request(decoded) => {
                assert_eq!(decoded.method, Method::Invite);
                assert_eq!(decoded.call_id().unwrap(), "abc");
            }
            _ => panic!("expected request"),
        }
    }
}
