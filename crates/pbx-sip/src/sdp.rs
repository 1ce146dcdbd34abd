//! Line-oriented SDP parsing and in-place rewriting.
//!
//! Per §9 design notes, rewriting the `c=` line and the first `m=audio`
//! port for the media bridge does not need a full SDP AST — just enough
//! structure to find those two lines and the `a=rtpmap` attributes that
//! belong to the audio media section. Audio-only, one audio media section,
//! matching §6's SDP compliance statement.

use crate::error::{Result, SipError};

/// Static RTP payload-type table for the two codecs this relay knows about
/// without an `a=rtpmap` line (RFC 3551 §6).
pub fn static_codec_name(pt: u8) -> Option<&'static str> {
    match pt {
        0 => Some("PCMU"),
        8 => Some("PCMA"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Sdp {
    lines: Vec<String>,
    audio_mline: usize,
    /// Index of the `c=` line that governs the audio section: the
    /// media-level one if present, else the session-level one.
    conn_line: usize,
}

impl Sdp {
    pub fn parse(body: &str) -> Result<Self> {
        let lines: Vec<String> = body.lines().map(|l| l.trim_end_matches('\r').to_string()).collect();

        let audio_mline = lines
            .iter()
            .position(|l| l.starts_with("m=audio "))
            .ok_or_else(|| SipError::Sdp("no m=audio line".into()))?;

        // next m= line (if any) bounds the audio media section
        let section_end = lines[audio_mline + 1..]
            .iter()
            .position(|l| l.starts_with("m="))
            .map(|i| audio_mline + 1 + i)
            .unwrap_or(lines.len());

        // prefer a media-level c= line inside the audio section, else the
        // session-level one that precedes the first m= line.
        let conn_line = lines[audio_mline..section_end]
            .iter()
            .position(|l| l.starts_with("c="))
            .map(|i| audio_mline + i)
            .or_else(|| lines[..audio_mline].iter().position(|l| l.starts_with("c=")))
            .ok_or_else(|| SipError::Sdp("no c= line".into()))?;

        Ok(Self { lines, audio_mline, conn_line })
    }

    /// Payload types listed on the `m=audio` line, in the order the offerer
    /// put them — codec negotiation preference order per §4.8/§8.
    pub fn audio_payload_types(&self) -> Vec<u8> {
        self.lines[self.audio_mline]
            .split_whitespace()
            .skip(3)
            .filter_map(|t| t.parse().ok())
            .collect()
    }

    pub fn audio_port(&self) -> Result<u16> {
        self.lines[self.audio_mline]
            .split_whitespace()
            .nth(1)
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| SipError::Sdp("malformed m=audio line".into()))
    }

    pub fn set_audio_port(&mut self, port: u16) {
        let mut tokens: Vec<String> =
            self.lines[self.audio_mline].split_whitespace().map(str::to_string).collect();
        if tokens.len() > 1 {
            tokens[1] = port.to_string();
        }
        self.lines[self.audio_mline] = tokens.join(" ");
    }

    pub fn connection_address(&self) -> Option<&str> {
        self.lines[self.conn_line].split_whitespace().nth(2)
    }

    pub fn set_connection_address(&mut self, addr: &str) {
        let net_type = self.lines[self.conn_line]
            .split_whitespace()
            .nth(1)
            .unwrap_or("IN")
            .to_string();
        self.lines[self.conn_line] = format!("c={} {} {}", "IN", net_type_token(&net_type), addr);
    }

    /// Codec name for a payload type: `a=rtpmap` if present in the audio
    /// section, else the static table (§4.8 step 2 / §6).
    pub fn rtpmap_name(&self, pt: u8) -> Option<String> {
        let section_end = self.lines[self.audio_mline + 1..]
            .iter()
            .position(|l| l.starts_with("m="))
            .map(|i| self.audio_mline + 1 + i)
            .unwrap_or(self.lines.len());

        let prefix = format!("a=rtpmap:{pt} ");
        let found = self.lines[self.audio_mline..section_end]
            .iter()
            .find(|l| l.starts_with(&prefix))
            .and_then(|l| l[prefix.len()..].split('/').next())
            .map(|s| s.to_ascii_uppercase());

        found.or_else(|| static_codec_name(pt).map(str::to_string))
    }

    /// The payload type (if any) this SDP's audio section uses for the
    /// `telephone-event` DTMF codec, by rtpmap name.
    pub fn telephone_event_pt(&self) -> Option<u8> {
        self.audio_payload_types().into_iter().find(|pt| {
            self.rtpmap_name(*pt).map(|n| n.eq_ignore_ascii_case("telephone-event")).unwrap_or(false)
        })
    }

    pub fn to_string_crlf(&self) -> String {
        let mut out = self.lines.join("\r\n");
        out.push_str("\r\n");
        out
    }
}

// The second token of a c= line is conventionally "IN" (network type);
// callers only ever pass "IN" today but this keeps the format explicit
// rather than hardcoding the whole line.
fn net_type_token(addr_type_hint: &str) -> &'static str {
    if addr_type_hint.eq_ignore_ascii_case("IN") { "IP4" } else { "IP4" }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 192.168.1.10\r\ns=-\r\nc=IN IP4 192.168.1.10\r\nt=0 0\r\nm=audio 30000 RTP/AVP 0 8 101\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\na=rtpmap:101 telephone-event/8000\r\n";

    #[test]
    fn parses_payload_types_in_order() {
        let sdp = Sdp::parse(OFFER).unwrap();
        assert_eq!(sdp.audio_payload_types(), vec![0, 8, 101]);
        assert_eq!(sdp.audio_port().unwrap(), 30000);
        assert_eq!(sdp.connection_address(), Some("192.168.1.10"));
        assert_eq!(sdp.telephone_event_pt(), Some(101));
    }

    #[test]
    fn rewrites_connection_and_port() {
        let mut sdp = Sdp::parse(OFFER).unwrap();
        sdp.set_connection_address("203.0.113.5");
        sdp.set_audio_port(40004);
        let rewritten = Sdp::parse(&sdp.to_string_crlf()).unwrap();
        assert_eq!(rewritten.connection_address(), Some("203.0.113.5"));
        assert_eq!(rewritten.audio_port().unwrap(), 40004);
    }

    #[test]
    fn falls_back_to_static_table_without_rtpmap() {
        let body = "v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 20000 RTP/AVP 0 8\r\n";
        let sdp = Sdp::parse(body).unwrap();
        assert_eq!(sdp.rtpmap_name(0).as_deref(), Some("PCMU"));
        assert_eq!(sdp.rtpmap_name(8).as_deref(), Some("PCMA"));
    }
}
