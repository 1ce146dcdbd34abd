//! Preference-preserving audio codec negotiation (§4.8 step 2, §8).

use pbx_sip::Sdp;

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCodec {
    pub callee_payload_type: u8,
    pub codec_name: String,
}

/// Walk the caller's payload types in the caller's own preference order,
/// skipping `telephone-event`, and pick the first one the callee also
/// offers (by codec name, not payload-type number — PT numbers are only
/// locally significant). Fails if nothing in common.
pub fn negotiate(caller_sdp: &Sdp, callee_sdp: &Sdp) -> Result<NegotiatedCodec> {
    for caller_pt in caller_sdp.audio_payload_types() {
        let Some(name) = caller_sdp.rtpmap_name(caller_pt) else { continue };
        if name.eq_ignore_ascii_case("telephone-event") {
            continue;
        }
        if let Some(callee_pt) = callee_sdp.audio_payload_types().into_iter().find(|pt| {
            callee_sdp
                .rtpmap_name(*pt)
                .map(|n| n.eq_ignore_ascii_case(&name))
                .unwrap_or(false)
        }) {
            return Ok(NegotiatedCodec { callee_payload_type: callee_pt, codec_name: name });
        }
    }
    Err(MediaError::CodecMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_callers_first_listed_codec() {
        let caller = Sdp::parse(
            "v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 10000 RTP/AVP 8 0\r\na=rtpmap:8 PCMA/8000\r\na=rtpmap:0 PCMU/8000\r\n",
        )
        .unwrap();
        let callee = Sdp::parse(
            "v=0\r\nc=IN IP4 10.0.0.2\r\nm=audio 20000 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n",
        )
        .unwrap();
        let negotiated = negotiate(&caller, &callee).unwrap();
        assert_eq!(negotiated.codec_name, "PCMA");
        assert_eq!(negotiated.callee_payload_type, 8);
    }

    #[test]
    fn fails_without_a_common_codec() {
        let caller = Sdp::parse("v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 10000 RTP/AVP 0\r\n").unwrap();
        let callee = Sdp::parse(
            "v=0\r\nc=IN IP4 10.0.0.2\r\nm=audio 20000 RTP/AVP 9\r\na=rtpmap:9 G722/8000\r\n",
        )
        .unwrap();
        assert!(negotiate(&caller, &callee).is_err());
    }

    #[test]
    fn skips_telephone_event_as_a_media_choice() {
        let caller = Sdp::parse(
            "v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 10000 RTP/AVP 101 0\r\na=rtpmap:101 telephone-event/8000\r\na=rtpmap:0 PCMU/8000\r\n",
        )
        .unwrap();
        let callee = Sdp::parse("v=0\r\nc=IN IP4 10.0.0.2\r\nm=audio 20000 RTP/AVP 0\r\n").unwrap();
        let negotiated = negotiate(&caller, &callee).unwrap();
        assert_eq!(negotiated.codec_name, "PCMU");
    }
}
