//! FCM leg (§6): a high-priority, data-only message with a 30s TTL. As
//! with `apns.rs`, this documents what the external push gateway is
//! contractually expected to send — the PBX core's own call path only
//! ever POSTs to `/v1/push`.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FcmMessage {
    pub to: String,
    pub priority: &'static str,
    pub time_to_live: u32,
    pub data: FcmData,
}

#[derive(Debug, Clone, Serialize)]
pub struct FcmData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub call_id: String,
    pub caller_id: String,
}

pub fn incoming_call_message(token: &str, call_id: &str, caller_id: &str) -> FcmMessage {
    FcmMessage {
        to: token.to_string(),
        priority: "high",
        time_to_live: 30,
        data: FcmData { kind: "incoming_call", call_id: call_id.to_string(), caller_id: caller_id.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_data_only_high_priority_message() {
        let msg = incoming_call_message("tok-1", "call-1", "+15551234567");
        assert_eq!(msg.priority, "high");
        assert_eq!(msg.time_to_live, 30);
        assert_eq!(msg.data.kind, "incoming_call");
    }
}
