//! Dialog Manager (C9, part 2): answered calls, keyed by Call-ID.
//! Mutually exclusive with PendingCallManager on the same key (§4.9).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use pbx_media::MediaSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Internal,
    Inbound,
    Outbound,
}

/// One leg of an answered call.
#[derive(Debug, Clone, Default)]
pub struct DialogLeg {
    pub extension_id: Option<u64>,
    pub registration_id: Option<u64>,
    pub contact_uri: String,
    /// The tag the PBX's own side of this leg's dialog uses in From/To when
    /// it originates an in-dialog request (BYE) toward this party.
    pub from_tag: String,
    /// This leg's own tag, used as the To-tag on a request the PBX sends it.
    pub to_tag: String,
    /// The remote target URI this leg's in-dialog requests go to.
    pub remote_target: String,
    /// The bare AOR URI (no tag) the PBX presents as its own identity on
    /// this leg — the original caller's From-URI for a forwarded leg, or
    /// the trunk caller-ID AOR for a freshly built one (§4.12).
    pub local_identity: String,
}

pub struct Dialog {
    pub call_id: String,
    pub direction: Direction,
    pub trunk_id: u64,
    pub caller: DialogLeg,
    pub callee: DialogLeg,
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub called_number: String,
    pub start_time: DateTime<Utc>,
    pub answer_time: DateTime<Utc>,
    pub media: Arc<MediaSession>,
}

pub struct DialogManager {
    dialogs: DashMap<String, Dialog>,
}

impl DialogManager {
    pub fn new() -> Self {
        Self { dialogs: DashMap::new() }
    }

    pub fn insert(&self, dialog: Dialog) {
        self.dialogs.insert(dialog.call_id.clone(), dialog);
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.dialogs.contains_key(call_id)
    }

    pub fn remove(&self, call_id: &str) -> Option<Dialog> {
        self.dialogs.remove(call_id).map(|(_, d)| d)
    }

    pub fn with_dialog<R>(&self, call_id: &str, f: impl FnOnce(&Dialog) -> R) -> Option<R> {
        self.dialogs.get(call_id).map(|entry| f(entry.value()))
    }

    /// Active dialogs where either leg references `trunk_id` (§4.9, used
    /// by §4.11 step 1 to enforce `max_channels`).
    pub fn active_call_count_for_trunk(&self, trunk_id: u64) -> usize {
        self.dialogs.iter().filter(|e| e.value().trunk_id == trunk_id).count()
    }

    /// Active dialogs where either leg references `extension_id`.
    pub fn active_call_count_for_extension(&self, extension_id: u64) -> usize {
        self.dialogs
            .iter()
            .filter(|e| {
                e.value().caller.extension_id == Some(extension_id)
                    || e.value().callee.extension_id == Some(extension_id)
            })
            .count()
    }
}

impl Default for DialogManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbx_media::MediaBridge;

    async fn test_media() -> Arc<MediaSession> {
        let bridge = MediaBridge::new("127.0.0.1".parse().unwrap(), 31000, 31010);
        let (session, _offer) = bridge
            .allocate("v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 10000 RTP/AVP 0\r\n", "call-1")
            .await
            .unwrap();
        Arc::new(session)
    }

    #[tokio::test]
    async fn pending_and_dialog_are_mutually_exclusive_by_call_id() {
        let manager = DialogManager::new();
        let dialog = Dialog {
            call_id: "call-1".into(),
            direction: Direction::Internal,
            trunk_id: 0,
            caller: DialogLeg { extension_id: Some(1), ..Default::default() },
            callee: DialogLeg { extension_id: Some(2), ..Default::default() },
            caller_id_name: String::new(),
            caller_id_number: String::new(),
            called_number: "102".into(),
            start_time: Utc::now(),
            answer_time: Utc::now(),
            media: test_media().await,
        };
        manager.insert(dialog);
        assert_eq!(manager.active_call_count_for_extension(1), 1);
        assert_eq!(manager.active_call_count_for_extension(2), 1);
        assert_eq!(manager.active_call_count_for_extension(3), 0);
        assert!(manager.remove("call-1").is_some());
        assert!(!manager.contains("call-1"));
    }
}
