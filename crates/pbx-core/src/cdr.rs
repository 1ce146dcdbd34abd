//! Call Detail Record (§3): updated at start, on answer, and at teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    Answered,
    NoAnswer,
    Busy,
    Cancelled,
    Failed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Answered => "answered",
            Disposition::NoAnswer => "no_answer",
            Disposition::Busy => "busy",
            Disposition::Cancelled => "cancelled",
            Disposition::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cdr {
    pub call_id: String,
    pub direction: String,
    pub trunk_id: u64,
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub called_number: String,
    pub start_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub hangup_cause: Option<String>,
    pub disposition: Option<Disposition>,
    pub recording_path: Option<String>,
    pub flow_path: Vec<String>,
}

impl Cdr {
    pub fn new(call_id: impl Into<String>, direction: impl Into<String>, trunk_id: u64) -> Self {
        Self {
            call_id: call_id.into(),
            direction: direction.into(),
            trunk_id,
            caller_id_name: String::new(),
            caller_id_number: String::new(),
            called_number: String::new(),
            start_time: Utc::now(),
            answer_time: None,
            end_time: None,
            hangup_cause: None,
            disposition: None,
            recording_path: None,
            flow_path: Vec::new(),
        }
    }

    pub fn mark_answered(&mut self) {
        self.answer_time = Some(Utc::now());
    }

    /// Finalize at teardown. `duration` is end−start; `billable` is
    /// end−answer when answered, else zero (§3 CDR invariant).
    pub fn finalize(&mut self, disposition: Disposition, hangup_cause: impl Into<String>) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.disposition = Some(disposition);
        self.hangup_cause = Some(hangup_cause.into());
    }

    pub fn duration(&self) -> chrono::Duration {
        match self.end_time {
            Some(end) => end - self.start_time,
            None => Utc::now() - self.start_time,
        }
    }

    pub fn billable_duration(&self) -> chrono::Duration {
        match (self.answer_time, self.end_time) {
            (Some(answer), Some(end)) => end - answer,
            _ => chrono::Duration::zero(),
        }
    }
}

/// Call-ID-keyed in-flight CDR registry. `take_finalized` hands the row to
/// whoever persists it (`database::insert_cdr`) and drops it from memory.
pub struct CdrStore {
    cdrs: dashmap::DashMap<String, Cdr>,
}

impl CdrStore {
    pub fn new() -> Self {
        Self { cdrs: dashmap::DashMap::new() }
    }

    pub fn start(&self, cdr: Cdr) {
        self.cdrs.insert(cdr.call_id.clone(), cdr);
    }

    pub fn with_mut<R>(&self, call_id: &str, f: impl FnOnce(&mut Cdr) -> R) -> Option<R> {
        self.cdrs.get_mut(call_id).map(|mut entry| f(entry.value_mut()))
    }

    pub fn take_finalized(&self, call_id: &str) -> Option<Cdr> {
        self.cdrs.remove(call_id).map(|(_, cdr)| cdr)
    }
}

impl Default for CdrStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanswered_call_has_zero_billable_duration() {
        let mut cdr = Cdr::new("call-1", "internal", 0);
        cdr.finalize(Disposition::Busy, "callee_busy");
        assert_eq!(cdr.billable_duration(), chrono::Duration::zero());
    }

    #[test]
    fn answered_call_measures_from_answer_to_end() {
        let mut cdr = Cdr::new("call-2", "internal", 0);
        cdr.mark_answered();
        std::thread::sleep(std::time::Duration::from_millis(5));
        cdr.finalize(Disposition::Answered, "normal_clearing");
        assert!(cdr.billable_duration() >= chrono::Duration::zero());
        assert!(cdr.duration() >= cdr.billable_duration());
    }

    #[test]
    fn store_round_trips_and_finalize_is_visible_before_take() {
        let store = CdrStore::new();
        store.start(Cdr::new("call-3", "internal", 0));
        store.with_mut("call-3", |cdr| cdr.mark_answered());
        store.with_mut("call-3", |cdr| cdr.finalize(Disposition::Answered, "normal_clearing"));
        let cdr = store.take_finalized("call-3").unwrap();
        assert_eq!(cdr.disposition, Some(Disposition::Answered));
        assert!(store.take_finalized("call-3").is_none());
    }
}
