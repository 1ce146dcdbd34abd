use std::fmt;

use pbx_sip::{Method, Request};

/// Identifies a transaction: the top Via branch plus the method (CANCEL
/// and INVITE share a Call-ID/branch relationship but are always distinct
/// transactions per RFC 3261 §17).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
}

impl TransactionKey {
    pub fn for_request(request: &Request) -> Self {
        let branch = request
            .headers
            .get("Via")
            .and_then(|via| via.split(';').find_map(|p| p.trim().strip_prefix("branch=")))
            .map(str::to_string)
            .unwrap_or_else(new_branch);
        Self { branch, method: request.method }
    }

    pub fn new(method: Method) -> Self {
        Self { branch: new_branch(), method }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.branch, self.method)
    }
}

/// RFC 3261 §8.1.1.7 requires every branch to start with the magic cookie.
pub fn new_branch() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect();
    format!("z9hG4bK{suffix}")
}
