//! §7 error kinds, unified across every component, each mapped to a
//! concrete SIP status via `status_code()` — the §4.11/§7 tables become
//! executable code instead of documentation only.

use thiserror::Error;

use pbx_sip::StatusCode;

pub type Result<T> = std::result::Result<T, PbxError>;

#[derive(Error, Debug, Clone)]
pub enum PbxError {
    #[error("source blocked by brute-force guard")]
    AuthBlocked,

    #[error("unparseable Authorization header")]
    AuthBadRequest,

    #[error("missing or stale nonce, or digest mismatch")]
    AuthChallenge,

    #[error("no enabled trunks available")]
    NoTrunksAvailable,

    #[error("callee-level failure: {0} {1}")]
    CalleeFailure(u16, String),

    #[error("trunk-level failure, eligible for failover: {0}")]
    TrunkFailure(String),

    #[error("every fork leg returned busy")]
    ForkAllBusy,

    #[error("fork timed out or every leg failed with no busy")]
    ForkNoAnswer,

    #[error("media allocation failed: {0}")]
    MediaAllocFail(String),

    #[error("no common audio codec")]
    CodecMismatch,

    #[error("CANCEL arrived during fork")]
    CallCancelled,

    #[error("no dialog or pending call for this Call-ID")]
    UnknownDialog,

    #[error("push gateway delivery failed: {0}")]
    PushFail(String),

    #[error("extension or trunk has DND enabled or is at capacity")]
    Busy,

    #[error("sip error: {0}")]
    Sip(#[from] pbx_sip::SipError),

    #[error("transaction error: {0}")]
    Transaction(#[from] pbx_transaction::TransactionError),

    #[error("media error: {0}")]
    Media(#[from] pbx_media::MediaError),

    #[error("trunk error: {0}")]
    Trunk(#[from] pbx_trunk::TrunkError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(String),
}

impl PbxError {
    /// Maps every error kind to the status code the caller's server
    /// transaction should receive (§7). `CalleeFailure`/`TrunkFailure`
    /// carry their own mapping via `map_trunk_failure` (§4.11) rather
    /// than this generic table, since that mapping depends on which
    /// specific status the trunk returned.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PbxError::AuthBlocked => StatusCode::FORBIDDEN,
            PbxError::AuthBadRequest => StatusCode::BAD_REQUEST,
            PbxError::AuthChallenge => StatusCode::UNAUTHORIZED,
            PbxError::NoTrunksAvailable => StatusCode::SERVICE_UNAVAILABLE,
            PbxError::CalleeFailure(code, _) => StatusCode(*code),
            PbxError::TrunkFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            PbxError::ForkAllBusy => StatusCode::BUSY_HERE,
            PbxError::ForkNoAnswer => StatusCode::TEMPORARILY_UNAVAILABLE,
            PbxError::MediaAllocFail(_) => StatusCode::SERVER_INTERNAL_ERROR,
            PbxError::CodecMismatch => StatusCode::NOT_ACCEPTABLE_HERE,
            PbxError::CallCancelled => StatusCode::REQUEST_TERMINATED,
            PbxError::UnknownDialog => StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
            PbxError::PushFail(_) => StatusCode::TEMPORARILY_UNAVAILABLE,
            PbxError::Busy => StatusCode::BUSY_HERE,
            PbxError::Sip(_) | PbxError::Transaction(_) | PbxError::Internal(_) => {
                StatusCode::SERVER_INTERNAL_ERROR
            }
            PbxError::Media(_) => StatusCode::SERVER_INTERNAL_ERROR,
            PbxError::Trunk(_) => StatusCode::SERVICE_UNAVAILABLE,
            PbxError::Database(_) => StatusCode::SERVER_INTERNAL_ERROR,
        }
    }
}

/// Status a phase-2 media completion failure maps to once the callee leg has
/// already answered (§7): a codec mismatch is the caller's fault for
/// offering nothing the callee accepts, everything else is a local failure.
pub fn map_media_completion_failure(error: &pbx_media::MediaError) -> StatusCode {
    match error {
        pbx_media::MediaError::CodecMismatch => StatusCode::NOT_ACCEPTABLE_HERE,
        _ => StatusCode::SERVER_INTERNAL_ERROR,
    }
}

/// Whether a trunk response status is a callee-level failure (§4.11):
/// these never trigger failover to another trunk.
pub fn is_callee_level_failure(status: u16) -> bool {
    matches!(status, 404 | 480 | 486 | 487 | 488 | 600 | 603)
}

/// `mapTrunkFailure(status, reason)` (§4.11): the status/reason returned
/// to the caller once all trunks are exhausted or a callee-level failure
/// is seen.
pub fn map_trunk_failure(status: u16) -> StatusCode {
    match status {
        403 => StatusCode::FORBIDDEN,
        404 => StatusCode::NOT_FOUND,
        480 => StatusCode::TEMPORARILY_UNAVAILABLE,
        486 | 600 => StatusCode::BUSY_HERE,
        487 => StatusCode::REQUEST_TERMINATED,
        488 => StatusCode::NOT_ACCEPTABLE_HERE,
        503 => StatusCode::SERVICE_UNAVAILABLE,
        400..=499 => StatusCode::SERVICE_UNAVAILABLE,
        500..=599 => StatusCode::BAD_GATEWAY,
        // transport error or any other unmapped case (§4.11's "transport
        // / otherwise | 502 / 503"): transport failures are distinguished
        // from a generic unknown by the caller passing 0 here.
        0 => StatusCode::BAD_GATEWAY,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_busy_and_decline_to_busy_here() {
        assert_eq!(map_trunk_failure(486).0, 486);
        assert_eq!(map_trunk_failure(600).0, 486);
    }

    #[test]
    fn maps_other_4xx_to_service_unavailable() {
        assert_eq!(map_trunk_failure(410).0, 503);
    }

    #[test]
    fn maps_5xx_to_bad_gateway() {
        assert_eq!(map_trunk_failure(502).0, 502);
    }

    #[test]
    fn callee_level_failures_exclude_503_and_5xx() {
        assert!(is_callee_level_failure(486));
        assert!(is_callee_level_failure(603));
        assert!(!is_callee_level_failure(503));
        assert!(!is_callee_level_failure(500));
    }
}
