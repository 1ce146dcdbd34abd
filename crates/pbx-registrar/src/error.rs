use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistrarError>;

#[derive(Error, Debug, Clone)]
pub enum RegistrarError {
    #[error("source blocked by brute-force guard")]
    AuthBlocked,

    #[error("malformed Authorization header: {0}")]
    AuthBadRequest(String),

    #[error("missing or stale nonce, or digest mismatch")]
    AuthChallenge,

    #[error("extension not found: {0}")]
    UnknownExtension(String),

    #[error("max_registrations reached for extension {0}")]
    RegistrationLimitReached(String),

    #[error("request missing required header: {0}")]
    MissingHeader(String),

    #[error("sip error: {0}")]
    Sip(#[from] pbx_sip::SipError),

    #[error("transaction error: {0}")]
    Transaction(#[from] pbx_transaction::TransactionError),
}
