use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransactionError>;

#[derive(Error, Debug, Clone)]
pub enum TransactionError {
    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("sip error: {0}")]
    Sip(#[from] pbx_sip::SipError),

    #[error("transaction timed out")]
    Timeout,
}
