use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrunkError>;

#[derive(Error, Debug, Clone)]
pub enum TrunkError {
    #[error("no enabled trunks available")]
    NoTrunksAvailable,

    #[error("trunk transport error: {0}")]
    Transport(String),

    #[error("sip error: {0}")]
    Sip(#[from] pbx_sip::SipError),

    #[error("transaction error: {0}")]
    Transaction(#[from] pbx_transaction::TransactionError),

    #[error("trunk password could not be decrypted")]
    CredentialsUnavailable,
}
