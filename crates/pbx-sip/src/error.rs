use thiserror::Error;

/// A type alias for `Result`s produced while parsing or building SIP messages.
pub type Result<T> = std::result::Result<T, SipError>;

#[derive(Error, Debug, Clone)]
pub enum SipError {
    #[error("invalid SIP method: {0}")]
    InvalidMethod(String),

    #[error("invalid SIP URI: {0}")]
    InvalidUri(String),

    #[error("invalid SIP message: {0}")]
    InvalidMessage(String),

    #[error("missing required header: {0}")]
    MissingHeader(String),

    #[error("invalid header value for {header}: {value}")]
    InvalidHeader { header: String, value: String },

    #[error("SDP error: {0}")]
    Sdp(String),

    #[error("digest auth error: {0}")]
    Digest(String),
}
