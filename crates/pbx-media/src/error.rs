use thiserror::Error;

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Error, Debug, Clone)]
pub enum MediaError {
    #[error("sdp error: {0}")]
    Sdp(#[from] pbx_sip::SipError),

    #[error("RTP port range exhausted")]
    PortsExhausted,

    #[error("no common audio codec between caller and callee offers")]
    CodecMismatch,

    #[error("transport error: {0}")]
    Transport(String),
}
