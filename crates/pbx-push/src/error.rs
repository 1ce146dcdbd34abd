use thiserror::Error;

pub type Result<T> = std::result::Result<T, PushError>;

#[derive(Error, Debug, Clone)]
pub enum PushError {
    #[error("rate limited")]
    RateLimited,

    #[error("push gateway rejected the request: {0}")]
    GatewayClientError(String),

    #[error("push gateway delivery failure: {0}")]
    GatewayServerError(String),

    #[error("push gateway not configured")]
    NotConfigured,

    #[error("http transport error: {0}")]
    Transport(String),

    #[error("APNs JWT error: {0}")]
    Jwt(String),
}
