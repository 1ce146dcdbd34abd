//! SIP message, URI, header, digest and SDP types shared across the PBX
//! core. Deliberately minimal: this is not a general-purpose SIP stack
//! (see §1 Non-goals) but exactly the surface the B2BUA components touch.

pub mod digest;
pub mod error;
pub mod headers;
pub mod message;
pub mod method;
pub mod sdp;
pub mod status;
pub mod uri;

pub use error::{Result, SipError};
pub use headers::Headers;
pub use message::{Request, Response};
pub use method::Method;
pub use sdp::Sdp;
pub use status::StatusCode;
pub use uri::SipUri;
