pub mod backoff;
pub mod error;
pub mod registrar;
pub mod types;

pub use backoff::BackoffState;
pub use error::{Result, TrunkError};
pub use registrar::{build_authorization, parse_challenge, TrunkRegistrar, TrunkRegistrarHandle};
pub use types::{apply_prefix_rules, Trunk, TrunkCredentials, TrunkRuntimeState, TrunkStatus, TrunkType, Transport as TrunkTransport};
