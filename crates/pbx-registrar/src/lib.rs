pub mod brute_force;
pub mod digest_auth;
pub mod error;
pub mod ip_auth;
pub mod notifier;
pub mod registrar;
pub mod types;

pub use brute_force::BruteForceGuard;
pub use digest_auth::{DigestAuthenticator, ExtensionLookup};
pub use error::{RegistrarError, Result};
pub use ip_auth::IpAuthMatcher;
pub use notifier::{RegistrationNotifier, SubscriptionHandle};
pub use registrar::Registrar;
