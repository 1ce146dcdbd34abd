mod bridge;
mod codec;
mod error;
mod ports;
mod relay;

pub use bridge::{MediaBridge, MediaSession};
pub use codec::NegotiatedCodec;
pub use error::{MediaError, Result};
pub use ports::PortAllocator;
