//! A minimal UAS/UAC SIP transaction layer, standing in for the
//! transaction-layer library §1's Non-goals assume is available: server
//! and client transactions, raw out-of-transaction writes, and a UDP
//! transport.

pub mod codec;
pub mod error;
pub mod events;
pub mod key;
pub mod manager;
pub mod server_tx;
pub mod transport;

pub use error::{Result, TransactionError};
pub use events::{ClientTransactionEvent, IncomingRequest};
pub use key::TransactionKey;
pub use manager::{response_builders, TransactionManager};
pub use server_tx::ServerTransaction;
pub use transport::{Transport, UdpTransport};
