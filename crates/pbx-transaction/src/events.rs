use pbx_sip::Response;

/// Events delivered to the owner of a client transaction.
#[derive(Debug, Clone)]
pub enum ClientTransactionEvent {
    Provisional(Response),
    Final(Response),
    /// The destination was unreachable or the send failed outright —
    /// collected by the Forker/outbound-INVITE logic as a failed leg.
    TransportError(String),
    Timeout,
}

/// A freshly arrived request the transaction layer has no existing
/// context for — handed to the PBX core's method dispatcher, which
/// creates its own server transaction once it decides how to handle it.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub request: pbx_sip::Request,
}
