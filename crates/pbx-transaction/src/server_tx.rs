use pbx_sip::Request;

use crate::key::TransactionKey;

/// A handle to an in-progress server transaction. Responses are sent
/// through `TransactionManager::send_response(tx.id(), ...)` rather than
/// through this handle directly, matching the dialog-core convention of
/// keeping the manager as the single point of wire access.
#[derive(Debug, Clone)]
pub struct ServerTransaction {
    id: TransactionKey,
    request: Request,
}

impl ServerTransaction {
    pub fn new(id: TransactionKey, request: Request) -> Self {
        Self { id, request }
    }

    pub fn id(&self) -> &TransactionKey {
        &self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}
