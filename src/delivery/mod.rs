mod lifecycle;

use crate::email::SendReceipt;

pub use lifecycle::DeliveryLifecycle;

/// Result of handing a document to the email provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(SendReceipt),
    /// The provider rejected the message or could not be reached.
    Failed(String),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent(_))
    }
}
