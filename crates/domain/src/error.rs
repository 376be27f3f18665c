//! Domain error types.

use thiserror::Error;

use common::{AccountId, CampaignId, PaymentHash, Satoshis};
use dispatch::DispatchError;

/// Errors raised by aggregates and handlers across the bounded contexts.
///
/// Rule violations (insufficient funds, goal reached, self-donation) are
/// expected outcomes: handlers catch them and emit rejection events. The
/// not-found variants surface when a message references state that does
/// not exist yet; they bubble out as handler failures and heal on
/// redelivery once the missing aggregate has been created.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A withdrawal exceeds the available balance.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Satoshis,
        available: Satoshis,
    },

    /// The campaign goal was already reached.
    #[error("campaign goal already reached")]
    GoalReached,

    /// A campaign owner tried to donate to their own campaign.
    #[error("cannot donate to your own campaign")]
    SelfDonation,

    /// A transfer names the same account on both sides.
    #[error("cannot transfer from an account to itself")]
    SelfTransfer,

    /// No account with the given ID exists.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// No campaign with the given ID exists.
    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    /// No invoice with the given payment hash exists.
    #[error("invoice not found: {0}")]
    InvoiceNotFound(PaymentHash),

    /// The payment provider has not seen a payment for this invoice yet.
    #[error("invoice not paid yet: {0}")]
    InvoiceUnpaid(PaymentHash),

    /// An invoice was asked to leave a terminal status.
    #[error("invoice {payment_hash} is {status} and cannot transition")]
    InvoiceStatusConflict {
        payment_hash: PaymentHash,
        status: &'static str,
    },

    /// A stored row contained a value the domain cannot interpret.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
}

impl From<DomainError> for DispatchError {
    fn from(error: DomainError) -> Self {
        DispatchError::handler(error)
    }
}
