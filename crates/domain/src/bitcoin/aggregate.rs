//! The Lightning invoice aggregate.

use serde::{Deserialize, Serialize};

use common::{AccountId, PaymentHash, Satoshis};
use dispatch::InvoiceType;

use crate::error::DomainError;

/// Lifecycle of an invoice. Paid and Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Rejected,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Rejected => "REJECTED",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(InvoiceStatus::Pending),
            "PAID" => Some(InvoiceStatus::Paid),
            "REJECTED" => Some(InvoiceStatus::Rejected),
            _ => None,
        }
    }
}

/// A Lightning invoice tied to an account.
///
/// Identified by its payment hash. Status transitions are idempotent:
/// marking an invoice with its current terminal status is a no-op, while
/// crossing from one terminal status to the other is a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    payment_hash: PaymentHash,
    account_id: AccountId,
    amount: Satoshis,
    payment_request: String,
    status: InvoiceStatus,
    invoice_type: InvoiceType,
}

impl Invoice {
    /// Creates a pending invoice.
    pub fn new(
        payment_hash: PaymentHash,
        account_id: AccountId,
        amount: Satoshis,
        payment_request: impl Into<String>,
        invoice_type: InvoiceType,
    ) -> Self {
        Self {
            payment_hash,
            account_id,
            amount,
            payment_request: payment_request.into(),
            status: InvoiceStatus::Pending,
            invoice_type,
        }
    }

    pub(crate) fn from_parts(
        payment_hash: PaymentHash,
        account_id: AccountId,
        amount: Satoshis,
        payment_request: String,
        status: InvoiceStatus,
        invoice_type: InvoiceType,
    ) -> Self {
        Self {
            payment_hash,
            account_id,
            amount,
            payment_request,
            status,
            invoice_type,
        }
    }

    pub fn payment_hash(&self) -> &PaymentHash {
        &self.payment_hash
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn amount(&self) -> Satoshis {
        self.amount
    }

    pub fn payment_request(&self) -> &str {
        &self.payment_request
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn invoice_type(&self) -> InvoiceType {
        self.invoice_type
    }

    /// Marks the invoice paid. No-op if already paid.
    pub fn mark_paid(&mut self) -> Result<(), DomainError> {
        self.transition(InvoiceStatus::Paid)
    }

    /// Marks the invoice rejected. No-op if already rejected.
    pub fn mark_rejected(&mut self) -> Result<(), DomainError> {
        self.transition(InvoiceStatus::Rejected)
    }

    fn transition(&mut self, target: InvoiceStatus) -> Result<(), DomainError> {
        if self.status == target {
            return Ok(());
        }
        if self.status != InvoiceStatus::Pending {
            return Err(DomainError::InvoiceStatusConflict {
                payment_hash: self.payment_hash.clone(),
                status: self.status.as_str(),
            });
        }
        self.status = target;
        Ok(())
    }
}
