//! Lightning payment-provider port and its in-memory fake.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use common::{PaymentHash, Satoshis};
use dispatch::DispatchError;

/// An invoice issued by the Lightning node.
#[derive(Debug, Clone)]
pub struct InvoiceData {
    pub payment_hash: PaymentHash,
    pub payment_request: String,
}

/// Error from the payment provider.
#[derive(Debug, Error)]
#[error("lightning processor error: {0}")]
pub struct LightningError(String);

impl LightningError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<LightningError> for DispatchError {
    fn from(error: LightningError) -> Self {
        DispatchError::handler(error)
    }
}

/// Operations the bitcoin context needs from a Lightning node.
///
/// The production implementation is an HTTP adapter in the service crate;
/// tests use [`FakeLightningProcessor`].
#[async_trait]
pub trait LightningProcessor: Send + Sync {
    /// Asks the node to issue an invoice for the given amount.
    async fn create_invoice(&self, satoshis: Satoshis) -> Result<InvoiceData, LightningError>;

    /// Whether a payment for the invoice has settled on the network.
    async fn is_invoice_paid(&self, payment_hash: &PaymentHash) -> Result<bool, LightningError>;

    /// Pays someone else's invoice from the service wallet.
    async fn pay_invoice(&self, payment_request: &str) -> Result<(), LightningError>;
}

#[derive(Debug, Default)]
struct FakeState {
    paid_hashes: HashSet<PaymentHash>,
    paid_requests: Vec<String>,
    fail_payments: bool,
}

/// In-memory Lightning processor for tests.
#[derive(Debug, Clone, Default)]
pub struct FakeLightningProcessor {
    state: Arc<RwLock<FakeState>>,
}

impl FakeLightningProcessor {
    /// Creates a new fake with no settled invoices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an invoice as settled, so `is_invoice_paid` reports true.
    pub fn settle_invoice(&self, payment_hash: &PaymentHash) {
        self.state
            .write()
            .unwrap()
            .paid_hashes
            .insert(payment_hash.clone());
    }

    /// Configures outgoing payments to fail.
    pub fn set_fail_payments(&self, fail: bool) {
        self.state.write().unwrap().fail_payments = fail;
    }

    /// The payment requests paid through this fake, in order.
    pub fn paid_requests(&self) -> Vec<String> {
        self.state.read().unwrap().paid_requests.clone()
    }
}

#[async_trait]
impl LightningProcessor for FakeLightningProcessor {
    async fn create_invoice(&self, _satoshis: Satoshis) -> Result<InvoiceData, LightningError> {
        let hash = Uuid::new_v4().simple().to_string();
        Ok(InvoiceData {
            payment_request: format!("lnbc-fake-{hash}"),
            payment_hash: PaymentHash::new(hash),
        })
    }

    async fn is_invoice_paid(&self, payment_hash: &PaymentHash) -> Result<bool, LightningError> {
        Ok(self.state.read().unwrap().paid_hashes.contains(payment_hash))
    }

    async fn pay_invoice(&self, payment_request: &str) -> Result<(), LightningError> {
        let mut state = self.state.write().unwrap();
        if state.fail_payments {
            return Err(LightningError::new("payment channel unavailable"));
        }
        state.paid_requests.push(payment_request.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settled_invoices_report_paid() {
        let fake = FakeLightningProcessor::new();
        let hash = PaymentHash::new("h1");

        assert!(!fake.is_invoice_paid(&hash).await.unwrap());
        fake.settle_invoice(&hash);
        assert!(fake.is_invoice_paid(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn payments_are_recorded_in_order() {
        let fake = FakeLightningProcessor::new();
        fake.pay_invoice("lnbc1").await.unwrap();
        fake.pay_invoice("lnbc2").await.unwrap();
        assert_eq!(fake.paid_requests(), vec!["lnbc1", "lnbc2"]);
    }

    #[tokio::test]
    async fn failing_mode_rejects_payments() {
        let fake = FakeLightningProcessor::new();
        fake.set_fail_payments(true);
        assert!(fake.pay_invoice("lnbc1").await.is_err());
        assert!(fake.paid_requests().is_empty());
    }
}
