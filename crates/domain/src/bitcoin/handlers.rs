//! Message handlers for the bitcoin context.
//!
//! Deposits: an invoice is recorded, the user pays it on the Lightning
//! network, and `VerifyInvoice` turns the settled payment into an
//! accounting `Deposit`. Withdrawals: the invoice triggers a
//! `RequestWithdraw`; once accounting confirms, the service pays the
//! user's invoice and marks it paid, or marks it rejected if funds were
//! insufficient.

use std::sync::Arc;

use async_trait::async_trait;

use common::{IdempotencyKey, PaymentHash};
use dispatch::{
    CommandBody, CommandHandler, CommandKind, DispatchError, EventBody, EventHandler, EventKind,
    InvoiceType, Message, MessageBus, Metadata, Result, UnitOfWork,
};

use super::aggregate::{Invoice, InvoiceStatus};
use super::processor::LightningProcessor;
use super::store::invoice_repository;
use crate::error::DomainError;

/// Metadata key carrying the payment hash of the invoice behind a
/// withdrawal.
pub const PAYMENT_HASH_KEY: &str = "payment_hash";

/// Metadata key carrying the payment request to pay once a withdrawal is
/// confirmed.
pub const PAYMENT_REQUEST_KEY: &str = "payment_request";

fn payment_metadata(invoice: &Invoice) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        PAYMENT_HASH_KEY.to_string(),
        invoice.payment_hash().to_string(),
    );
    metadata.insert(
        PAYMENT_REQUEST_KEY.to_string(),
        invoice.payment_request().to_string(),
    );
    metadata
}

/// Handles the `CreateInvoice` command.
pub struct CreateInvoiceHandler;

#[async_trait]
impl CommandHandler for CreateInvoiceHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::CreateInvoice {
            account_id,
            payment_hash,
            payment_request,
            amount,
            invoice_type,
        } = command
        else {
            return Err(DispatchError::UnexpectedMessage("CreateInvoice"));
        };

        let mut repository = invoice_repository(uow);
        let invoice = match repository.find_by_hash(&payment_hash).await? {
            Some(invoice) => invoice,
            None => {
                repository
                    .add(Invoice::new(
                        payment_hash.clone(),
                        account_id,
                        amount,
                        payment_request,
                        invoice_type,
                    ))
                    .await?
            }
        };

        // Withdrawal invoices kick off the accounting leg, keyed by the
        // payment hash so redelivery cannot debit twice.
        if invoice.read().await.invoice_type() == InvoiceType::Withdrawal {
            let (account_id, amount, metadata) = {
                let invoice = invoice.read().await;
                (
                    invoice.account_id(),
                    invoice.amount(),
                    payment_metadata(&invoice),
                )
            };
            uow.emit(Message::command(CommandBody::RequestWithdraw {
                account_id,
                idempotency_key: IdempotencyKey::new(payment_hash.as_str()),
                amount,
                metadata,
            }));
        }

        Ok(())
    }
}

/// Handles the `VerifyInvoice` command.
///
/// An unpaid invoice is a transient failure: the caller (or the outbox)
/// retries until the payment settles. A settled invoice is marked paid
/// and credited to the account, keyed by the payment hash.
pub struct VerifyInvoiceHandler {
    processor: Arc<dyn LightningProcessor>,
}

impl VerifyInvoiceHandler {
    pub fn new(processor: Arc<dyn LightningProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl CommandHandler for VerifyInvoiceHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::VerifyInvoice { payment_hash } = command else {
            return Err(DispatchError::UnexpectedMessage("VerifyInvoice"));
        };

        if !self.processor.is_invoice_paid(&payment_hash).await? {
            return Err(DomainError::InvoiceUnpaid(payment_hash).into());
        }

        let invoice = invoice_repository(uow)
            .find_by_hash(&payment_hash)
            .await?
            .ok_or_else(|| DomainError::InvoiceNotFound(payment_hash.clone()))?;

        let (account_id, amount, metadata) = {
            let mut invoice = invoice.write().await;
            invoice.mark_paid().map_err(DispatchError::from)?;
            (
                invoice.account_id(),
                invoice.amount(),
                payment_metadata(&invoice),
            )
        };

        uow.emit(Message::command(CommandBody::Deposit {
            account_id,
            idempotency_key: IdempotencyKey::new(payment_hash.as_str()),
            amount,
            metadata,
        }));

        Ok(())
    }
}

fn payment_details(metadata: &Metadata) -> Option<(PaymentHash, &str)> {
    let hash = metadata.get(PAYMENT_HASH_KEY)?;
    let request = metadata.get(PAYMENT_REQUEST_KEY)?;
    Some((PaymentHash::new(hash.clone()), request))
}

/// Pays the user's invoice once accounting has debited the funds.
pub struct PayInvoiceOnWithdrawHandler {
    processor: Arc<dyn LightningProcessor>,
}

impl PayInvoiceOnWithdrawHandler {
    pub fn new(processor: Arc<dyn LightningProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl EventHandler for PayInvoiceOnWithdrawHandler {
    async fn handle(&self, uow: &mut UnitOfWork, event: EventBody) -> Result<()> {
        let EventBody::WithdrawSucceeded { metadata, .. } = event else {
            return Err(DispatchError::UnexpectedMessage("WithdrawSucceeded"));
        };

        // Withdrawals without payment details did not come from here.
        let Some((payment_hash, payment_request)) = payment_details(&metadata) else {
            return Ok(());
        };

        let invoice = invoice_repository(uow)
            .find_by_hash(&payment_hash)
            .await?
            .ok_or_else(|| DomainError::InvoiceNotFound(payment_hash.clone()))?;

        // Already paid means a redelivery; do not pay twice.
        if invoice.read().await.status() == InvoiceStatus::Paid {
            return Ok(());
        }

        self.processor.pay_invoice(payment_request).await?;
        invoice.write().await.mark_paid().map_err(DispatchError::from)?;
        tracing::info!(%payment_hash, "withdrawal invoice paid");

        Ok(())
    }
}

/// Marks the invoice rejected when accounting refused the withdrawal.
pub struct RejectInvoiceOnWithdrawHandler;

#[async_trait]
impl EventHandler for RejectInvoiceOnWithdrawHandler {
    async fn handle(&self, uow: &mut UnitOfWork, event: EventBody) -> Result<()> {
        let EventBody::WithdrawRejected { metadata, .. } = event else {
            return Err(DispatchError::UnexpectedMessage("WithdrawRejected"));
        };

        let Some((payment_hash, _)) = payment_details(&metadata) else {
            return Ok(());
        };

        let invoice = invoice_repository(uow)
            .find_by_hash(&payment_hash)
            .await?
            .ok_or_else(|| DomainError::InvoiceNotFound(payment_hash.clone()))?;

        invoice
            .write()
            .await
            .mark_rejected()
            .map_err(DispatchError::from)?;
        tracing::info!(%payment_hash, "withdrawal invoice rejected");

        Ok(())
    }
}

/// Registers every bitcoin handler on the bus.
pub fn register_bitcoin_handlers(bus: &mut MessageBus, processor: Arc<dyn LightningProcessor>) {
    bus.register_command_handler(CommandKind::CreateInvoice, Arc::new(CreateInvoiceHandler));
    bus.register_command_handler(
        CommandKind::VerifyInvoice,
        Arc::new(VerifyInvoiceHandler::new(Arc::clone(&processor))),
    );
    bus.register_event_handler(
        EventKind::WithdrawSucceeded,
        Arc::new(PayInvoiceOnWithdrawHandler::new(processor)),
    );
    bus.register_event_handler(
        EventKind::WithdrawRejected,
        Arc::new(RejectInvoiceOnWithdrawHandler),
    );
}
