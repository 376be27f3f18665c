//! Storage adapter for the invoice aggregate.

use async_trait::async_trait;
use sqlx::Row;

use common::{AccountId, PaymentHash, Satoshis};
use dispatch::{InvoiceType, Persist, Result, Session, Tracked, UnitOfWork};

use super::aggregate::{Invoice, InvoiceStatus};
use crate::error::DomainError;

/// Invoices table schema, applied at startup.
pub const INVOICES_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS btc_invoices (
        payment_hash TEXT PRIMARY KEY,
        account_id UUID NOT NULL,
        payment_request TEXT NOT NULL,
        invoice_type TEXT NOT NULL,
        amount BIGINT NOT NULL,
        status TEXT NOT NULL
    );
"#;

const COLLECTION: &str = "btc_invoices";

fn invoice_type_as_str(invoice_type: InvoiceType) -> &'static str {
    match invoice_type {
        InvoiceType::Deposit => "DEPOSIT",
        InvoiceType::Withdrawal => "WITHDRAWAL",
    }
}

fn invoice_type_parse(raw: &str) -> Option<InvoiceType> {
    match raw {
        "DEPOSIT" => Some(InvoiceType::Deposit),
        "WITHDRAWAL" => Some(InvoiceType::Withdrawal),
        _ => None,
    }
}

/// Repository over the invoices of the current unit of work.
pub struct InvoiceRepository<'a> {
    uow: &'a mut UnitOfWork,
}

/// Creates a repository bound to the given unit of work.
pub fn invoice_repository(uow: &mut UnitOfWork) -> InvoiceRepository<'_> {
    InvoiceRepository { uow }
}

impl InvoiceRepository<'_> {
    /// Loads an invoice and registers it for persistence at commit time.
    pub async fn find_by_hash(
        &mut self,
        payment_hash: &PaymentHash,
    ) -> Result<Option<Tracked<Invoice>>> {
        let loaded = match self.uow.session() {
            Session::Postgres(txn) => {
                let row = sqlx::query(
                    r#"
                    SELECT account_id, payment_request, invoice_type, amount, status
                    FROM btc_invoices
                    WHERE payment_hash = $1
                    "#,
                )
                .bind(payment_hash.as_str())
                .fetch_optional(&mut **txn)
                .await?;

                match row {
                    Some(row) => {
                        let raw_status: String = row.try_get("status")?;
                        let status = InvoiceStatus::parse(&raw_status).ok_or_else(|| {
                            DomainError::InvalidRecord(format!("invoice status {raw_status:?}"))
                        })?;
                        let raw_type: String = row.try_get("invoice_type")?;
                        let invoice_type = invoice_type_parse(&raw_type).ok_or_else(|| {
                            DomainError::InvalidRecord(format!("invoice type {raw_type:?}"))
                        })?;

                        Some(Invoice::from_parts(
                            payment_hash.clone(),
                            AccountId::from_uuid(row.try_get("account_id")?),
                            Satoshis::new(row.try_get("amount")?),
                            row.try_get("payment_request")?,
                            status,
                            invoice_type,
                        ))
                    }
                    None => None,
                }
            }
            Session::Memory(session) => session
                .get(COLLECTION, payment_hash.as_str())
                .await
                .map(serde_json::from_value)
                .transpose()?,
        };

        Ok(loaded.map(|invoice| self.track(invoice)))
    }

    /// Inserts a new invoice and registers it for persistence at commit
    /// time.
    pub async fn add(&mut self, invoice: Invoice) -> Result<Tracked<Invoice>> {
        match self.uow.session() {
            Session::Postgres(txn) => {
                sqlx::query(
                    r#"
                    INSERT INTO btc_invoices
                        (payment_hash, account_id, payment_request, invoice_type, amount, status)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(invoice.payment_hash().as_str())
                .bind(invoice.account_id().as_uuid())
                .bind(invoice.payment_request())
                .bind(invoice_type_as_str(invoice.invoice_type()))
                .bind(invoice.amount().sats())
                .bind(invoice.status().as_str())
                .execute(&mut **txn)
                .await?;
            }
            Session::Memory(session) => {
                let document = serde_json::to_value(&invoice)?;
                session.put(COLLECTION, invoice.payment_hash().as_str(), document);
            }
        }

        Ok(self.track(invoice))
    }

    fn track(&mut self, invoice: Invoice) -> Tracked<Invoice> {
        let tracked = Tracked::new(invoice);
        self.uow.track(Box::new(InvoiceWriter {
            invoice: tracked.clone(),
        }));
        tracked
    }
}

struct InvoiceWriter {
    invoice: Tracked<Invoice>,
}

#[async_trait]
impl Persist for InvoiceWriter {
    async fn persist(&self, session: &mut Session) -> Result<()> {
        let invoice = self.invoice.read().await;
        match session {
            Session::Postgres(txn) => {
                sqlx::query(
                    r#"
                    UPDATE btc_invoices
                    SET status = $2
                    WHERE payment_hash = $1
                    "#,
                )
                .bind(invoice.payment_hash().as_str())
                .bind(invoice.status().as_str())
                .execute(&mut **txn)
                .await?;
            }
            Session::Memory(memory) => {
                let document = serde_json::to_value(&*invoice)?;
                memory.put(COLLECTION, invoice.payment_hash().as_str(), document);
            }
        }
        Ok(())
    }
}
