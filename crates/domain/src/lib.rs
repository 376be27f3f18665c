//! Bounded contexts for the funding backend.
//!
//! Each context owns its aggregates, storage adapter and message
//! handlers:
//! - `accounting` - accounts with idempotency-keyed deposit/withdrawal
//!   ledgers
//! - `crowdfunding` - campaigns collecting donations toward a goal
//! - `bitcoin` - Lightning invoices bridging the payment provider and
//!   the accounting context
//!
//! Contexts communicate only through commands and events on the bus.

pub mod accounting;
pub mod bitcoin;
pub mod crowdfunding;
pub mod error;

pub use accounting::{Account, LedgerEntry, register_accounting_handlers};
pub use bitcoin::{
    FakeLightningProcessor, Invoice, InvoiceData, InvoiceStatus, LightningError,
    LightningProcessor, register_bitcoin_handlers,
};
pub use crowdfunding::{Campaign, Donation, register_crowdfunding_handlers};
pub use error::DomainError;
