//! Bitcoin context: Lightning invoices bridging the payment provider and
//! the accounting context.

pub mod aggregate;
pub mod handlers;
pub mod processor;
pub mod store;

pub use aggregate::{Invoice, InvoiceStatus};
pub use handlers::{PAYMENT_HASH_KEY, PAYMENT_REQUEST_KEY, register_bitcoin_handlers};
pub use processor::{FakeLightningProcessor, InvoiceData, LightningError, LightningProcessor};
pub use store::{INVOICES_DDL, InvoiceRepository, invoice_repository};

pub use dispatch::InvoiceType;
