//! Accounting context: accounts, their ledgers and the money-movement
//! handlers.

pub mod aggregate;
pub mod handlers;
pub mod store;

pub use aggregate::{Account, LedgerEntry, transfer};
pub use handlers::register_accounting_handlers;
pub use store::{ACCOUNTS_DDL, AccountRepository, account_repository};
