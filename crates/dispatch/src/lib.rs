//! Command/event dispatch core for the funding backend.
//!
//! This crate provides the dispatch-and-consistency layer:
//! - the message model (commands and events as closed tagged unions)
//! - the unit of work binding one storage transaction, an emitted-message
//!   buffer and a deferred-persistence list
//! - the message bus with static dispatch tables and bounded retry
//! - the transactional outbox and its background drain processor
//!
//! Two storage backends sit behind one surface: PostgreSQL for real
//! deployments and an in-memory store for tests and local development.

pub mod bus;
pub mod error;
pub mod memory;
pub mod message;
pub mod outbox;
pub mod processor;
pub mod retry;
pub mod uow;

pub use bus::{CommandHandler, EventHandler, MessageBus};
pub use error::{DispatchError, Result};
pub use memory::{MemorySession, MemoryStore};
pub use message::{
    CommandBody, CommandKind, EventBody, EventKind, InvoiceType, Message, MessageBody, MessageId,
    Metadata,
};
pub use outbox::{OutboxRecord, StoredMessage, OUTBOX_DDL};
pub use processor::{DrainReport, OutboxProcessor};
pub use retry::RetryPolicy;
pub use uow::{Backend, Persist, Session, Tracked, UnitOfWork};
