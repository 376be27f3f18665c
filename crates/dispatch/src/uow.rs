//! The unit of work: one storage transaction, a buffer of emitted
//! messages and a list of aggregates awaiting persistence, committed or
//! rolled back as a single all-or-nothing unit.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::memory::{MemorySession, MemoryStore};
use crate::message::Message;
use crate::outbox;

/// Storage backend handle, selected once at process start by
/// configuration and shared by the bus and the outbox processor.
#[derive(Clone)]
pub enum Backend {
    Postgres(PgPool),
    Memory(MemoryStore),
}

impl Backend {
    /// Opens a fresh unit of work on this backend.
    ///
    /// PostgreSQL sessions run at REPEATABLE READ so concurrently running
    /// handlers never observe each other's half-applied transactions.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        let session = match self {
            Backend::Postgres(pool) => {
                let mut txn = pool.begin().await?;
                sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                    .execute(&mut *txn)
                    .await?;
                Session::Postgres(txn)
            }
            Backend::Memory(store) => Session::Memory(store.session()),
        };

        Ok(UnitOfWork::new(session))
    }
}

/// The transaction handle owned by one unit of work for its lifetime.
pub enum Session {
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
    Memory(MemorySession),
}

impl Session {
    async fn commit(self) -> Result<()> {
        match self {
            Session::Postgres(txn) => Ok(txn.commit().await?),
            Session::Memory(session) => {
                session.commit().await;
                Ok(())
            }
        }
    }

    async fn rollback(self) -> Result<()> {
        match self {
            Session::Postgres(txn) => Ok(txn.rollback().await?),
            // Dropping the staged session discards everything.
            Session::Memory(_) => Ok(()),
        }
    }
}

/// An object registered with a unit of work for persistence at commit
/// time. Implemented by the storage adapters of each bounded context.
#[async_trait]
pub trait Persist: Send + Sync {
    async fn persist(&self, session: &mut Session) -> Result<()>;
}

/// Shared handle to an aggregate loaded into a unit of work.
///
/// The repository hands the same handle to the caller and to the deferred
/// persistence entry, so whatever state the aggregate is in when the unit
/// of work commits is what gets written.
pub struct Tracked<A> {
    inner: Arc<RwLock<A>>,
}

impl<A> Tracked<A> {
    /// Wraps an aggregate in a shared tracked handle.
    pub fn new(aggregate: A) -> Self {
        Self {
            inner: Arc::new(RwLock::new(aggregate)),
        }
    }

    /// Read access to the aggregate.
    pub async fn read(&self) -> RwLockReadGuard<'_, A> {
        self.inner.read().await
    }

    /// Write access to the aggregate.
    pub async fn write(&self) -> RwLockWriteGuard<'_, A> {
        self.inner.write().await
    }
}

impl<A> Clone for Tracked<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// The atomic scope for one message-handling attempt.
///
/// Created by the bus per handler invocation and never reused. Emitted
/// messages and tracked aggregates have no visible effect until
/// [`UnitOfWork::commit`] returns successfully: commit persists every
/// tracked aggregate, stages every buffered message into the outbox and
/// commits the transaction as one unit. Any failure along the way aborts
/// the whole transaction.
pub struct UnitOfWork {
    session: Session,
    messages: Vec<Message>,
    tracked: Vec<Box<dyn Persist>>,
}

impl UnitOfWork {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            messages: Vec::new(),
            tracked: Vec::new(),
        }
    }

    /// Buffers a message for staging into the outbox at commit time.
    pub fn emit(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Registers an object for deferred persistence at commit time.
    pub fn track(&mut self, entry: Box<dyn Persist>) {
        self.tracked.push(entry);
    }

    /// The messages buffered so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Mutable access to the underlying transaction, for repositories and
    /// the outbox staging step.
    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Persists tracked aggregates, stages buffered messages into the
    /// outbox and commits the transaction.
    ///
    /// If any step fails the transaction is aborted: no aggregate
    /// mutation and no outbox row survive.
    pub async fn commit(self) -> Result<()> {
        let UnitOfWork {
            mut session,
            messages,
            tracked,
        } = self;

        for entry in &tracked {
            entry.persist(&mut session).await?;
        }

        outbox::stage(&mut session, &messages).await?;

        session.commit().await
    }

    /// Discards buffered messages and tracked objects and aborts the
    /// transaction.
    pub async fn rollback(mut self) -> Result<()> {
        self.messages.clear();
        self.tracked.clear();
        self.session.rollback().await
    }
}
