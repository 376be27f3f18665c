//! Background loop that drains the outbox and redelivers staged messages.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::bus::MessageBus;
use crate::error::Result;
use crate::message::{Message, MessageId};
use crate::outbox::{self, OutboxRecord};
use crate::uow::Backend;

/// Summary of one drain cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages dispatched successfully and deleted.
    pub dispatched: usize,
    /// Messages whose dispatch failed; their rows were kept for the next
    /// cycle.
    pub failed: usize,
    /// Undecodable rows deleted without dispatch.
    pub discarded: usize,
}

/// Drains the outbox on a fixed interval and dispatches each staged
/// message through the bus.
///
/// Dispatches within a cycle run concurrently and impose no ordering
/// among messages; aggregate idempotency, not delivery order, is the
/// consistency mechanism. Only rows whose dispatch succeeded are deleted:
/// a failed dispatch leaves its row in place so the message is delivered
/// again on a later cycle.
pub struct OutboxProcessor {
    backend: Backend,
    bus: Arc<MessageBus>,
    interval: Duration,
}

impl OutboxProcessor {
    /// Creates a processor draining `backend` through `bus` every
    /// `interval`.
    pub fn new(backend: Backend, bus: Arc<MessageBus>, interval: Duration) -> Self {
        Self {
            backend,
            bus,
            interval,
        }
    }

    /// Runs one drain cycle: fetch everything staged, dispatch, delete
    /// what was delivered.
    #[tracing::instrument(skip(self))]
    pub async fn process_once(&self) -> Result<DrainReport> {
        let records = outbox::fetch_all(&self.backend).await?;
        if records.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut report = DrainReport::default();
        let mut deletable: Vec<MessageId> = Vec::new();
        let mut pending: Vec<(MessageId, Message)> = Vec::new();

        for record in records {
            match record.decode() {
                Ok(message) => pending.push((record.message_id, message)),
                Err(error) => {
                    // A payload we cannot decode will never dispatch;
                    // leaving it would wedge the drain loop.
                    tracing::error!(
                        message_id = %record.message_id,
                        %error,
                        "discarding undecodable outbox record"
                    );
                    report.discarded += 1;
                    deletable.push(record.message_id);
                }
            }
        }

        let outcomes = join_all(pending.iter().map(|(message_id, message)| async move {
            (*message_id, self.bus.handle(message).await)
        }))
        .await;

        for (message_id, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    report.dispatched += 1;
                    deletable.push(message_id);
                }
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(
                        %message_id,
                        %error,
                        "outbox dispatch failed, row kept for redelivery"
                    );
                }
            }
        }

        outbox::delete(&self.backend, &deletable).await?;

        metrics::counter!("outbox_messages_dispatched_total").increment(report.dispatched as u64);
        metrics::counter!("outbox_messages_failed_total").increment(report.failed as u64);

        Ok(report)
    }

    /// Runs drain cycles on the configured interval until `shutdown`
    /// completes. An in-flight cycle always finishes before the loop
    /// exits.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("outbox processor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.process_once().await {
                        tracing::error!(%error, "outbox drain cycle failed");
                    }
                }
            }
        }
    }

    /// Fetches the currently staged records without dispatching them.
    pub async fn staged(&self) -> Result<Vec<OutboxRecord>> {
        outbox::fetch_all(&self.backend).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::bus::CommandHandler;
    use crate::error::DispatchError;
    use crate::memory::MemoryStore;
    use crate::message::{CommandBody, CommandKind};
    use crate::retry::RetryPolicy;
    use crate::uow::UnitOfWork;
    use common::AccountId;

    struct FlakyHandler {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait]
    impl CommandHandler for FlakyHandler {
        async fn handle(&self, _uow: &mut UnitOfWork, _command: CommandBody) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(DispatchError::handler(std::io::Error::other("boom")))
            } else {
                Ok(())
            }
        }
    }

    async fn stage_command(backend: &Backend, body: CommandBody) -> MessageId {
        let message = Message::command(body);
        let id = message.message_id;
        let mut uow = backend.begin().await.unwrap();
        uow.emit(message);
        uow.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn failed_dispatch_keeps_the_row_until_it_succeeds() {
        let store = MemoryStore::new();
        let backend = Backend::Memory(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut bus = MessageBus::with_retry(backend.clone(), RetryPolicy::none());
        bus.register_command_handler(
            CommandKind::OpenAccount,
            Arc::new(FlakyHandler {
                calls: Arc::clone(&calls),
                fail_first: 1,
            }),
        );

        let processor =
            OutboxProcessor::new(backend.clone(), Arc::new(bus), Duration::from_millis(10));

        stage_command(
            &backend,
            CommandBody::OpenAccount {
                account_id: AccountId::new(),
            },
        )
        .await;

        let report = processor.process_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(store.outbox_len().await, 1);

        let report = processor.process_once().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(store.outbox_len().await, 0);
    }

    #[tokio::test]
    async fn empty_outbox_is_a_quiet_cycle() {
        let backend = Backend::Memory(MemoryStore::new());
        let bus = Arc::new(MessageBus::with_retry(backend.clone(), RetryPolicy::none()));
        let processor = OutboxProcessor::new(backend, bus, Duration::from_millis(10));

        let report = processor.process_once().await.unwrap();
        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let backend = Backend::Memory(MemoryStore::new());
        let bus = Arc::new(MessageBus::with_retry(backend.clone(), RetryPolicy::none()));
        let processor = OutboxProcessor::new(backend, bus, Duration::from_millis(5));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(processor.run(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
