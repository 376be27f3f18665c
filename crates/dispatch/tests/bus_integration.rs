//! Integration tests for the bus, unit of work and outbox working
//! together over the in-memory backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::AccountId;
use dispatch::{
    Backend, CommandBody, CommandHandler, CommandKind, DispatchError, EventBody, EventHandler,
    EventKind, MemorySession, MemoryStore, Message, MessageBus, OutboxProcessor, Result,
    RetryPolicy, Session, UnitOfWork,
};

fn memory(session: &mut Session) -> &mut MemorySession {
    match session {
        Session::Memory(session) => session,
        Session::Postgres(_) => panic!("these tests run on the memory backend"),
    }
}

fn open_account_command() -> Message {
    Message::command(CommandBody::OpenAccount {
        account_id: AccountId::new(),
    })
}

fn registered_event() -> Message {
    Message::event(EventBody::AccountRegistered {
        account_id: AccountId::new(),
    })
}

/// Writes a marker document and emits an event, then succeeds or fails
/// depending on configuration.
struct MarkerHandler {
    document_id: &'static str,
    fail: bool,
}

#[async_trait]
impl CommandHandler for MarkerHandler {
    async fn handle(&self, uow: &mut UnitOfWork, _command: CommandBody) -> Result<()> {
        memory(uow.session()).put("markers", self.document_id, serde_json::json!({"seen": true}));
        uow.emit(registered_event());

        if self.fail {
            Err(DispatchError::handler(std::io::Error::other(
                "handler exploded",
            )))
        } else {
            Ok(())
        }
    }
}

struct MarkerEventHandler {
    document_id: &'static str,
    fail: bool,
}

#[async_trait]
impl EventHandler for MarkerEventHandler {
    async fn handle(&self, uow: &mut UnitOfWork, _event: EventBody) -> Result<()> {
        if self.fail {
            return Err(DispatchError::handler(std::io::Error::other(
                "subscriber exploded",
            )));
        }
        memory(uow.session()).put("markers", self.document_id, serde_json::json!({"seen": true}));
        Ok(())
    }
}

#[tokio::test]
async fn committed_command_persists_state_and_stages_messages_together() {
    let store = MemoryStore::new();
    let mut bus = MessageBus::with_retry(Backend::Memory(store.clone()), RetryPolicy::none());
    bus.register_command_handler(
        CommandKind::OpenAccount,
        Arc::new(MarkerHandler {
            document_id: "ok",
            fail: false,
        }),
    );

    bus.handle(&open_account_command()).await.unwrap();

    assert!(store.document("markers", "ok").await.is_some());
    assert_eq!(store.outbox_len().await, 1);
}

#[tokio::test]
async fn failed_command_leaves_no_state_and_no_outbox_rows() {
    let store = MemoryStore::new();
    let mut bus = MessageBus::with_retry(Backend::Memory(store.clone()), RetryPolicy::none());
    bus.register_command_handler(
        CommandKind::OpenAccount,
        Arc::new(MarkerHandler {
            document_id: "broken",
            fail: true,
        }),
    );

    let result = bus.handle(&open_account_command()).await;

    assert!(result.is_err());
    assert!(store.document("markers", "broken").await.is_none());
    assert_eq!(store.outbox_len().await, 0);
}

#[tokio::test]
async fn one_failing_subscriber_does_not_roll_back_its_sibling() {
    let store = MemoryStore::new();
    let mut bus = MessageBus::with_retry(Backend::Memory(store.clone()), RetryPolicy::none());
    bus.register_event_handler(
        EventKind::AccountRegistered,
        Arc::new(MarkerEventHandler {
            document_id: "healthy",
            fail: false,
        }),
    );
    bus.register_event_handler(
        EventKind::AccountRegistered,
        Arc::new(MarkerEventHandler {
            document_id: "sick",
            fail: true,
        }),
    );

    let result = bus.handle(&registered_event()).await;

    assert!(matches!(
        result,
        Err(DispatchError::EventHandlersFailed {
            failed: 1,
            total: 2,
            ..
        })
    ));
    // The sibling's unit of work committed independently.
    assert!(store.document("markers", "healthy").await.is_some());
    assert!(store.document("markers", "sick").await.is_none());
}

/// Fails a configurable number of times before succeeding, counting
/// invocations.
struct FlakyHandler {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
}

#[async_trait]
impl CommandHandler for FlakyHandler {
    async fn handle(&self, _uow: &mut UnitOfWork, _command: CommandBody) -> Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
            Err(DispatchError::handler(std::io::Error::other("flaky")))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn transient_handler_failures_are_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut bus = MessageBus::with_retry(
        Backend::Memory(MemoryStore::new()),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: Duration::from_millis(1),
        },
    );
    bus.register_command_handler(
        CommandKind::OpenAccount,
        Arc::new(FlakyHandler {
            calls: Arc::clone(&calls),
            fail_first: 2,
        }),
    );

    bus.handle(&open_account_command()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn processor_redelivers_until_the_handler_succeeds() {
    let store = MemoryStore::new();
    let backend = Backend::Memory(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut bus = MessageBus::with_retry(backend.clone(), RetryPolicy::none());
    bus.register_command_handler(
        CommandKind::OpenAccount,
        Arc::new(FlakyHandler {
            calls: Arc::clone(&calls),
            fail_first: 2,
        }),
    );
    let processor = OutboxProcessor::new(backend.clone(), Arc::new(bus), Duration::from_millis(5));

    // Stage the command as a business transaction would.
    let mut uow = backend.begin().await.unwrap();
    uow.emit(open_account_command());
    uow.commit().await.unwrap();

    // Two failing cycles keep the row; the third delivers and deletes it.
    assert_eq!(processor.process_once().await.unwrap().failed, 1);
    assert_eq!(processor.process_once().await.unwrap().failed, 1);
    assert_eq!(processor.process_once().await.unwrap().dispatched, 1);
    assert_eq!(store.outbox_len().await, 0);
}

#[tokio::test]
async fn processor_deletes_only_successfully_dispatched_rows() {
    let store = MemoryStore::new();
    let backend = Backend::Memory(store.clone());

    let mut bus = MessageBus::with_retry(backend.clone(), RetryPolicy::none());
    bus.register_command_handler(
        CommandKind::OpenAccount,
        Arc::new(FlakyHandler {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_first: 0,
        }),
    );
    // No handler for Deposit: its dispatch fails every cycle.
    let processor = OutboxProcessor::new(backend.clone(), Arc::new(bus), Duration::from_millis(5));

    let doomed = Message::command(CommandBody::Deposit {
        account_id: AccountId::new(),
        idempotency_key: "k1".into(),
        amount: 10.into(),
        metadata: Default::default(),
    });
    let doomed_id = doomed.message_id;

    let mut uow = backend.begin().await.unwrap();
    uow.emit(open_account_command());
    uow.emit(doomed);
    uow.commit().await.unwrap();

    let report = processor.process_once().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.failed, 1);

    let remaining = processor.staged().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].message_id, doomed_id);
}
