//! The message bus: routes commands to their single handler and fans
//! events out to every subscriber, each inside its own unit of work.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::error::{DispatchError, Result};
use crate::message::{CommandBody, CommandKind, EventBody, EventKind, Message, MessageBody};
use crate::retry::RetryPolicy;
use crate::uow::{Backend, UnitOfWork};

/// Handler for a command. Exactly one per command kind by contract.
///
/// Handlers are trait objects so they can carry injected collaborators
/// (repositories are derived from the unit of work; external clients such
/// as the Lightning processor are struct fields).
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()>;
}

/// Handler for an event. Any number may subscribe to one event kind.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, uow: &mut UnitOfWork, event: EventBody) -> Result<()>;
}

/// Routes messages to registered handlers.
///
/// The dispatch tables are populated once at startup, before traffic
/// begins. Commands run in exactly one unit of work; event handlers each
/// get their own, so one failing subscriber never rolls back another's
/// work. The whole dispatch is wrapped in a bounded, jittered retry to
/// absorb transient infrastructure failures.
pub struct MessageBus {
    backend: Backend,
    command_handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
    event_handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    retry: RetryPolicy,
}

impl MessageBus {
    /// Creates a bus over the given backend with the default retry policy.
    pub fn new(backend: Backend) -> Self {
        Self::with_retry(backend, RetryPolicy::default())
    }

    /// Creates a bus with an explicit retry policy.
    pub fn with_retry(backend: Backend, retry: RetryPolicy) -> Self {
        Self {
            backend,
            command_handlers: HashMap::new(),
            event_handlers: HashMap::new(),
            retry,
        }
    }

    /// The storage backend this bus dispatches against.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Registers the handler for a command kind.
    ///
    /// Registering a second handler for the same kind replaces the first;
    /// doing so is a wiring bug, since commands are handled exactly once
    /// by contract.
    pub fn register_command_handler(
        &mut self,
        kind: CommandKind,
        handler: Arc<dyn CommandHandler>,
    ) {
        if self.command_handlers.insert(kind, handler).is_some() {
            tracing::warn!(command = %kind, "replaced existing command handler");
        }
    }

    /// Subscribes a handler to an event kind.
    pub fn register_event_handler(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.event_handlers.entry(kind).or_default().push(handler);
    }

    /// Dispatches a message, retrying transient failures.
    ///
    /// Returns the last error once retries are exhausted. Domain-rule
    /// rejections never surface here: handlers convert them into emitted
    /// rejection events.
    #[tracing::instrument(skip_all, fields(message_id = %message.message_id))]
    pub async fn handle(&self, message: &Message) -> Result<()> {
        self.retry.run(|| self.dispatch(message)).await
    }

    async fn dispatch(&self, message: &Message) -> Result<()> {
        match &message.body {
            MessageBody::Command(body) => self.dispatch_command(body).await,
            MessageBody::Event(body) => self.dispatch_event(body).await,
        }
    }

    async fn dispatch_command(&self, body: &CommandBody) -> Result<()> {
        let kind = body.kind();
        let handler = self
            .command_handlers
            .get(&kind)
            .ok_or(DispatchError::MissingCommandHandler(kind))?;

        let mut uow = self.backend.begin().await?;
        match handler.handle(&mut uow, body.clone()).await {
            Ok(()) => {
                uow.commit().await?;
                metrics::counter!("bus_commands_handled_total").increment(1);
                Ok(())
            }
            Err(error) => {
                if let Err(rollback_error) = uow.rollback().await {
                    tracing::warn!(%rollback_error, command = %kind, "rollback failed");
                }
                Err(error)
            }
        }
    }

    async fn dispatch_event(&self, body: &EventBody) -> Result<()> {
        let kind = body.kind();
        let handlers = match self.event_handlers.get(&kind) {
            Some(handlers) if !handlers.is_empty() => handlers,
            // Events may legitimately have no subscribers.
            _ => return Ok(()),
        };

        let runs = handlers.iter().map(|handler| {
            let handler = Arc::clone(handler);
            let body = body.clone();
            async move {
                let mut uow = self.backend.begin().await?;
                match handler.handle(&mut uow, body).await {
                    Ok(()) => uow.commit().await,
                    Err(error) => {
                        if let Err(rollback_error) = uow.rollback().await {
                            tracing::warn!(%rollback_error, event = %kind, "rollback failed");
                        }
                        Err(error)
                    }
                }
            }
        });

        let results = join_all(runs).await;
        let total = results.len();
        let mut failed = 0;
        for error in results.into_iter().filter_map(|result| result.err()) {
            failed += 1;
            metrics::counter!("bus_event_handler_failures_total").increment(1);
            tracing::error!(%error, event = %kind, "event handler failed");
        }

        if failed > 0 {
            Err(DispatchError::EventHandlersFailed {
                kind,
                failed,
                total,
            })
        } else {
            metrics::counter!("bus_events_handled_total").increment(1);
            Ok(())
        }
    }
}
