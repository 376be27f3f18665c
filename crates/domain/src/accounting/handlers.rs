//! Message handlers for the accounting context.

use std::sync::Arc;

use async_trait::async_trait;

use common::AccountId;
use dispatch::{
    CommandBody, CommandHandler, CommandKind, DispatchError, EventBody, EventHandler, EventKind,
    Message, MessageBus, Result, UnitOfWork,
};

use super::aggregate::{Account, LedgerEntry, transfer};
use super::store::account_repository;
use crate::error::DomainError;

/// Creates the account if it does not exist yet, so redelivered
/// registrations are effect-once.
async fn open_account(uow: &mut UnitOfWork, account_id: AccountId) -> Result<()> {
    let mut repository = account_repository(uow);
    if repository.find_by_id(account_id).await?.is_none() {
        repository.add(Account::new(account_id)).await?;
        tracing::info!(%account_id, "account opened");
    }
    Ok(())
}

/// Handles the `OpenAccount` command.
pub struct OpenAccountHandler;

#[async_trait]
impl CommandHandler for OpenAccountHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::OpenAccount { account_id } = command else {
            return Err(DispatchError::UnexpectedMessage("OpenAccount"));
        };
        open_account(uow, account_id).await
    }
}

/// Opens an account whenever the auth layer reports a signup.
pub struct AccountRegisteredHandler;

#[async_trait]
impl EventHandler for AccountRegisteredHandler {
    async fn handle(&self, uow: &mut UnitOfWork, event: EventBody) -> Result<()> {
        let EventBody::AccountRegistered { account_id } = event else {
            return Err(DispatchError::UnexpectedMessage("AccountRegistered"));
        };
        open_account(uow, account_id).await
    }
}

/// Handles the `Deposit` command.
pub struct DepositHandler;

#[async_trait]
impl CommandHandler for DepositHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::Deposit {
            account_id,
            idempotency_key,
            amount,
            metadata,
        } = command
        else {
            return Err(DispatchError::UnexpectedMessage("Deposit"));
        };

        let account = account_repository(uow)
            .find_by_id(account_id)
            .await?
            .ok_or(DomainError::AccountNotFound(account_id))?;

        account
            .write()
            .await
            .deposit(LedgerEntry::with_metadata(idempotency_key, amount, metadata));
        Ok(())
    }
}

/// Handles the `RequestWithdraw` command, emitting a terminal succeeded
/// or rejected event either way.
pub struct WithdrawHandler;

#[async_trait]
impl CommandHandler for WithdrawHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::RequestWithdraw {
            account_id,
            idempotency_key,
            amount,
            metadata,
        } = command
        else {
            return Err(DispatchError::UnexpectedMessage("RequestWithdraw"));
        };

        let account = account_repository(uow)
            .find_by_id(account_id)
            .await?
            .ok_or(DomainError::AccountNotFound(account_id))?;

        let outcome = account.write().await.withdraw(LedgerEntry::with_metadata(
            idempotency_key.clone(),
            amount,
            metadata.clone(),
        ));

        match outcome {
            Ok(()) => uow.emit(Message::event(EventBody::WithdrawSucceeded {
                idempotency_key,
                account_id,
                amount,
                metadata,
            })),
            Err(DomainError::InsufficientFunds { .. }) => {
                tracing::info!(%account_id, %amount, "withdrawal rejected");
                metrics::counter!("accounting_withdrawals_rejected_total").increment(1);
                uow.emit(Message::event(EventBody::WithdrawRejected {
                    idempotency_key,
                    account_id,
                    amount,
                    metadata,
                }));
            }
            Err(other) => return Err(other.into()),
        }

        Ok(())
    }
}

/// Handles the `RequestTransfer` command: both legs in one unit of work,
/// with a terminal succeeded or rejected event either way.
pub struct TransferHandler;

#[async_trait]
impl CommandHandler for TransferHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::RequestTransfer {
            idempotency_key,
            from_account_id,
            to_account_id,
            amount,
            metadata,
        } = command
        else {
            return Err(DispatchError::UnexpectedMessage("RequestTransfer"));
        };

        // Loading the same row twice would track two divergent copies.
        if from_account_id == to_account_id {
            tracing::info!(%from_account_id, "self-transfer rejected");
            uow.emit(Message::event(EventBody::TransferRejected {
                idempotency_key,
                from_account_id,
                to_account_id,
                amount,
                metadata,
            }));
            return Ok(());
        }

        let from = account_repository(uow)
            .find_by_id(from_account_id)
            .await?
            .ok_or(DomainError::AccountNotFound(from_account_id))?;
        let to = account_repository(uow)
            .find_by_id(to_account_id)
            .await?
            .ok_or(DomainError::AccountNotFound(to_account_id))?;

        let outcome = transfer(
            &idempotency_key,
            &mut *from.write().await,
            &mut *to.write().await,
            amount,
            &metadata,
        );

        match outcome {
            Ok(()) => uow.emit(Message::event(EventBody::TransferSucceeded {
                idempotency_key,
                from_account_id,
                to_account_id,
                amount,
                metadata,
            })),
            Err(DomainError::InsufficientFunds { .. }) => {
                tracing::info!(%from_account_id, %amount, "transfer rejected");
                metrics::counter!("accounting_transfers_rejected_total").increment(1);
                uow.emit(Message::event(EventBody::TransferRejected {
                    idempotency_key,
                    from_account_id,
                    to_account_id,
                    amount,
                    metadata,
                }));
            }
            Err(other) => return Err(other.into()),
        }

        Ok(())
    }
}

/// Registers every accounting handler on the bus.
pub fn register_accounting_handlers(bus: &mut MessageBus) {
    bus.register_event_handler(EventKind::AccountRegistered, Arc::new(AccountRegisteredHandler));
    bus.register_command_handler(CommandKind::OpenAccount, Arc::new(OpenAccountHandler));
    bus.register_command_handler(CommandKind::Deposit, Arc::new(DepositHandler));
    bus.register_command_handler(CommandKind::RequestWithdraw, Arc::new(WithdrawHandler));
    bus.register_command_handler(CommandKind::RequestTransfer, Arc::new(TransferHandler));
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Satoshis;
    use dispatch::{Backend, MemoryStore, Metadata};

    async fn backend_with_account(account_id: AccountId, funds: Satoshis) -> Backend {
        let backend = Backend::Memory(MemoryStore::new());
        let mut uow = backend.begin().await.unwrap();
        let account = account_repository(&mut uow)
            .add(Account::new(account_id))
            .await
            .unwrap();
        if funds.is_positive() {
            account
                .write()
                .await
                .deposit(LedgerEntry::new("seed", funds));
        }
        uow.commit().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn deposit_credits_the_account() {
        let account_id = AccountId::new();
        let backend = backend_with_account(account_id, Satoshis::zero()).await;

        let mut uow = backend.begin().await.unwrap();
        DepositHandler
            .handle(
                &mut uow,
                CommandBody::Deposit {
                    account_id,
                    idempotency_key: "k1".into(),
                    amount: Satoshis::new(100),
                    metadata: Metadata::new(),
                },
            )
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let account = account_repository(&mut uow)
            .find_by_id(account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.read().await.balance(), Satoshis::new(100));
    }

    #[tokio::test]
    async fn deposit_to_unknown_account_fails() {
        let backend = Backend::Memory(MemoryStore::new());

        let mut uow = backend.begin().await.unwrap();
        let result = DepositHandler
            .handle(
                &mut uow,
                CommandBody::Deposit {
                    account_id: AccountId::new(),
                    idempotency_key: "k1".into(),
                    amount: Satoshis::new(100),
                    metadata: Metadata::new(),
                },
            )
            .await;

        assert!(matches!(result, Err(DispatchError::Handler(_))));
    }

    #[tokio::test]
    async fn successful_withdrawal_emits_succeeded_event() {
        let account_id = AccountId::new();
        let backend = backend_with_account(account_id, Satoshis::new(100)).await;

        let mut uow = backend.begin().await.unwrap();
        WithdrawHandler
            .handle(
                &mut uow,
                CommandBody::RequestWithdraw {
                    account_id,
                    idempotency_key: "w1".into(),
                    amount: Satoshis::new(60),
                    metadata: Metadata::new(),
                },
            )
            .await
            .unwrap();

        assert_eq!(uow.messages().len(), 1);
        assert!(matches!(
            &uow.messages()[0].body,
            dispatch::MessageBody::Event(EventBody::WithdrawSucceeded { amount, .. })
                if *amount == Satoshis::new(60)
        ));
    }

    #[tokio::test]
    async fn overdraft_emits_rejected_event_and_leaves_balance() {
        let account_id = AccountId::new();
        let backend = backend_with_account(account_id, Satoshis::new(10)).await;

        let mut uow = backend.begin().await.unwrap();
        WithdrawHandler
            .handle(
                &mut uow,
                CommandBody::RequestWithdraw {
                    account_id,
                    idempotency_key: "w1".into(),
                    amount: Satoshis::new(11),
                    metadata: Metadata::new(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            &uow.messages()[0].body,
            dispatch::MessageBody::Event(EventBody::WithdrawRejected { .. })
        ));
        uow.commit().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let account = account_repository(&mut uow)
            .find_by_id(account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.read().await.balance(), Satoshis::new(10));
    }

    #[tokio::test]
    async fn self_transfer_is_rejected() {
        let account_id = AccountId::new();
        let backend = backend_with_account(account_id, Satoshis::new(100)).await;

        let mut uow = backend.begin().await.unwrap();
        TransferHandler
            .handle(
                &mut uow,
                CommandBody::RequestTransfer {
                    idempotency_key: "t1".into(),
                    from_account_id: account_id,
                    to_account_id: account_id,
                    amount: Satoshis::new(10),
                    metadata: Metadata::new(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            &uow.messages()[0].body,
            dispatch::MessageBody::Event(EventBody::TransferRejected { .. })
        ));
    }
}
