//! Storage adapter for the account aggregate.
//!
//! Ledgers are stored as JSONB columns on one row per account. The
//! repository auto-registers every aggregate it returns with the unit of
//! work, so the state the handler leaves behind is what gets persisted at
//! commit.

use async_trait::async_trait;
use sqlx::Row;

use common::AccountId;
use dispatch::{Persist, Result, Session, Tracked, UnitOfWork};

use super::aggregate::{Account, LedgerEntry};

/// Accounts table schema, applied at startup.
pub const ACCOUNTS_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS accounting_accounts (
        account_id UUID PRIMARY KEY,
        deposits JSONB NOT NULL,
        withdrawals JSONB NOT NULL,
        version BIGINT NOT NULL
    );
"#;

const COLLECTION: &str = "accounting_accounts";

/// Repository over the accounts of the current unit of work.
pub struct AccountRepository<'a> {
    uow: &'a mut UnitOfWork,
}

/// Creates a repository bound to the given unit of work.
pub fn account_repository(uow: &mut UnitOfWork) -> AccountRepository<'_> {
    AccountRepository { uow }
}

impl AccountRepository<'_> {
    /// Loads an account and registers it for persistence at commit time.
    pub async fn find_by_id(&mut self, account_id: AccountId) -> Result<Option<Tracked<Account>>> {
        let loaded = match self.uow.session() {
            Session::Postgres(txn) => {
                let row = sqlx::query(
                    r#"
                    SELECT deposits, withdrawals, version
                    FROM accounting_accounts
                    WHERE account_id = $1
                    "#,
                )
                .bind(account_id.as_uuid())
                .fetch_optional(&mut **txn)
                .await?;

                match row {
                    Some(row) => {
                        let deposits: Vec<LedgerEntry> =
                            serde_json::from_value(row.try_get::<serde_json::Value, _>("deposits")?)?;
                        let withdrawals: Vec<LedgerEntry> = serde_json::from_value(
                            row.try_get::<serde_json::Value, _>("withdrawals")?,
                        )?;
                        Some(Account::from_parts(
                            account_id,
                            deposits,
                            withdrawals,
                            row.try_get("version")?,
                        ))
                    }
                    None => None,
                }
            }
            Session::Memory(session) => session
                .get(COLLECTION, &account_id.to_string())
                .await
                .map(serde_json::from_value)
                .transpose()?,
        };

        Ok(loaded.map(|account| self.track(account)))
    }

    /// Inserts a new account and registers it for persistence at commit
    /// time.
    pub async fn add(&mut self, account: Account) -> Result<Tracked<Account>> {
        match self.uow.session() {
            Session::Postgres(txn) => {
                sqlx::query(
                    r#"
                    INSERT INTO accounting_accounts (account_id, deposits, withdrawals, version)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(account.account_id().as_uuid())
                .bind(serde_json::to_value(account.deposits())?)
                .bind(serde_json::to_value(account.withdrawals())?)
                .bind(account.version())
                .execute(&mut **txn)
                .await?;
            }
            Session::Memory(session) => {
                let document = serde_json::to_value(&account)?;
                session.put(COLLECTION, &account.account_id().to_string(), document);
            }
        }

        Ok(self.track(account))
    }

    fn track(&mut self, account: Account) -> Tracked<Account> {
        let tracked = Tracked::new(account);
        self.uow.track(Box::new(AccountWriter {
            account: tracked.clone(),
        }));
        tracked
    }
}

struct AccountWriter {
    account: Tracked<Account>,
}

#[async_trait]
impl Persist for AccountWriter {
    async fn persist(&self, session: &mut Session) -> Result<()> {
        let account = self.account.read().await;
        match session {
            Session::Postgres(txn) => {
                sqlx::query(
                    r#"
                    UPDATE accounting_accounts
                    SET deposits = $2, withdrawals = $3, version = $4
                    WHERE account_id = $1
                    "#,
                )
                .bind(account.account_id().as_uuid())
                .bind(serde_json::to_value(account.deposits())?)
                .bind(serde_json::to_value(account.withdrawals())?)
                .bind(account.version())
                .execute(&mut **txn)
                .await?;
            }
            Session::Memory(memory) => {
                let document = serde_json::to_value(&*account)?;
                memory.put(COLLECTION, &account.account_id().to_string(), document);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Satoshis;
    use dispatch::{Backend, MemoryStore};

    #[tokio::test]
    async fn added_account_is_visible_after_commit() {
        let store = MemoryStore::new();
        let backend = Backend::Memory(store.clone());
        let account_id = AccountId::new();

        let mut uow = backend.begin().await.unwrap();
        account_repository(&mut uow)
            .add(Account::new(account_id))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let found = account_repository(&mut uow)
            .find_by_id(account_id)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn mutations_after_load_are_persisted_at_commit() {
        let store = MemoryStore::new();
        let backend = Backend::Memory(store.clone());
        let account_id = AccountId::new();

        let mut uow = backend.begin().await.unwrap();
        account_repository(&mut uow)
            .add(Account::new(account_id))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let account = account_repository(&mut uow)
            .find_by_id(account_id)
            .await
            .unwrap()
            .unwrap();
        account
            .write()
            .await
            .deposit(LedgerEntry::new("k1", Satoshis::new(25)));
        uow.commit().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let account = account_repository(&mut uow)
            .find_by_id(account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.read().await.balance(), Satoshis::new(25));
    }

    #[tokio::test]
    async fn uncommitted_mutations_are_discarded() {
        let store = MemoryStore::new();
        let backend = Backend::Memory(store.clone());
        let account_id = AccountId::new();

        let mut uow = backend.begin().await.unwrap();
        account_repository(&mut uow)
            .add(Account::new(account_id))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let account = account_repository(&mut uow)
            .find_by_id(account_id)
            .await
            .unwrap()
            .unwrap();
        account
            .write()
            .await
            .deposit(LedgerEntry::new("k1", Satoshis::new(25)));
        uow.rollback().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let account = account_repository(&mut uow)
            .find_by_id(account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.read().await.balance(), Satoshis::zero());
    }
}
