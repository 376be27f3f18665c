//! The account aggregate.

use serde::{Deserialize, Serialize};

use common::{AccountId, IdempotencyKey, Satoshis};
use dispatch::Metadata;

use crate::error::DomainError;

/// One idempotency-keyed ledger entry (a deposit or a withdrawal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub idempotency_key: IdempotencyKey,
    pub amount: Satoshis,
    #[serde(default)]
    pub metadata: Metadata,
}

impl LedgerEntry {
    /// Creates an entry without correlation metadata.
    pub fn new(idempotency_key: impl Into<IdempotencyKey>, amount: Satoshis) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            amount,
            metadata: Metadata::new(),
        }
    }

    /// Creates an entry carrying correlation metadata.
    pub fn with_metadata(
        idempotency_key: impl Into<IdempotencyKey>,
        amount: Satoshis,
        metadata: Metadata,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            amount,
            metadata,
        }
    }
}

/// An account holding append-only deposit and withdrawal ledgers.
///
/// The balance is always the fold over the two ledgers. Entries are
/// appended at most once per idempotency key; re-applying a seen key is a
/// silent no-op, which is what makes redelivered messages safe. A
/// rejected operation appends nothing and does not consume its key, so a
/// corrected retry with the same key can still succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    account_id: AccountId,
    deposits: Vec<LedgerEntry>,
    withdrawals: Vec<LedgerEntry>,
    version: i64,
}

impl Account {
    /// Creates a new empty account.
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            deposits: Vec::new(),
            withdrawals: Vec::new(),
            version: 1,
        }
    }

    pub(crate) fn from_parts(
        account_id: AccountId,
        deposits: Vec<LedgerEntry>,
        withdrawals: Vec<LedgerEntry>,
        version: i64,
    ) -> Self {
        Self {
            account_id,
            deposits,
            withdrawals,
            version,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn deposits(&self) -> &[LedgerEntry] {
        &self.deposits
    }

    pub fn withdrawals(&self) -> &[LedgerEntry] {
        &self.withdrawals
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Funds currently available for withdrawal.
    pub fn balance(&self) -> Satoshis {
        let deposited: Satoshis = self.deposits.iter().map(|entry| entry.amount).sum();
        let withdrawn: Satoshis = self.withdrawals.iter().map(|entry| entry.amount).sum();
        debug_assert!(deposited >= withdrawn, "ledger inconsistency");
        deposited - withdrawn
    }

    /// Credits the account. Re-applying a seen key is a no-op.
    pub fn deposit(&mut self, entry: LedgerEntry) {
        if self.has_key(&self.deposits, &entry.idempotency_key) {
            return;
        }
        self.deposits.push(entry);
        self.version += 1;
    }

    /// Debits the account if funds allow. Re-applying a seen key is a
    /// no-op; a rejection appends nothing and leaves the key unconsumed.
    pub fn withdraw(&mut self, entry: LedgerEntry) -> Result<(), DomainError> {
        if self.has_key(&self.withdrawals, &entry.idempotency_key) {
            return Ok(());
        }

        let available = self.balance();
        if entry.amount > available {
            return Err(DomainError::InsufficientFunds {
                requested: entry.amount,
                available,
            });
        }

        self.withdrawals.push(entry);
        self.version += 1;
        Ok(())
    }

    fn has_key(&self, ledger: &[LedgerEntry], key: &IdempotencyKey) -> bool {
        ledger.iter().any(|entry| &entry.idempotency_key == key)
    }
}

/// Moves funds between two accounts under a single idempotency key.
///
/// The withdrawal is attempted first; if it is rejected the deposit never
/// happens. Both legs share the key, so a redelivered transfer is a no-op
/// on both sides.
pub fn transfer(
    idempotency_key: &IdempotencyKey,
    from: &mut Account,
    to: &mut Account,
    amount: Satoshis,
    metadata: &Metadata,
) -> Result<(), DomainError> {
    from.withdraw(LedgerEntry::with_metadata(
        idempotency_key.clone(),
        amount,
        metadata.clone(),
    ))?;
    to.deposit(LedgerEntry::with_metadata(
        idempotency_key.clone(),
        amount,
        metadata.clone(),
    ));
    Ok(())
}
