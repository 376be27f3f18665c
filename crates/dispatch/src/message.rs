//! The message model: commands and events routed through the bus.
//!
//! Every message shape known to the system is a variant of the closed
//! unions below. The bus dispatches on the fieldless kind tags, which are
//! built into a static table at startup rather than discovered at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{AccountId, CampaignId, IdempotencyKey, PaymentHash, Satoshis};

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a message ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<MessageId> for Uuid {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Free-form correlation metadata carried by messages and ledger entries.
///
/// Used to thread context across bounded contexts (e.g. the campaign a
/// transfer pays into, or the Lightning invoice behind a withdrawal).
pub type Metadata = BTreeMap<String, String>;

/// Whether a Lightning invoice moves funds into or out of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceType {
    Deposit,
    Withdrawal,
}

/// An immutable message routed through the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique identifier; doubles as the outbox staging key.
    pub message_id: MessageId,

    /// The command or event this message carries.
    pub body: MessageBody,
}

impl Message {
    /// Wraps a command body in a message with a fresh ID.
    pub fn command(body: CommandBody) -> Self {
        Self {
            message_id: MessageId::new(),
            body: MessageBody::Command(body),
        }
    }

    /// Wraps an event body in a message with a fresh ID.
    pub fn event(body: EventBody) -> Self {
        Self {
            message_id: MessageId::new(),
            body: MessageBody::Event(body),
        }
    }
}

/// Discriminated message payload.
///
/// Commands model "do this exactly once" and have a single designated
/// handler; events model "this happened" and fan out to any number of
/// handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum MessageBody {
    Command(CommandBody),
    Event(EventBody),
}

/// All command shapes known to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CommandBody {
    /// Open an account with a caller-assigned identity.
    OpenAccount { account_id: AccountId },

    /// Credit an account.
    Deposit {
        account_id: AccountId,
        idempotency_key: IdempotencyKey,
        amount: Satoshis,
        #[serde(default)]
        metadata: Metadata,
    },

    /// Debit an account, if funds allow.
    RequestWithdraw {
        account_id: AccountId,
        idempotency_key: IdempotencyKey,
        amount: Satoshis,
        #[serde(default)]
        metadata: Metadata,
    },

    /// Move funds between two accounts atomically.
    RequestTransfer {
        idempotency_key: IdempotencyKey,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Satoshis,
        #[serde(default)]
        metadata: Metadata,
    },

    /// Create a crowdfunding campaign.
    CreateCampaign {
        campaign_id: CampaignId,
        account_id: AccountId,
        title: String,
        description: String,
        goal: Satoshis,
    },

    /// Donate to a campaign from an account.
    DonateToCampaign {
        idempotency_key: IdempotencyKey,
        campaign_id: CampaignId,
        account_id: AccountId,
        amount: Satoshis,
    },

    /// Record a Lightning invoice issued by the payment provider.
    CreateInvoice {
        account_id: AccountId,
        payment_hash: PaymentHash,
        payment_request: String,
        amount: Satoshis,
        invoice_type: InvoiceType,
    },

    /// Check whether a pending invoice has been paid on the network.
    VerifyInvoice { payment_hash: PaymentHash },
}

/// All event shapes known to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventBody {
    /// A new account came into existence (emitted by the auth layer).
    AccountRegistered { account_id: AccountId },

    /// A requested withdrawal was applied.
    WithdrawSucceeded {
        idempotency_key: IdempotencyKey,
        account_id: AccountId,
        amount: Satoshis,
        #[serde(default)]
        metadata: Metadata,
    },

    /// A requested withdrawal was rejected by a domain rule.
    WithdrawRejected {
        idempotency_key: IdempotencyKey,
        account_id: AccountId,
        amount: Satoshis,
        #[serde(default)]
        metadata: Metadata,
    },

    /// A transfer between two accounts was applied.
    TransferSucceeded {
        idempotency_key: IdempotencyKey,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Satoshis,
        #[serde(default)]
        metadata: Metadata,
    },

    /// A transfer between two accounts was rejected by a domain rule.
    TransferRejected {
        idempotency_key: IdempotencyKey,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Satoshis,
        #[serde(default)]
        metadata: Metadata,
    },
}

/// Dispatch-table key for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    OpenAccount,
    Deposit,
    RequestWithdraw,
    RequestTransfer,
    CreateCampaign,
    DonateToCampaign,
    CreateInvoice,
    VerifyInvoice,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandKind::OpenAccount => "OpenAccount",
            CommandKind::Deposit => "Deposit",
            CommandKind::RequestWithdraw => "RequestWithdraw",
            CommandKind::RequestTransfer => "RequestTransfer",
            CommandKind::CreateCampaign => "CreateCampaign",
            CommandKind::DonateToCampaign => "DonateToCampaign",
            CommandKind::CreateInvoice => "CreateInvoice",
            CommandKind::VerifyInvoice => "VerifyInvoice",
        };
        write!(f, "{name}")
    }
}

/// Dispatch-table key for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AccountRegistered,
    WithdrawSucceeded,
    WithdrawRejected,
    TransferSucceeded,
    TransferRejected,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::AccountRegistered => "AccountRegistered",
            EventKind::WithdrawSucceeded => "WithdrawSucceeded",
            EventKind::WithdrawRejected => "WithdrawRejected",
            EventKind::TransferSucceeded => "TransferSucceeded",
            EventKind::TransferRejected => "TransferRejected",
        };
        write!(f, "{name}")
    }
}

impl CommandBody {
    /// Returns the dispatch-table key for this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandBody::OpenAccount { .. } => CommandKind::OpenAccount,
            CommandBody::Deposit { .. } => CommandKind::Deposit,
            CommandBody::RequestWithdraw { .. } => CommandKind::RequestWithdraw,
            CommandBody::RequestTransfer { .. } => CommandKind::RequestTransfer,
            CommandBody::CreateCampaign { .. } => CommandKind::CreateCampaign,
            CommandBody::DonateToCampaign { .. } => CommandKind::DonateToCampaign,
            CommandBody::CreateInvoice { .. } => CommandKind::CreateInvoice,
            CommandBody::VerifyInvoice { .. } => CommandKind::VerifyInvoice,
        }
    }
}

impl EventBody {
    /// Returns the dispatch-table key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::AccountRegistered { .. } => EventKind::AccountRegistered,
            EventBody::WithdrawSucceeded { .. } => EventKind::WithdrawSucceeded,
            EventBody::WithdrawRejected { .. } => EventKind::WithdrawRejected,
            EventBody::TransferSucceeded { .. } => EventKind::TransferSucceeded,
            EventBody::TransferRejected { .. } => EventKind::TransferRejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_new_creates_unique_ids() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn command_message_gets_fresh_id() {
        let a = Message::command(CommandBody::OpenAccount {
            account_id: AccountId::new(),
        });
        let b = Message::command(CommandBody::OpenAccount {
            account_id: AccountId::new(),
        });
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn command_serialization_roundtrip() {
        let message = Message::command(CommandBody::Deposit {
            account_id: AccountId::new(),
            idempotency_key: IdempotencyKey::new("k1"),
            amount: Satoshis::new(100),
            metadata: Metadata::new(),
        });

        let json = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn event_serialization_carries_tag() {
        let message = Message::event(EventBody::AccountRegistered {
            account_id: AccountId::new(),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["body"]["kind"], "event");
        assert_eq!(value["body"]["body"]["type"], "account_registered");
    }

    #[test]
    fn kinds_match_bodies() {
        let body = CommandBody::VerifyInvoice {
            payment_hash: PaymentHash::new("hash"),
        };
        assert_eq!(body.kind(), CommandKind::VerifyInvoice);
        assert_eq!(body.kind().to_string(), "VerifyInvoice");

        let body = EventBody::TransferSucceeded {
            idempotency_key: IdempotencyKey::new("k1"),
            from_account_id: AccountId::new(),
            to_account_id: AccountId::new(),
            amount: Satoshis::new(1),
            metadata: Metadata::new(),
        };
        assert_eq!(body.kind(), EventKind::TransferSucceeded);
    }

    #[test]
    fn metadata_defaults_to_empty_on_missing_field() {
        let json = serde_json::json!({
            "type": "deposit",
            "data": {
                "account_id": uuid::Uuid::new_v4(),
                "idempotency_key": "k1",
                "amount": 50,
            }
        });

        let body: CommandBody = serde_json::from_value(json).unwrap();
        let CommandBody::Deposit { metadata, .. } = body else {
            panic!("expected deposit");
        };
        assert!(metadata.is_empty());
    }
}
