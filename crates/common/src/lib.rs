//! Shared types for the funding backend.
//!
//! Identifier newtypes and the satoshi amount type used across the
//! messaging layer and the bounded contexts.

pub mod ids;
pub mod money;

pub use ids::{AccountId, CampaignId, IdempotencyKey, PaymentHash};
pub use money::Satoshis;
