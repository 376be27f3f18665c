//! Message handlers for the crowdfunding context.
//!
//! Donations ride on the accounting context: `DonateToCampaign` emits a
//! `RequestTransfer` toward the campaign owner's account, tagged with the
//! campaign ID, and the `TransferSucceeded` subscriber records the
//! donation once the money has actually moved.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use common::CampaignId;
use dispatch::{
    CommandBody, CommandHandler, CommandKind, DispatchError, EventBody, EventHandler, EventKind,
    Message, MessageBus, Metadata, Result, UnitOfWork,
};

use super::aggregate::{Campaign, Donation};
use super::store::campaign_repository;
use crate::error::DomainError;

/// Metadata key correlating a transfer with the campaign it pays into.
pub const CAMPAIGN_ID_KEY: &str = "campaign_id";

/// Handles the `CreateCampaign` command.
pub struct CreateCampaignHandler;

#[async_trait]
impl CommandHandler for CreateCampaignHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::CreateCampaign {
            campaign_id,
            account_id,
            title,
            description,
            goal,
        } = command
        else {
            return Err(DispatchError::UnexpectedMessage("CreateCampaign"));
        };

        let mut repository = campaign_repository(uow);
        if repository.find_by_id(campaign_id).await?.is_none() {
            repository
                .add(Campaign::new(campaign_id, account_id, title, description, goal))
                .await?;
            tracing::info!(%campaign_id, %goal, "campaign created");
        }
        Ok(())
    }
}

/// Handles the `DonateToCampaign` command.
///
/// Validates the donation against the campaign's rules before any money
/// moves; a rejection produces a terminal `TransferRejected` instead of a
/// transfer request.
pub struct DonateToCampaignHandler;

#[async_trait]
impl CommandHandler for DonateToCampaignHandler {
    async fn handle(&self, uow: &mut UnitOfWork, command: CommandBody) -> Result<()> {
        let CommandBody::DonateToCampaign {
            idempotency_key,
            campaign_id,
            account_id,
            amount,
        } = command
        else {
            return Err(DispatchError::UnexpectedMessage("DonateToCampaign"));
        };

        let campaign = campaign_repository(uow)
            .find_by_id(campaign_id)
            .await?
            .ok_or(DomainError::CampaignNotFound(campaign_id))?;

        let (owner, verdict) = {
            let campaign = campaign.read().await;
            (
                campaign.account_id(),
                campaign.ensure_can_accept(account_id, amount),
            )
        };

        let mut metadata = Metadata::new();
        metadata.insert(CAMPAIGN_ID_KEY.to_string(), campaign_id.to_string());

        match verdict {
            Ok(()) => uow.emit(Message::command(CommandBody::RequestTransfer {
                idempotency_key,
                from_account_id: account_id,
                to_account_id: owner,
                amount,
                metadata,
            })),
            Err(reason @ (DomainError::SelfDonation | DomainError::GoalReached)) => {
                tracing::info!(%campaign_id, %account_id, %reason, "donation rejected");
                uow.emit(Message::event(EventBody::TransferRejected {
                    idempotency_key,
                    from_account_id: account_id,
                    to_account_id: owner,
                    amount,
                    metadata,
                }));
            }
            Err(other) => return Err(other.into()),
        }

        Ok(())
    }
}

/// Records a donation once the backing transfer has succeeded.
pub struct RecordDonationHandler;

#[async_trait]
impl EventHandler for RecordDonationHandler {
    async fn handle(&self, uow: &mut UnitOfWork, event: EventBody) -> Result<()> {
        let EventBody::TransferSucceeded {
            idempotency_key,
            from_account_id,
            amount,
            metadata,
            ..
        } = event
        else {
            return Err(DispatchError::UnexpectedMessage("TransferSucceeded"));
        };

        // Transfers without a campaign tag are none of our business.
        let Some(raw_campaign_id) = metadata.get(CAMPAIGN_ID_KEY) else {
            return Ok(());
        };
        let Ok(campaign_id) = Uuid::parse_str(raw_campaign_id).map(CampaignId::from_uuid) else {
            tracing::warn!(%raw_campaign_id, "unparseable campaign id on transfer, skipping");
            return Ok(());
        };

        let campaign = campaign_repository(uow)
            .find_by_id(campaign_id)
            .await?
            .ok_or(DomainError::CampaignNotFound(campaign_id))?;

        let outcome = campaign.write().await.donate(Donation {
            idempotency_key,
            account_id: from_account_id,
            amount,
        });

        match outcome {
            Ok(()) => {
                metrics::counter!("crowdfunding_donations_recorded_total").increment(1);
                Ok(())
            }
            // Lost race: the goal was reached between validation and the
            // transfer landing. The funds are already in the owner's
            // account; redelivery must not wedge on this.
            Err(reason @ (DomainError::GoalReached | DomainError::SelfDonation)) => {
                tracing::warn!(%campaign_id, %reason, "donation not recorded");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// Registers every crowdfunding handler on the bus.
pub fn register_crowdfunding_handlers(bus: &mut MessageBus) {
    bus.register_command_handler(CommandKind::CreateCampaign, Arc::new(CreateCampaignHandler));
    bus.register_command_handler(
        CommandKind::DonateToCampaign,
        Arc::new(DonateToCampaignHandler),
    );
    bus.register_event_handler(EventKind::TransferSucceeded, Arc::new(RecordDonationHandler));
}
