//! The campaign aggregate.

use serde::{Deserialize, Serialize};

use common::{AccountId, CampaignId, IdempotencyKey, Satoshis};

use crate::error::DomainError;

/// One idempotency-keyed donation to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub idempotency_key: IdempotencyKey,
    pub account_id: AccountId,
    pub amount: Satoshis,
}

/// A crowdfunding campaign.
///
/// `total_raised` is always the fold over the donation log. Consistency
/// rules are enforced here, at the aggregate root: a donor may not be the
/// campaign owner, and nothing is accepted once the goal is reached. A
/// donation that lands exactly on the goal is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    campaign_id: CampaignId,
    account_id: AccountId,
    title: String,
    description: String,
    goal: Satoshis,
    total_raised: Satoshis,
    donations: Vec<Donation>,
    version: i64,
}

impl Campaign {
    /// Creates a new campaign owned by `account_id`.
    pub fn new(
        campaign_id: CampaignId,
        account_id: AccountId,
        title: impl Into<String>,
        description: impl Into<String>,
        goal: Satoshis,
    ) -> Self {
        Self {
            campaign_id,
            account_id,
            title: title.into(),
            description: description.into(),
            goal,
            total_raised: Satoshis::zero(),
            donations: Vec::new(),
            version: 1,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        campaign_id: CampaignId,
        account_id: AccountId,
        title: String,
        description: String,
        goal: Satoshis,
        total_raised: Satoshis,
        donations: Vec<Donation>,
        version: i64,
    ) -> Self {
        Self {
            campaign_id,
            account_id,
            title,
            description,
            goal,
            total_raised,
            donations,
            version,
        }
    }

    pub fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    /// The account that receives donated funds.
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn goal(&self) -> Satoshis {
        self.goal
    }

    pub fn total_raised(&self) -> Satoshis {
        self.total_raised
    }

    pub fn donations(&self) -> &[Donation] {
        &self.donations
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Whether the campaign has met its goal.
    pub fn goal_reached(&self) -> bool {
        self.total_raised >= self.goal
    }

    /// Checks the rules a donation would have to satisfy, without
    /// recording anything.
    pub fn ensure_can_accept(
        &self,
        donor: AccountId,
        _amount: Satoshis,
    ) -> Result<(), DomainError> {
        if donor == self.account_id {
            return Err(DomainError::SelfDonation);
        }
        if self.goal_reached() {
            return Err(DomainError::GoalReached);
        }
        Ok(())
    }

    /// Records a donation. Re-applying a seen key is a no-op; a rejected
    /// donation appends nothing and leaves the key unconsumed.
    pub fn donate(&mut self, donation: Donation) -> Result<(), DomainError> {
        if self
            .donations
            .iter()
            .any(|previous| previous.idempotency_key == donation.idempotency_key)
        {
            return Ok(());
        }

        self.ensure_can_accept(donation.account_id, donation.amount)?;

        self.total_raised += donation.amount;
        self.donations.push(donation);
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign(goal: i64) -> Campaign {
        Campaign::new(
            CampaignId::new(),
            AccountId::new(),
            "Test Campaign",
            "A campaign for testing",
            Satoshis::new(goal),
        )
    }

    fn donation(key: &str, amount: i64) -> Donation {
        Donation {
            idempotency_key: key.into(),
            account_id: AccountId::new(),
            amount: Satoshis::new(amount),
        }
    }

    #[test]
    fn new_campaign_has_raised_nothing() {
        let campaign = campaign(1000);
        assert_eq!(campaign.total_raised(), Satoshis::zero());
        assert!(!campaign.goal_reached());
    }

    #[test]
    fn donations_accumulate() {
        let mut campaign = campaign(1000);

        campaign.donate(donation("d1", 300)).unwrap();
        campaign.donate(donation("d2", 200)).unwrap();

        assert_eq!(campaign.total_raised(), Satoshis::new(500));
        assert_eq!(campaign.donations().len(), 2);
    }

    #[test]
    fn duplicate_donations_are_ignored() {
        let mut campaign = campaign(1000);
        let repeated = donation("d1", 300);

        campaign.donate(repeated.clone()).unwrap();
        campaign.donate(repeated).unwrap();

        assert_eq!(campaign.total_raised(), Satoshis::new(300));
        assert_eq!(campaign.donations().len(), 1);
    }

    #[test]
    fn owner_cannot_donate_to_own_campaign() {
        let mut campaign = campaign(1000);
        let owner = campaign.account_id();

        let result = campaign.donate(Donation {
            idempotency_key: "d1".into(),
            account_id: owner,
            amount: Satoshis::new(100),
        });

        assert!(matches!(result, Err(DomainError::SelfDonation)));
        assert_eq!(campaign.total_raised(), Satoshis::zero());
    }

    #[test]
    fn donation_reaching_the_goal_exactly_is_accepted() {
        let mut campaign = campaign(1000);

        campaign.donate(donation("d1", 1000)).unwrap();

        assert!(campaign.goal_reached());
        assert_eq!(campaign.total_raised(), Satoshis::new(1000));
    }

    #[test]
    fn donations_after_the_goal_are_rejected() {
        let mut campaign = campaign(1000);
        campaign.donate(donation("d1", 1000)).unwrap();

        let result = campaign.donate(donation("d2", 1));

        assert!(matches!(result, Err(DomainError::GoalReached)));
        assert_eq!(campaign.total_raised(), Satoshis::new(1000));
    }

    #[test]
    fn rejection_does_not_consume_the_key() {
        let mut campaign = campaign(1000);
        let owner = campaign.account_id();

        campaign
            .donate(Donation {
                idempotency_key: "d1".into(),
                account_id: owner,
                amount: Satoshis::new(100),
            })
            .unwrap_err();

        // The same key from a different donor succeeds.
        campaign.donate(donation("d1", 100)).unwrap();
        assert_eq!(campaign.total_raised(), Satoshis::new(100));
    }
}
