//! Storage adapter for the campaign aggregate.

use async_trait::async_trait;
use sqlx::Row;

use common::{AccountId, CampaignId, Satoshis};
use dispatch::{Persist, Result, Session, Tracked, UnitOfWork};

use super::aggregate::{Campaign, Donation};

/// Campaigns table schema, applied at startup.
pub const CAMPAIGNS_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        campaign_id UUID PRIMARY KEY,
        account_id UUID NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        goal BIGINT NOT NULL,
        total_raised BIGINT NOT NULL,
        donations JSONB NOT NULL,
        version BIGINT NOT NULL
    );
"#;

const COLLECTION: &str = "campaigns";

/// Repository over the campaigns of the current unit of work.
pub struct CampaignRepository<'a> {
    uow: &'a mut UnitOfWork,
}

/// Creates a repository bound to the given unit of work.
pub fn campaign_repository(uow: &mut UnitOfWork) -> CampaignRepository<'_> {
    CampaignRepository { uow }
}

impl CampaignRepository<'_> {
    /// Loads a campaign and registers it for persistence at commit time.
    pub async fn find_by_id(
        &mut self,
        campaign_id: CampaignId,
    ) -> Result<Option<Tracked<Campaign>>> {
        let loaded = match self.uow.session() {
            Session::Postgres(txn) => {
                let row = sqlx::query(
                    r#"
                    SELECT account_id, title, description, goal, total_raised, donations, version
                    FROM campaigns
                    WHERE campaign_id = $1
                    "#,
                )
                .bind(campaign_id.as_uuid())
                .fetch_optional(&mut **txn)
                .await?;

                match row {
                    Some(row) => {
                        let donations: Vec<Donation> = serde_json::from_value(
                            row.try_get::<serde_json::Value, _>("donations")?,
                        )?;
                        Some(Campaign::from_parts(
                            campaign_id,
                            AccountId::from_uuid(row.try_get("account_id")?),
                            row.try_get("title")?,
                            row.try_get("description")?,
                            Satoshis::new(row.try_get("goal")?),
                            Satoshis::new(row.try_get("total_raised")?),
                            donations,
                            row.try_get("version")?,
                        ))
                    }
                    None => None,
                }
            }
            Session::Memory(session) => session
                .get(COLLECTION, &campaign_id.to_string())
                .await
                .map(serde_json::from_value)
                .transpose()?,
        };

        Ok(loaded.map(|campaign| self.track(campaign)))
    }

    /// Inserts a new campaign and registers it for persistence at commit
    /// time.
    pub async fn add(&mut self, campaign: Campaign) -> Result<Tracked<Campaign>> {
        match self.uow.session() {
            Session::Postgres(txn) => {
                sqlx::query(
                    r#"
                    INSERT INTO campaigns
                        (campaign_id, account_id, title, description, goal, total_raised, donations, version)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(campaign.campaign_id().as_uuid())
                .bind(campaign.account_id().as_uuid())
                .bind(campaign.title())
                .bind(campaign.description())
                .bind(campaign.goal().sats())
                .bind(campaign.total_raised().sats())
                .bind(serde_json::to_value(campaign.donations())?)
                .bind(campaign.version())
                .execute(&mut **txn)
                .await?;
            }
            Session::Memory(session) => {
                let document = serde_json::to_value(&campaign)?;
                session.put(COLLECTION, &campaign.campaign_id().to_string(), document);
            }
        }

        Ok(self.track(campaign))
    }

    fn track(&mut self, campaign: Campaign) -> Tracked<Campaign> {
        let tracked = Tracked::new(campaign);
        self.uow.track(Box::new(CampaignWriter {
            campaign: tracked.clone(),
        }));
        tracked
    }
}

struct CampaignWriter {
    campaign: Tracked<Campaign>,
}

#[async_trait]
impl Persist for CampaignWriter {
    async fn persist(&self, session: &mut Session) -> Result<()> {
        let campaign = self.campaign.read().await;
        match session {
            Session::Postgres(txn) => {
                sqlx::query(
                    r#"
                    UPDATE campaigns
                    SET total_raised = $2, donations = $3, version = $4
                    WHERE campaign_id = $1
                    "#,
                )
                .bind(campaign.campaign_id().as_uuid())
                .bind(campaign.total_raised().sats())
                .bind(serde_json::to_value(campaign.donations())?)
                .bind(campaign.version())
                .execute(&mut **txn)
                .await?;
            }
            Session::Memory(memory) => {
                let document = serde_json::to_value(&*campaign)?;
                memory.put(COLLECTION, &campaign.campaign_id().to_string(), document);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::{Backend, MemoryStore};

    #[tokio::test]
    async fn campaign_roundtrip_through_memory_store() {
        let backend = Backend::Memory(MemoryStore::new());
        let campaign_id = CampaignId::new();
        let owner = AccountId::new();

        let mut uow = backend.begin().await.unwrap();
        campaign_repository(&mut uow)
            .add(Campaign::new(
                campaign_id,
                owner,
                "Title",
                "Description",
                Satoshis::new(1000),
            ))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = backend.begin().await.unwrap();
        let campaign = campaign_repository(&mut uow)
            .find_by_id(campaign_id)
            .await
            .unwrap()
            .unwrap();

        let campaign = campaign.read().await;
        assert_eq!(campaign.account_id(), owner);
        assert_eq!(campaign.title(), "Title");
        assert_eq!(campaign.goal(), Satoshis::new(1000));
        assert_eq!(campaign.total_raised(), Satoshis::zero());
    }
}
