//! Crowdfunding context: campaigns collecting donations toward a goal.

pub mod aggregate;
pub mod handlers;
pub mod store;

pub use aggregate::{Campaign, Donation};
pub use handlers::{CAMPAIGN_ID_KEY, register_crowdfunding_handlers};
pub use store::{CAMPAIGNS_DDL, CampaignRepository, campaign_repository};
