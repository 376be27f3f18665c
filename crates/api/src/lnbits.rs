//! LNbits HTTP adapter for the Lightning processor port.

use async_trait::async_trait;
use serde::Deserialize;

use common::{PaymentHash, Satoshis};
use domain::{InvoiceData, LightningError, LightningProcessor};

use crate::config::LnBitsConfig;

#[derive(Debug, Deserialize)]
struct CreatedInvoice {
    payment_hash: String,
    payment_request: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceState {
    paid: bool,
}

/// Lightning processor backed by an LNbits wallet.
pub struct LnBitsProcessor {
    client: reqwest::Client,
    config: LnBitsConfig,
}

impl LnBitsProcessor {
    /// Creates a processor for the configured wallet.
    pub fn new(config: LnBitsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

fn http_error(error: reqwest::Error) -> LightningError {
    LightningError::new(error.to_string())
}

#[async_trait]
impl LightningProcessor for LnBitsProcessor {
    async fn create_invoice(&self, satoshis: Satoshis) -> Result<InvoiceData, LightningError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("X-Api-Key", &self.config.invoice_key)
            .json(&serde_json::json!({
                "out": false,
                "amount": satoshis.sats(),
                "memo": "funding deposit",
            }))
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            return Err(LightningError::new(format!(
                "invoice creation failed with status {}",
                response.status()
            )));
        }

        let invoice: CreatedInvoice = response.json().await.map_err(http_error)?;
        Ok(InvoiceData {
            payment_hash: PaymentHash::new(invoice.payment_hash),
            payment_request: invoice.payment_request,
        })
    }

    async fn is_invoice_paid(&self, payment_hash: &PaymentHash) -> Result<bool, LightningError> {
        let url = format!("{}/{}", self.config.api_url, payment_hash);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.config.invoice_key)
            .send()
            .await
            .map_err(http_error)?;

        let state: InvoiceState = response.json().await.map_err(http_error)?;
        Ok(state.paid)
    }

    async fn pay_invoice(&self, payment_request: &str) -> Result<(), LightningError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("X-Api-Key", &self.config.admin_key)
            .json(&serde_json::json!({
                "out": true,
                "bolt11": payment_request,
            }))
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            return Err(LightningError::new(format!(
                "invoice payment failed with status {}",
                response.status()
            )));
        }

        Ok(())
    }
}
