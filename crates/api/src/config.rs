//! Application configuration loaded from environment variables.

use std::time::Duration;

/// LNbits connection settings.
///
/// Read from `LNBITS_API_URL`, `LNBITS_INVOICE_KEY` and
/// `LNBITS_ADMIN_KEY`; the processor is only wired when all three are
/// present.
#[derive(Debug, Clone)]
pub struct LnBitsConfig {
    pub api_url: String,
    pub invoice_key: String,
    pub admin_key: String,
}

/// Server configuration with sensible defaults for local runs.
///
/// Reads from environment variables:
/// - `HOST` - bind address (default: `"0.0.0.0"`)
/// - `PORT` - listen port (default: `3000`)
/// - `DATABASE_URL` - PostgreSQL connection string; when unset the
///   service runs on the in-memory backend
/// - `OUTBOX_INTERVAL_MS` - outbox poll interval (default: `100`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub outbox_interval: Duration,
    pub lnbits: Option<LnBitsConfig>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let lnbits = match (
            std::env::var("LNBITS_API_URL"),
            std::env::var("LNBITS_INVOICE_KEY"),
            std::env::var("LNBITS_ADMIN_KEY"),
        ) {
            (Ok(api_url), Ok(invoice_key), Ok(admin_key)) => Some(LnBitsConfig {
                api_url,
                invoice_key,
                admin_key,
            }),
            _ => None,
        };

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            outbox_interval: Duration::from_millis(
                std::env::var("OUTBOX_INTERVAL_MS")
                    .ok()
                    .and_then(|interval| interval.parse().ok())
                    .unwrap_or(100),
            ),
            lnbits,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            outbox_interval: Duration::from_millis(100),
            lnbits: None,
        }
    }
}
