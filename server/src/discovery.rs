//! Peer discovery through an HTTP service catalog.
//!
//! The catalog answers `GET <url>` with a JSON array in the Consul catalog
//! shape:
//!
//! ```json
//! [{"Address": "10.0.0.5", "ServiceAddress": "10.0.0.5", "ServicePort": 8080}]
//! ```
//!
//! `ServiceAddress` wins over the node `Address` when both are present.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Budget for one catalog request.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while querying the catalog.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The catalog could not be reached or answered with an error.
    #[error("service catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// An entry has no usable address.
    #[error("catalog entry without address (port {0})")]
    MissingAddress(u16),
}

/// One catalog entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    /// Node address.
    #[serde(rename = "Address", default)]
    pub address: String,
    /// Service address; empty means "same as the node".
    #[serde(rename = "ServiceAddress", default)]
    pub service_address: String,
    /// Service port.
    #[serde(rename = "ServicePort")]
    pub service_port: u16,
}

impl CatalogEntry {
    /// `host:port` of this entry.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::MissingAddress`] if both addresses are empty.
    pub fn seed(&self) -> Result<String, DiscoveryError> {
        let host = if self.service_address.is_empty() {
            &self.address
        } else {
            &self.service_address
        };
        if host.is_empty() {
            return Err(DiscoveryError::MissingAddress(self.service_port));
        }
        Ok(format!("{host}:{}", self.service_port))
    }
}

/// Fetch the peers listed by the catalog at `url`.
///
/// # Errors
///
/// Fails if the catalog is unreachable, answers with a non-2xx status, returns
/// malformed JSON, or lists an entry without address.
pub async fn discover(http: &reqwest::Client, url: &str) -> Result<Vec<String>, DiscoveryError> {
    let entries: Vec<CatalogEntry> = http
        .get(url)
        .timeout(DISCOVERY_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let seeds = entries
        .iter()
        .map(CatalogEntry::seed)
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(url, peers = seeds.len(), "Discovered cluster peers");
    Ok(seeds)
}
