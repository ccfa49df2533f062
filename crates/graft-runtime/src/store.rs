//! Persistence collaborator contract.
//!
//! Installed-plugin records, audit log entries, marketplace listings, and
//! the plugin-scoped key/value tables all live behind [`PluginStore`]; the
//! runtime only issues simple key-based CRUD against it. Plugin source is
//! fetched through [`SourceFetcher`] so tests never touch the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{HostError, HostResult};

// =============================================================================
// Records
// =============================================================================

/// One installed plugin in one guild, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPluginRecord {
    /// Marketplace plugin id.
    pub plugin_id: String,
    /// Guild the plugin is installed in.
    pub guild_id: String,
    /// Display name, denormalized from the manifest at install time.
    pub display_name: String,
    /// Whether the plugin is enabled. A loaded plugin exists iff this is
    /// set.
    pub enabled: bool,
    /// Install timestamp, unix seconds.
    pub installed_at: u64,
    /// Settings overlay: raw values keyed by setting key. Coerced against
    /// the schema at load time.
    pub settings: HashMap<String, String>,
}

/// One append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Guild the action happened in.
    pub guild_id: String,
    /// Plugin the action concerns.
    pub plugin_id: String,
    /// Action tag: `install`, `enable`, `disable`, `uninstall`, `settings`.
    pub action: String,
    /// Who performed the action.
    pub actor_id: String,
    /// Free-text detail.
    pub detail: String,
    /// Timestamp, unix seconds.
    pub at: u64,
}

/// Marketplace listing lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    /// Submitted, awaiting review.
    Pending,
    /// Visible in the marketplace.
    Published,
    /// Pulled from the marketplace. Existing installs keep working.
    Delisted,
}

/// A marketplace listing looked up at install and startup time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketListing {
    /// Plugin id.
    pub plugin_id: String,
    /// Listing name.
    pub name: String,
    /// Lifecycle state. Only published listings can be installed.
    pub status: ListingStatus,
    /// Whether the listing passed review. Unapproved plugins cannot be
    /// installed.
    pub approved: bool,
    /// Where the plugin source is downloaded from.
    pub download_url: String,
    /// Download counter.
    pub downloads: u64,
}

// =============================================================================
// PluginStore Trait
// =============================================================================

/// The persistence collaborator. All state that survives a restart lives
/// behind this trait.
#[async_trait]
pub trait PluginStore: Send + Sync {
    /// Fetches one installed-plugin record.
    async fn get_installed(
        &self,
        guild_id: &str,
        plugin_id: &str,
    ) -> HostResult<Option<InstalledPluginRecord>>;

    /// Lists every installed-plugin record for a guild.
    async fn list_installed(&self, guild_id: &str) -> HostResult<Vec<InstalledPluginRecord>>;

    /// Creates or replaces an installed-plugin record.
    async fn upsert_installed(&self, record: InstalledPluginRecord) -> HostResult<()>;

    /// Deletes an installed-plugin record.
    async fn delete_installed(&self, guild_id: &str, plugin_id: &str) -> HostResult<()>;

    /// Appends an audit log entry.
    async fn append_audit(&self, entry: AuditEntry) -> HostResult<()>;

    /// Looks up a marketplace listing.
    async fn get_listing(&self, plugin_id: &str) -> HostResult<Option<MarketListing>>;

    /// Bumps a listing's download counter.
    async fn increment_downloads(&self, plugin_id: &str) -> HostResult<()>;

    /// Writes a value into a plugin-scoped table.
    async fn kv_set(&self, table: &str, key: &str, value: Value) -> HostResult<()>;

    /// Reads a value from a plugin-scoped table.
    async fn kv_get(&self, table: &str, key: &str) -> HostResult<Option<Value>>;

    /// Deletes a key from a plugin-scoped table.
    async fn kv_delete(&self, table: &str, key: &str) -> HostResult<()>;

    /// Lists every entry of a plugin-scoped table.
    async fn kv_query(&self, table: &str) -> HostResult<Vec<(String, Value)>>;
}

/// A shared persistence handle.
pub type SharedStore = Arc<dyn PluginStore>;

// =============================================================================
// Source Fetching
// =============================================================================

/// Downloads plugin source text by URL.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetches the source at `url` as UTF-8 text.
    async fn fetch(&self, url: &str) -> HostResult<String>;
}

/// A shared source-fetcher handle.
pub type SharedFetcher = Arc<dyn SourceFetcher>;

/// The default fetcher: a plain HTTP GET with a bounded timeout.
pub struct HttpSourceFetcher {
    client: reqwest::Client,
}

impl HttpSourceFetcher {
    /// Creates a fetcher with the given request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpSourceFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, url: &str) -> HostResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HostError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(HostError::Network(format!(
                "download failed with HTTP {}",
                response.status().as_u16()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| HostError::Network(e.to_string()))
    }
}
