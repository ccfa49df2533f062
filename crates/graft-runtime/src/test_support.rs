//! In-memory collaborator doubles shared by the runtime test modules.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::GraftConfig;
use crate::error::{HostError, HostResult};
use crate::host::{
    ChannelInfo, ChatHost, GuildInfo, OutgoingMessage, UserInfo,
};
use crate::manager::PluginManager;
use crate::sandbox::TriggerRequest;
use crate::store::{
    AuditEntry, InstalledPluginRecord, ListingStatus, MarketListing, PluginStore, SourceFetcher,
};

pub const BOT_ID: &str = "bot-1";
pub const LISTING_URL: &str = "https://plugins.example/test.gpl";

// =============================================================================
// MockHost
// =============================================================================

#[derive(Default)]
pub struct MockHost {
    pub sent: Mutex<Vec<(String, OutgoingMessage)>>,
    pub replies: Mutex<Vec<(String, OutgoingMessage)>>,
    pub deleted: Mutex<Vec<(String, String)>>,
    pub created_channels: Mutex<Vec<String>>,
    /// Explicit grants as (user, permission). When `allow_all` is set the
    /// grants are ignored.
    pub grants: Mutex<HashSet<(String, String)>>,
    pub allow_all: Mutex<bool>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            allow_all: Mutex::new(true),
            ..Self::default()
        })
    }

    pub fn deny_all_permissions(&self) {
        *self.allow_all.lock() = false;
    }

    pub fn grant(&self, user_id: &str, permission: &str) {
        self.grants
            .lock()
            .insert((user_id.to_string(), permission.to_string()));
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, m)| m.content.clone())
            .collect()
    }

    pub fn sent_embed_titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, m)| m.embed.as_ref())
            .filter_map(|e| e.get("title").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ChatHost for MockHost {
    fn bot_user_id(&self) -> &str {
        BOT_ID
    }

    async fn send_message(&self, channel_id: &str, message: OutgoingMessage) -> HostResult<String> {
        let mut sent = self.sent.lock();
        sent.push((channel_id.to_string(), message));
        Ok(format!("m{}", sent.len()))
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> HostResult<()> {
        self.deleted
            .lock()
            .push((channel_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn fetch_channel(&self, channel_id: &str) -> HostResult<ChannelInfo> {
        Ok(ChannelInfo {
            id: channel_id.to_string(),
            name: "general".to_string(),
            kind: "text".to_string(),
        })
    }

    async fn create_channel(&self, _guild_id: &str, name: &str) -> HostResult<ChannelInfo> {
        self.created_channels.lock().push(name.to_string());
        Ok(ChannelInfo {
            id: format!("c-{name}"),
            name: name.to_string(),
            kind: "text".to_string(),
        })
    }

    async fn delete_channel(&self, _channel_id: &str) -> HostResult<()> {
        Ok(())
    }

    async fn fetch_guild(&self, guild_id: &str) -> HostResult<GuildInfo> {
        Ok(GuildInfo {
            id: guild_id.to_string(),
            name: "Test Guild".to_string(),
            member_count: 42,
        })
    }

    async fn fetch_user(&self, user_id: &str) -> HostResult<UserInfo> {
        Ok(UserInfo {
            id: user_id.to_string(),
            name: format!("user-{user_id}"),
            bot: false,
        })
    }

    async fn has_permission(
        &self,
        user_id: &str,
        _guild_id: &str,
        permission: &str,
    ) -> HostResult<bool> {
        if *self.allow_all.lock() {
            return Ok(true);
        }
        Ok(self
            .grants
            .lock()
            .contains(&(user_id.to_string(), permission.to_string())))
    }

    async fn reply_interaction(
        &self,
        interaction_id: &str,
        message: OutgoingMessage,
    ) -> HostResult<()> {
        self.replies
            .lock()
            .push((interaction_id.to_string(), message));
        Ok(())
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub installed: Mutex<HashMap<(String, String), InstalledPluginRecord>>,
    pub audits: Mutex<Vec<AuditEntry>>,
    pub listings: Mutex<HashMap<String, MarketListing>>,
    pub kv: Mutex<HashMap<String, Vec<(String, Value)>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_listing(&self, plugin_id: &str, approved: bool, url: &str) {
        self.add_listing_with_status(plugin_id, ListingStatus::Published, approved, url);
    }

    pub fn add_listing_with_status(
        &self,
        plugin_id: &str,
        status: ListingStatus,
        approved: bool,
        url: &str,
    ) {
        self.listings.lock().insert(
            plugin_id.to_string(),
            MarketListing {
                plugin_id: plugin_id.to_string(),
                name: format!("{plugin_id} plugin"),
                status,
                approved,
                download_url: url.to_string(),
                downloads: 0,
            },
        );
    }

    pub fn audit_actions(&self) -> Vec<String> {
        self.audits.lock().iter().map(|a| a.action.clone()).collect()
    }
}

#[async_trait]
impl PluginStore for MemoryStore {
    async fn get_installed(
        &self,
        guild_id: &str,
        plugin_id: &str,
    ) -> HostResult<Option<InstalledPluginRecord>> {
        Ok(self
            .installed
            .lock()
            .get(&(guild_id.to_string(), plugin_id.to_string()))
            .cloned())
    }

    async fn list_installed(&self, guild_id: &str) -> HostResult<Vec<InstalledPluginRecord>> {
        let mut records: Vec<_> = self
            .installed
            .lock()
            .values()
            .filter(|r| r.guild_id == guild_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.installed_at);
        Ok(records)
    }

    async fn upsert_installed(&self, record: InstalledPluginRecord) -> HostResult<()> {
        self.installed.lock().insert(
            (record.guild_id.clone(), record.plugin_id.clone()),
            record,
        );
        Ok(())
    }

    async fn delete_installed(&self, guild_id: &str, plugin_id: &str) -> HostResult<()> {
        self.installed
            .lock()
            .remove(&(guild_id.to_string(), plugin_id.to_string()));
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> HostResult<()> {
        self.audits.lock().push(entry);
        Ok(())
    }

    async fn get_listing(&self, plugin_id: &str) -> HostResult<Option<MarketListing>> {
        Ok(self.listings.lock().get(plugin_id).cloned())
    }

    async fn increment_downloads(&self, plugin_id: &str) -> HostResult<()> {
        if let Some(listing) = self.listings.lock().get_mut(plugin_id) {
            listing.downloads += 1;
        }
        Ok(())
    }

    async fn kv_set(&self, table: &str, key: &str, value: Value) -> HostResult<()> {
        let mut kv = self.kv.lock();
        let rows = kv.entry(table.to_string()).or_default();
        if let Some(row) = rows.iter_mut().find(|(k, _)| k == key) {
            row.1 = value;
        } else {
            rows.push((key.to_string(), value));
        }
        Ok(())
    }

    async fn kv_get(&self, table: &str, key: &str) -> HostResult<Option<Value>> {
        Ok(self
            .kv
            .lock()
            .get(table)
            .and_then(|rows| rows.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())))
    }

    async fn kv_delete(&self, table: &str, key: &str) -> HostResult<()> {
        if let Some(rows) = self.kv.lock().get_mut(table) {
            rows.retain(|(k, _)| k != key);
        }
        Ok(())
    }

    async fn kv_query(&self, table: &str) -> HostResult<Vec<(String, Value)>> {
        Ok(self.kv.lock().get(table).cloned().unwrap_or_default())
    }
}

// =============================================================================
// StaticFetcher
// =============================================================================

pub struct StaticFetcher {
    pub sources: Mutex<HashMap<String, String>>,
}

impl StaticFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sources: Mutex::new(HashMap::new()),
        })
    }

    pub fn add(&self, url: &str, source: &str) {
        self.sources
            .lock()
            .insert(url.to_string(), source.to_string());
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> HostResult<String> {
        self.sources
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("no source at {url}")))
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub manager: Arc<PluginManager>,
    pub host: Arc<MockHost>,
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<StaticFetcher>,
    pub trigger_rx: Option<mpsc::UnboundedReceiver<TriggerRequest>>,
}

/// Builds a manager over the in-memory doubles with one listed plugin
/// (`pl-test`) whose source is `source`.
pub fn fixture_with(config: GraftConfig, source: &str) -> Fixture {
    let host = MockHost::new();
    let store = MemoryStore::new();
    let fetcher = StaticFetcher::new();
    store.add_listing("pl-test", true, LISTING_URL);
    fetcher.add(LISTING_URL, source);

    let (manager, trigger_rx) = PluginManager::new(
        config,
        host.clone() as Arc<dyn ChatHost>,
        store.clone() as Arc<dyn PluginStore>,
        fetcher.clone() as Arc<dyn SourceFetcher>,
    );
    Fixture {
        manager,
        host,
        store,
        fetcher,
        trigger_rx: Some(trigger_rx),
    }
}

/// [`fixture_with`] under the default configuration.
pub fn fixture(source: &str) -> Fixture {
    fixture_with(GraftConfig::default(), source)
}

/// Polls until `predicate` holds or ~2 seconds elapse. Spawned handler
/// tasks only need a few scheduler turns; the deadline is generous.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
