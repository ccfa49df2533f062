//! Plugin lifecycle management.
//!
//! [`PluginManager`] owns all per-guild runtime state: the loaded-plugin
//! tables, the cooldown store, and the HTTP rate limiter. Plugins move
//! through install / enable / disable / uninstall, and the manager holds
//! the invariant that a [`LoadedPlugin`] exists for (guild, plugin) iff the
//! persisted record is enabled.
//!
//! Loading a plugin means: download its source from the marketplace
//! listing, parse manifest + settings + definition, validate scopes, and
//! build a capability sandbox bound to the guild. A failure anywhere aborts
//! that plugin only; other plugins in the guild keep loading.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use graft_core::manifest::{SettingsSchema, ValueKind};
use graft_core::{
    ParseError, PluginDefinition, PluginManifest, ScopeError, ScopeWarning, parse_definition,
    parse_manifest, parse_settings, scope,
};

use crate::config::GraftConfig;
use crate::cooldown::CooldownStore;
use crate::error::HostError;
use crate::host::SharedHost;
use crate::ratelimit::HttpRateLimiter;
use crate::sandbox::{Sandbox, SandboxBuilder, TriggerRequest, TriggerSender};
use crate::store::{
    AuditEntry, InstalledPluginRecord, ListingStatus, SharedFetcher, SharedStore,
};

// =============================================================================
// Errors
// =============================================================================

/// Failures of the plugin lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The plugin source failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The plugin uses undeclared scopes.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// A collaborator call failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// No marketplace listing exists for the plugin.
    #[error("plugin '{0}' has no marketplace listing")]
    NotListed(String),

    /// The listing exists but is not approved.
    #[error("plugin '{0}' is not approved for installation")]
    NotApproved(String),

    /// The listing exists but is not published.
    #[error("plugin '{0}' is not published in the marketplace")]
    NotPublished(String),

    /// The plugin is already installed in the guild.
    #[error("plugin '{0}' is already installed in this guild")]
    AlreadyInstalled(String),

    /// The plugin is not installed in the guild.
    #[error("plugin '{0}' is not installed in this guild")]
    NotInstalled(String),

    /// A settings update named an undeclared key.
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),

    /// A settings update value does not fit the declared type.
    #[error("setting '{key}' expects {expected}")]
    InvalidSetting {
        /// The setting key.
        key: String,
        /// What the declared type accepts.
        expected: &'static str,
    },
}

/// Result type for lifecycle operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

// =============================================================================
// Loaded Plugins
// =============================================================================

/// A plugin that is enabled and ready to dispatch: parsed definition plus a
/// sandbox bound to its guild.
#[derive(Debug)]
pub struct LoadedPlugin {
    /// Marketplace plugin id.
    pub plugin_id: String,
    /// Parsed manifest.
    pub manifest: PluginManifest,
    /// Declared settings schema.
    pub schema: SettingsSchema,
    /// Parsed definition, shared across rebuilds.
    pub definition: Arc<PluginDefinition>,
    /// The capability sandbox.
    pub sandbox: Arc<Sandbox>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// PluginManager
// =============================================================================

/// Central owner of per-guild plugin state.
pub struct PluginManager {
    config: GraftConfig,
    host: SharedHost,
    store: SharedStore,
    fetcher: SharedFetcher,
    cooldowns: Arc<CooldownStore>,
    limiter: Arc<HttpRateLimiter>,
    /// Loaded plugins per guild, in load order. Load order is stable and
    /// decides first-match dispatch priority.
    loaded: RwLock<HashMap<String, Vec<Arc<LoadedPlugin>>>>,
    trigger_tx: TriggerSender,
}

impl PluginManager {
    /// Creates a manager and the receiving half of the trigger channel,
    /// which the dispatcher consumes.
    pub fn new(
        config: GraftConfig,
        host: SharedHost,
        store: SharedStore,
        fetcher: SharedFetcher,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TriggerRequest>) {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let limiter = Arc::new(HttpRateLimiter::new(config.http.clone()));
        let manager = Arc::new(Self {
            config,
            host,
            store,
            fetcher,
            cooldowns: Arc::new(CooldownStore::new()),
            limiter,
            loaded: RwLock::new(HashMap::new()),
            trigger_tx,
        });
        (manager, trigger_rx)
    }

    /// The runtime configuration.
    pub fn config(&self) -> &GraftConfig {
        &self.config
    }

    /// The shared cooldown store.
    pub fn cooldowns(&self) -> &Arc<CooldownStore> {
        &self.cooldowns
    }

    /// The shared HTTP rate limiter.
    pub fn limiter(&self) -> &Arc<HttpRateLimiter> {
        &self.limiter
    }

    /// The chat host.
    pub fn host(&self) -> &SharedHost {
        &self.host
    }

    /// Installed records for a guild, straight from the persistence layer.
    /// Used by management surfaces to show install state and settings.
    pub async fn list_installed(&self, guild_id: &str) -> ManagerResult<Vec<InstalledPluginRecord>> {
        Ok(self.store.list_installed(guild_id).await?)
    }

    // ── Loaded-table access ──────────────────────────────────────────────

    /// A snapshot of the guild's loaded plugins in load order.
    pub fn snapshot(&self, guild_id: &str) -> Vec<Arc<LoadedPlugin>> {
        self.loaded
            .read()
            .get(guild_id)
            .cloned()
            .unwrap_or_default()
    }

    /// One loaded plugin, if present.
    pub fn get_loaded(&self, guild_id: &str, plugin_id: &str) -> Option<Arc<LoadedPlugin>> {
        self.loaded
            .read()
            .get(guild_id)?
            .iter()
            .find(|p| p.plugin_id == plugin_id)
            .cloned()
    }

    fn register(&self, guild_id: &str, plugin: Arc<LoadedPlugin>) {
        let mut loaded = self.loaded.write();
        let table = loaded.entry(guild_id.to_string()).or_default();
        if let Some(existing) = table.iter_mut().find(|p| p.plugin_id == plugin.plugin_id) {
            *existing = plugin;
        } else {
            table.push(plugin);
        }
    }

    fn unregister(&self, guild_id: &str, plugin_id: &str) {
        let mut loaded = self.loaded.write();
        if let Some(table) = loaded.get_mut(guild_id) {
            table.retain(|p| p.plugin_id != plugin_id);
            if table.is_empty() {
                loaded.remove(guild_id);
            }
        }
        self.cooldowns.clear_plugin(guild_id, plugin_id);
        self.limiter.clear_plugin(guild_id, plugin_id);
    }

    // ── Loading ──────────────────────────────────────────────────────────

    /// Downloads, parses, validates, and sandboxes one installed record.
    async fn build_loaded(
        &self,
        record: &InstalledPluginRecord,
    ) -> ManagerResult<(Arc<LoadedPlugin>, Vec<ScopeWarning>)> {
        let listing = self
            .store
            .get_listing(&record.plugin_id)
            .await?
            .ok_or_else(|| ManagerError::NotListed(record.plugin_id.clone()))?;

        let source = self.fetcher.fetch(&listing.download_url).await?;
        let manifest = parse_manifest(&source)?;
        let schema = parse_settings(&source)?;
        let definition = Arc::new(parse_definition(&source)?);

        let warnings = scope::validate(&definition, &manifest)?;
        for warning in &warnings {
            warn!(
                guild = %record.guild_id,
                plugin = %record.plugin_id,
                "{warning}"
            );
        }

        let sandbox = SandboxBuilder::new(
            record.guild_id.clone(),
            record.plugin_id.clone(),
            Arc::clone(&self.host),
            Arc::clone(&self.store),
            Arc::clone(&self.cooldowns),
            Arc::clone(&self.limiter),
            self.trigger_tx.clone(),
        )
        .imports(definition.imports.clone())
        .settings(&schema, &record.settings)
        .timeout(self.config.handler_timeout())
        .build();

        Ok((
            Arc::new(LoadedPlugin {
                plugin_id: record.plugin_id.clone(),
                manifest,
                schema,
                definition,
                sandbox: Arc::new(sandbox),
            }),
            warnings,
        ))
    }

    /// Runs a plugin's `on_load` body, detached from the caller. Failures
    /// are logged, never propagated.
    fn spawn_on_load(&self, guild_id: &str, plugin: &Arc<LoadedPlugin>) {
        let Some(body) = plugin.definition.on_load.clone() else {
            return;
        };
        let plugin = Arc::clone(plugin);
        let ctx = graft_core::ExecContext::Trigger {
            guild_id: guild_id.to_string(),
            channel_id: None,
            user_id: None,
            name: "on_load".to_string(),
        };
        tokio::spawn(async move {
            if let Err(e) = plugin.sandbox.execute(&body, &ctx).await {
                error!(
                    plugin = %plugin.plugin_id,
                    error = %e,
                    "on_load handler failed"
                );
            }
        });
    }

    /// Loads every enabled plugin of a guild, typically at startup.
    /// Per-plugin failures are logged and skipped. Returns the number of
    /// plugins loaded.
    pub async fn load_guild(&self, guild_id: &str) -> usize {
        let records = match self.store.list_installed(guild_id).await {
            Ok(records) => records,
            Err(e) => {
                error!(guild = %guild_id, error = %e, "Failed to list installed plugins");
                return 0;
            }
        };

        let mut count = 0;
        for record in records.into_iter().filter(|r| r.enabled) {
            match self.build_loaded(&record).await {
                Ok((plugin, _)) => {
                    self.register(guild_id, Arc::clone(&plugin));
                    self.spawn_on_load(guild_id, &plugin);
                    count += 1;
                    debug!(guild = %guild_id, plugin = %record.plugin_id, "Plugin loaded");
                }
                Err(e) => {
                    error!(
                        guild = %guild_id,
                        plugin = %record.plugin_id,
                        error = %e,
                        "Plugin failed to load, skipping"
                    );
                }
            }
        }
        info!(guild = %guild_id, count, "Guild plugins loaded");
        count
    }

    // ── Lifecycle operations ─────────────────────────────────────────────

    async fn audit(&self, guild_id: &str, plugin_id: &str, action: &str, actor_id: &str, detail: String) {
        let entry = AuditEntry {
            guild_id: guild_id.to_string(),
            plugin_id: plugin_id.to_string(),
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            detail,
            at: now_secs(),
        };
        if let Err(e) = self.store.append_audit(entry).await {
            warn!(guild = %guild_id, plugin = %plugin_id, error = %e, "Audit append failed");
        }
    }

    /// Installs a plugin into a guild: marketplace lookup, download, parse,
    /// scope validation, persist, load. Returns the loaded plugin and any
    /// lint warnings for the installer.
    pub async fn install(
        &self,
        guild_id: &str,
        plugin_id: &str,
        actor_id: &str,
    ) -> ManagerResult<(Arc<LoadedPlugin>, Vec<ScopeWarning>)> {
        if self.store.get_installed(guild_id, plugin_id).await?.is_some() {
            return Err(ManagerError::AlreadyInstalled(plugin_id.to_string()));
        }
        let listing = self
            .store
            .get_listing(plugin_id)
            .await?
            .ok_or_else(|| ManagerError::NotListed(plugin_id.to_string()))?;
        if listing.status != ListingStatus::Published {
            return Err(ManagerError::NotPublished(plugin_id.to_string()));
        }
        if !listing.approved {
            return Err(ManagerError::NotApproved(plugin_id.to_string()));
        }

        let record = InstalledPluginRecord {
            plugin_id: plugin_id.to_string(),
            guild_id: guild_id.to_string(),
            display_name: listing.name.clone(),
            enabled: true,
            installed_at: now_secs(),
            settings: HashMap::new(),
        };

        let (plugin, warnings) = self.build_loaded(&record).await?;
        self.store.upsert_installed(record).await?;
        self.register(guild_id, Arc::clone(&plugin));
        self.spawn_on_load(guild_id, &plugin);

        if let Err(e) = self.store.increment_downloads(plugin_id).await {
            warn!(plugin = %plugin_id, error = %e, "Download counter bump failed");
        }
        self.audit(guild_id, plugin_id, "install", actor_id, format!("installed '{}'", plugin.manifest.name))
            .await;
        info!(guild = %guild_id, plugin = %plugin_id, "Plugin installed");

        Ok((plugin, warnings))
    }

    /// Enables a previously disabled plugin and loads it.
    pub async fn enable(
        &self,
        guild_id: &str,
        plugin_id: &str,
        actor_id: &str,
    ) -> ManagerResult<Arc<LoadedPlugin>> {
        let mut record = self
            .store
            .get_installed(guild_id, plugin_id)
            .await?
            .ok_or_else(|| ManagerError::NotInstalled(plugin_id.to_string()))?;

        record.enabled = true;
        let (plugin, _) = self.build_loaded(&record).await?;
        self.store.upsert_installed(record).await?;
        self.register(guild_id, Arc::clone(&plugin));
        self.spawn_on_load(guild_id, &plugin);
        self.audit(guild_id, plugin_id, "enable", actor_id, String::new()).await;
        info!(guild = %guild_id, plugin = %plugin_id, "Plugin enabled");
        Ok(plugin)
    }

    /// Disables a plugin and discards its loaded state.
    pub async fn disable(&self, guild_id: &str, plugin_id: &str, actor_id: &str) -> ManagerResult<()> {
        let mut record = self
            .store
            .get_installed(guild_id, plugin_id)
            .await?
            .ok_or_else(|| ManagerError::NotInstalled(plugin_id.to_string()))?;

        record.enabled = false;
        self.store.upsert_installed(record).await?;
        self.unregister(guild_id, plugin_id);
        self.audit(guild_id, plugin_id, "disable", actor_id, String::new()).await;
        info!(guild = %guild_id, plugin = %plugin_id, "Plugin disabled");
        Ok(())
    }

    /// Uninstalls a plugin: record deleted, loaded state discarded.
    pub async fn uninstall(
        &self,
        guild_id: &str,
        plugin_id: &str,
        actor_id: &str,
    ) -> ManagerResult<()> {
        if self.store.get_installed(guild_id, plugin_id).await?.is_none() {
            return Err(ManagerError::NotInstalled(plugin_id.to_string()));
        }
        self.store.delete_installed(guild_id, plugin_id).await?;
        self.unregister(guild_id, plugin_id);
        self.audit(guild_id, plugin_id, "uninstall", actor_id, String::new()).await;
        info!(guild = %guild_id, plugin = %plugin_id, "Plugin uninstalled");
        Ok(())
    }

    /// Updates one setting value, validated against the declared schema,
    /// and rebuilds the loaded plugin's sandbox with the new overlay.
    pub async fn update_setting(
        &self,
        guild_id: &str,
        plugin_id: &str,
        key: &str,
        value: &str,
        actor_id: &str,
    ) -> ManagerResult<()> {
        let mut record = self
            .store
            .get_installed(guild_id, plugin_id)
            .await?
            .ok_or_else(|| ManagerError::NotInstalled(plugin_id.to_string()))?;

        // Validate against the schema of the loaded revision when we have
        // one; a disabled plugin accepts the overlay and validates on load.
        if let Some(loaded) = self.get_loaded(guild_id, plugin_id) {
            let spec = loaded
                .schema
                .get(key)
                .ok_or_else(|| ManagerError::UnknownSetting(key.to_string()))?;
            match spec.kind {
                ValueKind::Int if value.trim().parse::<i64>().is_err() => {
                    return Err(ManagerError::InvalidSetting {
                        key: key.to_string(),
                        expected: "a whole number",
                    });
                }
                ValueKind::Bool if !matches!(value.trim(), "true" | "false") => {
                    return Err(ManagerError::InvalidSetting {
                        key: key.to_string(),
                        expected: "true or false",
                    });
                }
                _ => {}
            }
        }

        record
            .settings
            .insert(key.to_string(), value.to_string());
        self.store.upsert_installed(record.clone()).await?;

        // Rebuild the resolved settings without re-downloading the source.
        if let Some(loaded) = self.get_loaded(guild_id, plugin_id) {
            let sandbox = SandboxBuilder::new(
                guild_id.to_string(),
                plugin_id.to_string(),
                Arc::clone(&self.host),
                Arc::clone(&self.store),
                Arc::clone(&self.cooldowns),
                Arc::clone(&self.limiter),
                self.trigger_tx.clone(),
            )
            .imports(loaded.definition.imports.clone())
            .settings(&loaded.schema, &record.settings)
            .timeout(self.config.handler_timeout())
            .build();

            self.register(
                guild_id,
                Arc::new(LoadedPlugin {
                    plugin_id: loaded.plugin_id.clone(),
                    manifest: loaded.manifest.clone(),
                    schema: loaded.schema.clone(),
                    definition: Arc::clone(&loaded.definition),
                    sandbox: Arc::new(sandbox),
                }),
            );
        }

        self.audit(
            guild_id,
            plugin_id,
            "settings",
            actor_id,
            format!("{key} = {value}"),
        )
        .await;
        Ok(())
    }
}
