//! # Graft
//!
//! A guild-scoped, capability-sandboxed plugin runtime for chat bots.
//!
//! Third parties extend a chat-bot host with small textual plugins written
//! in a restricted DSL. Graft parses them, statically checks their declared
//! capability scopes, rewrites their bodies into an executable script form,
//! and dispatches chat events into per-plugin sandboxes with bounded time
//! budgets, cooldowns, and outbound-HTTP rate control.
//!
//! This crate re-exports the two layers:
//!
//! - [`graft_core`] — parsing, scope validation, transpilation, and the
//!   canonical script language. Pure and synchronous.
//! - [`graft_runtime`] — the sandbox, plugin manager, and dispatcher, plus
//!   the collaborator traits ([`ChatHost`], [`PluginStore`]) the embedding
//!   application implements.
//!
//! ## Example
//!
//! ```rust,ignore
//! use graft::prelude::*;
//!
//! let config = GraftConfig::load()?;
//! graft::logging::init_from_config(&config.logging);
//!
//! let (manager, triggers) = PluginManager::new(config, host, store, fetcher);
//! let dispatcher = Dispatcher::new(manager.clone());
//! dispatcher.spawn_trigger_loop(triggers);
//!
//! manager.load_guild("guild-id").await;
//! dispatcher.on_message(incoming).await;
//! ```

pub use graft_core as core;
pub use graft_runtime as runtime;

pub use graft_runtime::logging;

pub use graft_core::{
    ExecContext, ParseError, PluginDefinition, PluginManifest, ScopeError, ScopeWarning,
    SettingValue, SettingsSchema, ValueKind, parse_definition, parse_manifest, parse_settings,
};
pub use graft_runtime::{
    ButtonClick, ChatHost, Dispatcher, ErrorReport, ExecError, GraftConfig, HttpSourceFetcher,
    IncomingMessage, LoadedPlugin, ManagerError, OutgoingMessage, PluginManager, PluginStore,
    ReactionAdd, SourceFetcher,
};

/// Common imports for embedders.
pub mod prelude {
    pub use graft_core::{ExecContext, PluginDefinition, PluginManifest, ScopeWarning};
    pub use graft_runtime::{
        ButtonClick, ChatHost, Dispatcher, GraftConfig, IncomingMessage, OutgoingMessage,
        PluginManager, PluginStore, ReactionAdd, SourceFetcher,
    };
}
