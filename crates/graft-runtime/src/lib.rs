//! # Graft Runtime
//!
//! The execution layer of the Graft plugin runtime.
//!
//! The [`PluginManager`] owns all per-guild state: installed plugins are
//! loaded into per-guild tables (source download → parse → scope validation
//! → sandbox build), and the [`Dispatcher`] routes chat events into them:
//!
//! ```text
//! ┌──────────┐ events ┌────────────┐ match ┌───────────────┐
//! │ ChatHost │───────▶│ Dispatcher │──────▶│ LoadedPlugin  │
//! │ (trait)  │◀───────│            │       │  └─ Sandbox   │
//! └──────────┘ sends  └────────────┘       └───────────────┘
//!        ▲                  ▲ triggers            │
//!        │                  └─────────────────────┘
//!        └──────────── capability calls ──────────┘
//! ```
//!
//! Handler bodies run inside a per-plugin [`Sandbox`](sandbox::Sandbox)
//! with a bounded time budget, a shared [`CooldownStore`](cooldown), and a
//! sliding-window [`HttpRateLimiter`](ratelimit). Failures are classified
//! into [`ErrorReport`]s and surfaced to the originating channel or
//! interaction; they never cross plugin or guild boundaries.

pub mod config;
pub mod cooldown;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod logging;
pub mod manager;
pub mod ratelimit;
pub mod sandbox;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, ConfigResult, GraftConfig, HttpLimits, LogFormat, LoggingConfig};
pub use cooldown::{CooldownKey, CooldownStore};
pub use dispatch::{Dispatcher, shell_split};
pub use error::{ErrorReport, ExecError, ExecResult, HostError, HostResult};
pub use host::{
    ButtonClick, ChannelInfo, ChatHost, GuildInfo, IncomingMessage, OutgoingMessage, ReactionAdd,
    SharedHost, UserInfo,
};
pub use manager::{LoadedPlugin, ManagerError, ManagerResult, PluginManager};
pub use ratelimit::{HttpLogEntry, HttpRateLimiter};
pub use sandbox::{Sandbox, SandboxBuilder, TriggerKind, TriggerRequest};
pub use store::{
    AuditEntry, HttpSourceFetcher, InstalledPluginRecord, ListingStatus, MarketListing,
    PluginStore, SharedFetcher, SharedStore, SourceFetcher,
};
