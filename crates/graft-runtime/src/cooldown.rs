//! Per-user action cooldowns.
//!
//! Expiry instants keyed by (guild, plugin, action, user). An action is
//! permitted iff no entry exists or its expiry has passed. The public
//! methods read the real clock; the `_at` forms take an explicit instant so
//! tests drive a simulated clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// The full cooldown key: one namespace per (guild, plugin, action, user).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    /// Guild id.
    pub guild_id: String,
    /// Plugin id.
    pub plugin_id: String,
    /// Action key: command name, button id, or a plugin-chosen key.
    pub action: String,
    /// Acting user id.
    pub user_id: String,
}

impl CooldownKey {
    /// Builds a key.
    pub fn new(
        guild_id: impl Into<String>,
        plugin_id: impl Into<String>,
        action: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            plugin_id: plugin_id.into(),
            action: action.into(),
            user_id: user_id.into(),
        }
    }
}

/// Expiry store shared by every loaded plugin of a manager instance.
#[derive(Default)]
pub struct CooldownStore {
    entries: RwLock<HashMap<CooldownKey, Instant>>,
}

impl CooldownStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a cooldown of `duration` from now.
    pub fn set(&self, key: CooldownKey, duration: Duration) {
        self.set_at(key, duration, Instant::now());
    }

    /// Starts a cooldown of `duration` from `now`.
    pub fn set_at(&self, key: CooldownKey, duration: Duration, now: Instant) {
        let mut entries = self.entries.write();
        // Opportunistic prune keeps the table bounded by live entries.
        entries.retain(|_, expiry| *expiry > now);
        entries.insert(key, now + duration);
    }

    /// Whether the action is currently on cooldown.
    pub fn is_active(&self, key: &CooldownKey) -> bool {
        self.is_active_at(key, Instant::now())
    }

    /// Whether the action is on cooldown at `now`.
    pub fn is_active_at(&self, key: &CooldownKey, now: Instant) -> bool {
        self.remaining_at(key, now).is_some()
    }

    /// Remaining cooldown, `None` when the action is permitted.
    pub fn remaining(&self, key: &CooldownKey) -> Option<Duration> {
        self.remaining_at(key, Instant::now())
    }

    /// Remaining cooldown at `now`.
    pub fn remaining_at(&self, key: &CooldownKey, now: Instant) -> Option<Duration> {
        let entries = self.entries.read();
        let expiry = entries.get(key)?;
        if *expiry > now {
            Some(*expiry - now)
        } else {
            None
        }
    }

    /// Drops every entry belonging to one plugin in one guild. Called when
    /// the plugin is unloaded.
    pub fn clear_plugin(&self, guild_id: &str, plugin_id: &str) {
        self.entries
            .write()
            .retain(|key, _| !(key.guild_id == guild_id && key.plugin_id == plugin_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str) -> CooldownKey {
        CooldownKey::new("g1", "p1", "greet", user)
    }

    #[test]
    fn set_then_check_is_active() {
        let store = CooldownStore::new();
        let now = Instant::now();
        store.set_at(key("u1"), Duration::from_secs(5), now);
        assert!(store.is_active_at(&key("u1"), now));
    }

    #[test]
    fn expires_after_duration() {
        let store = CooldownStore::new();
        let now = Instant::now();
        store.set_at(key("u1"), Duration::from_secs(5), now);

        let later = now + Duration::from_secs(5);
        assert!(!store.is_active_at(&key("u1"), later));
    }

    #[test]
    fn remaining_counts_down() {
        let store = CooldownStore::new();
        let now = Instant::now();
        store.set_at(key("u1"), Duration::from_secs(10), now);

        let remaining = store
            .remaining_at(&key("u1"), now + Duration::from_secs(4))
            .unwrap();
        assert_eq!(remaining, Duration::from_secs(6));
    }

    #[test]
    fn unknown_key_is_permitted() {
        let store = CooldownStore::new();
        assert!(!store.is_active_at(&key("nobody"), Instant::now()));
    }

    #[test]
    fn users_have_independent_namespaces() {
        let store = CooldownStore::new();
        let now = Instant::now();
        store.set_at(key("u1"), Duration::from_secs(5), now);
        assert!(store.is_active_at(&key("u1"), now));
        assert!(!store.is_active_at(&key("u2"), now));
    }

    #[test]
    fn clear_plugin_drops_only_that_plugin() {
        let store = CooldownStore::new();
        let now = Instant::now();
        store.set_at(key("u1"), Duration::from_secs(60), now);
        store.set_at(
            CooldownKey::new("g1", "p2", "other", "u1"),
            Duration::from_secs(60),
            now,
        );

        store.clear_plugin("g1", "p1");
        assert!(!store.is_active_at(&key("u1"), now));
        assert!(store.is_active_at(&CooldownKey::new("g1", "p2", "other", "u1"), now));
    }
}
