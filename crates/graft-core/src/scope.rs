//! Capability-scope validation.
//!
//! Maps capability-reaching constructs found in plugin source to the scope
//! each requires, then verifies the manifest's declared scope set covers
//! everything the plugin actually does. A plugin that fails validation is
//! never loaded. Unused declared imports are reported as warnings, not
//! failures.

use crate::definition::PluginDefinition;
use crate::error::{ScopeError, ScopeResult, ScopeWarning};
use crate::manifest::PluginManifest;

/// Scope required to send or forward messages.
pub const SCOPE_MESSAGES_SEND: &str = "messages.send";
/// Scope required to delete messages.
pub const SCOPE_MESSAGES_MANAGE: &str = "messages.manage";
/// Scope required to create or delete channels.
pub const SCOPE_CHANNELS_MANAGE: &str = "channels.manage";
/// Scope required to read guild and channel metadata.
pub const SCOPE_GUILD_READ: &str = "guild.read";
/// Scope required to look up users.
pub const SCOPE_USERS_READ: &str = "users.read";
/// Scope required to declare button handlers or attach button rows.
pub const SCOPE_INTERACTIONS_BUTTONS: &str = "interactions.buttons";
/// Scope required to declare reaction handlers.
pub const SCOPE_REACTIONS_LISTEN: &str = "reactions.listen";
/// Scope required to read plugin storage.
pub const SCOPE_STORAGE_READ: &str = "storage.read";
/// Scope required to write plugin storage.
pub const SCOPE_STORAGE_WRITE: &str = "storage.write";
/// Scope required for outbound HTTP.
pub const SCOPE_NET_HTTP: &str = "net.http";
/// Scope required to emit triggers.
pub const SCOPE_EVENTS_EMIT: &str = "events.emit";

/// Call forms in plugin source and the scope each one requires.
///
/// The table scans the pre-transpile source, so it lists the forms authors
/// actually write.
const CALL_SCOPES: &[(&str, &str)] = &[
    ("send(", SCOPE_MESSAGES_SEND),
    ("send_to(", SCOPE_MESSAGES_SEND),
    ("delete_message(", SCOPE_MESSAGES_MANAGE),
    ("create_channel(", SCOPE_CHANNELS_MANAGE),
    ("delete_channel(", SCOPE_CHANNELS_MANAGE),
    ("fetch_channel(", SCOPE_GUILD_READ),
    ("fetch_guild(", SCOPE_GUILD_READ),
    ("fetch_user(", SCOPE_USERS_READ),
    ("button_row(", SCOPE_INTERACTIONS_BUTTONS),
    ("storage_get(", SCOPE_STORAGE_READ),
    ("storage_query(", SCOPE_STORAGE_READ),
    ("storage_set(", SCOPE_STORAGE_WRITE),
    ("storage_delete(", SCOPE_STORAGE_WRITE),
    ("http_get(", SCOPE_NET_HTTP),
    ("http_post(", SCOPE_NET_HTTP),
    ("http_put(", SCOPE_NET_HTTP),
    ("http_delete(", SCOPE_NET_HTTP),
    ("emit(", SCOPE_EVENTS_EMIT),
];

/// Source patterns that count as "using" each importable library, for the
/// unused-import lint.
const IMPORT_USAGE: &[(&str, &[&str])] = &[
    ("math", &["math."]),
    ("text", &["text."]),
    ("time", &["now(", "timespan(", "format_duration(", "wait(", "sleep("]),
    ("random", &["random_int(", "random_choice("]),
    ("http", &["http_get(", "http_post(", "http_put(", "http_delete("]),
    (
        "storage",
        &["storage_get(", "storage_set(", "storage_delete(", "storage_query("],
    ),
];

/// Computes the set of scopes this definition requires, in first-use order.
pub fn required_scopes(def: &PluginDefinition) -> Vec<String> {
    let mut required: Vec<String> = Vec::new();
    let mut push = |scope: &str| {
        if !required.iter().any(|s| s == scope) {
            required.push(scope.to_string());
        }
    };

    for (pattern, scope) in CALL_SCOPES {
        if def.source.contains(pattern) {
            push(scope);
        }
    }
    if !def.buttons.is_empty() {
        push(SCOPE_INTERACTIONS_BUTTONS);
    }
    if !def.reactions.is_empty() {
        push(SCOPE_REACTIONS_LISTEN);
    }

    required
}

/// Validates declared scopes against required scopes and lints imports.
///
/// Returns the non-fatal warnings on success; fails with the exact missing
/// scope list otherwise. Pure function of the parsed definition and the
/// manifest's declarations.
pub fn validate(
    def: &PluginDefinition,
    manifest: &PluginManifest,
) -> ScopeResult<Vec<ScopeWarning>> {
    let missing: Vec<String> = required_scopes(def)
        .into_iter()
        .filter(|scope| !manifest.scopes.iter().any(|s| s == scope))
        .collect();

    if !missing.is_empty() {
        return Err(ScopeError::MissingScopes { missing });
    }

    let mut warnings = Vec::new();
    for import in &def.imports {
        let used = IMPORT_USAGE
            .iter()
            .find(|(lib, _)| lib == import)
            .map(|(_, patterns)| patterns.iter().any(|p| def.source.contains(p)))
            .unwrap_or(true);
        if !used {
            warnings.push(ScopeWarning::UnusedImport(import.clone()));
        }
    }

    Ok(warnings)
}
