//! Plugin definition parsing.
//!
//! Scans plugin source for construct headers (`command`, `button`,
//! `reaction`, `event`, `logic`, `on_load`), pulls each body with the block
//! extractor, then recursively extracts named sub-sections the same way.
//! The result is one [`PluginDefinition`] per source revision, reused across
//! every guild that installs that revision.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::block::{extract_block, find_block_start};
use crate::error::{ParseError, ParseResult};
use crate::manifest::{ValueKind, strip_quotes};

/// Libraries a plugin may import with `use <lib>`.
pub const ALLOWED_IMPORTS: &[&str] = &["math", "text", "time", "random", "http", "storage"];

// =============================================================================
// Handler Types
// =============================================================================

/// One declared command parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Binding name inside the handler body.
    pub name: String,
    /// Declared type. String parameters bind greedily at dispatch time.
    pub kind: ValueKind,
    /// Whether invocation without this parameter is an error.
    pub required: bool,
}

/// A chat command exposed by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHandler {
    /// Base token the command is invoked with.
    pub name: String,
    /// Optional subcommand token; `base sub` matches before `base`.
    pub sub: Option<String>,
    /// Short description for help output.
    pub description: String,
    /// Usage string shown on missing parameters.
    pub usage: String,
    /// Positional parameters in declaration order.
    pub params: Vec<ParamSpec>,
    /// Per-user cooldown, if declared.
    pub cooldown_secs: Option<u64>,
    /// Permissions the invoking user must hold.
    pub user_permissions: Vec<String>,
    /// Permissions the bot itself must hold.
    pub bot_permissions: Vec<String>,
    /// Main handler body.
    pub execute: String,
    /// Body run instead of `execute` while the command is on cooldown.
    pub on_cooldown: Option<String>,
    /// Body run when the user lacks a required permission.
    pub on_permission_denied: Option<String>,
    /// Body run when the bot lacks a required permission.
    pub on_bot_permission_denied: Option<String>,
}

impl CommandHandler {
    /// The cooldown/audit key for this command.
    pub fn action_key(&self) -> String {
        match &self.sub {
            Some(sub) => format!("{} {}", self.name, sub),
            None => self.name.clone(),
        }
    }

    /// The usage line shown on a missing-parameter failure. Falls back to a
    /// synthesized `name <required> [optional]` form when none was declared.
    pub fn usage_line(&self) -> String {
        if !self.usage.is_empty() {
            return self.usage.clone();
        }
        let mut line = self.action_key();
        for param in &self.params {
            if param.required {
                line.push_str(&format!(" <{}>", param.name));
            } else {
                line.push_str(&format!(" [{}]", param.name));
            }
        }
        line
    }
}

/// A button-click handler, keyed by a stable component id unique within
/// the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonHandler {
    /// Stable component id.
    pub id: String,
    /// Per-user cooldown, if declared.
    pub cooldown_secs: Option<u64>,
    /// Click handler body.
    pub execute: String,
    /// Body run instead of `execute` while the button is on cooldown.
    pub on_cooldown: Option<String>,
}

/// A reaction-add handler. Every handler across every plugin runs
/// independently per reaction; there is no first-match rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionHandler {
    /// The emoji this handler fires on.
    pub emoji: String,
    /// Per-user cooldown, if declared. Active cooldown skips silently.
    pub cooldown_secs: Option<u64>,
    /// Handler body.
    pub execute: String,
}

/// A passive listener: a boolean predicate evaluated against every non-bot
/// message, plus the action body run when it holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listener {
    /// Predicate expression source. Must be side-effect free.
    pub predicate: String,
    /// Action body.
    pub action: String,
}

/// A named function declared in the logic section, invocable only through
/// the trigger facility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerFn {
    /// Function name.
    pub name: String,
    /// Declared parameter names; trigger data binds to these by name.
    pub params: Vec<String>,
    /// Raw body, transpiled at invocation time.
    pub body: String,
}

/// A custom event: a name with an ordered list of action bodies run when
/// the event is triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomEvent {
    /// Event name.
    pub name: String,
    /// Action bodies in declaration order.
    pub actions: Vec<String>,
}

/// The parsed, guild-independent structure of a plugin revision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDefinition {
    /// Commands in declaration order (order decides match priority).
    pub commands: Vec<CommandHandler>,
    /// Button handlers keyed by component id.
    pub buttons: Vec<ButtonHandler>,
    /// Reaction handlers in declaration order.
    pub reactions: Vec<ReactionHandler>,
    /// Custom events in declaration order.
    pub events: Vec<CustomEvent>,
    /// Passive listeners in declaration order.
    pub listeners: Vec<Listener>,
    /// Logic functions keyed by name.
    pub functions: HashMap<String, TriggerFn>,
    /// Declared imports, validated against [`ALLOWED_IMPORTS`].
    pub imports: Vec<String>,
    /// Body run once when the plugin is loaded.
    pub on_load: Option<String>,
    /// The raw source this definition was parsed from.
    pub source: String,
}

impl PluginDefinition {
    /// Finds a command by base and optional sub token.
    pub fn find_command(&self, name: &str, sub: Option<&str>) -> Option<&CommandHandler> {
        self.commands
            .iter()
            .find(|c| c.name == name && c.sub.as_deref() == sub)
    }

    /// Finds a button handler by component id.
    pub fn find_button(&self, id: &str) -> Option<&ButtonHandler> {
        self.buttons.iter().find(|b| b.id == id)
    }
}

// =============================================================================
// Header Patterns
// =============================================================================

static COMMAND_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*command[ \t]+([A-Za-z0-9_-]+)(?:[ \t]+([A-Za-z0-9_-]+))?[ \t]*\{")
        .unwrap()
});
static BUTTON_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*button[ \t]+([A-Za-z0-9_-]+)[ \t]*\{").unwrap());
static REACTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*reaction[ \t]*\{").unwrap());
static EVENT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*event[ \t]+([A-Za-z0-9_-]+)[ \t]*\{").unwrap());
static LOGIC_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*logic[ \t]*\{").unwrap());
static ON_LOAD_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*on_load[ \t]*\{").unwrap());
static MANIFEST_OR_SETTINGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:manifest|settings)[ \t]*\{").unwrap());
static IMPORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*use[ \t]+([a-z_]+)[ \t]*$").unwrap());
static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*:[ \t]*(.+?)[ \t]*$").unwrap()
});
static PARAM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^param[ \t]+(string|int|bool)[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]+(required|optional)$")
        .unwrap()
});
static EXECUTE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*execute[ \t]*\{").unwrap());
static LISTEN_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*listen[ \t]+when[ \t]+").unwrap());
static FN_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*fn[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]*\(([^)]*)\)[ \t]*\{").unwrap()
});

// =============================================================================
// Parsing Helpers
// =============================================================================

/// Returns `body` with every balanced `{ ... }` span removed, so scalar
/// fields of a construct can be scanned without matching lines inside its
/// sub-blocks.
fn without_blocks(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut cursor = 0;
    while let Some((_, past)) = extract_block(body, cursor) {
        let open = find_block_start(body, cursor).unwrap_or(body.len());
        out.push_str(&body[cursor..open]);
        cursor = past;
    }
    out.push_str(&body[cursor..]);
    out
}

/// Extracts the first `keyword { ... }` sub-block of `body`.
fn section(body: &str, keyword: &str) -> Option<String> {
    for (idx, _) in body.match_indices(keyword) {
        // Must sit at the start of a line (modulo indentation).
        let line_ok = body[..idx]
            .rfind('\n')
            .map(|nl| body[nl + 1..idx].trim().is_empty())
            .unwrap_or_else(|| body[..idx].trim().is_empty());
        if !line_ok {
            continue;
        }
        let after = &body[idx + keyword.len()..];
        let trimmed = after.trim_start();
        if !trimmed.starts_with('{') {
            continue;
        }
        return extract_block(body, idx).map(|(text, _)| text.to_string());
    }
    None
}

/// Reads all `key: value` lines of block-stripped text into a map.
fn scalar_fields(body: &str) -> HashMap<String, String> {
    let stripped = without_blocks(body);
    FIELD_LINE
        .captures_iter(&stripped)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect()
}

fn parse_array(raw: &str) -> Vec<String> {
    let inner = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    if inner.is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|item| strip_quotes(item).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn cooldown_field(fields: &HashMap<String, String>) -> ParseResult<Option<u64>> {
    match fields.get("cooldown") {
        Some(raw) => strip_quotes(raw)
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ParseError::InvalidField {
                field: "cooldown".to_string(),
                reason: format!("'{raw}' is not a whole number of seconds"),
            }),
        None => Ok(None),
    }
}

fn parse_params(body: &str) -> ParseResult<Vec<ParamSpec>> {
    let mut params = Vec::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let cap = PARAM_LINE
            .captures(line)
            .ok_or_else(|| ParseError::InvalidParam(line.to_string()))?;
        let kind = ValueKind::from_keyword(&cap[1])
            .ok_or_else(|| ParseError::InvalidParam(line.to_string()))?;
        params.push(ParamSpec {
            name: cap[2].to_string(),
            kind,
            required: &cap[3] == "required",
        });
    }
    Ok(params)
}

// =============================================================================
// Construct Parsing
// =============================================================================

fn parse_command(source: &str, header_start: usize, body: &str) -> ParseResult<CommandHandler> {
    let cap = COMMAND_HEADER
        .captures_at(source, header_start)
        .ok_or_else(|| ParseError::UnterminatedBlock {
            construct: "command".to_string(),
            offset: header_start,
        })?;
    let name = cap[1].to_string();
    let sub = cap.get(2).map(|m| m.as_str().to_string());

    let fields = scalar_fields(body);
    let execute = section(body, "execute").ok_or_else(|| ParseError::MissingSection {
        construct: format!("command {name}"),
        section: "execute".to_string(),
    })?;
    let params = match section(body, "params") {
        Some(block) => parse_params(&block)?,
        None => Vec::new(),
    };

    Ok(CommandHandler {
        name,
        sub,
        description: fields
            .get("description")
            .map(|v| strip_quotes(v).to_string())
            .unwrap_or_default(),
        usage: fields
            .get("usage")
            .map(|v| strip_quotes(v).to_string())
            .unwrap_or_default(),
        params,
        cooldown_secs: cooldown_field(&fields)?,
        user_permissions: fields
            .get("permissions")
            .map(|v| parse_array(v))
            .unwrap_or_default(),
        bot_permissions: fields
            .get("bot_permissions")
            .map(|v| parse_array(v))
            .unwrap_or_default(),
        execute,
        on_cooldown: section(body, "on_cooldown"),
        on_permission_denied: section(body, "on_permission_denied"),
        on_bot_permission_denied: section(body, "on_bot_permission_denied"),
    })
}

fn parse_button(source: &str, header_start: usize, body: &str) -> ParseResult<ButtonHandler> {
    let cap = BUTTON_HEADER
        .captures_at(source, header_start)
        .ok_or_else(|| ParseError::UnterminatedBlock {
            construct: "button".to_string(),
            offset: header_start,
        })?;
    let id = cap[1].to_string();

    let fields = scalar_fields(body);
    let execute = section(body, "execute").ok_or_else(|| ParseError::MissingSection {
        construct: format!("button {id}"),
        section: "execute".to_string(),
    })?;

    Ok(ButtonHandler {
        id,
        cooldown_secs: cooldown_field(&fields)?,
        execute,
        on_cooldown: section(body, "on_cooldown"),
    })
}

fn parse_reaction(body: &str) -> ParseResult<ReactionHandler> {
    let fields = scalar_fields(body);
    let emoji = fields
        .get("emoji")
        .map(|v| strip_quotes(v).to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ParseError::InvalidField {
            field: "emoji".to_string(),
            reason: "reaction handler must declare an emoji".to_string(),
        })?;
    let execute = section(body, "execute").ok_or_else(|| ParseError::MissingSection {
        construct: "reaction".to_string(),
        section: "execute".to_string(),
    })?;

    Ok(ReactionHandler {
        emoji,
        cooldown_secs: cooldown_field(&fields)?,
        execute,
    })
}

fn parse_event(source: &str, header_start: usize, body: &str) -> ParseResult<CustomEvent> {
    let cap = EVENT_HEADER
        .captures_at(source, header_start)
        .ok_or_else(|| ParseError::UnterminatedBlock {
            construct: "event".to_string(),
            offset: header_start,
        })?;
    let name = cap[1].to_string();

    // An event is an ordered list of execute bodies; collect them all.
    let mut actions = Vec::new();
    let mut cursor = 0;
    while let Some(m) = EXECUTE_HEADER.find_at(body, cursor) {
        let (action, past) =
            extract_block(body, m.start()).ok_or_else(|| ParseError::UnterminatedBlock {
                construct: format!("event {name}"),
                offset: m.start(),
            })?;
        actions.push(action.to_string());
        cursor = past;
    }
    if actions.is_empty() {
        return Err(ParseError::MissingSection {
            construct: format!("event {name}"),
            section: "execute".to_string(),
        });
    }

    Ok(CustomEvent { name, actions })
}

fn parse_logic(
    body: &str,
    listeners: &mut Vec<Listener>,
    functions: &mut HashMap<String, TriggerFn>,
) -> ParseResult<()> {
    let mut cursor = 0;
    loop {
        let listen = LISTEN_HEADER.find_at(body, cursor);
        let func = FN_HEADER.find_at(body, cursor);

        match (listen, func) {
            (Some(l), f) if f.map(|f| l.start() < f.start()).unwrap_or(true) => {
                let open =
                    find_block_start(body, l.end()).ok_or_else(|| ParseError::UnterminatedBlock {
                        construct: "listen".to_string(),
                        offset: l.start(),
                    })?;
                let predicate = body[l.end()..open].trim().to_string();
                let (action, past) =
                    extract_block(body, open).ok_or_else(|| ParseError::UnterminatedBlock {
                        construct: "listen".to_string(),
                        offset: l.start(),
                    })?;
                listeners.push(Listener {
                    predicate,
                    action: action.to_string(),
                });
                cursor = past;
            }
            (_, Some(f)) => {
                let cap = FN_HEADER
                    .captures_at(body, f.start())
                    .ok_or_else(|| ParseError::UnterminatedBlock {
                        construct: "fn".to_string(),
                        offset: f.start(),
                    })?;
                let name = cap[1].to_string();
                let params: Vec<String> = cap[2]
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                let (fn_body, past) =
                    extract_block(body, f.start()).ok_or_else(|| ParseError::UnterminatedBlock {
                        construct: format!("fn {name}"),
                        offset: f.start(),
                    })?;
                functions.insert(
                    name.clone(),
                    TriggerFn {
                        name,
                        params,
                        body: fn_body.to_string(),
                    },
                );
                cursor = past;
            }
            // `(Some(_), None)` is handled by the first arm (its guard returns
            // `true` when `func` is `None`); this arm only exists so the match
            // is structurally exhaustive, since the compiler cannot see through
            // the guard.
            (Some(_), None) => unreachable!("listen with no fn is claimed by the guarded arm above"),
            (None, None) => return Ok(()),
        }
    }
}

// =============================================================================
// Entry Point
// =============================================================================

#[derive(Clone, Copy, PartialEq)]
enum ConstructKind {
    Command,
    Button,
    Reaction,
    Event,
    Logic,
    OnLoad,
    Skip,
}

/// Parses the full plugin definition out of source text.
///
/// Construct headers found inside another construct's body are ignored;
/// only top-level declarations count.
pub fn parse_definition(source: &str) -> ParseResult<PluginDefinition> {
    let mut def = PluginDefinition {
        source: source.to_string(),
        ..Default::default()
    };

    for cap in IMPORT_LINE.captures_iter(source) {
        let lib = cap[1].to_string();
        if !ALLOWED_IMPORTS.contains(&lib.as_str()) {
            return Err(ParseError::UnknownImport(lib));
        }
        if !def.imports.contains(&lib) {
            def.imports.push(lib);
        }
    }

    // Gather every construct header, then walk them in source order,
    // skipping any header that falls inside a previously consumed body.
    let mut headers: Vec<(ConstructKind, usize)> = Vec::new();
    let tables: [(ConstructKind, &Regex); 7] = [
        (ConstructKind::Command, &*COMMAND_HEADER),
        (ConstructKind::Button, &*BUTTON_HEADER),
        (ConstructKind::Reaction, &*REACTION_HEADER),
        (ConstructKind::Event, &*EVENT_HEADER),
        (ConstructKind::Logic, &*LOGIC_HEADER),
        (ConstructKind::OnLoad, &*ON_LOAD_HEADER),
        (ConstructKind::Skip, &*MANIFEST_OR_SETTINGS),
    ];
    for (kind, re) in tables {
        for m in re.find_iter(source) {
            headers.push((kind, m.start()));
        }
    }
    headers.sort_by_key(|(_, start)| *start);

    let mut cursor = 0;
    for (kind, start) in headers {
        if start < cursor {
            continue;
        }
        let (body, past) =
            extract_block(source, start).ok_or_else(|| ParseError::UnterminatedBlock {
                construct: "section".to_string(),
                offset: start,
            })?;
        cursor = past;

        match kind {
            ConstructKind::Command => def.commands.push(parse_command(source, start, body)?),
            ConstructKind::Button => def.buttons.push(parse_button(source, start, body)?),
            ConstructKind::Reaction => def.reactions.push(parse_reaction(body)?),
            ConstructKind::Event => def.events.push(parse_event(source, start, body)?),
            ConstructKind::Logic => {
                parse_logic(body, &mut def.listeners, &mut def.functions)?;
            }
            ConstructKind::OnLoad => def.on_load = Some(body.to_string()),
            ConstructKind::Skip => {}
        }
    }

    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
manifest {
  name: "Moderation"
  scopes: ["messages.send", "storage.write"]
}

use storage
use time

command warn add {
  description: "Warn a member"
  usage: "warn add <user> <reason>"
  cooldown: 30
  permissions: ["kick_members"]
  bot_permissions: ["send_messages"]
  params {
    param string target required
    param string reason optional
  }
  execute {
    storage_set("warns", target, reason)
    send("Warned ${target}")
  }
  on_cooldown {
    send("Try again in ${remaining}s")
  }
  on_permission_denied {
    send("You cannot warn people")
  }
}

command warns {
  execute {
    send("warn count here")
  }
}

button clear_warns {
  cooldown: 5
  execute {
    send("cleared")
  }
  on_cooldown {
    send("wait a moment")
  }
}

reaction {
  emoji: "star"
  execute {
    send("starred")
  }
}

reaction {
  emoji: "wave"
  execute {
    send("hello")
  }
}

event warned {
  execute {
    send("first action")
  }
  execute {
    send("second action")
  }
}

on_load {
  send_to("log-channel", "moderation loaded")
}

logic {
  listen when content contains "help" {
    send("Need a hand?")
  }

  fn announce(text, channel) {
    send_to(channel, text)
  }
}
"#;

    #[test]
    fn parses_commands_with_sub_and_sections() {
        let def = parse_definition(SAMPLE).unwrap();
        assert_eq!(def.commands.len(), 2);

        let warn = &def.commands[0];
        assert_eq!(warn.name, "warn");
        assert_eq!(warn.sub.as_deref(), Some("add"));
        assert_eq!(warn.description, "Warn a member");
        assert_eq!(warn.cooldown_secs, Some(30));
        assert_eq!(warn.user_permissions, vec!["kick_members"]);
        assert_eq!(warn.bot_permissions, vec!["send_messages"]);
        assert!(warn.execute.contains("storage_set"));
        assert!(warn.on_cooldown.as_deref().unwrap().contains("remaining"));
        assert!(warn.on_permission_denied.is_some());
        assert!(warn.on_bot_permission_denied.is_none());

        assert_eq!(warn.params.len(), 2);
        assert_eq!(warn.params[0].name, "target");
        assert!(warn.params[0].required);
        assert_eq!(warn.params[1].kind, ValueKind::String);
        assert!(!warn.params[1].required);

        let warns = &def.commands[1];
        assert_eq!(warns.name, "warns");
        assert!(warns.sub.is_none());
    }

    #[test]
    fn parses_buttons_and_reactions() {
        let def = parse_definition(SAMPLE).unwrap();
        assert_eq!(def.buttons.len(), 1);
        assert_eq!(def.buttons[0].id, "clear_warns");
        assert_eq!(def.buttons[0].cooldown_secs, Some(5));
        assert!(def.buttons[0].on_cooldown.is_some());

        // Multiple reaction handlers accumulate, none is overwritten.
        assert_eq!(def.reactions.len(), 2);
        assert_eq!(def.reactions[0].emoji, "star");
        assert_eq!(def.reactions[1].emoji, "wave");
    }

    #[test]
    fn parses_events_with_ordered_actions() {
        let def = parse_definition(SAMPLE).unwrap();
        assert_eq!(def.events.len(), 1);
        assert_eq!(def.events[0].name, "warned");
        assert_eq!(def.events[0].actions.len(), 2);
        assert!(def.events[0].actions[0].contains("first action"));
        assert!(def.events[0].actions[1].contains("second action"));
    }

    #[test]
    fn parses_logic_listeners_and_functions() {
        let def = parse_definition(SAMPLE).unwrap();
        assert_eq!(def.listeners.len(), 1);
        assert_eq!(def.listeners[0].predicate, r#"content contains "help""#);
        assert!(def.listeners[0].action.contains("Need a hand?"));

        let announce = def.functions.get("announce").unwrap();
        assert_eq!(announce.params, vec!["text", "channel"]);
        assert!(announce.body.contains("send_to"));
    }

    #[test]
    fn collects_imports_and_on_load() {
        let def = parse_definition(SAMPLE).unwrap();
        assert_eq!(def.imports, vec!["storage", "time"]);
        assert!(def.on_load.as_deref().unwrap().contains("moderation loaded"));
    }

    #[test]
    fn rejects_unknown_import() {
        let err = parse_definition("use filesystem\n").unwrap_err();
        assert!(matches!(err, ParseError::UnknownImport(lib) if lib == "filesystem"));
    }

    #[test]
    fn command_without_execute_is_an_error() {
        let src = "command broken {\n  description: \"no body\"\n}\n";
        let err = parse_definition(src).unwrap_err();
        assert!(
            matches!(err, ParseError::MissingSection { construct, .. } if construct == "command broken")
        );
    }

    #[test]
    fn malformed_param_is_rejected() {
        let src = "command x {\n  params {\n    param text name required\n  }\n  execute { send(\"a\") }\n}\n";
        assert!(matches!(
            parse_definition(src).unwrap_err(),
            ParseError::InvalidParam(_)
        ));
    }

    #[test]
    fn nested_keywords_inside_bodies_are_not_constructs() {
        // The word "command" at line start inside a body must not start a
        // new construct.
        let src = r#"
command outer {
  execute {
    send("use this:
command inner")
  }
}
"#;
        let def = parse_definition(src).unwrap();
        assert_eq!(def.commands.len(), 1);
        assert_eq!(def.commands[0].name, "outer");
    }

    #[test]
    fn usage_line_synthesized_from_params() {
        let src = "command pay {\n  params {\n    param string target required\n    param int amount optional\n  }\n  execute { send(\"ok\") }\n}\n";
        let def = parse_definition(src).unwrap();
        assert_eq!(def.commands[0].usage_line(), "pay <target> [amount]");
    }

    #[test]
    fn missing_reaction_emoji_is_rejected() {
        let src = "reaction {\n  execute { send(\"x\") }\n}\n";
        assert!(matches!(
            parse_definition(src).unwrap_err(),
            ParseError::InvalidField { field, .. } if field == "emoji"
        ));
    }
}
