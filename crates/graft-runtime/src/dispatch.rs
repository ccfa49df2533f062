//! Event dispatch.
//!
//! One logical dispatch per inbound chat event:
//!
//! - **Commands**: prefix strip, shell-style token split, two-token
//!   (base + sub) match before single-token match, first match across the
//!   guild's loaded plugins wins. Checks run in a fixed order — bot
//!   permissions, user permissions, cooldown — each with its declared
//!   denial body, then parameters bind and the main body executes.
//! - **Buttons**: first matching component id wins; cooldown precedes
//!   execute.
//! - **Reactions**: every matching handler in every plugin runs as its own
//!   task.
//! - **Listeners**: every predicate is evaluated against every non-bot
//!   message (commands included); a true predicate spawns its action body.
//! - **Triggers**: emitted `{kind, name, data}` requests arrive over the
//!   manager's channel and are routed here without re-entering the sandbox
//!   call stack.
//!
//! Every handler failure is classified, reported to the originating channel
//! or interaction, and logged; nothing propagates out of a dispatch.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use graft_core::definition::CommandHandler;
use graft_core::manifest::ValueKind;
use graft_core::{ExecContext, TriggerFn};

use crate::cooldown::CooldownKey;
use crate::error::{ErrorReport, ExecError};
use crate::host::{ButtonClick, IncomingMessage, OutgoingMessage, ReactionAdd, SharedHost};
use crate::manager::{LoadedPlugin, PluginManager};
use crate::sandbox::{TriggerKind, TriggerRequest};

// =============================================================================
// Token Splitting
// =============================================================================

/// Shell-like argument splitting: whitespace-separated, single and double
/// quotes group words, backslash escapes inside double quotes.
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_double => escape_next = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ' ' | '\t' if !in_single && !in_double => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Where a failure report goes.
enum Origin {
    Channel(String),
    Interaction(String),
    Nowhere,
}

/// Routes chat events into loaded plugins.
pub struct Dispatcher {
    manager: Arc<PluginManager>,
}

impl Dispatcher {
    /// Creates a dispatcher over a manager.
    pub fn new(manager: Arc<PluginManager>) -> Arc<Self> {
        Arc::new(Self { manager })
    }

    /// Consumes trigger requests emitted by sandboxes. Each request runs as
    /// its own task.
    pub fn spawn_trigger_loop(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<TriggerRequest>,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    dispatcher.handle_trigger(request).await;
                });
            }
        })
    }

    fn host(&self) -> &SharedHost {
        self.manager.host()
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// Entry point for every inbound message. Bot messages are dropped;
    /// listeners run on everything else, commands additionally dispatch
    /// when the prefix matches.
    pub async fn on_message(&self, msg: IncomingMessage) {
        if msg.author_is_bot {
            return;
        }
        self.dispatch_listeners(&msg);
        if msg.content.starts_with(&self.manager.config().prefix) {
            self.dispatch_command(&msg).await;
        }
    }

    fn message_ctx(msg: &IncomingMessage) -> ExecContext {
        ExecContext::Message {
            guild_id: msg.guild_id.clone(),
            channel_id: msg.channel_id.clone(),
            message_id: msg.message_id.clone(),
            user_id: msg.author_id.clone(),
            user_name: msg.author_name.clone(),
            content: msg.content.clone(),
        }
    }

    async fn dispatch_command(&self, msg: &IncomingMessage) {
        let prefix = &self.manager.config().prefix;
        let Some(stripped) = msg.content.strip_prefix(prefix.as_str()) else {
            return;
        };
        let tokens = shell_split(stripped);
        if tokens.is_empty() {
            return;
        }

        let plugins = self.manager.snapshot(&msg.guild_id);

        // Base + sub match wins over a bare base match; within each form
        // the first plugin in load order wins.
        let mut matched: Option<(Arc<LoadedPlugin>, CommandHandler, usize)> = None;
        if tokens.len() >= 2 {
            for plugin in &plugins {
                if let Some(cmd) = plugin.definition.find_command(&tokens[0], Some(&tokens[1])) {
                    matched = Some((Arc::clone(plugin), cmd.clone(), 2));
                    break;
                }
            }
        }
        if matched.is_none() {
            for plugin in &plugins {
                if let Some(cmd) = plugin.definition.find_command(&tokens[0], None) {
                    matched = Some((Arc::clone(plugin), cmd.clone(), 1));
                    break;
                }
            }
        }
        let Some((plugin, cmd, consumed)) = matched else {
            return;
        };

        let ctx = Self::message_ctx(msg);
        let origin = Origin::Channel(msg.channel_id.clone());
        let action = cmd.action_key();

        // Bot permissions, then user permissions, then cooldown. Each has
        // its own denial path; without one the event is silently dropped.
        let bot_id = self.host().bot_user_id().to_string();
        match self
            .check_permissions(&cmd.bot_permissions, &bot_id, &msg.guild_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if let Some(body) = &cmd.on_bot_permission_denied {
                    self.run_body(&plugin, &action, body, &ctx, &[], &origin).await;
                }
                return;
            }
            Err(e) => {
                self.report(&msg.guild_id, &plugin.plugin_id, &action, &origin, &e).await;
                return;
            }
        }
        match self
            .check_permissions(&cmd.user_permissions, &msg.author_id, &msg.guild_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if let Some(body) = &cmd.on_permission_denied {
                    self.run_body(&plugin, &action, body, &ctx, &[], &origin).await;
                }
                return;
            }
            Err(e) => {
                self.report(&msg.guild_id, &plugin.plugin_id, &action, &origin, &e).await;
                return;
            }
        }

        let key = CooldownKey::new(
            msg.guild_id.clone(),
            plugin.plugin_id.clone(),
            action.clone(),
            msg.author_id.clone(),
        );
        if let Some(remaining) = self.manager.cooldowns().remaining(&key) {
            if let Some(body) = &cmd.on_cooldown {
                let params = [("remaining".to_string(), Value::from(remaining.as_secs()))];
                self.run_body(&plugin, &action, body, &ctx, &params, &origin).await;
            }
            return;
        }

        // Required-parameter presence is enforced before the body runs.
        let params = match bind_params(&cmd, &tokens[consumed..]) {
            Ok(params) => params,
            Err(e) => {
                self.report(&msg.guild_id, &plugin.plugin_id, &action, &origin, &e).await;
                return;
            }
        };

        if let Some(secs) = cmd.cooldown_secs {
            self.manager.cooldowns().set(key, Duration::from_secs(secs));
        }
        self.run_body(&plugin, &action, &cmd.execute, &ctx, &params, &origin)
            .await;
    }

    async fn check_permissions(
        &self,
        permissions: &[String],
        user_id: &str,
        guild_id: &str,
    ) -> Result<bool, ExecError> {
        for permission in permissions {
            let held = self
                .host()
                .has_permission(user_id, guild_id, permission)
                .await?;
            if !held {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn dispatch_listeners(&self, msg: &IncomingMessage) {
        let plugins = self.manager.snapshot(&msg.guild_id);
        for plugin in plugins {
            for (index, listener) in plugin.definition.listeners.iter().cloned().enumerate() {
                let plugin = Arc::clone(&plugin);
                let host = Arc::clone(self.host());
                let ctx = Self::message_ctx(msg);
                let channel = msg.channel_id.clone();
                tokio::spawn(async move {
                    let hit = match plugin.sandbox.eval_predicate(&listener.predicate, &ctx).await
                    {
                        Ok(hit) => hit,
                        Err(e) => {
                            // Predicates run on every message; a broken one
                            // is logged, not reported into the channel.
                            warn!(
                                plugin = %plugin.plugin_id,
                                listener = index,
                                error = %e,
                                "Listener predicate failed"
                            );
                            return;
                        }
                    };
                    if !hit {
                        return;
                    }
                    if let Err(e) = plugin.sandbox.execute(&listener.action, &ctx).await {
                        report_to(
                            &host,
                            ctx.guild_id(),
                            &plugin.plugin_id,
                            &format!("listener {index}"),
                            &Origin::Channel(channel),
                            &e,
                        )
                        .await;
                    }
                });
            }
        }
    }

    // ── Buttons ──────────────────────────────────────────────────────────

    /// Dispatches a button click: first matching id across loaded plugins
    /// wins, cooldown check precedes execute.
    pub async fn on_button(&self, click: ButtonClick) {
        let plugins = self.manager.snapshot(&click.guild_id);
        let Some((plugin, button)) = plugins.iter().find_map(|plugin| {
            plugin
                .definition
                .find_button(&click.component_id)
                .map(|b| (Arc::clone(plugin), b.clone()))
        }) else {
            return;
        };

        let ctx = ExecContext::Interaction {
            guild_id: click.guild_id.clone(),
            channel_id: click.channel_id.clone(),
            interaction_id: click.interaction_id.clone(),
            component_id: click.component_id.clone(),
            user_id: click.user_id.clone(),
            user_name: click.user_name.clone(),
        };
        let origin = Origin::Interaction(click.interaction_id.clone());
        let action = format!("button:{}", button.id);

        let key = CooldownKey::new(
            click.guild_id.clone(),
            plugin.plugin_id.clone(),
            button.id.clone(),
            click.user_id.clone(),
        );
        if let Some(remaining) = self.manager.cooldowns().remaining(&key) {
            if let Some(body) = &button.on_cooldown {
                let params = [("remaining".to_string(), Value::from(remaining.as_secs()))];
                self.run_body(&plugin, &action, body, &ctx, &params, &origin).await;
            }
            return;
        }
        if let Some(secs) = button.cooldown_secs {
            self.manager.cooldowns().set(key, Duration::from_secs(secs));
        }
        self.run_body(&plugin, &action, &button.execute, &ctx, &[], &origin)
            .await;
    }

    // ── Reactions ────────────────────────────────────────────────────────

    /// Dispatches a reaction add: every matching handler across every
    /// plugin runs independently, each with its own cooldown namespace.
    pub async fn on_reaction(&self, reaction: ReactionAdd) {
        let plugins = self.manager.snapshot(&reaction.guild_id);
        for plugin in plugins {
            for handler in plugin
                .definition
                .reactions
                .iter()
                .filter(|h| h.emoji == reaction.emoji)
                .cloned()
            {
                let plugin = Arc::clone(&plugin);
                let host = Arc::clone(self.host());
                let manager = Arc::clone(&self.manager);
                let reaction = reaction.clone();
                tokio::spawn(async move {
                    let key = CooldownKey::new(
                        reaction.guild_id.clone(),
                        plugin.plugin_id.clone(),
                        format!("reaction:{}", handler.emoji),
                        reaction.user_id.clone(),
                    );
                    if manager.cooldowns().is_active(&key) {
                        return;
                    }
                    if let Some(secs) = handler.cooldown_secs {
                        manager.cooldowns().set(key, Duration::from_secs(secs));
                    }

                    let ctx = ExecContext::Message {
                        guild_id: reaction.guild_id.clone(),
                        channel_id: reaction.channel_id.clone(),
                        message_id: reaction.message_id.clone(),
                        user_id: reaction.user_id.clone(),
                        user_name: reaction.user_name.clone(),
                        content: String::new(),
                    };
                    let params = [("emoji".to_string(), Value::from(handler.emoji.clone()))];
                    if let Err(e) = plugin
                        .sandbox
                        .execute_with(&handler.execute, &ctx, &params)
                        .await
                    {
                        report_to(
                            &host,
                            &reaction.guild_id,
                            &plugin.plugin_id,
                            &format!("reaction:{}", handler.emoji),
                            &Origin::Channel(reaction.channel_id.clone()),
                            &e,
                        )
                        .await;
                    }
                });
            }
        }
    }

    // ── Trigger facility ─────────────────────────────────────────────────

    /// Routes one emitted trigger to its targets.
    pub async fn handle_trigger(&self, request: TriggerRequest) {
        let Some(plugin) = self
            .manager
            .get_loaded(&request.guild_id, &request.plugin_id)
        else {
            warn!(
                guild = %request.guild_id,
                plugin = %request.plugin_id,
                "Trigger for a plugin that is no longer loaded"
            );
            return;
        };

        let ctx = ExecContext::Trigger {
            guild_id: request.guild_id.clone(),
            channel_id: request.channel_id.clone(),
            user_id: request.user_id.clone(),
            name: request.name.clone(),
        };
        let origin = match &request.channel_id {
            Some(channel) => Origin::Channel(channel.clone()),
            None => Origin::Nowhere,
        };
        let handler = format!("trigger:{}", request.name);

        match request.kind {
            TriggerKind::Event => {
                // Every custom-event body with the name, in declared order,
                // plus every logic function with the name.
                let params = [("data".to_string(), request.data.clone())];
                for event in plugin
                    .definition
                    .events
                    .iter()
                    .filter(|e| e.name == request.name)
                {
                    for body in &event.actions {
                        self.run_body(&plugin, &handler, body, &ctx, &params, &origin).await;
                    }
                }
                if let Some(function) = plugin.definition.functions.get(&request.name) {
                    let params = bind_function_params(function, &request.data);
                    self.run_body(&plugin, &handler, &function.body, &ctx, &params, &origin)
                        .await;
                }
            }
            TriggerKind::Function => {
                let Some(function) = plugin.definition.functions.get(&request.name) else {
                    let err =
                        ExecError::Reference(format!("function '{}' not found", request.name));
                    self.report(&request.guild_id, &plugin.plugin_id, &handler, &origin, &err)
                        .await;
                    return;
                };
                let params = bind_function_params(function, &request.data);
                self.run_body(&plugin, &handler, &function.body, &ctx, &params, &origin)
                    .await;
            }
            TriggerKind::Command => {
                let mut parts = request.name.split_whitespace();
                let base = parts.next().unwrap_or_default();
                let sub = parts.next();
                let command = plugin
                    .definition
                    .find_command(base, sub)
                    .or_else(|| plugin.definition.find_command(base, None));
                let Some(command) = command else {
                    let err =
                        ExecError::Reference(format!("command '{}' not found", request.name));
                    self.report(&request.guild_id, &plugin.plugin_id, &handler, &origin, &err)
                        .await;
                    return;
                };
                // Deliberate trust boundary: trigger-originated command
                // invocations skip prefix parsing, cooldown, and
                // permission checks.
                debug!(
                    guild = %request.guild_id,
                    plugin = %request.plugin_id,
                    command = %command.action_key(),
                    "Command trigger bypasses cooldown and permission checks"
                );
                let params: Vec<(String, Value)> = command
                    .params
                    .iter()
                    .map(|spec| {
                        let value = request
                            .data
                            .get(&spec.name)
                            .cloned()
                            .unwrap_or(Value::Null);
                        (spec.name.clone(), value)
                    })
                    .collect();
                self.run_body(&plugin, &handler, &command.execute, &ctx, &params, &origin)
                    .await;
            }
        }
    }

    // ── Shared plumbing ──────────────────────────────────────────────────

    async fn run_body(
        &self,
        plugin: &Arc<LoadedPlugin>,
        handler: &str,
        body: &str,
        ctx: &ExecContext,
        params: &[(String, Value)],
        origin: &Origin,
    ) {
        if let Err(e) = plugin.sandbox.execute_with(body, ctx, params).await {
            self.report(ctx.guild_id(), &plugin.plugin_id, handler, origin, &e).await;
        }
    }

    async fn report(
        &self,
        guild_id: &str,
        plugin_id: &str,
        handler: &str,
        origin: &Origin,
        err: &ExecError,
    ) {
        report_to(self.host(), guild_id, plugin_id, handler, origin, err).await;
    }
}

/// Binds trigger data fields to a function's declared parameters by name
/// (not position); absent fields bind null.
fn bind_function_params(function: &TriggerFn, data: &Value) -> Vec<(String, Value)> {
    function
        .params
        .iter()
        .map(|param| {
            let value = data.get(param).cloned().unwrap_or(Value::Null);
            (param.clone(), value)
        })
        .collect()
}

/// Binds positional tokens to declared parameters. String parameters are
/// greedy and consume all remaining tokens; int/bool parameters consume
/// exactly one token and fall back to a string binding when the token does
/// not parse. A missing required parameter aborts with the usage line.
fn bind_params(cmd: &CommandHandler, tokens: &[String]) -> Result<Vec<(String, Value)>, ExecError> {
    let mut bound = Vec::new();
    let mut index = 0;

    for spec in &cmd.params {
        if index >= tokens.len() {
            if spec.required {
                return Err(ExecError::MissingParameter {
                    name: spec.name.clone(),
                    usage: cmd.usage_line(),
                });
            }
            bound.push((spec.name.clone(), Value::Null));
            continue;
        }
        let value = match spec.kind {
            ValueKind::String => {
                let joined = tokens[index..].join(" ");
                index = tokens.len();
                Value::String(joined)
            }
            ValueKind::Int => {
                let token = &tokens[index];
                index += 1;
                match token.parse::<i64>() {
                    Ok(n) => Value::from(n),
                    Err(_) => Value::String(token.clone()),
                }
            }
            ValueKind::Bool => {
                let token = &tokens[index];
                index += 1;
                match token.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    other => Value::String(other.to_string()),
                }
            }
        };
        bound.push((spec.name.clone(), value));
    }
    Ok(bound)
}

async fn report_to(
    host: &SharedHost,
    guild_id: &str,
    plugin_id: &str,
    handler: &str,
    origin: &Origin,
    err: &ExecError,
) {
    error!(
        guild = %guild_id,
        plugin = %plugin_id,
        handler = %handler,
        error = %err,
        "Handler failed"
    );
    let report = ErrorReport::from_error(err);
    let message = OutgoingMessage::embed(report.to_embed());
    let result = match origin {
        Origin::Channel(channel) => host.send_message(channel, message).await.map(|_| ()),
        Origin::Interaction(interaction) => host.reply_interaction(interaction, message).await,
        Origin::Nowhere => Ok(()),
    };
    if let Err(e) = result {
        warn!(plugin = %plugin_id, error = %e, "Failed to deliver error report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_split_handles_quotes() {
        assert_eq!(shell_split("warn add bob spam"), vec!["warn", "add", "bob", "spam"]);
        assert_eq!(
            shell_split(r#"say "hello world" now"#),
            vec!["say", "hello world", "now"]
        );
        assert_eq!(shell_split("say 'a b' c"), vec!["say", "a b", "c"]);
        assert!(shell_split("   ").is_empty());
    }

    fn cmd_with_params(params: Vec<(&str, ValueKind, bool)>) -> CommandHandler {
        CommandHandler {
            name: "pay".into(),
            sub: None,
            description: String::new(),
            usage: String::new(),
            params: params
                .into_iter()
                .map(|(name, kind, required)| graft_core::ParamSpec {
                    name: name.into(),
                    kind,
                    required,
                })
                .collect(),
            cooldown_secs: None,
            user_permissions: Vec::new(),
            bot_permissions: Vec::new(),
            execute: String::new(),
            on_cooldown: None,
            on_permission_denied: None,
            on_bot_permission_denied: None,
        }
    }

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn string_params_bind_greedily() {
        let cmd = cmd_with_params(vec![("reason", ValueKind::String, true)]);
        let bound = bind_params(&cmd, &tokens(&["too", "much", "spam"])).unwrap();
        assert_eq!(bound[0].1, Value::from("too much spam"));
    }

    #[test]
    fn int_params_consume_one_token_with_soft_fallback() {
        let cmd = cmd_with_params(vec![
            ("amount", ValueKind::Int, true),
            ("note", ValueKind::String, false),
        ]);
        let bound = bind_params(&cmd, &tokens(&["25", "thanks", "again"])).unwrap();
        assert_eq!(bound[0].1, Value::from(25));
        assert_eq!(bound[1].1, Value::from("thanks again"));

        // Unparseable int falls back to a string binding.
        let bound = bind_params(&cmd, &tokens(&["lots"])).unwrap();
        assert_eq!(bound[0].1, Value::from("lots"));
    }

    #[test]
    fn bool_params_parse_literals() {
        let cmd = cmd_with_params(vec![("loud", ValueKind::Bool, true)]);
        assert_eq!(
            bind_params(&cmd, &tokens(&["true"])).unwrap()[0].1,
            Value::Bool(true)
        );
        assert_eq!(
            bind_params(&cmd, &tokens(&["maybe"])).unwrap()[0].1,
            Value::from("maybe")
        );
    }

    #[test]
    fn missing_required_param_carries_usage() {
        let cmd = cmd_with_params(vec![("target", ValueKind::String, true)]);
        let err = bind_params(&cmd, &[]).unwrap_err();
        let ExecError::MissingParameter { name, usage } = err else {
            panic!("expected MissingParameter");
        };
        assert_eq!(name, "target");
        assert_eq!(usage, "pay <target>");
    }

    #[test]
    fn missing_optional_param_binds_null() {
        let cmd = cmd_with_params(vec![("note", ValueKind::String, false)]);
        let bound = bind_params(&cmd, &[]).unwrap();
        assert_eq!(bound[0].1, Value::Null);
    }
}
