//! The capability sandbox.
//!
//! One [`Sandbox`] is built per loaded plugin, bound to that plugin's guild,
//! identity, resolved settings, and the shared cooldown/rate-control state.
//! It exposes exactly the capability surface the platform offers to plugin
//! code; nothing here reaches host-process resources. Scope coverage is
//! enforced at validation time, so the surface itself only checks imports
//! and argument types.
//!
//! Every handler execution is time-boxed: exceeding the budget abandons the
//! call and reports a timeout failure. Side effects already performed are
//! not rolled back.

pub mod eval;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use graft_core::manifest::{SettingValue, SettingsSchema};
use graft_core::{ExecContext, script, transpile, transpile_predicate};

use crate::cooldown::{CooldownKey, CooldownStore};
use crate::error::{ExecError, ExecResult};
use crate::host::{OutgoingMessage, SharedHost};
use crate::ratelimit::{HttpLogEntry, HttpRateLimiter};
use crate::sandbox::eval::{Evaluator, truthy};
use crate::store::SharedStore;

// =============================================================================
// Trigger Facility
// =============================================================================

/// What kind of target a trigger addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Every custom-event body plus every logic function with the name.
    Event,
    /// One named logic function, data bound to parameters by name.
    Function,
    /// One command's main body, bypassing prefix/cooldown/permissions.
    Command,
}

impl TriggerKind {
    /// Parses the kind literal used in plugin code.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "event" => Some(Self::Event),
            "function" => Some(Self::Function),
            "command" => Some(Self::Command),
            _ => None,
        }
    }
}

/// One emitted trigger, routed to the dispatcher over a channel so plugin
/// bodies never call back into dispatch directly.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    /// Emitting guild.
    pub guild_id: String,
    /// Emitting plugin.
    pub plugin_id: String,
    /// Channel of the emitting invocation, for error reporting.
    pub channel_id: Option<String>,
    /// User of the emitting invocation.
    pub user_id: Option<String>,
    /// Target kind.
    pub kind: TriggerKind,
    /// Target name.
    pub name: String,
    /// Payload bound into the target body.
    pub data: Value,
}

/// Sending half of the trigger channel.
pub type TriggerSender = mpsc::UnboundedSender<TriggerRequest>;

// =============================================================================
// Sandbox
// =============================================================================

/// The isolated execution environment for one loaded plugin.
pub struct Sandbox {
    guild_id: String,
    plugin_id: String,
    imports: Vec<String>,
    settings: HashMap<String, SettingValue>,
    defaults: HashMap<String, SettingValue>,
    host: SharedHost,
    store: SharedStore,
    cooldowns: Arc<CooldownStore>,
    limiter: Arc<HttpRateLimiter>,
    http: reqwest::Client,
    timeout: Duration,
    trigger_tx: TriggerSender,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("guild_id", &self.guild_id)
            .field("plugin_id", &self.plugin_id)
            .field("imports", &self.imports)
            .field("settings", &self.settings)
            .field("defaults", &self.defaults)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Constructs a [`Sandbox`], once per loaded plugin.
pub struct SandboxBuilder {
    guild_id: String,
    plugin_id: String,
    imports: Vec<String>,
    settings: HashMap<String, SettingValue>,
    defaults: HashMap<String, SettingValue>,
    host: SharedHost,
    store: SharedStore,
    cooldowns: Arc<CooldownStore>,
    limiter: Arc<HttpRateLimiter>,
    timeout: Duration,
    trigger_tx: TriggerSender,
}

impl SandboxBuilder {
    /// Starts a builder bound to one (guild, plugin) identity.
    pub fn new(
        guild_id: impl Into<String>,
        plugin_id: impl Into<String>,
        host: SharedHost,
        store: SharedStore,
        cooldowns: Arc<CooldownStore>,
        limiter: Arc<HttpRateLimiter>,
        trigger_tx: TriggerSender,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            plugin_id: plugin_id.into(),
            imports: Vec::new(),
            settings: HashMap::new(),
            defaults: HashMap::new(),
            host,
            store,
            cooldowns,
            limiter,
            timeout: Duration::from_secs(10),
            trigger_tx,
        }
    }

    /// Declares the plugin's imports, gating library calls.
    pub fn imports(mut self, imports: Vec<String>) -> Self {
        self.imports = imports;
        self
    }

    /// Resolves the settings surface from the schema and a live overlay.
    pub fn settings(mut self, schema: &SettingsSchema, overlay: &HashMap<String, String>) -> Self {
        self.settings = schema.resolve(overlay);
        self.defaults = schema.resolve(&HashMap::new());
        self
    }

    /// Sets the per-invocation time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the sandbox. The HTTP client carries the limiter's
    /// per-request timeout.
    pub fn build(self) -> Sandbox {
        let http = reqwest::Client::builder()
            .timeout(self.limiter.limits().request_timeout())
            .build()
            .expect("failed to build HTTP client");

        Sandbox {
            guild_id: self.guild_id,
            plugin_id: self.plugin_id,
            imports: self.imports,
            settings: self.settings,
            defaults: self.defaults,
            host: self.host,
            store: self.store,
            cooldowns: self.cooldowns,
            limiter: self.limiter,
            http,
            timeout: self.timeout,
            trigger_tx: self.trigger_tx,
        }
    }
}

impl Sandbox {
    /// The guild this sandbox is bound to.
    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// The plugin this sandbox is bound to.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Executes a handler body with no extra bindings.
    pub async fn execute(&self, body: &str, ctx: &ExecContext) -> ExecResult<Value> {
        self.execute_with(body, ctx, &[]).await
    }

    /// Transpiles, parses, and evaluates a handler body inside the time
    /// budget. `params` become bindings after the context values.
    pub async fn execute_with(
        &self,
        body: &str,
        ctx: &ExecContext,
        params: &[(String, Value)],
    ) -> ExecResult<Value> {
        let script_text = transpile(body, ctx, params);
        let stmts = script::parse(&script_text)?;
        let mut evaluator = Evaluator::new(self, ctx, false);
        match tokio::time::timeout(self.timeout, evaluator.run(&stmts)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout(self.timeout)),
        }
    }

    /// Evaluates a listener predicate. Capability calls are rejected; the
    /// context values are available as plain bindings.
    pub async fn eval_predicate(&self, predicate: &str, ctx: &ExecContext) -> ExecResult<bool> {
        let text = transpile_predicate(predicate);
        let expr = script::parse_expression(&text)?;
        let mut evaluator = Evaluator::new(self, ctx, true);
        evaluator.seed(ctx.bindings());
        let value = tokio::time::timeout(self.timeout, evaluator.eval(&expr))
            .await
            .map_err(|_| ExecError::Timeout(self.timeout))??;
        truthy(&value)
    }

    // ── Capability dispatch ──────────────────────────────────────────────

    /// Which importable library a global operation belongs to, if any.
    fn required_import(name: &str) -> Option<&'static str> {
        match name {
            n if n.starts_with("storage_") => Some("storage"),
            n if n.starts_with("http_") => Some("http"),
            n if n.starts_with("random_") => Some("random"),
            "now" | "format_duration" | "sleep" => Some("time"),
            _ => None,
        }
    }

    /// Operations with side effects, rejected in predicate position.
    fn is_effectful(name: &str) -> bool {
        matches!(
            name,
            "send"
                | "send_to"
                | "delete_message"
                | "fetch_channel"
                | "fetch_guild"
                | "create_channel"
                | "delete_channel"
                | "fetch_user"
                | "cooldown_set"
                | "emit"
                | "sleep"
        ) || name.starts_with("storage_")
            || name.starts_with("http_")
    }

    fn require_import(&self, lib: &str) -> ExecResult<()> {
        if self.imports.iter().any(|i| i == lib) {
            Ok(())
        } else {
            Err(ExecError::Reference(format!(
                "library '{lib}' is not imported (add 'use {lib}')"
            )))
        }
    }

    fn scoped_table(&self, table: &str) -> String {
        format!("g{}.p{}.{}", self.guild_id, self.plugin_id, table)
    }

    fn cooldown_key(&self, action: &str, ctx: &ExecContext) -> CooldownKey {
        CooldownKey::new(
            self.guild_id.clone(),
            self.plugin_id.clone(),
            action,
            ctx.user_id().unwrap_or("*"),
        )
    }

    /// Dispatches one capability-surface call. Every call is asynchronous;
    /// the evaluator awaits each one before moving on, so statement order
    /// is execution order.
    pub(crate) async fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        ctx: &ExecContext,
        pure_only: bool,
    ) -> ExecResult<Value> {
        if pure_only && Self::is_effectful(name) {
            return Err(ExecError::Reference(format!(
                "'{name}' has side effects and is not allowed in a listener predicate"
            )));
        }
        if let Some(lib) = Self::required_import(name) {
            self.require_import(lib)?;
        }

        match name {
            // ── Settings ────────────────────────────────────────────
            "setting" => {
                let key = arg_str(&args, 0, name)?;
                self.settings
                    .get(&key)
                    .map(SettingValue::to_json)
                    .ok_or_else(|| ExecError::Reference(format!("unknown setting '{key}'")))
            }
            "setting_default" => {
                let key = arg_str(&args, 0, name)?;
                self.defaults
                    .get(&key)
                    .map(SettingValue::to_json)
                    .ok_or_else(|| ExecError::Reference(format!("unknown setting '{key}'")))
            }

            // ── Messaging ───────────────────────────────────────────
            "send" => {
                let channel = ctx.channel_id().ok_or_else(|| {
                    ExecError::Reference("this context has no channel to send to".into())
                })?;
                let message = outgoing_from_args(&args, name)?;
                let id = self.host.send_message(channel, message).await?;
                Ok(Value::String(id))
            }
            "send_to" => {
                let channel = arg_str(&args, 0, name)?;
                let message = outgoing_from_args(&args[1..], name)?;
                let id = self.host.send_message(&channel, message).await?;
                Ok(Value::String(id))
            }
            "delete_message" => {
                let channel = ctx.channel_id().ok_or_else(|| {
                    ExecError::Reference("this context has no channel".into())
                })?;
                let message_id = arg_str(&args, 0, name)?;
                self.host.delete_message(channel, &message_id).await?;
                Ok(Value::Null)
            }

            // ── Guild and users ─────────────────────────────────────
            "fetch_channel" => {
                let id = arg_str(&args, 0, name)?;
                let info = self.host.fetch_channel(&id).await?;
                Ok(json!({"id": info.id, "name": info.name, "kind": info.kind}))
            }
            "fetch_guild" => {
                let info = self.host.fetch_guild(&self.guild_id).await?;
                Ok(json!({
                    "id": info.id,
                    "name": info.name,
                    "member_count": info.member_count,
                }))
            }
            "create_channel" => {
                let channel_name = arg_str(&args, 0, name)?;
                let info = self.host.create_channel(&self.guild_id, &channel_name).await?;
                Ok(json!({"id": info.id, "name": info.name, "kind": info.kind}))
            }
            "delete_channel" => {
                let id = arg_str(&args, 0, name)?;
                self.host.delete_channel(&id).await?;
                Ok(Value::Null)
            }
            "fetch_user" => {
                let id = arg_str(&args, 0, name)?;
                let info = self.host.fetch_user(&id).await?;
                Ok(json!({"id": info.id, "name": info.name, "bot": info.bot}))
            }

            // ── Builders ────────────────────────────────────────────
            "embed" => {
                let title = arg_str(&args, 0, name)?;
                let description = arg_str(&args, 1, name)?;
                let color = match args.get(2) {
                    Some(v) => as_int(v)
                        .ok_or_else(|| ExecError::Type("embed color must be a number".into()))?,
                    None => 0x5865F2,
                };
                Ok(json!({
                    "$kind": "embed",
                    "title": title,
                    "description": description,
                    "color": color,
                }))
            }
            "embed_error" => {
                let message = arg_str(&args, 0, name)?;
                Ok(json!({
                    "$kind": "embed",
                    "title": "Error",
                    "description": message,
                    "color": 0xED4245,
                }))
            }
            "embed_success" => {
                let message = arg_str(&args, 0, name)?;
                Ok(json!({
                    "$kind": "embed",
                    "title": "Success",
                    "description": message,
                    "color": 0x57F287,
                }))
            }
            "button" => {
                let id = arg_str(&args, 0, name)?;
                let label = arg_str(&args, 1, name)?;
                let style = match args.get(2) {
                    Some(Value::String(s)) => s.clone(),
                    Some(_) => return Err(ExecError::Type("button style must be text".into())),
                    None => "primary".to_string(),
                };
                Ok(json!({"$kind": "button", "id": id, "label": label, "style": style}))
            }
            "button_row" => {
                for arg in &args {
                    if arg.get("$kind").and_then(Value::as_str) != Some("button") {
                        return Err(ExecError::Type(
                            "button_row only accepts button values".into(),
                        ));
                    }
                }
                Ok(json!({"$kind": "button_row", "buttons": args}))
            }

            // ── Cooldowns ───────────────────────────────────────────
            "cooldown_set" => {
                let action = arg_str(&args, 0, name)?;
                let secs = arg_u64(&args, 1, name)?;
                self.cooldowns
                    .set(self.cooldown_key(&action, ctx), Duration::from_secs(secs));
                Ok(Value::Null)
            }
            "cooldown_check" => {
                let action = arg_str(&args, 0, name)?;
                Ok(Value::Bool(
                    self.cooldowns.is_active(&self.cooldown_key(&action, ctx)),
                ))
            }
            "cooldown_remaining" => {
                let action = arg_str(&args, 0, name)?;
                let remaining = self
                    .cooldowns
                    .remaining(&self.cooldown_key(&action, ctx))
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                Ok(Value::from(remaining))
            }

            // ── Plugin storage ──────────────────────────────────────
            "storage_set" => {
                let table = arg_str(&args, 0, name)?;
                let key = arg_str(&args, 1, name)?;
                let value = args.get(2).cloned().unwrap_or(Value::Null);
                self.store.kv_set(&self.scoped_table(&table), &key, value).await?;
                Ok(Value::Null)
            }
            "storage_get" => {
                let table = arg_str(&args, 0, name)?;
                let key = arg_str(&args, 1, name)?;
                Ok(self
                    .store
                    .kv_get(&self.scoped_table(&table), &key)
                    .await?
                    .unwrap_or(Value::Null))
            }
            "storage_delete" => {
                let table = arg_str(&args, 0, name)?;
                let key = arg_str(&args, 1, name)?;
                self.store.kv_delete(&self.scoped_table(&table), &key).await?;
                Ok(Value::Null)
            }
            "storage_query" => {
                let table = arg_str(&args, 0, name)?;
                let rows = self.store.kv_query(&self.scoped_table(&table)).await?;
                Ok(Value::Array(
                    rows.into_iter()
                        .map(|(key, value)| json!({"key": key, "value": value}))
                        .collect(),
                ))
            }

            // ── Time and randomness ─────────────────────────────────
            "now" => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                Ok(Value::from(secs))
            }
            "format_duration" => {
                let secs = arg_u64(&args, 0, name)?;
                Ok(Value::String(format_duration(secs)))
            }
            "user_tag" => {
                let id = arg_str(&args, 0, name)?;
                Ok(Value::String(format!("<@{id}>")))
            }
            "sleep" => {
                let secs = arg_num(&args, 0, name)?.max(0.0);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                Ok(Value::Null)
            }
            "random_int" => {
                let min = arg_i64(&args, 0, name)?;
                let max = arg_i64(&args, 1, name)?;
                if min > max {
                    return Err(ExecError::Type("random_int range is empty".into()));
                }
                Ok(Value::from(rand::thread_rng().gen_range(min..=max)))
            }
            "random_choice" => {
                let Some(Value::Array(items)) = args.first() else {
                    return Err(ExecError::Type("random_choice expects an array".into()));
                };
                if items.is_empty() {
                    return Ok(Value::Null);
                }
                let index = rand::thread_rng().gen_range(0..items.len());
                Ok(items[index].clone())
            }

            // ── Trigger facility ────────────────────────────────────
            "emit" => {
                let kind_raw = arg_str(&args, 0, name)?;
                let kind = TriggerKind::parse(&kind_raw).ok_or_else(|| {
                    ExecError::Type(format!(
                        "emit kind must be 'event', 'function', or 'command', got '{kind_raw}'"
                    ))
                })?;
                let target = arg_str(&args, 1, name)?;
                let data = args.get(2).cloned().unwrap_or(Value::Null);
                let request = TriggerRequest {
                    guild_id: self.guild_id.clone(),
                    plugin_id: self.plugin_id.clone(),
                    channel_id: ctx.channel_id().map(str::to_string),
                    user_id: ctx.user_id().map(str::to_string),
                    kind,
                    name: target,
                    data,
                };
                debug!(
                    guild = %self.guild_id,
                    plugin = %self.plugin_id,
                    kind = ?request.kind,
                    target = %request.name,
                    "Trigger emitted"
                );
                if self.trigger_tx.send(request).is_err() {
                    warn!(
                        guild = %self.guild_id,
                        plugin = %self.plugin_id,
                        "Trigger channel closed, emit dropped"
                    );
                }
                Ok(Value::Null)
            }

            // ── Outbound HTTP ───────────────────────────────────────
            "http_get" => self.http_request("GET", &args).await,
            "http_post" => self.http_request("POST", &args).await,
            "http_put" => self.http_request("PUT", &args).await,
            "http_delete" => self.http_request("DELETE", &args).await,

            _ => Err(ExecError::Reference(format!("unknown function '{name}'"))),
        }
    }

    /// Dispatches an allow-listed library call. These are pure and usable
    /// in predicates.
    pub(crate) fn call_lib(&self, namespace: &str, name: &str, args: Vec<Value>) -> ExecResult<Value> {
        match namespace {
            "math" => {
                self.require_import("math")?;
                math_call(name, &args)
            }
            "text" => {
                self.require_import("text")?;
                text_call(name, &args)
            }
            _ => Err(ExecError::Reference(format!(
                "unknown library '{namespace}'"
            ))),
        }
    }

    async fn http_request(&self, method: &str, args: &[Value]) -> ExecResult<Value> {
        let full_name = format!("http_{}", method.to_lowercase());
        let url_raw = arg_str(args, 0, &full_name)?;
        let url = reqwest::Url::parse(&url_raw)
            .map_err(|_| ExecError::Http(format!("'{url_raw}' is not an absolute URL")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ExecError::Http("URL must be http or https".into()));
        }
        let domain = url
            .host_str()
            .ok_or_else(|| ExecError::Http("URL has no host".into()))?
            .to_string();

        self.limiter.check(&self.guild_id, &self.plugin_id, &domain)?;

        let started = Instant::now();
        let mut entry = HttpLogEntry {
            at: started,
            method: method.to_string(),
            url: url_raw.clone(),
            status: None,
            response_bytes: 0,
            duration: Duration::ZERO,
            outcome: "error",
        };

        let mut request = match method {
            "GET" => self.http.get(url),
            "POST" => self.http.post(url),
            "PUT" => self.http.put(url),
            _ => self.http.delete(url),
        };
        if let Some(body) = args.get(1) {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                entry.duration = started.elapsed();
                self.limiter.record(&self.guild_id, &self.plugin_id, entry);
                return Err(ExecError::Http(e.to_string()));
            }
        };
        let status = response.status().as_u16();
        entry.status = Some(status);

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                entry.duration = started.elapsed();
                self.limiter.record(&self.guild_id, &self.plugin_id, entry);
                return Err(ExecError::Http(e.to_string()));
            }
        };
        entry.duration = started.elapsed();
        entry.response_bytes = bytes.len();

        let max = self.limiter.limits().max_response_bytes;
        if bytes.len() > max {
            entry.outcome = "too_large";
            self.limiter.record(&self.guild_id, &self.plugin_id, entry);
            return Err(ExecError::Http(format!(
                "response exceeded {max} bytes"
            )));
        }

        let body: Value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        entry.outcome = "ok";
        self.limiter.record(&self.guild_id, &self.plugin_id, entry);
        Ok(json!({"status": status, "body": body}))
    }
}

// =============================================================================
// Argument Helpers
// =============================================================================

fn arg_str(args: &[Value], index: usize, name: &str) -> ExecResult<String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ExecError::Type(format!(
            "{name} expects text as argument {}, got {}",
            index + 1,
            kind_name(other)
        ))),
        None => Err(ExecError::Type(format!(
            "{name} is missing argument {}",
            index + 1
        ))),
    }
}

fn arg_i64(args: &[Value], index: usize, name: &str) -> ExecResult<i64> {
    args.get(index).and_then(as_int).ok_or_else(|| {
        ExecError::Type(format!(
            "{name} expects a whole number as argument {}",
            index + 1
        ))
    })
}

fn arg_u64(args: &[Value], index: usize, name: &str) -> ExecResult<u64> {
    let value = arg_i64(args, index, name)?;
    u64::try_from(value).map_err(|_| {
        ExecError::Type(format!(
            "{name} expects a non-negative number as argument {}",
            index + 1
        ))
    })
}

fn arg_num(args: &[Value], index: usize, name: &str) -> ExecResult<f64> {
    args.get(index).and_then(Value::as_f64).ok_or_else(|| {
        ExecError::Type(format!(
            "{name} expects a number as argument {}",
            index + 1
        ))
    })
}

fn as_int(value: &Value) -> Option<i64> {
    value.as_i64()
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Folds call arguments into an outgoing message: strings become content,
/// tagged objects become embeds or button rows.
fn outgoing_from_args(args: &[Value], name: &str) -> ExecResult<OutgoingMessage> {
    let mut message = OutgoingMessage::default();
    for arg in args {
        match arg {
            Value::String(s) => message.content = Some(s.clone()),
            Value::Number(_) | Value::Bool(_) => {
                message.content = Some(eval::stringify(arg));
            }
            Value::Object(map) => match map.get("$kind").and_then(Value::as_str) {
                Some("embed") => message.embed = Some(arg.clone()),
                Some("button_row") => message.buttons = Some(arg.clone()),
                Some("button") => {
                    message.buttons = Some(json!({"$kind": "button_row", "buttons": [arg]}));
                }
                _ => {
                    return Err(ExecError::Type(format!(
                        "{name} cannot deliver a plain object"
                    )));
                }
            },
            other => {
                return Err(ExecError::Type(format!(
                    "{name} cannot deliver {}",
                    kind_name(other)
                )));
            }
        }
    }
    if message.content.is_none() && message.embed.is_none() && message.buttons.is_none() {
        return Err(ExecError::Type(format!("{name} needs something to send")));
    }
    Ok(message)
}

fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }
    parts.join(" ")
}

// =============================================================================
// Library Functions
// =============================================================================

fn math_call(name: &str, args: &[Value]) -> ExecResult<Value> {
    let num = |index: usize| arg_num(args, index, &format!("math.{name}"));
    let result = match name {
        "abs" => {
            if let Some(n) = args.first().and_then(Value::as_i64) {
                return Ok(Value::from(n.abs()));
            }
            num(0)?.abs()
        }
        "min" => num(0)?.min(num(1)?),
        "max" => num(0)?.max(num(1)?),
        "floor" => num(0)?.floor(),
        "ceil" => num(0)?.ceil(),
        "round" => num(0)?.round(),
        "sqrt" => {
            let n = num(0)?;
            if n < 0.0 {
                return Err(ExecError::Type("math.sqrt of a negative number".into()));
            }
            n.sqrt()
        }
        "pow" => num(0)?.powf(num(1)?),
        _ => {
            return Err(ExecError::Reference(format!(
                "unknown function 'math.{name}'"
            )));
        }
    };
    // Return whole results as integers so arithmetic stays int-friendly.
    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Ok(Value::from(result as i64))
    } else {
        Ok(Value::from(result))
    }
}

fn text_call(name: &str, args: &[Value]) -> ExecResult<Value> {
    let full = format!("text.{name}");
    match name {
        "upper" => Ok(Value::String(arg_str(args, 0, &full)?.to_uppercase())),
        "lower" => Ok(Value::String(arg_str(args, 0, &full)?.to_lowercase())),
        "trim" => Ok(Value::String(arg_str(args, 0, &full)?.trim().to_string())),
        "len" => match args.first() {
            Some(Value::String(s)) => Ok(Value::from(s.chars().count() as i64)),
            Some(Value::Array(items)) => Ok(Value::from(items.len() as i64)),
            Some(other) => Err(ExecError::Type(format!(
                "text.len expects text or an array, got {}",
                kind_name(other)
            ))),
            None => Err(ExecError::Type("text.len is missing its argument".into())),
        },
        "replace" => {
            let s = arg_str(args, 0, &full)?;
            let from = arg_str(args, 1, &full)?;
            let to = arg_str(args, 2, &full)?;
            Ok(Value::String(s.replace(&from, &to)))
        }
        "split" => {
            let s = arg_str(args, 0, &full)?;
            let sep = arg_str(args, 1, &full)?;
            Ok(Value::Array(
                s.split(&sep).map(|p| Value::String(p.to_string())).collect(),
            ))
        }
        "join" => {
            let Some(Value::Array(items)) = args.first() else {
                return Err(ExecError::Type("text.join expects an array".into()));
            };
            let sep = arg_str(args, 1, &full)?;
            let parts: Vec<String> = items.iter().map(eval::stringify).collect();
            Ok(Value::String(parts.join(&sep)))
        }
        "slice" => {
            let s = arg_str(args, 0, &full)?;
            let start = arg_u64(args, 1, &full)? as usize;
            let chars: Vec<char> = s.chars().collect();
            let end = match args.get(2) {
                Some(v) => as_int(v).map(|n| n as usize).unwrap_or(chars.len()),
                None => chars.len(),
            }
            .min(chars.len());
            if start >= end {
                return Ok(Value::String(String::new()));
            }
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        _ => Err(ExecError::Reference(format!(
            "unknown function 'text.{name}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_renders_parts() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3723), "1h 2m 3s");
        assert_eq!(format_duration(3600), "1h");
    }

    #[test]
    fn trigger_kind_parses_literals() {
        assert_eq!(TriggerKind::parse("event"), Some(TriggerKind::Event));
        assert_eq!(TriggerKind::parse("function"), Some(TriggerKind::Function));
        assert_eq!(TriggerKind::parse("command"), Some(TriggerKind::Command));
        assert_eq!(TriggerKind::parse("other"), None);
    }

    #[test]
    fn outgoing_folds_strings_and_embeds() {
        let embed = json!({"$kind": "embed", "title": "t", "description": "d", "color": 1});
        let message =
            outgoing_from_args(&[Value::String("hi".into()), embed.clone()], "send").unwrap();
        assert_eq!(message.content.as_deref(), Some("hi"));
        assert_eq!(message.embed, Some(embed));
    }

    #[test]
    fn outgoing_wraps_lone_button_in_a_row() {
        let button = json!({"$kind": "button", "id": "b", "label": "L", "style": "primary"});
        let message = outgoing_from_args(&[Value::String("pick".into()), button], "send").unwrap();
        assert_eq!(message.buttons.as_ref().unwrap()["$kind"], "button_row");
    }

    #[test]
    fn outgoing_rejects_untagged_objects() {
        let err = outgoing_from_args(&[json!({"x": 1})], "send").unwrap_err();
        assert!(matches!(err, ExecError::Type(_)));
    }

    #[test]
    fn math_library_preserves_integers() {
        assert_eq!(math_call("abs", &[Value::from(-4)]).unwrap(), Value::from(4));
        assert_eq!(
            math_call("min", &[Value::from(2), Value::from(5)]).unwrap(),
            Value::from(2)
        );
        assert_eq!(
            math_call("pow", &[Value::from(2), Value::from(10)]).unwrap(),
            Value::from(1024)
        );
    }

    #[test]
    fn text_library_basics() {
        assert_eq!(
            text_call("upper", &[Value::from("hey")]).unwrap(),
            Value::from("HEY")
        );
        assert_eq!(text_call("len", &[Value::from("héllo")]).unwrap(), Value::from(5));
        let split = text_call("split", &[Value::from("a,b"), Value::from(",")]).unwrap();
        assert_eq!(split, json!(["a", "b"]));
    }
}
