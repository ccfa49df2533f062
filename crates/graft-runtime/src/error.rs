//! Unified error types for the Graft execution layer.
//!
//! Runtime failures inside a handler body are classified at report time into
//! a small set of user-facing categories and rendered as an [`ErrorReport`]
//! with a title, description, color, and truncated technical detail. They
//! are always caught at the dispatch boundary; nothing here ever crashes
//! the dispatcher.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use graft_core::ScriptError;

// =============================================================================
// Host Errors
// =============================================================================

/// Errors from the external collaborators (chat platform, persistence,
/// source download).
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// The platform API rejected or failed a call.
    #[error("platform API error: {0}")]
    Api(String),

    /// A requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The persistence layer failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for collaborator calls.
pub type HostResult<T> = Result<T, HostError>;

// =============================================================================
// Execution Errors
// =============================================================================

/// A failure during transpilation, parsing, or evaluation of a handler body,
/// or a denial from the rate-control layers.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The transpiled body failed to lex or parse.
    #[error("syntax error: {0}")]
    Syntax(#[from] ScriptError),

    /// An identifier, function, or library was not found.
    #[error("unknown reference: {0}")]
    Reference(String),

    /// An operation was applied to values of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// A property access on a value that has no such property.
    #[error("unknown property: {0}")]
    Property(String),

    /// The handler exceeded its time budget and was abandoned.
    #[error("handler exceeded its {}s time budget", .0.as_secs())]
    Timeout(Duration),

    /// The action is on cooldown for the acting user.
    #[error("action is on cooldown for another {0}s")]
    CooldownActive(u64),

    /// The plugin's outbound HTTP quota is exhausted.
    #[error("outbound HTTP quota exceeded: {0}")]
    HttpQuotaExceeded(String),

    /// The target domain is administratively blocked.
    #[error("domain '{0}' is blocked")]
    DomainBlocked(String),

    /// A required command parameter was not supplied.
    #[error("missing required parameter '{name}'")]
    MissingParameter {
        /// The parameter that was not bound.
        name: String,
        /// The command's usage line.
        usage: String,
    },

    /// An outbound HTTP request failed or returned an oversized body.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A collaborator call failed inside the handler.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Result type for handler execution.
pub type ExecResult<T> = Result<T, ExecError>;

// =============================================================================
// Error Reports
// =============================================================================

/// Embed color for hard faults in plugin code.
const COLOR_FAULT: u32 = 0xED4245;
/// Embed color for timeouts.
const COLOR_TIMEOUT: u32 = 0xE67E22;
/// Embed color for rate-control denials.
const COLOR_DENIAL: u32 = 0xFEE75C;
/// Embed color for usage problems.
const COLOR_USAGE: u32 = 0x5865F2;

const DETAIL_LIMIT: usize = 256;

/// The user-facing rendering of a classified execution failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    /// Category title.
    pub title: &'static str,
    /// One-line description shown to the user.
    pub description: String,
    /// Embed accent color.
    pub color: u32,
    /// Technical detail, truncated to a display-safe length.
    pub detail: String,
}

impl ErrorReport {
    /// Classifies an execution error into its report category.
    pub fn from_error(err: &ExecError) -> Self {
        let (title, color, description) = match err {
            ExecError::Syntax(_) => (
                "Syntax Error",
                COLOR_FAULT,
                "The plugin body could not be parsed.".to_string(),
            ),
            ExecError::Reference(what) => (
                "Unknown Reference",
                COLOR_FAULT,
                format!("The plugin referenced something that does not exist: {what}."),
            ),
            ExecError::Type(_) => (
                "Type Error",
                COLOR_FAULT,
                "The plugin combined values of incompatible types.".to_string(),
            ),
            ExecError::Property(what) => (
                "Property Error",
                COLOR_FAULT,
                format!("The plugin accessed a property that does not exist: {what}."),
            ),
            ExecError::Timeout(budget) => (
                "Timed Out",
                COLOR_TIMEOUT,
                format!(
                    "The handler did not finish within {}s and was stopped.",
                    budget.as_secs()
                ),
            ),
            ExecError::CooldownActive(secs) => (
                "Slow Down",
                COLOR_DENIAL,
                format!("This action is on cooldown for another {secs}s."),
            ),
            ExecError::HttpQuotaExceeded(_) => (
                "HTTP Limit Reached",
                COLOR_DENIAL,
                "The plugin made too many web requests; try again later.".to_string(),
            ),
            ExecError::DomainBlocked(domain) => (
                "Domain Blocked",
                COLOR_DENIAL,
                format!("Requests to '{domain}' are not allowed."),
            ),
            ExecError::MissingParameter { usage, .. } => (
                "Missing Parameter",
                COLOR_USAGE,
                format!("Usage: {usage}"),
            ),
            ExecError::Http(_) => (
                "Request Failed",
                COLOR_FAULT,
                "An outbound web request failed.".to_string(),
            ),
            ExecError::Host(_) => (
                "Platform Error",
                COLOR_FAULT,
                "A platform operation failed.".to_string(),
            ),
        };

        Self {
            title,
            description,
            color,
            detail: truncate(&err.to_string(), DETAIL_LIMIT),
        }
    }

    /// Renders this report as an embed payload for the chat platform.
    pub fn to_embed(&self) -> Value {
        json!({
            "$kind": "embed",
            "title": self.title,
            "description": self.description,
            "color": self.color,
            "footer": self.detail,
        })
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
