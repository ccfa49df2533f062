//! Unified error types for the Graft language layer.
//!
//! Execution-time errors live in `graft-runtime`; everything that can go
//! wrong before a plugin body runs is defined here.

use thiserror::Error;

// =============================================================================
// Parse Errors
// =============================================================================

/// Errors raised while parsing plugin source text.
///
/// Any of these is fatal for the plugin being parsed: the plugin is never
/// loaded, but other plugins in the same guild continue loading.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// The source has no `manifest { ... }` block.
    #[error("plugin source has no manifest block")]
    MissingManifest,

    /// A manifest or settings field could not be interpreted.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The field name as written in the source.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A construct header was found but its body never closes.
    #[error("unterminated '{construct}' block at offset {offset}")]
    UnterminatedBlock {
        /// The construct keyword (command, button, logic, ...).
        construct: String,
        /// Byte offset of the header in the source.
        offset: usize,
    },

    /// A construct is missing a section it cannot work without.
    #[error("'{construct}' is missing its '{section}' section")]
    MissingSection {
        /// The construct keyword.
        construct: String,
        /// The absent section keyword.
        section: String,
    },

    /// A parameter declaration inside a `params` block is malformed.
    #[error("invalid parameter declaration: {0}")]
    InvalidParam(String),

    /// An import names a library outside the allow-list.
    #[error("unknown import '{0}' (allowed: math, text, time, random, http, storage)")]
    UnknownImport(String),
}

// =============================================================================
// Scope Validation
// =============================================================================

/// Fatal scope-validation failure: the plugin uses capabilities it never
/// declared. Install and load are rejected.
#[derive(Debug, Clone, Error)]
pub enum ScopeError {
    /// Every scope that is required but undeclared, in first-use order.
    #[error("plugin uses capabilities without declaring the required scopes: {}", missing.join(", "))]
    MissingScopes {
        /// The exact missing set, no declared scope ever appears here.
        missing: Vec<String>,
    },
}

/// Non-fatal validation finding. Surfaced to the installer as a lint,
/// never blocks install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeWarning {
    /// A declared import whose library is never used in the source.
    UnusedImport(String),
}

impl std::fmt::Display for ScopeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnusedImport(lib) => write!(f, "import '{lib}' is declared but never used"),
        }
    }
}

// =============================================================================
// Script Errors
// =============================================================================

/// A lexing or parsing failure in the canonical script form, with the
/// position where the scanner gave up.
#[derive(Debug, Clone, Error)]
#[error("{message} at line {line}, column {column}")]
pub struct ScriptError {
    /// Human-readable description of the failure.
    pub message: String,
    /// 1-based line of the offending token.
    pub line: u32,
    /// 1-based column of the offending token.
    pub column: u32,
}

impl ScriptError {
    /// Creates a new script error at the given position.
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for plugin source parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for scope validation.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Result type for script lexing/parsing.
pub type ScriptResult<T> = Result<T, ScriptError>;
