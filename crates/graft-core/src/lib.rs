//! # Graft Core
//!
//! The language layer of the Graft plugin runtime.
//!
//! Plugins are small textual programs in a restricted DSL. This crate turns
//! plugin source into data the execution layer can act on, in four steps:
//!
//! 1. **Parsing** — [`manifest::parse_manifest`] and
//!    [`manifest::parse_settings`] extract identity and configuration;
//!    [`definition::parse_definition`] extracts commands, buttons, reactions,
//!    custom events, and the logic section. All of them pull block bodies
//!    with the nesting-aware [`block::extract_block`].
//! 2. **Validation** — [`scope::validate`] checks that the declared scope
//!    set covers every capability the source reaches for, and lints unused
//!    imports.
//! 3. **Transpilation** — [`transpile::transpile`] rewrites a handler body
//!    into canonical script text through a fixed sequence of passes and
//!    injects the execution context as leading bindings.
//! 4. **Script parsing** — [`script::parse`] turns canonical text into the
//!    statement list the sandbox evaluator executes.
//!
//! Everything here is synchronous and I/O free; execution lives in
//! `graft-runtime`.

pub mod block;
pub mod context;
pub mod definition;
pub mod error;
pub mod manifest;
pub mod scope;
pub mod script;
pub mod transpile;

pub use block::{extract_block, find_block_start};
pub use context::ExecContext;
pub use definition::{
    ButtonHandler, CommandHandler, CustomEvent, Listener, ParamSpec, PluginDefinition,
    ReactionHandler, TriggerFn, parse_definition,
};
pub use error::{
    ParseError, ParseResult, ScopeError, ScopeResult, ScopeWarning, ScriptError, ScriptResult,
};
pub use manifest::{
    PluginManifest, SettingSpec, SettingValue, SettingsSchema, ValueKind, parse_manifest,
    parse_settings,
};
pub use scope::{required_scopes, validate};
pub use transpile::{transpile, transpile_predicate};
