//! Execution contexts for handler bodies.
//!
//! Every handler invocation carries exactly one [`ExecContext`] describing
//! what triggered it. The variants are a closed set so a handler body can
//! never reach for a field its trigger kind does not provide: the transpiler
//! injects only the bindings listed by [`ExecContext::bindings`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What triggered a handler invocation, with the exact fields that trigger
/// kind provides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecContext {
    /// Fired by a chat message: a command invocation, a passive listener
    /// match, or a reaction on a message.
    Message {
        /// Guild the message was sent in.
        guild_id: String,
        /// Channel the message was sent in.
        channel_id: String,
        /// The triggering message id.
        message_id: String,
        /// Author (or reactor) id.
        user_id: String,
        /// Author (or reactor) display name.
        user_name: String,
        /// Message text content.
        content: String,
    },
    /// Fired by a component interaction (button click).
    Interaction {
        /// Guild the interaction happened in.
        guild_id: String,
        /// Channel hosting the interacted message.
        channel_id: String,
        /// Interaction id, used for replies.
        interaction_id: String,
        /// The clicked component's id.
        component_id: String,
        /// Interacting user id.
        user_id: String,
        /// Interacting user display name.
        user_name: String,
    },
    /// Fired through the trigger facility from another handler body.
    Trigger {
        /// Guild of the emitting plugin.
        guild_id: String,
        /// Channel of the emitting invocation, when one existed.
        channel_id: Option<String>,
        /// User of the emitting invocation, when one existed.
        user_id: Option<String>,
        /// The emitted trigger name.
        name: String,
    },
}

impl ExecContext {
    /// The guild this invocation belongs to.
    pub fn guild_id(&self) -> &str {
        match self {
            Self::Message { guild_id, .. }
            | Self::Interaction { guild_id, .. }
            | Self::Trigger { guild_id, .. } => guild_id,
        }
    }

    /// The channel to send replies to, when this context has one.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::Message { channel_id, .. } | Self::Interaction { channel_id, .. } => {
                Some(channel_id)
            }
            Self::Trigger { channel_id, .. } => channel_id.as_deref(),
        }
    }

    /// The acting user, when this context has one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Message { user_id, .. } | Self::Interaction { user_id, .. } => Some(user_id),
            Self::Trigger { user_id, .. } => user_id.as_deref(),
        }
    }

    /// The context values bound as leading `let` statements of every
    /// transpiled body, in a stable order.
    pub fn bindings(&self) -> Vec<(&'static str, Value)> {
        match self {
            Self::Message {
                guild_id,
                channel_id,
                message_id,
                user_id,
                user_name,
                content,
            } => vec![
                ("guild", Value::String(guild_id.clone())),
                ("channel", Value::String(channel_id.clone())),
                ("message_id", Value::String(message_id.clone())),
                ("user", Value::String(user_id.clone())),
                ("user_name", Value::String(user_name.clone())),
                ("content", Value::String(content.clone())),
            ],
            Self::Interaction {
                guild_id,
                channel_id,
                interaction_id,
                component_id,
                user_id,
                user_name,
            } => vec![
                ("guild", Value::String(guild_id.clone())),
                ("channel", Value::String(channel_id.clone())),
                ("interaction_id", Value::String(interaction_id.clone())),
                ("button", Value::String(component_id.clone())),
                ("user", Value::String(user_id.clone())),
                ("user_name", Value::String(user_name.clone())),
            ],
            Self::Trigger {
                guild_id,
                channel_id,
                user_id,
                name,
            } => vec![
                ("guild", Value::String(guild_id.clone())),
                (
                    "channel",
                    channel_id.clone().map(Value::String).unwrap_or(Value::Null),
                ),
                (
                    "user",
                    user_id.clone().map(Value::String).unwrap_or(Value::Null),
                ),
                ("trigger_name", Value::String(name.clone())),
            ],
        }
    }
}
