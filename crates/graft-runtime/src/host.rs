//! Chat-platform collaborator contract.
//!
//! The runtime never owns platform resources; it calls through [`ChatHost`],
//! a capability provider implemented by the embedding application. Concrete
//! hosts wrap whatever client library the platform requires; tests use an
//! in-memory mock.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HostResult;

// =============================================================================
// Inbound Events
// =============================================================================

/// A chat message delivered by the platform.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Guild the message was sent in.
    pub guild_id: String,
    /// Channel the message was sent in.
    pub channel_id: String,
    /// Platform message id.
    pub message_id: String,
    /// Author id.
    pub author_id: String,
    /// Author display name.
    pub author_name: String,
    /// Text content.
    pub content: String,
    /// Whether the author is a bot account. Bot messages are never
    /// dispatched.
    pub author_is_bot: bool,
}

/// A button-click interaction delivered by the platform.
#[derive(Debug, Clone)]
pub struct ButtonClick {
    /// Guild the interaction happened in.
    pub guild_id: String,
    /// Channel hosting the interacted message.
    pub channel_id: String,
    /// Interaction id, used to reply.
    pub interaction_id: String,
    /// The clicked component's id.
    pub component_id: String,
    /// Interacting user id.
    pub user_id: String,
    /// Interacting user display name.
    pub user_name: String,
}

/// A reaction-add event delivered by the platform.
#[derive(Debug, Clone)]
pub struct ReactionAdd {
    /// Guild the reaction happened in.
    pub guild_id: String,
    /// Channel of the reacted message.
    pub channel_id: String,
    /// The reacted message id.
    pub message_id: String,
    /// Reacting user id.
    pub user_id: String,
    /// Reacting user display name.
    pub user_name: String,
    /// The emoji, in the platform's canonical form.
    pub emoji: String,
}

// =============================================================================
// Outbound Payloads
// =============================================================================

/// A message the runtime asks the platform to send.
///
/// Embeds and button rows are the tagged JSON payloads produced by the
/// sandbox builders (`$kind: "embed"` / `$kind: "button_row"`); the host
/// translates them into its platform's wire format.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    /// Plain text content.
    pub content: Option<String>,
    /// Embed payload.
    pub embed: Option<Value>,
    /// Button-row payload.
    pub buttons: Option<Value>,
}

impl OutgoingMessage {
    /// A plain text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A message with just an embed.
    pub fn embed(embed: Value) -> Self {
        Self {
            embed: Some(embed),
            ..Self::default()
        }
    }
}

/// Channel metadata returned by the platform.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Channel id.
    pub id: String,
    /// Channel name.
    pub name: String,
    /// Platform channel kind (text, voice, ...).
    pub kind: String,
}

/// Guild metadata returned by the platform.
#[derive(Debug, Clone)]
pub struct GuildInfo {
    /// Guild id.
    pub id: String,
    /// Guild name.
    pub name: String,
    /// Member count.
    pub member_count: u64,
}

/// User metadata returned by the platform.
#[derive(Debug, Clone)]
pub struct UserInfo {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether this is a bot account.
    pub bot: bool,
}

// =============================================================================
// ChatHost Trait
// =============================================================================

/// The capability provider the runtime calls through for every platform
/// operation. Nothing else in the runtime touches the chat platform.
#[async_trait]
pub trait ChatHost: Send + Sync {
    /// The bot's own user id, used for bot-permission checks.
    fn bot_user_id(&self) -> &str;

    /// Sends a message to a channel. Returns the new message id.
    async fn send_message(
        &self,
        channel_id: &str,
        message: OutgoingMessage,
    ) -> HostResult<String>;

    /// Deletes a message.
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> HostResult<()>;

    /// Fetches channel metadata.
    async fn fetch_channel(&self, channel_id: &str) -> HostResult<ChannelInfo>;

    /// Creates a text channel in a guild.
    async fn create_channel(&self, guild_id: &str, name: &str) -> HostResult<ChannelInfo>;

    /// Deletes a channel.
    async fn delete_channel(&self, channel_id: &str) -> HostResult<()>;

    /// Fetches guild metadata.
    async fn fetch_guild(&self, guild_id: &str) -> HostResult<GuildInfo>;

    /// Fetches user metadata.
    async fn fetch_user(&self, user_id: &str) -> HostResult<UserInfo>;

    /// Checks whether a user holds a permission in a guild.
    async fn has_permission(
        &self,
        user_id: &str,
        guild_id: &str,
        permission: &str,
    ) -> HostResult<bool>;

    /// Replies to an interaction.
    async fn reply_interaction(
        &self,
        interaction_id: &str,
        message: OutgoingMessage,
    ) -> HostResult<()>;
}

/// A shared chat host handle.
pub type SharedHost = Arc<dyn ChatHost>;
