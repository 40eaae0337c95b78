use async_trait::async_trait;

use crate::{
    domain::{ChatId, GroupId, MessageRef, UserId},
    Result,
};

/// Outbound side of the messaging transport.
///
/// The dispatcher needs plain text and a reaction on the message that triggered
/// the command; `send_image` is there for commands that render pictures.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<()>;

    async fn send_image(&self, chat_id: &ChatId, image: Vec<u8>, caption: &str) -> Result<()>;

    async fn send_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()>;
}

/// Platform-native group roles (moderators/admins on the messaging network).
#[async_trait]
pub trait PlatformAdminPort: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn is_group_admin(&self, user: &UserId, group: &GroupId) -> Result<bool>;
}
