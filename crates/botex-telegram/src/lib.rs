//! Telegram adapter (teloxide).
//!
//! Implements the `botex-core` messaging and platform-admin ports over the Telegram Bot API.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;

use teloxide::{prelude::*, types::InputFile};

use tokio::time::sleep;

pub mod router;

use botex_core::{
    domain::{ChatId, GroupId, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::{InboundMessage, MessagingPort, PlatformAdminPort},
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    connected: Arc<AtomicBool>,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    fn tg_chat(chat_id: &ChatId) -> Result<teloxide::types::ChatId> {
        chat_id
            .as_str()
            .parse::<i64>()
            .map(teloxide::types::ChatId)
            .map_err(|_| Error::External(format!("not a telegram chat id: {chat_id}")))
    }

    fn tg_msg_id(message_id: &MessageId) -> Result<teloxide::types::MessageId> {
        message_id
            .as_str()
            .parse::<i32>()
            .map(teloxide::types::MessageId)
            .map_err(|_| Error::External(format!("not a telegram message id: {message_id}")))
    }

    fn tg_user(user: &UserId) -> Result<teloxide::types::UserId> {
        user.as_str()
            .parse::<u64>()
            .map(teloxide::types::UserId)
            .map_err(|_| Error::External(format!("not a telegram user id: {user}")))
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::debug!(retry_after = ?d, "telegram flood control, retrying");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<()> {
        let chat = Self::tg_chat(chat_id)?;
        self.with_retry(|| self.bot.send_message(chat, text.to_string()))
            .await?;
        Ok(())
    }

    async fn send_image(&self, chat_id: &ChatId, image: Vec<u8>, caption: &str) -> Result<()> {
        let chat = Self::tg_chat(chat_id)?;
        self.with_retry(|| {
            self.bot
                .send_photo(chat, InputFile::memory(image.clone()).file_name("image.png"))
                .caption(caption.to_string())
        })
        .await?;
        Ok(())
    }

    // The Bot API version behind teloxide 0.12 has no message reactions; the
    // emoji goes out as a short reply to the triggering message instead.
    async fn send_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()> {
        let chat = Self::tg_chat(&msg.chat_id)?;
        let reply_to = Self::tg_msg_id(&msg.message_id)?;
        self.with_retry(|| {
            self.bot
                .send_message(chat, emoji.to_string())
                .reply_to_message_id(reply_to)
                .allow_sending_without_reply(true)
                .disable_notification(true)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformAdminPort for TelegramMessenger {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn is_group_admin(&self, user: &UserId, group: &GroupId) -> Result<bool> {
        let chat = Self::tg_chat(&ChatId::from(group))?;
        let user = Self::tg_user(user)?;
        let member = self
            .with_retry(|| self.bot.get_chat_member(chat, user))
            .await?;
        Ok(member.kind.is_privileged())
    }
}

/// Normalize a Telegram text message. `None` for anything the bot does not act on.
pub fn inbound_from_message(msg: &Message) -> Option<InboundMessage> {
    let sender = msg.from()?;
    let text = msg.text()?;
    let is_group = msg.chat.is_group() || msg.chat.is_supergroup();
    Some(inbound_from_parts(
        msg.chat.id.0,
        msg.id.0,
        sender.id.0,
        is_group,
        text,
    ))
}

fn inbound_from_parts(
    chat_id: i64,
    message_id: i32,
    sender: u64,
    is_group: bool,
    text: &str,
) -> InboundMessage {
    let chat_id = ChatId::from(chat_id.to_string());
    InboundMessage {
        group: is_group.then(|| GroupId::from(chat_id.as_str())),
        message: MessageRef {
            chat_id,
            message_id: MessageId::from(message_id.to_string()),
        },
        sender: UserId::from(sender.to_string()),
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_messages_carry_the_chat_as_group() {
        let msg = inbound_from_parts(-100123, 42, 777, true, "!help");
        assert_eq!(msg.group, Some(GroupId::from("-100123")));
        assert_eq!(msg.chat(), ChatId::from("-100123"));
        assert_eq!(msg.message.message_id, MessageId::from("42"));
        assert_eq!(msg.sender, UserId::from("777"));
    }

    #[test]
    fn private_messages_have_no_group() {
        let msg = inbound_from_parts(777, 1, 777, false, "!help");
        assert!(msg.group.is_none());
        assert_eq!(msg.chat(), ChatId::from("777"));
    }

    #[test]
    fn ids_must_be_numeric() {
        assert!(TelegramMessenger::tg_chat(&ChatId::from("-42")).is_ok());
        assert!(TelegramMessenger::tg_chat(&ChatId::from("abc")).is_err());
        assert!(TelegramMessenger::tg_user(&UserId::from("-1")).is_err());
        assert!(TelegramMessenger::tg_msg_id(&MessageId::from("9")).is_ok());
    }
}
