//! Fakes and fixtures shared by unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{
    auth::{AccessControlStore, Rank, RegisteredGroup, SqliteAccessStore, User},
    domain::{ChatId, GroupId, MessageId, MessageRef, UserId},
    messaging::{InboundMessage, MessagingPort},
    Result,
};

pub const ADMIN: &str = "admin";
pub const ALICE: &str = "alice";
pub const GROUP: &str = "G1";

/// In-memory store with: `user` rank (help, latex), `admin` as owner,
/// `alice` as user, and group `G1` registered by `admin`.
pub async fn seeded_store() -> Arc<SqliteAccessStore> {
    let store = SqliteAccessStore::open_in_memory(None).await.unwrap();
    store.init_schema("basic").await.unwrap();
    store
        .create_rank(&Rank::new("user", 50, vec!["help".into(), "latex".into()]))
        .await
        .unwrap();
    store
        .create_user(&User::new(UserId::from(ADMIN), "owner", None))
        .await
        .unwrap();
    store
        .create_user(&User::new(
            UserId::from(ALICE),
            "user",
            Some(UserId::from(ADMIN)),
        ))
        .await
        .unwrap();
    store
        .create_group(&RegisteredGroup::new(
            GroupId::from(GROUP),
            UserId::from(ADMIN),
        ))
        .await
        .unwrap();
    Arc::new(store)
}

pub fn inbound(sender: &str, group: Option<&str>, text: &str) -> InboundMessage {
    let chat = group.unwrap_or(sender);
    InboundMessage {
        message: MessageRef {
            chat_id: ChatId::from(chat),
            message_id: MessageId::from("1"),
        },
        sender: UserId::from(sender),
        group: group.map(GroupId::from),
        text: text.to_string(),
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub texts: Mutex<Vec<(ChatId, String)>>,
    pub reactions: Mutex<Vec<(MessageRef, String)>>,
    pub images: Mutex<Vec<(ChatId, Vec<u8>, String)>>,
}

impl RecordingMessenger {
    pub fn texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn reactions(&self) -> Vec<String> {
        self.reactions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }

    pub fn images(&self) -> Vec<Vec<u8>> {
        self.images
            .lock()
            .unwrap()
            .iter()
            .map(|(_, bytes, _)| bytes.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    fn is_connected(&self) -> bool {
        true
    }

    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<()> {
        self.texts
            .lock()
            .unwrap()
            .push((chat_id.clone(), text.to_string()));
        Ok(())
    }

    async fn send_image(&self, chat_id: &ChatId, image: Vec<u8>, caption: &str) -> Result<()> {
        self.images
            .lock()
            .unwrap()
            .push((chat_id.clone(), image, caption.to_string()));
        Ok(())
    }

    async fn send_reaction(&self, msg: &MessageRef, emoji: &str) -> Result<()> {
        self.reactions
            .lock()
            .unwrap()
            .push((msg.clone(), emoji.to_string()));
        Ok(())
    }
}
