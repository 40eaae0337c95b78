use crate::domain::{ChatId, GroupId, MessageRef, UserId};

/// One inbound chat message, already stripped of transport specifics.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub message: MessageRef,
    pub sender: UserId,
    /// `None` for private chats.
    pub group: Option<GroupId>,
    pub text: String,
}

impl InboundMessage {
    /// Where replies go: the group, or the private chat with the sender.
    pub fn chat(&self) -> ChatId {
        match &self.group {
            Some(g) => ChatId::from(g),
            None => self.message.chat_id.clone(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;

    fn msg(group: Option<&str>) -> InboundMessage {
        let chat = group.unwrap_or("u1");
        InboundMessage {
            message: MessageRef {
                chat_id: ChatId::from(chat),
                message_id: MessageId::from("7"),
            },
            sender: UserId::from("u1"),
            group: group.map(GroupId::from),
            text: "!help".to_string(),
        }
    }

    #[test]
    fn replies_go_to_group_or_private_chat() {
        assert_eq!(msg(Some("g1")).chat(), ChatId::from("g1"));
        assert!(msg(Some("g1")).is_group());
        assert_eq!(msg(None).chat(), ChatId::from("u1"));
        assert!(!msg(None).is_group());
    }
}
