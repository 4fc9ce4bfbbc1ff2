use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_utc_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One chat message, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: String,
    pub image_url: Option<String>,
}

impl ChatMessage {
    pub fn new(sender: Sender, content: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            sender,
            timestamp: now_utc_iso(),
            image_url,
        }
    }
}

/// Append-only chat transcript, kept in lockstep with the version history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.messages.as_slice()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::new(Sender::User, content, None))
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> &ChatMessage {
        self.push(ChatMessage::new(Sender::Assistant, content, None))
    }

    pub fn push_assistant_with_image(
        &mut self,
        content: impl Into<String>,
        image_url: impl Into<String>,
    ) -> &ChatMessage {
        self.push(ChatMessage::new(
            Sender::Assistant,
            content,
            Some(image_url.into()),
        ))
    }

    fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        let index = self.messages.len() - 1;
        &self.messages[index]
    }
}

#[cfg(test)]
mod tests {
    use super::{Sender, Transcript};

    #[test]
    fn transcript_appends_in_order() {
        let mut transcript = Transcript::new();
        transcript.push_user("make it a watercolor");
        transcript.push_assistant("Done.");

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].sender, Sender::User);
        assert_eq!(transcript.messages()[1].sender, Sender::Assistant);
        assert_eq!(transcript.last().map(|message| message.content.as_str()), Some("Done."));
    }

    #[test]
    fn assistant_message_can_carry_an_image_reference() {
        let mut transcript = Transcript::new();
        let message =
            transcript.push_assistant_with_image("New image uploaded: cat.png.", "data:image/png;base64,AA==");
        assert_eq!(message.image_url.as_deref(), Some("data:image/png;base64,AA=="));
        assert!(transcript.messages()[0].image_url.is_some());
    }

    #[test]
    fn serde_sender_uses_lowercase_tags() {
        let mut transcript = Transcript::new();
        transcript.push_user("hello");
        let encoded = serde_json::to_string(transcript.messages()).unwrap();
        assert!(encoded.contains("\"sender\":\"user\""));
    }
}
