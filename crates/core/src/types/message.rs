use serde::{Deserialize, Serialize};
use std::borrow::Cow;

// =============================================================================
// Message Types
// =============================================================================

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single part of a structured message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text part.
    Text { text: String },
    /// Image reference. Not inspected by text scanners.
    ImageUrl { url: String },
}

/// Message body: either plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Textual view of the content. Text parts are joined with newlines.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text.as_str()),
            Self::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::ImageUrl { .. } => None,
                    })
                    .collect();
                match texts.as_slice() {
                    [] => Cow::Borrowed(""),
                    [single] => Cow::Borrowed(*single),
                    _ => Cow::Owned(texts.join("\n")),
                }
            }
        }
    }

    /// Number of characters across all text parts.
    pub fn char_len(&self) -> usize {
        self.as_text().chars().count()
    }
}

/// Chat message as received from the client. Never mutated after intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message author.
    pub role: Role,
    /// Message body.
    pub content: MessageContent,
}

impl Message {
    /// Create a text message with the given role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Textual view of the message body.
    pub fn text(&self) -> Cow<'_, str> {
        self.content.as_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_text_view_skips_images() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "first".into() },
            ContentPart::ImageUrl { url: "https://example.com/a.png".into() },
            ContentPart::Text { text: "second".into() },
        ]);
        assert_eq!(content.as_text(), "first\nsecond");
    }

    #[test]
    fn test_message_deserializes_both_shapes() {
        let plain: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(plain.text(), "hi");

        let parts: Message = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"hello"}]}"#,
        )
        .unwrap();
        assert_eq!(parts.role, Role::User);
        assert_eq!(parts.text(), "hello");
    }
}
