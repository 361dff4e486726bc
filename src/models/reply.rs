use serde::{ Serialize, Deserialize };
use super::chat::Message;

const PREVIEW_LEN: usize = 120;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTarget {
    pub id: String,
    pub sender_id: String,
    pub preview: String,
}

/// Reply-to convention carried inside `Message::content`.
///
/// Plain text content is not an envelope; only a JSON object with both a `replyTo`
/// and a `text` field is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub reply_to: ReplyTarget,
    pub text: String,
}

impl ReplyEnvelope {
    pub fn new(text: impl Into<String>, original: &Message) -> Self {
        let visible = match ReplyEnvelope::parse(&original.content) {
            Some(envelope) => envelope.text,
            None => original.content.clone(),
        };
        Self {
            reply_to: ReplyTarget {
                id: original.id.clone(),
                sender_id: original.sender_id.clone(),
                preview: truncate_preview(&visible),
            },
            text: text.into(),
        }
    }

    pub fn parse(content: &str) -> Option<Self> {
        let trimmed = content.trim_start();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Text a UI should show for `content`, unwrapping a reply envelope if present.
pub fn display_text(content: &str) -> String {
    match ReplyEnvelope::parse(content) {
        Some(envelope) => envelope.text,
        None => content.to_string(),
    }
}

fn truncate_preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_LEN) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: &str, content: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "o1".into(),
            content: content.into(),
            created_at: Utc::now(),
            read_at: None,
            attachment_url: None,
            attachment_name: None,
            attachment_size: None,
        }
    }

    #[test]
    fn plain_text_is_not_an_envelope() {
        assert!(ReplyEnvelope::parse("hello there").is_none());
        assert!(ReplyEnvelope::parse("{not json").is_none());
        assert!(ReplyEnvelope::parse(r#"{"text":"missing target"}"#).is_none());
        assert_eq!(display_text("hello there"), "hello there");
    }

    #[test]
    fn encodes_and_unwraps_reply() {
        let original = message("m1", "When can you start?");
        let content = ReplyEnvelope::new("Next Monday", &original).encode().unwrap();

        let parsed = ReplyEnvelope::parse(&content).unwrap();
        assert_eq!(parsed.reply_to.id, "m1");
        assert_eq!(parsed.reply_to.sender_id, "o1");
        assert_eq!(parsed.reply_to.preview, "When can you start?");
        assert_eq!(display_text(&content), "Next Monday");
    }

    #[test]
    fn reply_to_a_reply_previews_visible_text() {
        let first = message("m1", "Interview at 3pm?");
        let reply = message("m2", &ReplyEnvelope::new("Works for me", &first).encode().unwrap());
        let envelope = ReplyEnvelope::new("Great", &reply);
        assert_eq!(envelope.reply_to.preview, "Works for me");
    }

    #[test]
    fn long_previews_are_truncated_on_char_boundary() {
        let original = message("m1", &"é".repeat(200));
        let envelope = ReplyEnvelope::new("ok", &original);
        assert_eq!(envelope.reply_to.preview.chars().count(), PREVIEW_LEN + 1);
        assert!(envelope.reply_to.preview.ends_with('…'));
    }
}
