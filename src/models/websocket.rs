use serde::{ Serialize, Deserialize };
use super::chat::Message;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "subscribe")] Subscribe {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "new_message")] NewMessage {
        message: Message,
    },
    #[serde(rename = "subscribed")] Subscribed {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_is_tagged() {
        let frame = ClientFrame::Subscribe { conversation_id: "c1".into() };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["conversationId"], "c1");
    }

    #[test]
    fn parses_new_message_frame() {
        let text =
            r#"{"type":"new_message","message":{"id":"m1","conversationId":"c1","senderId":"o1","content":"hi","createdAt":"2024-01-01T10:00:00Z"}}"#;
        match serde_json::from_str::<ServerFrame>(text).unwrap() {
            ServerFrame::NewMessage { message } => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.conversation_id, "c1");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
