pub mod webhook;

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// A chat message notification pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundNotification {
    /// Chat the message was posted in (group or direct).
    pub chat_id: String,
    /// Set when the bridge's own account sent the message.
    pub from_me: bool,
    /// Gateway message id, used when quoting the message in the reply.
    pub message_id: Option<String>,
    /// Plain-text body; `None` for echoes, which are never parsed further.
    pub text: Option<String>,
}

impl InboundNotification {
    /// Extract the fields the bridge needs from a webhook body.
    ///
    /// Only plain-text (`conversation`) messages carry a body the bridge
    /// understands; anything else fails extraction unless the message is an
    /// echo of our own.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let key = payload
            .pointer("/data/key")
            .context("Notification has no data.key")?;
        let chat_id = key
            .get("remoteJid")
            .and_then(Value::as_str)
            .context("Notification has no data.key.remoteJid")?
            .to_string();
        let from_me = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);
        let message_id = key.get("id").and_then(Value::as_str).map(str::to_string);

        if from_me {
            return Ok(Self {
                chat_id,
                from_me,
                message_id,
                text: None,
            });
        }

        let text = payload
            .pointer("/data/message/conversation")
            .and_then(Value::as_str)
            .context("Notification has no data.message.conversation text")?
            .to_string();

        Ok(Self {
            chat_id,
            from_me,
            message_id,
            text: Some(text),
        })
    }

    /// Gateway quote object pointing back at this message.
    pub fn quote(&self) -> Option<Value> {
        let id = self.message_id.as_ref()?;
        Some(json!({
            "key": { "id": id },
            "message": { "conversation": self.text.as_deref().unwrap_or_default() }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_text_message() {
        let payload = json!({
            "event": "messages.upsert",
            "data": {
                "key": {"remoteJid": "G1", "fromMe": false, "id": "3EB0"},
                "message": {"conversation": "Oi"}
            }
        });
        let n = InboundNotification::from_payload(&payload).unwrap();
        assert_eq!(n.chat_id, "G1");
        assert!(!n.from_me);
        assert_eq!(n.message_id.as_deref(), Some("3EB0"));
        assert_eq!(n.text.as_deref(), Some("Oi"));
    }

    #[test]
    fn test_echo_skips_text_extraction() {
        let payload = json!({
            "data": {
                "key": {"remoteJid": "G1", "fromMe": true},
                "message": {"imageMessage": {}}
            }
        });
        let n = InboundNotification::from_payload(&payload).unwrap();
        assert!(n.from_me);
        assert_eq!(n.text, None);
    }

    #[test]
    fn test_non_text_message_fails() {
        let payload = json!({
            "data": {
                "key": {"remoteJid": "G1", "fromMe": false},
                "message": {"extendedTextMessage": {"text": "link"}}
            }
        });
        let err = InboundNotification::from_payload(&payload).unwrap_err();
        assert!(err.to_string().contains("conversation"));
    }

    #[test]
    fn test_missing_chat_id_fails() {
        assert!(InboundNotification::from_payload(&json!({"data": {}})).is_err());
        assert!(InboundNotification::from_payload(&json!({"data": {"key": {}}})).is_err());
        assert!(InboundNotification::from_payload(&json!([])).is_err());
    }

    #[test]
    fn test_quote() {
        let n = InboundNotification {
            chat_id: "G1".into(),
            from_me: false,
            message_id: Some("ABC".into()),
            text: Some("Oi".into()),
        };
        assert_eq!(
            n.quote(),
            Some(json!({"key": {"id": "ABC"}, "message": {"conversation": "Oi"}}))
        );

        let anonymous = InboundNotification {
            message_id: None,
            ..n
        };
        assert_eq!(anonymous.quote(), None);
    }
}
