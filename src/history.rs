//! Conversation history records as returned by the gateway, and their
//! rendering into prompt context lines.

use chrono::{DateTime, TimeZone};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Payload of a history message, one variant per gateway message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    ExtendedText(String),
    Image { caption: String },
    Audio,
    Video,
    /// Message type the bridge does not render; carries the raw type tag.
    Unsupported(String),
}

impl MessageContent {
    /// Build from the gateway's `messageType` tag and `message` object.
    pub fn from_parts(message_type: &str, message: &Value) -> Self {
        let str_at = |pointer: &str| {
            message
                .pointer(pointer)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        match message_type {
            "conversation" => MessageContent::Text(str_at("/conversation")),
            "extendedTextMessage" => {
                MessageContent::ExtendedText(str_at("/extendedTextMessage/text"))
            }
            "imageMessage" => MessageContent::Image {
                caption: str_at("/imageMessage/caption"),
            },
            "audioMessage" => MessageContent::Audio,
            "videoMessage" => MessageContent::Video,
            other => MessageContent::Unsupported(other.to_string()),
        }
    }

    /// Human-readable rendering used inside the prompt.
    pub fn render(&self) -> String {
        match self {
            MessageContent::Text(text) | MessageContent::ExtendedText(text) => text.clone(),
            MessageContent::Image { caption } => format!("[Imagem: {}]", caption),
            MessageContent::Audio => "[Mensagem de áudio]".to_string(),
            MessageContent::Video => "[Vídeo enviado]".to_string(),
            MessageContent::Unsupported(_) => "[Tipo de mensagem não tratado]".to_string(),
        }
    }
}

/// One message of a chat's recent history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub sender_name: Option<String>,
    pub from_me: bool,
    pub content: MessageContent,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Record shape on the wire. Everything is optional since the gateway
/// omits fields freely depending on message type.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawRecord {
    #[serde(default)]
    key: RawKey,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    push_name: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    message: Value,
    #[serde(default)]
    message_timestamp: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKey {
    #[serde(default)]
    from_me: bool,
}

/// Timestamps arrive as integers, floats or numeric strings depending on the
/// store. Fractional seconds are truncated.
fn parse_timestamp(value: &Value) -> i64 {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        Value::Null => Some(0),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        debug!("Unparsable messageTimestamp {}, using 0", value);
        0
    })
}

impl From<RawRecord> for HistoryRecord {
    fn from(raw: RawRecord) -> Self {
        let timestamp = raw
            .message_timestamp
            .as_ref()
            .map(parse_timestamp)
            .unwrap_or_default();

        HistoryRecord {
            sender_name: raw
                .sender_name
                .or(raw.push_name)
                .filter(|n| !n.is_empty()),
            from_me: raw.key.from_me,
            content: MessageContent::from_parts(
                raw.message_type.as_deref().unwrap_or_default(),
                &raw.message,
            ),
            timestamp,
        }
    }
}

impl HistoryRecord {
    pub fn author(&self) -> &str {
        match &self.sender_name {
            Some(name) => name.as_str(),
            None if self.from_me => "Você",
            None => "Contato",
        }
    }

    /// `DD/MM/YYYY HH:MM - author: content`, with the timestamp shown in `tz`.
    pub fn format_line<Tz>(&self, tz: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let when = DateTime::from_timestamp(self.timestamp, 0)
            .unwrap_or_default()
            .with_timezone(tz)
            .format("%d/%m/%Y %H:%M");
        format!("{} - {}: {}", when, self.author(), self.content.render())
    }
}

/// Join formatted history lines, oldest first, into the prompt context.
pub fn build_context<Tz>(records: &[HistoryRecord], tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    records
        .iter()
        .map(|record| record.format_line(tz))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full prompt sent to the model.
pub fn render_prompt(instructions: &str, context: &str, text: &str) -> String {
    format!(
        "{} HISTÓRICO: {} MENSAGEM RECEBIDA: {} SUA RESPOSTA:",
        instructions, context, text
    )
}
