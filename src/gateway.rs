//! Client for the messaging gateway (Evolution API): fetches chat history
//! and sends text replies.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::history::{HistoryRecord, RawRecord};

/// Result of a history query. A failed fetch still yields usable (empty)
/// context, but callers can tell it apart from a chat with no messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Records in chronological order, oldest first.
    Fetched(Vec<HistoryRecord>),
    Failed(String),
}

impl HistoryOutcome {
    pub fn records(&self) -> &[HistoryRecord] {
        match self {
            HistoryOutcome::Fetched(records) => records.as_slice(),
            HistoryOutcome::Failed(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mentions {
    pub every_one: bool,
    pub mentioned: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    /// Milliseconds the gateway waits before delivering.
    pub delay: u64,
    pub presence: String,
    pub link_preview: bool,
    /// Gateway message object to quote, if replying to a specific message.
    pub quoted: Option<Value>,
    pub mentions: Mentions,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            delay: 123,
            presence: "composing".to_string(),
            link_preview: true,
            quoted: None,
            mentions: Mentions::default(),
        }
    }
}

/// Body of a send-text request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundReply {
    /// Destination chat identifier.
    pub number: String,
    pub options: SendOptions,
    pub text: String,
}

impl OutboundReply {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            number: chat_id.into(),
            options: SendOptions::default(),
            text: text.into(),
        }
    }

    pub fn quoting(mut self, message: Value) -> Self {
        self.options.quoted = Some(message);
        self
    }

    #[allow(dead_code)]
    pub fn mentioning(mut self, every_one: bool, participants: Vec<String>) -> Self {
        self.options.mentions = Mentions {
            every_one,
            mentioned: participants,
        };
        self
    }
}

/// Operations the bridge needs from the messaging gateway.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Most recent `limit` messages of a chat, oldest first.
    async fn find_messages(&self, chat_id: &str, limit: u32) -> HistoryOutcome;

    /// Deliver a reply. Failures are logged, never returned.
    async fn send_text(&self, reply: &OutboundReply);
}

#[derive(Debug, Default, Deserialize)]
struct FindMessagesResponse {
    #[serde(default)]
    messages: MessagePage,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePage {
    #[serde(default)]
    records: Vec<RawRecord>,
}

pub struct EvolutionClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl EvolutionClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// `{base_url}/{section}/{action}/{instance}`, with the instance name
    /// encoded as a single path segment.
    fn endpoint(&self, section: &str, action: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .with_context(|| format!("Invalid gateway URL: {}", self.config.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Gateway URL cannot be a base: {}", self.config.base_url))?
            .pop_if_empty()
            .extend([section, action, self.config.instance.as_str()]);
        Ok(url)
    }

    async fn post_json<T>(&self, url: Url, body: &T) -> Result<reqwest::Response>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.client
            .post(url.clone())
            .header("apikey", &self.config.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach gateway at {}", url))
    }

    async fn try_find_messages(&self, chat_id: &str, limit: u32) -> Result<Vec<HistoryRecord>> {
        let url = self.endpoint("chat", "findMessages")?;
        let query = json!({
            "where": { "key": { "remoteJid": chat_id } },
            "limit": limit,
            "orderBy": { "messageTimestamp": "desc" }
        });

        debug!("Fetching history for {} from {} (limit={})", chat_id, url, limit);

        let response = self.post_json(url, &query).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("gateway returned {}: {}", status, body);
        }

        let page: FindMessagesResponse = response
            .json()
            .await
            .context("Failed to parse findMessages response")?;

        // The gateway answers newest first.
        let mut records: Vec<HistoryRecord> = page
            .messages
            .records
            .into_iter()
            .map(HistoryRecord::from)
            .collect();
        records.reverse();
        Ok(records)
    }

    async fn try_send_text(&self, reply: &OutboundReply) -> Result<String> {
        let url = self.endpoint("message", "sendText")?;
        let response = self.post_json(url, reply).await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("gateway returned {}: {}", status, body);
        }
        Ok(body)
    }
}

#[async_trait]
impl ChatGateway for EvolutionClient {
    async fn find_messages(&self, chat_id: &str, limit: u32) -> HistoryOutcome {
        match self.try_find_messages(chat_id, limit).await {
            Ok(records) => {
                debug!("Fetched {} history message(s) for {}", records.len(), chat_id);
                HistoryOutcome::Fetched(records)
            }
            Err(e) => {
                warn!("Failed to fetch history for {}: {:#}", chat_id, e);
                HistoryOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    async fn send_text(&self, reply: &OutboundReply) {
        match self.try_send_text(reply).await {
            Ok(body) => info!("Reply sent to {}: {}", reply.number, body),
            Err(e) => error!("Failed to send reply to {}: {:#}", reply.number, e),
        }
    }
}
