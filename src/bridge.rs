use std::sync::Arc;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::gateway::{ChatGateway, EvolutionClient, HistoryOutcome, OutboundReply};
use crate::history::{build_context, render_prompt, HistoryRecord};
use crate::llm::{OllamaClient, TextModel};
use crate::platform::InboundNotification;

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Sent by our own account.
    Echo,
    /// Chat is not on the allow-list.
    NotAllowed,
    /// A reply (generated or fallback) was handed to the gateway.
    Replied,
}

/// The webhook-to-model pipeline: history lookup, generation and delivery.
pub struct Bridge {
    config: Config,
    gateway: Arc<dyn ChatGateway>,
    model: Arc<dyn TextModel>,
}

impl Bridge {
    pub fn new(config: Config) -> Self {
        let gateway = Arc::new(EvolutionClient::new(config.gateway.clone()));
        let model = Arc::new(OllamaClient::new(config.ollama.clone()));
        Self::with_backends(config, gateway, model)
    }

    pub fn with_backends(
        config: Config,
        gateway: Arc<dyn ChatGateway>,
        model: Arc<dyn TextModel>,
    ) -> Self {
        Self {
            config,
            gateway,
            model,
        }
    }

    /// Generate reply text for `text` given the chat's recent history.
    ///
    /// Model failures never escape: they become a fixed fallback reply that is
    /// delivered like any other.
    pub async fn generate_reply(&self, text: &str, history: &[HistoryRecord]) -> String {
        let context = build_context(history, &Local);
        debug!("Prompt context ({} line(s)):\n{}", history.len(), context);

        let prompt = render_prompt(&self.config.prompt, &context, text);
        match self.model.generate(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Model invocation failed: {}", e);
                e.fallback_reply().to_string()
            }
        }
    }

    /// Run one notification through the pipeline.
    pub async fn handle(&self, notification: &InboundNotification) -> Disposition {
        if notification.from_me {
            info!("Ignoring message sent by this account in {}", notification.chat_id);
            return Disposition::Echo;
        }

        if !self.config.is_allowed_chat(&notification.chat_id) {
            debug!("Chat {} is not allow-listed, skipping", notification.chat_id);
            return Disposition::NotAllowed;
        }

        let text = notification.text.as_deref().unwrap_or_default();
        info!("Message in {}: {}", notification.chat_id, text);

        let history = self
            .gateway
            .find_messages(&notification.chat_id, self.config.history_limit)
            .await;
        if let HistoryOutcome::Failed(reason) = &history {
            warn!("Replying without history: {}", reason);
        }

        let reply_text = self.generate_reply(text, history.records()).await;
        info!("Reply for {}: {}", notification.chat_id, reply_text);

        let mut reply = OutboundReply::new(notification.chat_id.clone(), reply_text);
        if self.config.quote_replies {
            if let Some(quote) = notification.quote() {
                reply = reply.quoting(quote);
            }
        }
        self.gateway.send_text(&reply).await;

        Disposition::Replied
    }
}
