use anyhow::{bail, Context, Result};
use std::net::SocketAddr;

/// Acceleration device requested from the inference runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Gpu,
    Cpu,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Gpu => write!(f, "gpu"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(Device::Gpu),
            "cpu" => Ok(Device::Cpu),
            other => bail!("unknown device '{}' (expected 'gpu' or 'cpu')", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Sent as the `apikey` header on every gateway call.
    pub api_key: String,
    pub base_url: String,
    pub instance: String,
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub device: Device,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub ollama: OllamaConfig,
    /// Group chat the bridge replies in.
    pub target_chat_id: String,
    /// Direct chat the bridge also replies in, if any.
    pub direct_chat_id: Option<String>,
    /// Instruction prefix placed at the start of every prompt.
    pub prompt: String,
    pub history_limit: u32,
    /// Quote the triggering message in each reply.
    pub quote_replies: bool,
    pub bind_addr: SocketAddr,
}

fn default_gateway_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "mistral:latest".to_string()
}

fn default_history_limit() -> u32 {
    5
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}

/// Legacy configs point at the full send-text endpoint; keep only the
/// part before the API path.
fn gateway_base(url: &str) -> String {
    let base = match url.find("/message/sendText") {
        Some(idx) => &url[..idx],
        None => url,
    };
    base.trim_end_matches('/').to_string()
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Empty values are
    /// treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        // First key wins; later keys are the names legacy deployments use.
        let get_any = |keys: &[&str]| keys.iter().find_map(|&key| get(key));
        let require = |keys: &[&str]| {
            get_any(keys).with_context(|| {
                format!("Missing required environment variable {}", keys.join(" or "))
            })
        };

        let history_limit = match get("HISTORY_LIMIT") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Invalid HISTORY_LIMIT: {}", v))?,
            None => default_history_limit(),
        };

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => v
                .trim()
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid BIND_ADDR: {}", v))?,
            None => default_bind_addr(),
        };

        let quote_replies = match get("QUOTE_REPLIES") {
            Some(v) => parse_flag(&v).with_context(|| format!("Invalid QUOTE_REPLIES: {}", v))?,
            None => false,
        };

        let device = match get("OLLAMA_DEVICE") {
            Some(v) => v.parse::<Device>().context("Invalid OLLAMA_DEVICE")?,
            None => Device::default(),
        };

        Ok(Config {
            gateway: GatewayConfig {
                api_key: require(&["EVOLUTION_TOKEN"])?,
                base_url: get_any(&["EVOLUTION_URL", "URL_ENVIO"])
                    .map(|url| gateway_base(&url))
                    .unwrap_or_else(default_gateway_url),
                instance: require(&["EVOLUTION_INSTANCE", "INSTANCE"])?,
            },
            ollama: OllamaConfig {
                base_url: get("OLLAMA_URL").unwrap_or_else(default_ollama_url),
                model: get("OLLAMA_MODEL").unwrap_or_else(default_model),
                device,
            },
            target_chat_id: require(&["TARGET_CHAT_ID", "GRUPO_ID_DESEJADO"])?,
            direct_chat_id: get("DIRECT_CHAT_ID"),
            prompt: lookup("REPLY_PROMPT")
                .or_else(|| lookup("PROMPT"))
                .unwrap_or_default(),
            history_limit,
            quote_replies,
            bind_addr,
        })
    }

    /// Whether the bridge may auto-reply in this chat.
    pub fn is_allowed_chat(&self, chat_id: &str) -> bool {
        chat_id == self.target_chat_id || self.direct_chat_id.as_deref() == Some(chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("EVOLUTION_TOKEN", "secret"),
        ("EVOLUTION_INSTANCE", "Main Line"),
        ("TARGET_CHAT_ID", "120363@g.us"),
        ("DIRECT_CHAT_ID", "5511999999999@s.whatsapp.net"),
    ];

    #[test]
    fn test_defaults_applied() {
        let config = load(REQUIRED).unwrap();
        assert_eq!(config.gateway.api_key, "secret");
        assert_eq!(config.gateway.instance, "Main Line");
        assert_eq!(config.gateway.base_url, "http://localhost:8081");
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.ollama.model, "mistral:latest");
        assert_eq!(config.ollama.device, Device::Gpu);
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.bind_addr.port(), 5001);
        assert!(config.prompt.is_empty());
        assert!(!config.quote_replies);
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("EVOLUTION_URL", "http://gateway:9000"),
            ("OLLAMA_URL", "http://gpu-box:11434"),
            ("OLLAMA_MODEL", "llama3:8b"),
            ("OLLAMA_DEVICE", "CPU"),
            ("HISTORY_LIMIT", "12"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("REPLY_PROMPT", "Responda em português."),
            ("QUOTE_REPLIES", "yes"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.gateway.base_url, "http://gateway:9000");
        assert_eq!(config.ollama.base_url, "http://gpu-box:11434");
        assert_eq!(config.ollama.model, "llama3:8b");
        assert_eq!(config.ollama.device, Device::Cpu);
        assert_eq!(config.history_limit, 12);
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.prompt, "Responda em português.");
        assert!(config.quote_replies);
    }

    #[test]
    fn test_missing_required_variable() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "EVOLUTION_TOKEN")
            .collect();
        let err = load(&pairs).unwrap_err();
        assert!(err.to_string().contains("EVOLUTION_TOKEN"));
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs.retain(|(k, _)| *k != "TARGET_CHAT_ID");
        pairs.push(("TARGET_CHAT_ID", "  "));
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("HISTORY_LIMIT", "five"));
        assert!(load(&pairs).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("OLLAMA_DEVICE", "tpu"));
        assert!(load(&pairs).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("QUOTE_REPLIES", "maybe"));
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn test_allow_list_has_both_chats() {
        let config = load(REQUIRED).unwrap();
        assert!(config.is_allowed_chat("120363@g.us"));
        assert!(config.is_allowed_chat("5511999999999@s.whatsapp.net"));
        assert!(!config.is_allowed_chat("999@g.us"));
        assert!(!config.is_allowed_chat(""));
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = load(&[
            ("EVOLUTION_TOKEN", "secret"),
            ("GRUPO_ID_DESEJADO", "120363@g.us"),
            ("INSTANCE", "Main Line"),
            ("URL_ENVIO", "http://localhost:8081/message/sendText/Main Line"),
            ("PROMPT", "Você é um assistente."),
        ])
        .unwrap();
        assert_eq!(config.target_chat_id, "120363@g.us");
        assert_eq!(config.gateway.instance, "Main Line");
        assert_eq!(config.gateway.base_url, "http://localhost:8081");
        assert_eq!(config.prompt, "Você é um assistente.");
        assert_eq!(config.direct_chat_id, None);
        assert!(config.is_allowed_chat("120363@g.us"));
        assert!(!config.is_allowed_chat("5511999999999@s.whatsapp.net"));
    }

    #[test]
    fn test_new_names_take_precedence() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("GRUPO_ID_DESEJADO", "legacy@g.us"),
            ("INSTANCE", "Legacy"),
            ("URL_ENVIO", "http://legacy:8081"),
            ("PROMPT", "legacy"),
            ("EVOLUTION_URL", "http://gateway:9000/"),
            ("REPLY_PROMPT", "novo"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.target_chat_id, "120363@g.us");
        assert_eq!(config.gateway.instance, "Main Line");
        assert_eq!(config.gateway.base_url, "http://gateway:9000");
        assert_eq!(config.prompt, "novo");
    }

    #[test]
    fn test_missing_chat_names_both_keys() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "TARGET_CHAT_ID")
            .collect();
        let err = load(&pairs).unwrap_err();
        assert!(err.to_string().contains("TARGET_CHAT_ID or GRUPO_ID_DESEJADO"));
    }
}
