//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.sapa/config.json`) and environment.
//! Every field is optional; secrets can come from env vars, which take precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retry::RetryConfig;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (Telegram, WhatsApp).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Intent detection and generator backends.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Routing thresholds and defaults.
    #[serde(default)]
    pub router: RouterConfig,

    /// User-facing texts (notices, attribution lines).
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Conversation log destination.
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP webhooks and probes (default 15151).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Bearer token for operator endpoints (/history). Overridden by SAPA_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>` on operator endpoints.
    Token,
}

fn default_gateway_port() -> u16 {
    15151
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

/// Env value (trimmed, non-empty) if set, otherwise the config value (trimmed, non-empty).
pub fn resolve_secret(env_key: &str, config_value: &Option<String>) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config_value
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Env value if set and non-empty, otherwise the config value as-is.
pub fn resolve_setting(env_key: &str, config_value: &str) -> String {
    resolve_secret(env_key, &None).unwrap_or_else(|| config_value.to_string())
}

/// Resolve the gateway token: env SAPA_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    resolve_secret("SAPA_GATEWAY_TOKEN", &config.gateway.auth.token)
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    resolve_secret("TELEGRAM_BOT_TOKEN", &config.channels.telegram.bot_token)
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
}

/// WhatsApp Cloud API channel config. The channel starts when access token and phone number id are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppChannelConfig {
    /// Permanent or system-user access token. Overridden by WHATSAPP_ACCESS_TOKEN env.
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    /// Token echoed back during webhook subscription (hub.verify_token).
    pub verify_token: Option<String>,
    /// App secret for X-Hub-Signature-256 verification. Overridden by WHATSAPP_APP_SECRET env.
    pub app_secret: Option<String>,
    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,
}

fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

impl Default for WhatsAppChannelConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            verify_token: None,
            app_secret: None,
            api_base: default_whatsapp_api_base(),
        }
    }
}

/// Backend settings: intent detection, primary and secondary generators, shared retry policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendsConfig {
    #[serde(default)]
    pub intent: IntentConfig,
    /// OpenAI-compatible chat completions.
    #[serde(default)]
    pub primary: GeneratorConfig,
    /// Gemini generateContent.
    #[serde(default)]
    pub secondary: GeneratorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Dialogflow ES settings. Intent detection is skipped when no project id is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentConfig {
    /// Overridden by DIALOGFLOW_PROJECT_ID env.
    pub project_id: Option<String>,
    /// Query language (default "id"). Overridden by DIALOGFLOW_LANGUAGE_CODE env.
    #[serde(default = "default_language")]
    pub language_code: String,
    /// OAuth access token. Overridden by DIALOGFLOW_ACCESS_TOKEN env.
    pub access_token: Option<String>,
    #[serde(default = "default_dialogflow_base_url")]
    pub base_url: String,
    /// Apply the shared retry policy to detection calls too (default false).
    #[serde(default)]
    pub retry: bool,
}

fn default_dialogflow_base_url() -> String {
    "https://dialogflow.googleapis.com".to_string()
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            language_code: default_language(),
            access_token: None,
            base_url: default_dialogflow_base_url(),
            retry: false,
        }
    }
}

/// Generator settings. Unset fields fall back to the backend's own defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// Intent answers are used only when confidence is strictly greater than this.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Language recorded for greeting and generator answers.
    #[serde(default = "default_language")]
    pub default_language: String,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_language() -> String {
    "id".to_string()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            default_language: default_language(),
        }
    }
}

/// User-facing texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesConfig {
    /// Sent when a message arrives while the previous one from the same sender is in flight.
    #[serde(default = "default_wait_notice")]
    pub wait_notice: String,
    /// Sent when routing fails as a whole.
    #[serde(default = "default_generic_failure")]
    pub generic_failure: String,
    #[serde(default)]
    pub attribution: AttributionConfig,
}

fn default_wait_notice() -> String {
    "_Mohon tunggu, pesan Anda sedang diproses..._".to_string()
}

fn default_generic_failure() -> String {
    "Terjadi kesalahan saat mengirim pesan.".to_string()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            wait_notice: default_wait_notice(),
            generic_failure: default_generic_failure(),
            attribution: AttributionConfig::default(),
        }
    }
}

/// Attribution line appended after a blank line, per answer source. Greeting has none by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionConfig {
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default = "default_intent_attribution")]
    pub intent: String,
    #[serde(default = "default_primary_attribution")]
    pub primary: String,
    #[serde(default = "default_secondary_attribution")]
    pub secondary: String,
}

fn default_intent_attribution() -> String {
    "_jawaban digenerate oleh sistem_".to_string()
}

fn default_primary_attribution() -> String {
    "_jawaban digenerate oleh ChatGPT_".to_string()
}

fn default_secondary_attribution() -> String {
    "_jawaban digenerate oleh Gemini_".to_string()
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            greeting: None,
            intent: default_intent_attribution(),
            primary: default_primary_attribution(),
            secondary: default_secondary_attribution(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptBackend {
    /// JSON lines appended to a local file.
    #[default]
    File,
    /// Google Sheets rows.
    Sheets,
}

/// Conversation log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptConfig {
    #[serde(default)]
    pub backend: TranscriptBackend,
    /// File backend path. Relative paths resolve against the config file's parent. Default: conversations.jsonl next to the config.
    pub path: Option<PathBuf>,
    /// Overridden by GOOGLE_SHEETS_ID env.
    pub spreadsheet_id: Option<String>,
    #[serde(default = "default_sheet_title")]
    pub sheet_title: String,
    /// OAuth access token with the spreadsheets scope. Overridden by GOOGLE_SHEETS_ACCESS_TOKEN env.
    pub access_token: Option<String>,
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
}

fn default_sheet_title() -> String {
    "Conversations".to_string()
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            backend: TranscriptBackend::File,
            path: None,
            spreadsheet_id: None,
            sheet_title: default_sheet_title(),
            access_token: None,
            base_url: default_sheets_base_url(),
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SAPA_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".sapa").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or SAPA_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the transcript file: `transcript.path` if set (relative paths resolved against the config file's parent), otherwise `conversations.jsonl` beside the config.
pub fn resolve_transcript_path(config: &Config, config_path: &Path) -> PathBuf {
    let parent = config_dir(config_path);
    match &config.transcript.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                parent.join(p)
            }
        }
        _ => parent.join("conversations.jsonl"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 15151);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn empty_json_yields_defaults() {
        let c: Config = serde_json::from_str("{}").expect("parse");
        assert_eq!(c.router.confidence_threshold, 0.7);
        assert_eq!(c.router.default_language, "id");
        assert_eq!(c.backends.retry.max_retries, 3);
        assert_eq!(c.backends.retry.delay_ms, 1000);
        assert_eq!(c.backends.intent.language_code, "id");
        assert!(!c.backends.intent.retry);
        assert_eq!(c.messages.attribution.greeting, None);
        assert_eq!(c.transcript.backend, TranscriptBackend::File);
        assert_eq!(c.transcript.sheet_title, "Conversations");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let raw = r#"{
            "router": { "defaultLanguage": "en" },
            "backends": { "primary": { "model": "gpt-4o-mini" }, "retry": { "delayMs": 250 } },
            "messages": { "attribution": { "primary": "_via primary_" } },
            "transcript": { "backend": "sheets", "spreadsheetId": "abc" }
        }"#;
        let c: Config = serde_json::from_str(raw).expect("parse");
        assert_eq!(c.router.default_language, "en");
        assert_eq!(c.router.confidence_threshold, 0.7);
        assert_eq!(c.backends.primary.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(c.backends.retry.max_retries, 3);
        assert_eq!(c.backends.retry.delay_ms, 250);
        assert_eq!(c.messages.attribution.primary, "_via primary_");
        assert_eq!(c.messages.attribution.secondary, "_jawaban digenerate oleh Gemini_");
        assert_eq!(c.transcript.backend, TranscriptBackend::Sheets);
    }

    #[test]
    fn env_overrides_config_secret() {
        let key = "SAPA_TEST_RESOLVE_SECRET_OVERRIDE";
        std::env::set_var(key, "  from-env ");
        assert_eq!(
            resolve_secret(key, &Some("from-config".to_string())).as_deref(),
            Some("from-env")
        );
        std::env::remove_var(key);
        assert_eq!(
            resolve_secret(key, &Some(" from-config ".to_string())).as_deref(),
            Some("from-config")
        );
        assert_eq!(resolve_secret(key, &Some("   ".to_string())), None);
        assert_eq!(resolve_setting(key, "id"), "id");
    }

    #[test]
    fn resolve_transcript_path_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.sapa/config.json");
        assert_eq!(
            resolve_transcript_path(&config, path),
            PathBuf::from("/home/user/.sapa/conversations.jsonl")
        );
    }

    #[test]
    fn resolve_transcript_path_override_relative() {
        let mut config = Config::default();
        config.transcript.path = Some(PathBuf::from("logs/chat.jsonl"));
        let path = Path::new("/home/user/.sapa/config.json");
        assert_eq!(
            resolve_transcript_path(&config, path),
            PathBuf::from("/home/user/.sapa/logs/chat.jsonl")
        );
    }

    #[test]
    fn resolve_transcript_path_override_absolute() {
        let mut config = Config::default();
        config.transcript.path = Some(PathBuf::from("/var/log/sapa.jsonl"));
        let path = Path::new("/home/user/.sapa/config.json");
        assert_eq!(
            resolve_transcript_path(&config, path),
            PathBuf::from("/var/log/sapa.jsonl")
        );
    }
}
