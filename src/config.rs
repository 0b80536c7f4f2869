use std::env;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_PROMPT_FILE: &str = "./gemini_system_prompt.txt";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v18.0";
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEMPERATURE: f32 = 0.6;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 256;

/// Used when the prompt template file is missing or unreadable.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Você é o Especialista do Poder Supremo. Sua missão é levar a decisão de compra do e-book em no máximo 6 interações...";

/// Conversions API settings. Forwarding is disabled unless both the pixel id
/// and the access token are non-empty.
#[derive(Debug, Clone)]
pub struct MetaConfig {
    pub pixel_id: String,
    pub access_token: String,
    pub test_event_code: String,
    pub graph_url: String,
}

impl MetaConfig {
    pub fn is_configured(&self) -> bool {
        !self.pixel_id.is_empty() && !self.access_token.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub max_request_bytes: Option<usize>,
    pub meta: MetaConfig,
    pub gemini: GeminiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_request_bytes: None,
            meta: MetaConfig {
                pixel_id: String::new(),
                access_token: String::new(),
                test_event_code: String::new(),
                graph_url: DEFAULT_GRAPH_URL.to_string(),
            },
            gemini: GeminiConfig {
                api_key: String::new(),
                model: DEFAULT_GEMINI_MODEL.to_string(),
                api_url: DEFAULT_GEMINI_URL.to_string(),
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                temperature: DEFAULT_TEMPERATURE,
                max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let port = match parse_optional_u64("PORT")? {
            Some(p) => u16::try_from(p).map_err(|_| anyhow!("PORT must be a valid TCP port"))?,
            None => DEFAULT_PORT,
        };
        let max_request_bytes = parse_optional_u64("RELAY_MAX_REQUEST_BYTES")?.map(|v| v as usize);

        let meta = MetaConfig {
            pixel_id: env_or("FB_PIXEL_ID", ""),
            access_token: env_or("FB_ACCESS_TOKEN", ""),
            test_event_code: env_or("TEST_EVENT_CODE", ""),
            graph_url: trim_base_url(env_or("META_GRAPH_URL", DEFAULT_GRAPH_URL)),
        };

        let prompt_file = env_or("GEMINI_SYSTEM_PROMPT_FILE", DEFAULT_PROMPT_FILE);
        let max_output_tokens = match parse_optional_u64("GEMINI_MAX_OUTPUT_TOKENS")? {
            Some(n) => u32::try_from(n)
                .map_err(|_| anyhow!("GEMINI_MAX_OUTPUT_TOKENS is out of range"))?,
            None => DEFAULT_MAX_OUTPUT_TOKENS,
        };
        let gemini = GeminiConfig {
            api_key: env_or("GEMINI_API_KEY", ""),
            model: env_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            api_url: trim_base_url(env_or("GEMINI_API_URL", DEFAULT_GEMINI_URL)),
            system_prompt: load_system_prompt(&prompt_file),
            temperature: parse_optional_f32("GEMINI_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
            max_output_tokens,
        };

        Ok(Self {
            port,
            max_request_bytes,
            meta,
            gemini,
        })
    }
}

/// Reads the prompt template once. Any read failure falls back to
/// [`DEFAULT_SYSTEM_PROMPT`].
pub fn load_system_prompt(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(text) => {
            tracing::info!(path = %path.display(), "loaded system prompt template");
            text
        }
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "system prompt file unavailable, using built-in prompt");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_f32(var: &str) -> Result<Option<f32>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a number", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "PORT",
        "RELAY_MAX_REQUEST_BYTES",
        "FB_PIXEL_ID",
        "FB_ACCESS_TOKEN",
        "TEST_EVENT_CODE",
        "META_GRAPH_URL",
        "GEMINI_API_KEY",
        "GEMINI_MODEL",
        "GEMINI_API_URL",
        "GEMINI_SYSTEM_PROMPT_FILE",
        "GEMINI_TEMPERATURE",
        "GEMINI_MAX_OUTPUT_TOKENS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("GEMINI_SYSTEM_PROMPT_FILE", "/nonexistent/prompt.txt");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.max_request_bytes.is_none());
        assert!(!cfg.meta.is_configured());
        assert_eq!(cfg.meta.graph_url, DEFAULT_GRAPH_URL);
        assert!(cfg.gemini.api_key.is_empty());
        assert_eq!(cfg.gemini.model, "gemini-1.5-pro");
        assert_eq!(cfg.gemini.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(cfg.gemini.max_output_tokens, 256);
        assert!((cfg.gemini.temperature - 0.6).abs() < f32::EPSILON);
        clear_env();
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let mut prompt = NamedTempFile::new().unwrap();
        write!(prompt, "Responda apenas em JSON.").unwrap();

        std::env::set_var("PORT", "9091");
        std::env::set_var("RELAY_MAX_REQUEST_BYTES", "4096");
        std::env::set_var("FB_PIXEL_ID", "123456");
        std::env::set_var("FB_ACCESS_TOKEN", "EAAB-token");
        std::env::set_var("TEST_EVENT_CODE", "TEST42");
        std::env::set_var("META_GRAPH_URL", "http://127.0.0.1:9/graph/");
        std::env::set_var("GEMINI_API_KEY", "g-key");
        std::env::set_var("GEMINI_MODEL", "gemini-2.0-flash");
        std::env::set_var("GEMINI_SYSTEM_PROMPT_FILE", prompt.path());
        std::env::set_var("GEMINI_TEMPERATURE", "0.2");
        std::env::set_var("GEMINI_MAX_OUTPUT_TOKENS", "512");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.port, 9091);
        assert_eq!(cfg.max_request_bytes, Some(4096));
        assert!(cfg.meta.is_configured());
        assert_eq!(cfg.meta.test_event_code, "TEST42");
        assert_eq!(cfg.meta.graph_url, "http://127.0.0.1:9/graph");
        assert_eq!(cfg.gemini.model, "gemini-2.0-flash");
        assert_eq!(cfg.gemini.system_prompt, "Responda apenas em JSON.");
        assert_eq!(cfg.gemini.max_output_tokens, 512);
        assert!((cfg.gemini.temperature - 0.2).abs() < f32::EPSILON);
        clear_env();
    }

    #[test]
    fn rejects_malformed_numbers() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("PORT", "eighty");
        let err = AppConfig::from_env().expect_err("non-numeric port");
        assert!(err.to_string().contains("PORT"));

        std::env::set_var("PORT", "70000");
        let err = AppConfig::from_env().expect_err("port out of range");
        assert!(err.to_string().contains("PORT"));
        std::env::remove_var("PORT");

        std::env::set_var("GEMINI_TEMPERATURE", "warm");
        let err = AppConfig::from_env().expect_err("non-numeric temperature");
        assert!(err.to_string().contains("GEMINI_TEMPERATURE"));
        clear_env();
    }

    #[test]
    fn blank_credentials_count_as_unset() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("FB_PIXEL_ID", "123");
        std::env::set_var("FB_ACCESS_TOKEN", "   ");

        let cfg = AppConfig::from_env().unwrap();
        assert!(!cfg.meta.is_configured());
        clear_env();
    }
}
