use crate::llm::LlmSettings;
use crate::session::{
    DEFAULT_INSTRUCTION, DEFAULT_MAX_LINE_BYTES, DEFAULT_WINDOW_SIZE, PromptSettings,
};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Name of the cookie that carries the session token.
pub const DEFAULT_COOKIE_NAME: &str = "therabot_session";

/// Shortest accepted session secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Database URL (e.g. `sqlite://therabot.db`)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub persistence: PersistenceConfig,
    pub session: SessionConfig,
    pub sentiment: SentimentConfig,
    pub speech: SpeechConfig,
    pub resilience: ResilienceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Largest accepted request body.
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Full URL of the generate endpoint.
    pub endpoint: String,
    pub model: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    /// `sqlite` or `memory`.
    pub provider: String,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Cookie signing secret. Unset means a random per-process key.
    #[serde(default)]
    pub secret: Option<String>,
    pub window_size: usize,
    /// Longest text kept per window line, in bytes.
    pub max_line_bytes: usize,
    pub instruction: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SentimentConfig {
    /// `stub`, `fixed` or `http`.
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub fixed_score: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    /// `stub` or `http`.
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub voice: String,
    pub rate: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub timeout_disabled: bool,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 5000)?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.body_limit_bytes", 1024 * 1024)?
            .set_default("llm.endpoint", "http://localhost:11434/api/generate")?
            .set_default("llm.model", "llama3")?
            .set_default("llm.connect_timeout_secs", 10)?
            .set_default("llm.request_timeout_secs", 120)?
            .set_default("llm.stream_idle_timeout_secs", 60)?
            .set_default("persistence.provider", "sqlite")?
            .set_default("persistence.database_url", "sqlite://therabot.db")?
            .set_default("session.cookie_name", DEFAULT_COOKIE_NAME)?
            .set_default("session.window_size", DEFAULT_WINDOW_SIZE as u64)?
            .set_default("session.max_line_bytes", DEFAULT_MAX_LINE_BYTES as u64)?
            .set_default("session.instruction", DEFAULT_INSTRUCTION)?
            .set_default("sentiment.provider", "stub")?
            .set_default("sentiment.timeout_ms", 2000)?
            .set_default("sentiment.fixed_score", 0.0)?
            .set_default("speech.provider", "stub")?
            .set_default("speech.voice", "en-US-GuyNeural")?
            .set_default("speech.rate", "+30%")?
            .set_default("speech.timeout_secs", 30)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.request_timeout_secs", 300)?;

        // 2. Config file: explicit path, else ./config.{yaml,toml,json} if present
        match cli.config.as_deref() {
            Some(path) => builder = builder.add_source(File::with_name(path)),
            None => {
                if ["config.yaml", "config.yml", "config.toml", "config.json"]
                    .iter()
                    .any(|p| Path::new(p).exists())
                {
                    builder = builder.add_source(File::with_name("config").required(false));
                }
            }
        }

        // 3. Environment variables (prefixed with THERABOT_)
        // E.g. THERABOT_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("THERABOT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Legacy variable names
        if let Ok(val) = env::var("OLLAMA_API_URL") {
            builder = builder.set_override("llm.endpoint", val)?;
        }
        if let Some(secret) = env::var("SESSION_SECRET")
            .or_else(|_| env::var("FLASK_SECRET_KEY"))
            .ok()
            .filter(|s| !s.is_empty())
        {
            builder = builder.set_override("session.secret", secret)?;
        }

        // 5. CLI flags (clap also reads their env aliases)
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = cli.database_url {
            builder = builder.set_override("persistence.database_url", url)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if let Some(secret) = &self.session.secret {
            if secret.len() < MIN_SECRET_LEN {
                return Err(config::ConfigError::Message(format!(
                    "session secret must be at least {MIN_SECRET_LEN} bytes"
                )));
            }
        }
        if self.session.window_size == 0 {
            return Err(config::ConfigError::Message(
                "session.window_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection settings for the generation backend.
    #[must_use]
    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            endpoint: self.llm.endpoint.clone(),
            model: self.llm.model.clone(),
            connect_timeout: Duration::from_secs(self.llm.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.llm.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(self.llm.stream_idle_timeout_secs),
        }
    }

    #[must_use]
    pub fn prompt_settings(&self) -> PromptSettings {
        PromptSettings {
            instruction: self.session.instruction.clone(),
            window_size: self.session.window_size,
            max_line_bytes: self.session.max_line_bytes,
        }
    }

    /// Upper bound applied to every request by the timeout middleware.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        if self.resilience.timeout_disabled {
            Duration::from_secs(365 * 24 * 60 * 60)
        } else {
            Duration::from_secs(self.resilience.request_timeout_secs)
        }
    }
}
