use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::selector::SelectionPolicy;

/// Main configuration structure loaded from decisionator.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub system: SystemConfig,
    pub retrieval: RetrievalConfig,
    pub retry: RetryConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// External services: embeddings, generation, and the quote database
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_base_url: String,
    pub generation_provider: String,
    pub generation_model: String,
    pub generation_base_url: String,
    pub generation_temperature: f32,
    pub database_url: String,
    pub database_ns: String,
    pub database_db: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            embedding_provider: "openai".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            generation_provider: "openai".to_string(),
            generation_model: "gpt-4o-mini".to_string(),
            generation_base_url: "https://api.openai.com/v1".to_string(),
            generation_temperature: 0.7,
            database_url: "127.0.0.1:8001".to_string(),
            database_ns: "decisionator".to_string(),
            database_db: "quotes".to_string(),
        }
    }
}

/// Similarity search and best-match selection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub similarity_threshold: f32,
    pub limit: usize,
    pub selection_policy: SelectionPolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            limit: 1,
            selection_policy: SelectionPolicy::default(),
        }
    }
}

/// Backoff policies per collaborator
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub embedding: RetryPolicy,
    pub generation: RetryPolicy,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database_user: String,
    pub database_pass: String,
    pub openai_api_key: Option<String>,
    pub embed_strict: bool,
    pub log_level: String,
    pub http_bind: std::net::SocketAddr,
    pub cors_origins: Vec<String>,
    pub request_timeout_ms: u64,
    pub http_sse_keepalive_sec: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_user: "root".to_string(),
            database_pass: "root".to_string(),
            openai_api_key: None,
            embed_strict: false,
            log_level: "decisionator=info,tower_http=info".to_string(),
            http_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 8000)),
            cors_origins: vec!["http://localhost:3000".to_string()],
            request_timeout_ms: 180_000,
            http_sse_keepalive_sec: 15,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(user) = std::env::var("DECIDE_DB_USER") {
            cfg.database_user = user;
        }
        if let Ok(pass) = std::env::var("DECIDE_DB_PASS") {
            cfg.database_pass = pass;
        }
        cfg.openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        cfg.embed_strict = env_flag("DECIDE_EMBED_STRICT").unwrap_or(false);
        if let Ok(level) = std::env::var("RUST_LOG") {
            cfg.log_level = level;
        }
        if let Some(bind) = env_parse::<std::net::SocketAddr>("DECIDE_HTTP_BIND") {
            cfg.http_bind = bind;
        }
        if let Ok(origins) = std::env::var("DECIDE_CORS_ORIGINS") {
            cfg.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(ms) = env_parse::<u64>("DECIDE_REQUEST_TIMEOUT_MS") {
            cfg.request_timeout_ms = ms;
        }
        if let Some(sec) = env_parse::<u64>("DECIDE_HTTP_SSE_KEEPALIVE_SEC") {
            cfg.http_sse_keepalive_sec = sec;
        }
        cfg
    }
}

/// Load `.env` (or `DECIDE_ENV_FILE`) into the process environment. Missing files are ignored.
pub fn load_env_files() {
    if let Ok(env_path) = std::env::var("DECIDE_ENV_FILE") {
        let _ = dotenvy::from_path(env_path);
    } else {
        let _ = dotenvy::from_path(".env");
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses DECIDE_CONFIG environment variable or defaults to "decisionator.toml"
    pub fn load() -> anyhow::Result<Self> {
        load_env_files();

        let config_path =
            std::env::var("DECIDE_CONFIG").unwrap_or_else(|_| "decisionator.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            toml::from_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Env-first overrides for values that also live in the TOML file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(db_url) = std::env::var("DECIDE_DB_URL") {
            self.system.database_url = db_url;
            tracing::debug!("DECIDE_DB_URL env override applied");
        }
        if let Ok(db_ns) = std::env::var("DECIDE_DB_NS") {
            self.system.database_ns = db_ns;
        }
        if let Ok(db_name) = std::env::var("DECIDE_DB_DB") {
            self.system.database_db = db_name;
        }
        if let Ok(provider) = std::env::var("DECIDE_EMBED_PROVIDER") {
            self.system.embedding_provider = provider;
        }
        if let Ok(model) = std::env::var("DECIDE_EMBED_MODEL")
            && !model.trim().is_empty()
        {
            self.system.embedding_model = model;
        }
        if let Some(dim) = env_parse::<usize>("DECIDE_EMBED_DIM") {
            self.system.embedding_dimensions = dim;
        }
        if let Some(retries) = env_parse::<u32>("DECIDE_EMBED_RETRIES") {
            self.retry.embedding.max_attempts = retries;
        }
        if let Ok(model) = std::env::var("DECIDE_GEN_MODEL")
            && !model.trim().is_empty()
        {
            self.system.generation_model = model;
        }
        if let Ok(base) = std::env::var("DECIDE_GEN_BASE_URL") {
            self.system.generation_base_url = base;
        }
        if let Some(retries) = env_parse::<u32>("DECIDE_GEN_RETRIES") {
            self.retry.generation.max_attempts = retries;
        }
        if let Some(threshold) = env_parse::<f32>("DECIDE_SIM_THRESHOLD") {
            self.retrieval.similarity_threshold = threshold;
        }
        if let Some(limit) = env_parse::<usize>("DECIDE_MATCH_LIMIT") {
            self.retrieval.limit = limit;
        }
        if let Ok(policy) = std::env::var("DECIDE_SELECTION_POLICY") {
            match policy.parse::<SelectionPolicy>() {
                Ok(p) => self.retrieval.selection_policy = p,
                Err(e) => tracing::warn!("Ignoring DECIDE_SELECTION_POLICY: {}", e),
            }
        }
    }

    /// Clamp recoverable values, reject impossible ones
    pub fn validate(&mut self) -> anyhow::Result<()> {
        let threshold = self.retrieval.similarity_threshold;
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            anyhow::bail!(
                "similarity_threshold must be within [-1.0, 1.0], got {}",
                threshold
            );
        }
        if self.retrieval.limit == 0 {
            tracing::warn!("retrieval.limit 0 is meaningless, using 1");
            self.retrieval.limit = 1;
        }
        if self.system.embedding_dimensions == 0 {
            anyhow::bail!("embedding_dimensions must be > 0");
        }
        if self.runtime.http_sse_keepalive_sec == 0 {
            tracing::warn!("http_sse_keepalive_sec 0 would spin the keep-alive timer, using 1");
            self.runtime.http_sse_keepalive_sec = 1;
        }

        for (name, policy) in [
            ("embedding", &mut self.retry.embedding),
            ("generation", &mut self.retry.generation),
        ] {
            if policy.max_attempts == 0 {
                policy.max_attempts = 1;
            } else if policy.max_attempts > 20 {
                tracing::warn!(
                    "{} retry max_attempts {} exceeds max 20, clamping to 20",
                    name,
                    policy.max_attempts
                );
                policy.max_attempts = 20;
            }
            if !policy.backoff_factor.is_finite() || policy.backoff_factor < 1.0 {
                tracing::warn!(
                    "{} retry backoff_factor {} is below 1.0, using 1.0",
                    name,
                    policy.backoff_factor
                );
                policy.backoff_factor = 1.0;
            }
            policy.jitter = if policy.jitter.is_finite() {
                policy.jitter.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        if self.system.embedding_provider == "openai" {
            let expected = match self.system.embedding_model.as_str() {
                "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
                "text-embedding-3-large" => Some(3072),
                _ => None,
            };
            if let Some(expected) = expected
                && expected != self.system.embedding_dimensions
            {
                tracing::warn!(
                    "OpenAI {} should use {} dimensions, got {}",
                    self.system.embedding_model,
                    expected,
                    self.system.embedding_dimensions
                );
            }
        }

        if !self.system.database_url.contains(':') {
            tracing::warn!(
                "Database URL '{}' appears to be missing a port",
                self.system.database_url
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.runtime.request_timeout_ms)
    }
}
