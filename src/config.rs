use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::services::capture::DEFAULT_LOG_CAPACITY;
use crate::services::llm::{ProviderKind, ProviderSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),

    #[error("ai.provider is not set, choose one of mistral, openai, anthropic")]
    MissingProvider,

    #[error("{0}")]
    UnknownProvider(String),

    #[error("ai.model is not set for provider {0}")]
    MissingModel(ProviderKind),

    #[error("ai.api_key is not set for provider {0}")]
    MissingApiKey(ProviderKind),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub optimizer: OptimizerConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Query capture settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    /// Model names matched as substrings of the SQL; empty watches everything
    #[serde(deserialize_with = "deserialize_string_list")]
    pub watched_models: Vec<String>,
    /// Path prefixes never captured, in addition to /admin/ /static/ /media/
    #[serde(deserialize_with = "deserialize_string_list")]
    pub excluded_paths: Vec<String>,
    /// Seconds (default: 0.5); accepts 0.5, 1, "0.5", "500ms", "2s"
    #[serde(deserialize_with = "deserialize_threshold_secs")]
    pub slow_query_threshold: f64,
    pub capture_stack: bool,
    pub capture_params: bool,
    pub query_log_capacity: usize,
}

/// AI provider selection; checked by [`AiConfig::validate`] at startup
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct AiConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AiConfig {
    /// Exactly one provider, model and credential; never defaulted
    pub fn validate(&self) -> Result<ProviderSettings, ConfigError> {
        let provider = non_blank(&self.provider).ok_or(ConfigError::MissingProvider)?;
        let kind = provider.parse::<ProviderKind>().map_err(ConfigError::UnknownProvider)?;
        let model = non_blank(&self.model).ok_or(ConfigError::MissingModel(kind))?;
        let api_key = non_blank(&self.api_key).ok_or(ConfigError::MissingApiKey(kind))?;

        Ok(ProviderSettings { kind, model, api_key, base_url: non_blank(&self.base_url) })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "query-optimizer")]
#[command(version, about = "Query Optimizer - slow query capture and AI analysis")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,query_optimizer=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Slow query threshold (overrides config file, e.g., "0.5", "500ms")
    #[arg(long, value_name = "SECONDS")]
    pub slow_query_threshold: Option<String>,

    /// AI provider: mistral, openai or anthropic (overrides config file)
    #[arg(long, value_name = "PROVIDER")]
    pub ai_provider: Option<String>,

    /// AI model name (overrides config file)
    #[arg(long, value_name = "MODEL")]
    pub ai_model: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with(&cli_args, |key| std::env::var(key).ok())
    }

    pub fn load_with(
        cli_args: &CommandLineArgs,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides(env);
        config.apply_cli_overrides(cli_args)?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST, APP_SERVER_PORT
    /// - APP_DATABASE_URL
    /// - APP_LOG_LEVEL
    /// - APP_SLOW_QUERY_THRESHOLD: seconds (accepts "0.5", "500ms")
    /// - APP_WATCHED_MODELS, APP_EXCLUDED_PATHS: comma-separated
    /// - APP_AI_PROVIDER, APP_AI_MODEL, APP_AI_API_KEY, APP_AI_BASE_URL
    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(host) = env("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Some(port) = env("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Some(db_url) = env("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Some(level) = env("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Some(threshold) = env("APP_SLOW_QUERY_THRESHOLD") {
            match parse_threshold_secs(&threshold) {
                Ok(val) => {
                    self.optimizer.slow_query_threshold = val;
                    tracing::info!(
                        "Override optimizer.slow_query_threshold from env: {}",
                        self.optimizer.slow_query_threshold
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_SLOW_QUERY_THRESHOLD '{}': {} (keep {})",
                    threshold,
                    e,
                    self.optimizer.slow_query_threshold
                ),
            }
        }

        if let Some(models) = env("APP_WATCHED_MODELS") {
            self.optimizer.watched_models = split_list(&models);
            tracing::info!(
                "Override optimizer.watched_models from env: {:?}",
                self.optimizer.watched_models
            );
        }

        if let Some(paths) = env("APP_EXCLUDED_PATHS") {
            self.optimizer.excluded_paths = split_list(&paths);
            tracing::info!(
                "Override optimizer.excluded_paths from env: {:?}",
                self.optimizer.excluded_paths
            );
        }

        if let Some(provider) = env("APP_AI_PROVIDER") {
            tracing::info!("Override ai.provider from env: {}", provider);
            self.ai.provider = Some(provider);
        }

        if let Some(model) = env("APP_AI_MODEL") {
            tracing::info!("Override ai.model from env: {}", model);
            self.ai.model = Some(model);
        }

        if let Some(api_key) = env("APP_AI_API_KEY") {
            self.ai.api_key = Some(api_key);
            tracing::info!("Override ai.api_key from env");
        }

        if let Some(base_url) = env("APP_AI_BASE_URL") {
            tracing::info!("Override ai.base_url from env: {}", base_url);
            self.ai.base_url = Some(base_url);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) -> Result<(), ConfigError> {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(threshold) = &args.slow_query_threshold {
            self.optimizer.slow_query_threshold = parse_threshold_secs(threshold).map_err(|e| {
                ConfigError::InvalidValue(format!("--slow-query-threshold '{}': {}", threshold, e))
            })?;
            tracing::info!(
                "Override optimizer.slow_query_threshold from CLI: {}",
                self.optimizer.slow_query_threshold
            );
        }

        if let Some(provider) = &args.ai_provider {
            self.ai.provider = Some(provider.clone());
            tracing::info!("Override ai.provider from CLI: {}", provider);
        }

        if let Some(model) = &args.ai_model {
            self.ai.model = Some(model.clone());
            tracing::info!("Override ai.model from CLI: {}", model);
        }

        Ok(())
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue("server.port cannot be 0".into()));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue("database.url cannot be empty".into()));
        }

        if self.optimizer.query_log_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "optimizer.query_log_capacity must be > 0".into(),
            ));
        }

        if !self.optimizer.enabled {
            tracing::warn!("Query capture is disabled (optimizer.enabled = false)");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
        Self::from_toml_str(&content)
            .map_err(|message| ConfigError::Parse { path: path.to_string(), message })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e: toml::de::Error| e.to_string())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/query_optimizer.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,query_optimizer=debug".to_string(),
            file: Some("logs/query_optimizer.log".to_string()),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watched_models: Vec::new(),
            excluded_paths: Vec::new(),
            slow_query_threshold: 0.5,
            capture_stack: true,
            capture_params: true,
            query_log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_threshold_secs(input: &str) -> Result<f64, String> {
    let s = input.trim().to_lowercase();
    let (number, divisor) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1000.0)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1.0)
    } else {
        (s.as_str(), 1.0)
    };

    let n: f64 = number.trim().parse().map_err(|_| "invalid number".to_string())?;
    check_threshold(n / divisor)
}

fn check_threshold(secs: f64) -> Result<f64, String> {
    if !secs.is_finite() {
        return Err("threshold must be finite".into());
    }
    if secs < 0.0 {
        return Err("negative not allowed".into());
    }
    Ok(secs)
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// Custom serde deserializers to support numeric or human-friendly string values
fn deserialize_threshold_secs<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = f64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '0.5', '500ms', '2s'")
        }
        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            check_threshold(v).map_err(E::custom)
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as f64)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            check_threshold(v as f64).map_err(E::custom)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_threshold_secs(v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

/// A list of strings, or one comma-separated string
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = Vec<String>;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a list of strings or a comma-separated string")
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(split_list(v))
        }
        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                let item = item.trim();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
            }
            Ok(items)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_full_config_file() {
        let config = Config::from_toml_str(
            r#"
            [server]
            port = 9000

            [optimizer]
            watched_models = ["Order", " Customer "]
            excluded_paths = "/health, /metrics"
            slow_query_threshold = 1
            capture_stack = false

            [ai]
            provider = "anthropic"
            model = "claude-3-haiku"
            api_key = "ak"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.optimizer.watched_models, vec!["Order", "Customer"]);
        assert_eq!(config.optimizer.excluded_paths, vec!["/health", "/metrics"]);
        assert_eq!(config.optimizer.slow_query_threshold, 1.0);
        assert!(!config.optimizer.capture_stack);
        assert!(config.optimizer.capture_params);

        let settings = config.ai.validate().unwrap();
        assert_eq!(settings.kind, ProviderKind::Anthropic);
        assert_eq!(settings.model, "claude-3-haiku");
        assert_eq!(settings.base_url, None);
    }

    #[test]
    fn test_threshold_formats() {
        assert_eq!(parse_threshold_secs("0.25").unwrap(), 0.25);
        assert_eq!(parse_threshold_secs("500ms").unwrap(), 0.5);
        assert_eq!(parse_threshold_secs("2s").unwrap(), 2.0);
        assert!(parse_threshold_secs("-1").is_err());
        assert!(parse_threshold_secs("slow").is_err());
        assert!(parse_threshold_secs("inf").is_err());

        let config = Config::from_toml_str("[optimizer]\nslow_query_threshold = \"750ms\"").unwrap();
        assert_eq!(config.optimizer.slow_query_threshold, 0.75);
    }

    #[test]
    fn test_type_invalid_value_names_key() {
        let err = Config::from_toml_str("[optimizer]\ncapture_stack = \"yes\"").unwrap_err();
        assert!(err.contains("capture_stack"), "error was: {}", err);

        let err = Config::from_toml_str("[optimizer]\nslow_query_threshold = -0.5").unwrap_err();
        assert!(err.contains("slow_query_threshold"), "error was: {}", err);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(env_from(&[
            ("APP_SERVER_PORT", "9100"),
            ("APP_SLOW_QUERY_THRESHOLD", "1.5"),
            ("APP_WATCHED_MODELS", "Order, Invoice,"),
            ("APP_AI_PROVIDER", "mistral"),
            ("APP_AI_MODEL", "mistral-small"),
            ("APP_AI_API_KEY", "mk"),
        ]));

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.optimizer.slow_query_threshold, 1.5);
        assert_eq!(config.optimizer.watched_models, vec!["Order", "Invoice"]);
        assert_eq!(config.ai.validate().unwrap().kind, ProviderKind::Mistral);
    }

    #[test]
    fn test_invalid_env_threshold_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(env_from(&[("APP_SLOW_QUERY_THRESHOLD", "soon")]));
        assert_eq!(config.optimizer.slow_query_threshold, 0.5);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config.apply_env_overrides(env_from(&[("APP_AI_MODEL", "from-env")]));
        let args = CommandLineArgs {
            ai_model: Some("from-cli".into()),
            slow_query_threshold: Some("100ms".into()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args).unwrap();

        assert_eq!(config.ai.model.as_deref(), Some("from-cli"));
        assert_eq!(config.optimizer.slow_query_threshold, 0.1);

        let bad = CommandLineArgs { slow_query_threshold: Some("x".into()), ..Default::default() };
        assert!(matches!(config.apply_cli_overrides(&bad), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_ai_validation_errors_are_distinct() {
        let mut ai = AiConfig::default();
        assert!(matches!(ai.validate(), Err(ConfigError::MissingProvider)));

        ai.provider = Some("gemini".into());
        assert!(matches!(ai.validate(), Err(ConfigError::UnknownProvider(_))));

        ai.provider = Some("openai".into());
        assert!(matches!(ai.validate(), Err(ConfigError::MissingModel(ProviderKind::OpenAI))));

        ai.model = Some("gpt-4o-mini".into());
        ai.api_key = Some("  ".into());
        assert!(matches!(ai.validate(), Err(ConfigError::MissingApiKey(ProviderKind::OpenAI))));

        ai.api_key = Some("sk".into());
        ai.base_url = Some("http://localhost:4000/v1".into());
        let settings = ai.validate().unwrap();
        assert_eq!(settings.base_url.as_deref(), Some("http://localhost:4000/v1"));
    }

    #[test]
    fn test_load_with_explicit_file() {
        let dir = std::env::temp_dir().join(format!("qo-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "[database]\nurl = \"sqlite::memory:\"\n").unwrap();

        let args = CommandLineArgs {
            config: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let config = Config::load_with(&args, |_| None).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");

        let missing = CommandLineArgs {
            config: Some(dir.join("absent.toml").to_string_lossy().into_owned()),
            ..Default::default()
        };
        assert!(matches!(Config::load_with(&missing, |_| None), Err(ConfigError::Read { .. })));
    }
}
