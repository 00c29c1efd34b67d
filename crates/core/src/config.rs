use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub platform: PlatformConfig,
    pub agent: AgentConfig,
    pub runner: RunnerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub account_id: String,
    pub username: String,
    pub password: SecretString,
    pub csds_domain: String,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub close_token: String,
    pub echo_prefix: String,
    pub greeting_prefix: String,
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub account_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub csds_domain: Option<String>,
    pub close_token: Option<String>,
    pub echo_prefix: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    /// Skip platform credential validation (replay and inspection tooling).
    pub offline: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig {
                account_id: String::new(),
                username: String::new(),
                password: String::new().into(),
                csds_domain: "adminlogin.liveperson.net".to_string(),
            },
            agent: AgentConfig {
                close_token: "#close".to_string(),
                echo_prefix: "echo : ".to_string(),
                greeting_prefix: "Just joined to conversation with ".to_string(),
            },
            runner: RunnerConfig { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        if options.offline {
            config.validate_offline()?;
        } else {
            config.validate()?;
        }

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(platform) = patch.platform {
            if let Some(account_id) = platform.account_id {
                self.platform.account_id = account_id;
            }
            if let Some(username) = platform.username {
                self.platform.username = username;
            }
            if let Some(password) = platform.password {
                self.platform.password = secret_value(password);
            }
            if let Some(csds_domain) = platform.csds_domain {
                self.platform.csds_domain = csds_domain;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(close_token) = agent.close_token {
                self.agent.close_token = close_token;
            }
            if let Some(echo_prefix) = agent.echo_prefix {
                self.agent.echo_prefix = echo_prefix;
            }
            if let Some(greeting_prefix) = agent.greeting_prefix {
                self.agent.greeting_prefix = greeting_prefix;
            }
        }

        if let Some(runner) = patch.runner {
            if let Some(max_retries) = runner.max_retries {
                self.runner.max_retries = max_retries;
            }
            if let Some(base_delay_ms) = runner.base_delay_ms {
                self.runner.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = runner.max_delay_ms {
                self.runner.max_delay_ms = max_delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let account_id = read_env("PARLEY_PLATFORM_ACCOUNT_ID").or_else(|| read_env("LP_ACCOUNT"));
        if let Some(value) = account_id {
            self.platform.account_id = value;
        }
        let username = read_env("PARLEY_PLATFORM_USERNAME").or_else(|| read_env("LP_USER"));
        if let Some(value) = username {
            self.platform.username = value;
        }
        let password = read_env("PARLEY_PLATFORM_PASSWORD").or_else(|| read_env("LP_PASS"));
        if let Some(value) = password {
            self.platform.password = secret_value(value);
        }
        let csds_domain = read_env("PARLEY_PLATFORM_CSDS_DOMAIN").or_else(|| read_env("LP_CSDS"));
        if let Some(value) = csds_domain {
            self.platform.csds_domain = value;
        }

        if let Some(value) = read_env("PARLEY_AGENT_CLOSE_TOKEN") {
            self.agent.close_token = value;
        }
        // Prefixes are often meaningful with trailing whitespace, so read them untrimmed.
        if let Ok(value) = env::var("PARLEY_AGENT_ECHO_PREFIX") {
            self.agent.echo_prefix = value;
        }
        if let Ok(value) = env::var("PARLEY_AGENT_GREETING_PREFIX") {
            self.agent.greeting_prefix = value;
        }

        if let Some(value) = read_env("PARLEY_RUNNER_MAX_RETRIES") {
            self.runner.max_retries = parse_u32("PARLEY_RUNNER_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PARLEY_RUNNER_BASE_DELAY_MS") {
            self.runner.base_delay_ms = parse_u64("PARLEY_RUNNER_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_RUNNER_MAX_DELAY_MS") {
            self.runner.max_delay_ms = parse_u64("PARLEY_RUNNER_MAX_DELAY_MS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(account_id) = overrides.account_id {
            self.platform.account_id = account_id;
        }
        if let Some(username) = overrides.username {
            self.platform.username = username;
        }
        if let Some(password) = overrides.password {
            self.platform.password = secret_value(password);
        }
        if let Some(csds_domain) = overrides.csds_domain {
            self.platform.csds_domain = csds_domain;
        }
        if let Some(close_token) = overrides.close_token {
            self.agent.close_token = close_token;
        }
        if let Some(echo_prefix) = overrides.echo_prefix {
            self.agent.echo_prefix = echo_prefix;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_platform(&self.platform)?;
        self.validate_offline()
    }

    fn validate_offline(&self) -> Result<(), ConfigError> {
        validate_agent(&self.agent)?;
        validate_runner(&self.runner)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_platform(platform: &PlatformConfig) -> Result<(), ConfigError> {
    let account_id = platform.account_id.trim();
    if account_id.is_empty() {
        return Err(ConfigError::Validation(
            "platform.account_id is required (set PARLEY_PLATFORM_ACCOUNT_ID or LP_ACCOUNT)"
                .to_string(),
        ));
    }
    if !account_id.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(format!(
            "platform.account_id must be alphanumeric, got `{account_id}`"
        )));
    }

    if platform.username.trim().is_empty() {
        return Err(ConfigError::Validation(
            "platform.username is required (set PARLEY_PLATFORM_USERNAME or LP_USER)".to_string(),
        ));
    }

    if platform.password.expose_secret().is_empty() {
        return Err(ConfigError::Validation(
            "platform.password is required (set PARLEY_PLATFORM_PASSWORD or LP_PASS)".to_string(),
        ));
    }

    let domain = platform.csds_domain.trim();
    if domain.is_empty() {
        return Err(ConfigError::Validation(
            "platform.csds_domain is required (set PARLEY_PLATFORM_CSDS_DOMAIN or LP_CSDS)"
                .to_string(),
        ));
    }
    if domain.contains("://") || domain.contains('/') {
        return Err(ConfigError::Validation(format!(
            "platform.csds_domain must be a bare host name without scheme or path, got `{domain}`"
        )));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.close_token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "agent.close_token must not be empty; every message would close its conversation"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_runner(runner: &RunnerConfig) -> Result<(), ConfigError> {
    if runner.max_delay_ms < runner.base_delay_ms {
        return Err(ConfigError::Validation(
            "runner.max_delay_ms must be greater than or equal to runner.base_delay_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    platform: Option<PlatformPatch>,
    agent: Option<AgentPatch>,
    runner: Option<RunnerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformPatch {
    account_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    csds_domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    close_token: Option<String>,
    echo_prefix: Option<String>,
    greeting_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RunnerPatch {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
