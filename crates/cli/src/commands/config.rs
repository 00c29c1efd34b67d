use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use parley_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field<'a> {
    key: &'static str,
    value: String,
    env_keys: &'a [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions { offline: true, ..LoadOptions::default() }) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key: "platform.account_id",
            value: or_unset(&config.platform.account_id),
            env_keys: &["PARLEY_PLATFORM_ACCOUNT_ID", "LP_ACCOUNT"],
        },
        Field {
            key: "platform.username",
            value: or_unset(&config.platform.username),
            env_keys: &["PARLEY_PLATFORM_USERNAME", "LP_USER"],
        },
        Field {
            key: "platform.password",
            value: redact_secret(config.platform.password.expose_secret()),
            env_keys: &["PARLEY_PLATFORM_PASSWORD", "LP_PASS"],
        },
        Field {
            key: "platform.csds_domain",
            value: config.platform.csds_domain.clone(),
            env_keys: &["PARLEY_PLATFORM_CSDS_DOMAIN", "LP_CSDS"],
        },
        Field {
            key: "agent.close_token",
            value: config.agent.close_token.clone(),
            env_keys: &["PARLEY_AGENT_CLOSE_TOKEN"],
        },
        Field {
            key: "agent.echo_prefix",
            value: format!("{:?}", config.agent.echo_prefix),
            env_keys: &["PARLEY_AGENT_ECHO_PREFIX"],
        },
        Field {
            key: "agent.greeting_prefix",
            value: format!("{:?}", config.agent.greeting_prefix),
            env_keys: &["PARLEY_AGENT_GREETING_PREFIX"],
        },
        Field {
            key: "runner.max_retries",
            value: config.runner.max_retries.to_string(),
            env_keys: &["PARLEY_RUNNER_MAX_RETRIES"],
        },
        Field {
            key: "runner.base_delay_ms",
            value: config.runner.base_delay_ms.to_string(),
            env_keys: &["PARLEY_RUNNER_BASE_DELAY_MS"],
        },
        Field {
            key: "runner.max_delay_ms",
            value: config.runner.max_delay_ms.to_string(),
            env_keys: &["PARLEY_RUNNER_MAX_DELAY_MS"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in &fields {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    let readiness = match config.validate() {
        Ok(()) => "ready".to_string(),
        Err(error) => format!("not ready ({error})"),
    };
    lines.push(format!("platform credentials: {readiness}"));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("parley.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/parley.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn or_unset(value: &str) -> String {
    if value.trim().is_empty() {
        return "<unset>".to_string();
    }
    value.to_string()
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        return "<unset>".to_string();
    }
    "<redacted>".to_string()
}
