use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use depot_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |field: &str, env_var: &str| {
        field_source(field, env_var, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "DEPOT_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "DEPOT_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "DEPOT_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "DEPOT_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "DEPOT_SERVER_PORT"),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", "DEPOT_LLM_PROVIDER"),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", "DEPOT_LLM_MODEL"),
    ));
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|value| redact_secret(value.expose_secret()))
        .unwrap_or_else(|| "(unset)".to_string());
    lines.push(render_line("llm.api_key", &api_key, source("llm.api_key", "DEPOT_LLM_API_KEY")));

    lines.push(render_line(
        "agent.execution_timeout_secs",
        &config.agent.execution_timeout_secs.to_string(),
        source("agent.execution_timeout_secs", "DEPOT_AGENT_EXECUTION_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "agent.max_calls_per_dispatch",
        &config.agent.max_calls_per_dispatch.to_string(),
        source("agent.max_calls_per_dispatch", "DEPOT_AGENT_MAX_CALLS_PER_DISPATCH"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "DEPOT_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "DEPOT_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn render_line(field: &str, value: &str, source: String) -> String {
    format!("  {field} = {value} ({source})")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("depot.toml"), PathBuf::from("config/depot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn file_has_field(doc: Option<&Value>, field: &str) -> bool {
    let mut current = match doc {
        Some(value) => value,
        None => return false,
    };
    for part in field.split('.') {
        current = match current.get(part) {
            Some(value) => value,
            None => return false,
        };
    }
    true
}

fn field_source(
    field: &str,
    env_var: &str,
    doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if env::var(env_var).map(|value| !value.trim().is_empty()).unwrap_or(false) {
        return format!("env:{env_var}");
    }
    if file_has_field(doc, field) {
        if let Some(path) = file_path {
            return format!("file:{}", path.display());
        }
        return "file".to_string();
    }
    "default".to_string()
}

fn redact_secret(value: &str) -> String {
    if value.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &value[..4])
    }
}
