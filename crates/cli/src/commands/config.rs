use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use probatio_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One reportable configuration field: its dotted key (also the lookup path
/// into the config file document), the effective value, and the env variable
/// that can override it.
struct FieldReport {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = file_path.as_deref().and_then(load_config_file_doc);

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in field_reports(&config) {
        let source = field_source(&field, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn field_reports(config: &AppConfig) -> Vec<FieldReport> {
    vec![
        FieldReport {
            key: "database.url",
            value: config.database.url.clone(),
            env_key: "PROBATIO_DATABASE_URL",
        },
        FieldReport {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_key: "PROBATIO_DATABASE_MAX_CONNECTIONS",
        },
        FieldReport {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_key: "PROBATIO_DATABASE_TIMEOUT_SECS",
        },
        FieldReport {
            key: "policy.min_justification_chars",
            value: config.policy.min_justification_chars.to_string(),
            env_key: "PROBATIO_POLICY_MIN_JUSTIFICATION_CHARS",
        },
        FieldReport {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_key: "PROBATIO_LOGGING_LEVEL",
        },
        FieldReport {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_key: "PROBATIO_LOGGING_FORMAT",
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["probatio.toml", "config/probatio.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    fs::read_to_string(path).ok()?.parse::<Value>().ok()
}

fn field_source(field: &FieldReport, doc: Option<&Value>, file: Option<&Path>) -> String {
    if env::var_os(field.env_key).is_some() {
        return format!("env ({})", field.env_key);
    }

    if doc.is_some_and(|doc| contains_path(doc, field.key)) {
        let file = file
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |value, key| value.get(key)).is_some()
}
