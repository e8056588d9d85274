use std::env;
use std::sync::{Mutex, OnceLock};

use probatio_cli::commands::{config, doctor, migrate, seed, smoke};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PROBATIO_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_fails_fast_on_invalid_config() {
    with_env(&[("PROBATIO_DATABASE_URL", "postgres://nope")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_returns_deterministic_summary() {
    with_env(&[("PROBATIO_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected deterministic seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert_eq!(message, "demo dataset loaded: 7 members, request req-demo-001 in flight");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(&[("PROBATIO_DATABASE_URL", "sqlite::memory:")], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn smoke_walks_the_chain_with_valid_env() {
    with_env(&[("PROBATIO_DATABASE_URL", "sqlite::memory:")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");

        let checks = payload["checks"].as_array().expect("checks array");
        let chain_walk = checks
            .iter()
            .find(|check| check["name"] == "chain_walk")
            .expect("chain walk check present");
        assert_eq!(chain_walk["status"], "pass");
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[("PROBATIO_DATABASE_URL", "postgres://nope")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
    });
}

#[test]
fn config_command_attributes_env_sources() {
    with_env(&[("PROBATIO_DATABASE_URL", "sqlite::memory:")], || {
        let output = config::run();
        assert!(output.contains("database.url = sqlite::memory:"));
        assert!(output.contains("env (PROBATIO_DATABASE_URL)"));
        assert!(output.contains("policy.min_justification_chars = 30 (source: default)"));
    });
}

#[test]
fn doctor_reports_missing_schema_on_a_fresh_database() {
    with_env(&[("PROBATIO_DATABASE_URL", "sqlite::memory:")], || {
        let output = doctor::run(true);
        let payload: Value = serde_json::from_str(&output).expect("doctor json");

        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        let schema = checks
            .iter()
            .find(|check| check["name"] == "schema_visibility")
            .expect("schema check present");
        assert_eq!(schema["status"], "fail");
        assert!(schema["details"].as_str().unwrap_or("").contains("probatio migrate"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PROBATIO_DATABASE_URL",
        "PROBATIO_DATABASE_MAX_CONNECTIONS",
        "PROBATIO_DATABASE_TIMEOUT_SECS",
        "PROBATIO_POLICY_MIN_JUSTIFICATION_CHARS",
        "PROBATIO_LOGGING_LEVEL",
        "PROBATIO_LOGGING_FORMAT",
        "PROBATIO_LOG_LEVEL",
        "PROBATIO_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
