use std::env;
use std::sync::{Mutex, OnceLock};

use depot_cli::commands::{migrate, seed, start};
use serde_json::Value;

#[test]
fn start_returns_success_with_valid_env() {
    with_env(&[("DEPOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn start_returns_config_failure_with_invalid_env() {
    with_env(&[("DEPOT_DATABASE_URL", "postgres://not-supported")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("DEPOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_returns_deterministic_tenant_summary() {
    with_env(&[("DEPOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected deterministic seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("  - tenant-alpha"));
        assert!(message.contains("  - tenant-beta"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(&[("DEPOT_DATABASE_URL", "sqlite::memory:")], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["status"], "ok");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["status"], "ok");

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn with_env(vars: &[(&str, &str)], body: impl FnOnce()) {
    let guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock();
    let _guard = match guard {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let previous: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(key, value)| {
            let old = env::var(key).ok();
            env::set_var(key, value);
            (key.to_string(), old)
        })
        .collect();

    body();

    for (key, old) in previous {
        match old {
            Some(value) => env::set_var(&key, value),
            None => env::remove_var(&key),
        }
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}
