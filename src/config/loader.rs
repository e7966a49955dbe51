use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::value::{Uncased, UncasedStr};
use figment::Figment;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const ENV_PREFIX: &str = "PLUGIN_RELAY_";
const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 600_000;

pub async fn load_from_env_or_file() -> Result<Config> {
    let figment = Figment::new()
        .merge(Toml::file("plugin-relay.toml"))
        .merge(Json::file("plugin-relay.json"))
        .merge(Yaml::file("plugin-relay.yaml"))
        .merge(Yaml::file("plugin-relay.yml"));
    finish(figment)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let base = Figment::new();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => base.merge(Toml::file(path)),
        Some("json") => base.merge(Json::file(path)),
        Some("yaml") | Some("yml") => base.merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };
    finish(figment)
}

fn finish(figment: Figment) -> Result<Config> {
    // PLUGIN_RELAY_QUEUE__REQUEST_TIMEOUT_MS -> queue.requestTimeoutMs
    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).map(env_key))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

fn env_key(key: &UncasedStr) -> Uncased<'_> {
    key.as_str()
        .split("__")
        .map(camel_case)
        .collect::<Vec<_>>()
        .join(".")
        .into()
}

fn camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper_next = false;
    for c in segment.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than 0".into()).into());
    }

    let queue = &config.queue;
    if queue.workers == 0 {
        return Err(ConfigError::Validation("queue.workers must be greater than 0".into()).into());
    }

    for (name, value) in [
        ("queue.requestTimeoutMs", queue.request_timeout_ms),
        ("queue.executionTimeoutMs", queue.execution_timeout_ms),
        ("queue.sweepIntervalMs", queue.sweep_interval_ms),
    ] {
        check_timeout(name, value)?;
    }

    if queue.sweep_interval_ms > queue.entry_ttl_ms {
        return Err(ConfigError::Validation(format!(
            "queue.sweepIntervalMs ({}) cannot exceed queue.entryTtlMs ({})",
            queue.sweep_interval_ms, queue.entry_ttl_ms
        ))
        .into());
    }

    if queue.entry_ttl_ms < queue.request_timeout_ms {
        return Err(ConfigError::Validation(format!(
            "queue.entryTtlMs ({}) must be at least queue.requestTimeoutMs ({})",
            queue.entry_ttl_ms, queue.request_timeout_ms
        ))
        .into());
    }

    for (identifier, plugin) in &config.plugins {
        if identifier.is_empty() || identifier.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid plugin identifier '{identifier}'"
            ))
            .into());
        }
        if let Some(timeout_ms) = plugin.timeout_ms {
            check_timeout(&format!("plugins.{identifier}.timeoutMs"), timeout_ms)?;
        }
    }

    Ok(())
}

fn check_timeout(name: &str, value: u64) -> Result<()> {
    if value < MIN_TIMEOUT_MS {
        return Err(
            ConfigError::Validation(format!("{name} must be at least {MIN_TIMEOUT_MS}ms")).into(),
        );
    }
    if value > MAX_TIMEOUT_MS {
        return Err(ConfigError::Validation(format!(
            "{name} cannot exceed {MAX_TIMEOUT_MS}ms (10 minutes)"
        ))
        .into());
    }
    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    config.server.host = substitute_env_vars(&config.server.host)?;
    Ok(config)
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env pattern"))
}

fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in env_pattern().captures_iter(input) {
        let var_name = &cap[1];
        // ${VAR:-default} falls back when VAR is unset
        let (name, default) = match var_name.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (var_name, None),
        };
        let value = match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(ConfigError::EnvVar(format!(
                    "Environment variable '{name}' not found"
                ))
                .into())
            }
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuiltinKind;
    use crate::plugin::PluginCategory;
    use std::io::Write;

    #[test]
    fn test_env_substitution() {
        std::env::set_var("PLUGIN_RELAY_TEST_HOST", "127.0.0.1");

        let result = substitute_env_vars("${PLUGIN_RELAY_TEST_HOST}").unwrap();
        assert_eq!(result, "127.0.0.1");

        let result = substitute_env_vars("${PLUGIN_RELAY_MISSING:-localhost}").unwrap();
        assert_eq!(result, "localhost");

        assert!(substitute_env_vars("${PLUGIN_RELAY_MISSING}").is_err());

        std::env::remove_var("PLUGIN_RELAY_TEST_HOST");
    }

    #[test]
    fn test_env_key_mapping() {
        assert_eq!(
            env_key(UncasedStr::new("QUEUE__REQUEST_TIMEOUT_MS")).as_str(),
            "queue.requestTimeoutMs"
        );
        assert_eq!(env_key(UncasedStr::new("server__port")).as_str(), "server.port");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert!(config.plugins.contains_key("echo"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.queue.workers = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.queue.execution_timeout_ms = 10;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.queue.sweep_interval_ms = config.queue.entry_ttl_ms + 1;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.queue.entry_ttl_ms = config.queue.request_timeout_ms - 1;
        config.queue.sweep_interval_ms = 1_000;
        assert!(validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9000
  prod: true
queue:
  workers: 2
plugins:
  slow:
    kind: sleep
    category: task
    timeoutMs: 1500
"#
        )
        .unwrap();

        let config = load_from_path(file.path()).await.unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.server.prod);
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.request_timeout_ms, 60_000);
        assert!(config.middlewares.timer);

        let slow = &config.plugins["slow"];
        assert_eq!(slow.kind, BuiltinKind::Sleep);
        assert_eq!(slow.category, PluginCategory::Task);
        assert_eq!(slow.timeout_ms, Some(1500));
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(load_from_path(file.path()).await.is_err());
    }
}
