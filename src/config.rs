use std::env;
use std::time::Duration;

use crate::engine::EngineSettings;
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatcherKind {
    FirstInPool,
    Oracle,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub frontend_origin: String,
    pub store_backend: StoreBackend,
    pub mongo_uri: Option<String>,
    pub memory_staff_file: Option<String>,
    pub database_name: String,
    pub matcher: MatcherKind,
    pub ai_local_endpoint: String,
    pub ai_aws_endpoint: Option<String>,
    pub ai_use_local: bool,
    pub matcher_timeout: Duration,
    pub overdue_sweep_interval: Duration,
    pub daily_auto_assign_interval: Duration,
    pub task_due_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; `from_env` uses the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store_backend = match lookup("STORE_BACKEND").as_deref().unwrap_or("mongo") {
            "mongo" => StoreBackend::Mongo,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };
        let mongo_uri = lookup("MONGO_URI");
        if store_backend == StoreBackend::Mongo && mongo_uri.is_none() {
            return Err(ConfigError::Missing("MONGO_URI"));
        }

        let matcher = match lookup("MATCHER").as_deref().unwrap_or("first") {
            "first" => MatcherKind::FirstInPool,
            "oracle" => MatcherKind::Oracle,
            other => {
                return Err(ConfigError::Invalid {
                    key: "MATCHER",
                    value: other.to_string(),
                })
            }
        };
        let ai_use_local = parse_or(&lookup, "AI_USE_LOCAL", true)?;
        let ai_aws_endpoint = lookup("AI_AWS_ENDPOINT");
        if matcher == MatcherKind::Oracle && !ai_use_local && ai_aws_endpoint.is_none() {
            return Err(ConfigError::Missing("AI_AWS_ENDPOINT"));
        }

        let task_due_days: i64 = parse_or(&lookup, "TASK_DUE_DAYS", 7)?;
        if task_due_days <= 0 {
            return Err(ConfigError::Invalid {
                key: "TASK_DUE_DAYS",
                value: task_due_days.to_string(),
            });
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            frontend_origin: lookup("FRONTEND_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            store_backend,
            mongo_uri,
            memory_staff_file: lookup("MEMORY_STAFF_FILE"),
            database_name: lookup("DATABASE_NAME").unwrap_or_else(|| "task_db".to_string()),
            matcher,
            ai_local_endpoint: lookup("AI_LOCAL_ENDPOINT")
                .unwrap_or_else(|| "http://localhost:9000".to_string()),
            ai_aws_endpoint,
            ai_use_local,
            matcher_timeout: Duration::from_millis(parse_or(&lookup, "MATCHER_TIMEOUT_MS", 5_000)?),
            overdue_sweep_interval: positive_secs(&lookup, "OVERDUE_SWEEP_INTERVAL_SECS", 600)?,
            daily_auto_assign_interval: positive_secs(
                &lookup,
                "DAILY_AUTO_ASSIGN_INTERVAL_SECS",
                86_400,
            )?,
            task_due_days,
        })
    }

    /// The oracle endpoint currently in use.
    pub fn ai_endpoint(&self) -> &str {
        match (&self.ai_aws_endpoint, self.ai_use_local) {
            (Some(aws), false) => aws,
            _ => &self.ai_local_endpoint,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            task_due_window: chrono::Duration::days(self.task_due_days),
            matcher_timeout: self.matcher_timeout,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn positive_secs<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(lookup, key, default)?;
    if secs == 0 {
        return Err(ConfigError::Invalid { key, value: "0".to_string() });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_documented_schedule() {
        let cfg = config(&[("MONGO_URI", "mongodb://localhost:27017")]).unwrap();
        assert_eq!(cfg.store_backend, StoreBackend::Mongo);
        assert_eq!(cfg.matcher, MatcherKind::FirstInPool);
        assert_eq!(cfg.overdue_sweep_interval, Duration::from_secs(600));
        assert_eq!(cfg.daily_auto_assign_interval, Duration::from_secs(86_400));
        assert_eq!(cfg.matcher_timeout, Duration::from_secs(5));
        assert_eq!(cfg.engine_settings().task_due_window, chrono::Duration::days(7));
        assert_eq!(cfg.database_name, "task_db");
    }

    #[test]
    fn mongo_backend_requires_uri() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("MONGO_URI"))));
        assert!(config(&[("STORE_BACKEND", "memory")]).is_ok());
    }

    #[test]
    fn intervals_are_configurable_and_must_be_positive() {
        let cfg = config(&[
            ("STORE_BACKEND", "memory"),
            ("OVERDUE_SWEEP_INTERVAL_SECS", "30"),
            ("DAILY_AUTO_ASSIGN_INTERVAL_SECS", "3600"),
        ])
        .unwrap();
        assert_eq!(cfg.overdue_sweep_interval, Duration::from_secs(30));
        assert_eq!(cfg.daily_auto_assign_interval, Duration::from_secs(3600));

        assert!(config(&[("STORE_BACKEND", "memory"), ("OVERDUE_SWEEP_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("STORE_BACKEND", "memory"), ("MATCHER_TIMEOUT_MS", "soon")]).is_err());
    }

    #[test]
    fn oracle_endpoint_follows_local_flag() {
        let local = config(&[("STORE_BACKEND", "memory"), ("MATCHER", "oracle")]).unwrap();
        assert_eq!(local.ai_endpoint(), "http://localhost:9000");

        let remote = config(&[
            ("STORE_BACKEND", "memory"),
            ("MATCHER", "oracle"),
            ("AI_USE_LOCAL", "false"),
            ("AI_AWS_ENDPOINT", "https://match.example.com"),
        ])
        .unwrap();
        assert_eq!(remote.ai_endpoint(), "https://match.example.com");

        assert!(matches!(
            config(&[("STORE_BACKEND", "memory"), ("MATCHER", "oracle"), ("AI_USE_LOCAL", "false")]),
            Err(ConfigError::Missing("AI_AWS_ENDPOINT"))
        ));
    }
}
