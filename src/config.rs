use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tracing::warn;

const URL_VAR: &str = "TUITION_BACKEND_URL";
const KEY_VAR: &str = "TUITION_BACKEND_KEY";
const AUTO_CONFIRM_VAR: &str = "TUITION_AUTO_CONFIRM";
const STALE_SECS_VAR: &str = "TUITION_STALE_SECS";
const RETRY_DELAY_MS_VAR: &str = "TUITION_RETRY_DELAY_MS";
const PASSWORD_COST_VAR: &str = "TUITION_PASSWORD_COST";

const PLACEHOLDER_KEY: &str = "placeholder-anon-key";

/// Loads `.env` from the working directory into the environment, if present.
/// Call before logging is set up so `RUST_LOG` can come from the file too.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenv::dotenv().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub database_path: PathBuf,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` means run against the inert backend.
    pub backend: Option<BackendTarget>,
    pub auto_confirm: bool,
    pub stale_time: Duration,
    pub retry_delay: Duration,
    /// bcrypt work factor, 4 through 31.
    pub password_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: None,
            auto_confirm: true,
            stale_time: Duration::from_secs(5 * 60),
            retry_delay: Duration::from_millis(1000),
            password_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let backend = match parse_backend(lookup(URL_VAR), lookup(KEY_VAR)) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(error = %e, "backend configuration unusable");
                None
            }
        };
        Config {
            backend,
            auto_confirm: lookup(AUTO_CONFIRM_VAR)
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.auto_confirm),
            stale_time: lookup(STALE_SECS_VAR)
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_time),
            retry_delay: lookup(RETRY_DELAY_MS_VAR)
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            password_cost: lookup(PASSWORD_COST_VAR)
                .and_then(|v| v.trim().parse().ok())
                .filter(|c| (4..=31).contains(c))
                .unwrap_or(defaults.password_cost),
        }
    }
}

fn parse_flag(v: &str) -> bool {
    !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}

/// Accepts `sqlite://<path>` with a non-placeholder key.
pub fn parse_backend(url: Option<String>, key: Option<String>) -> anyhow::Result<BackendTarget> {
    let url = url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| anyhow!("{URL_VAR} is not set"))?;
    let api_key = key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && k != PLACEHOLDER_KEY)
        .ok_or_else(|| anyhow!("{KEY_VAR} is not set"))?;

    let Some((scheme, rest)) = url.split_once("://") else {
        bail!("{URL_VAR} is not a URL: {url}");
    };
    if !scheme.eq_ignore_ascii_case("sqlite") {
        bail!("unsupported backend scheme: {scheme}");
    }
    if rest.is_empty() {
        bail!("{URL_VAR} has no database path");
    }
    Ok(BackendTarget {
        database_path: PathBuf::from(rest),
        api_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn sqlite_url_with_key_is_accepted() {
        let cfg = Config::from_lookup(lookup(&[
            (URL_VAR, "sqlite:///tmp/tuition/backend.sqlite3"),
            (KEY_VAR, "anon-123"),
        ]));
        assert_eq!(
            cfg.backend,
            Some(BackendTarget {
                database_path: PathBuf::from("/tmp/tuition/backend.sqlite3"),
                api_key: "anon-123".into(),
            })
        );
        assert_eq!(cfg.stale_time, Duration::from_secs(300));
    }

    #[test]
    fn missing_or_placeholder_values_disable_the_backend() {
        assert!(Config::from_lookup(lookup(&[])).backend.is_none());
        assert!(Config::from_lookup(lookup(&[(URL_VAR, "sqlite:///tmp/x.db")])).backend.is_none());
        assert!(Config::from_lookup(lookup(&[
            (URL_VAR, "sqlite:///tmp/x.db"),
            (KEY_VAR, PLACEHOLDER_KEY),
        ]))
        .backend
        .is_none());
        assert!(Config::from_lookup(lookup(&[(URL_VAR, "not a url"), (KEY_VAR, "k")]))
            .backend
            .is_none());
        assert!(Config::from_lookup(lookup(&[
            (URL_VAR, "https://placeholder-project.example.co"),
            (KEY_VAR, "k"),
        ]))
        .backend
        .is_none());
    }

    #[test]
    fn tuning_knobs_are_read() {
        let cfg = Config::from_lookup(lookup(&[
            (AUTO_CONFIRM_VAR, "false"),
            (STALE_SECS_VAR, "10"),
            (RETRY_DELAY_MS_VAR, "0"),
            (PASSWORD_COST_VAR, "4"),
        ]));
        assert!(!cfg.auto_confirm);
        assert_eq!(cfg.stale_time, Duration::from_secs(10));
        assert_eq!(cfg.retry_delay, Duration::ZERO);
        assert_eq!(cfg.password_cost, 4);
    }

    #[test]
    fn out_of_range_password_cost_falls_back_to_default() {
        for bad in ["3", "32", "cheap"] {
            let cfg = Config::from_lookup(lookup(&[(PASSWORD_COST_VAR, bad)]));
            assert_eq!(cfg.password_cost, bcrypt::DEFAULT_COST);
        }
    }
}
