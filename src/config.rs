//! Environment-driven configuration. Values come from the process environment,
//! optionally preloaded from a `KEY=VALUE` env file.

use std::{env, fmt::Display, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

const DEV_COOKIE_SECRET: &str = "veeta-development-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cookie_secret: String,
    pub cookie_days: i64,
    pub environment: Environment,
    pub database_url: Option<String>,
    pub session_table: String,
    pub session_sweep_secs: u64,
    /// Origin allowed by CORS in development.
    pub dev_origin: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("ENV").as_deref() {
            Some("development") => Environment::Development,
            _ => Environment::Production,
        };
        let cookie_secret = match lookup("COOKIE_SECRET").filter(|s| !s.is_empty()) {
            Some(s) => s,
            None if environment == Environment::Development => {
                warn!(target: "startup", "COOKIE_SECRET not set, using development secret");
                DEV_COOKIE_SECRET.to_string()
            }
            None => bail!("COOKIE_SECRET must be set outside development"),
        };
        let cookie_days: i64 = try_load(&lookup, "COOKIE_DAYS_TOEXPIRE", "30")?;
        if cookie_days <= 0 {
            bail!("COOKIE_DAYS_TOEXPIRE must be positive, got {}", cookie_days);
        }
        Ok(Self {
            port: try_load(&lookup, "PORT", "3011")?,
            cookie_secret,
            cookie_days,
            environment,
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            session_table: lookup("SESSION_TABLE").unwrap_or_else(|| "user_sessions".to_string()),
            session_sweep_secs: try_load(&lookup, "SESSION_SWEEP_SECS", "300")?,
            dev_origin: lookup("DEV_ORIGIN").unwrap_or_else(|| "http://localhost:3012".to_string()),
        })
    }

    pub fn is_development(&self) -> bool { self.environment == Environment::Development }

    pub fn session_ttl(&self) -> chrono::Duration { chrono::Duration::days(self.cookie_days) }
}

fn try_load<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!(target: "startup", "{key} not set, using default: {default}");
        default.to_string()
    });
    raw.trim().parse().map_err(|e| anyhow!("Invalid {key} value '{raw}': {e}"))
}

/// Load `KEY=VALUE` lines from `path` into the process environment without
/// overriding variables that are already set. A missing file is not an error.
/// Returns the number of variables applied.
pub fn load_env_file(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading env file {}", path.display()))?;
    let mut applied = 0;
    for (key, value) in parse_env_file(&text) {
        if env::var_os(&key).is_none() {
            env::set_var(&key, value);
            applied += 1;
        }
    }
    info!(target: "startup", path = %path.display(), applied, "env file loaded");
    Ok(applied)
}

/// Parse env-file text: blank lines and `#` comments are skipped, an optional
/// `export ` prefix is dropped, and matching surrounding quotes are stripped.
pub fn parse_env_file(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (k, v) = line.split_once('=')?;
            let k = k.trim();
            if k.is_empty() { return None; }
            let v = v.trim();
            let v = ['"', '\'']
                .iter()
                .find_map(|q| v.strip_prefix(*q).and_then(|r| r.strip_suffix(*q)))
                .unwrap_or(v);
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}
