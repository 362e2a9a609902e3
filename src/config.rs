use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::dictionary::files::default_user_dict_path;
use crate::dictionary::{DictionaryFormat, DictionaryOptions};
use crate::reload::{ReloadPolicy, ReloadSettings, DEFAULT_CHANNEL, DEFAULT_COMMAND};

/// Which pub/sub transport carries reload commands.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerBackend {
    /// In-process channels (default) — reloads only reach this process
    Memory,
    /// Redis pub/sub — reloads reach every process subscribed to the channel
    Redis,
}

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy.
/// Every setting has a default, so `muzzle init` works with no .env at all.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// PostgreSQL connection URL (when set and starts with postgres://, uses Postgres backend)
    pub database_url: Option<String>,
    pub broker: BrokerBackend,
    /// Redis URL; only used with the redis broker
    pub redis_url: String,
    pub reload: ReloadSettings,
    pub dictionary: DictionaryOptions,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let broker = match env::var("MUZZLE_BROKER").as_deref() {
            Ok("redis") => BrokerBackend::Redis,
            Ok("memory") | Err(_) => BrokerBackend::Memory,
            Ok(other) => anyhow::bail!(
                "MUZZLE_BROKER must be \"memory\" or \"redis\", got {other:?}"
            ),
        };

        let policy = match env::var("MUZZLE_RELOAD_POLICY") {
            Ok(p) => ReloadPolicy::from_str(&p)?,
            Err(_) => ReloadPolicy::Persistent,
        };

        let keepalive_secs: u64 = parse_var("MUZZLE_KEEPALIVE_SECS", 5)?;
        if keepalive_secs == 0 {
            anyhow::bail!("MUZZLE_KEEPALIVE_SECS must be at least 1");
        }
        let resubscribe_secs: u64 = parse_var("MUZZLE_RESUBSCRIBE_SECS", 5)?;

        let reload = ReloadSettings {
            channel: env::var("MUZZLE_RELOAD_CHANNEL").unwrap_or_else(|_| DEFAULT_CHANNEL.to_string()),
            command: env::var("MUZZLE_RELOAD_COMMAND").unwrap_or_else(|_| DEFAULT_COMMAND.to_string()),
            policy,
            keepalive: Duration::from_secs(keepalive_secs),
            // 0 disables resubscribing: a lost connection stops `serve`
            resubscribe_delay: (resubscribe_secs > 0).then(|| Duration::from_secs(resubscribe_secs)),
        };

        let user_dict_path = env::var("MUZZLE_USER_DICT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_user_dict_path());
        let mut dictionary = DictionaryOptions::new(user_dict_path)
            .with_mask(parse_mask(env::var("MUZZLE_MASK_CHAR").ok().as_deref())?)
            .with_format(parse_format(env::var("MUZZLE_DICT_WEIGHT").ok().as_deref())?);
        if let Ok(dir) = env::var("MUZZLE_DICT_DIR") {
            dictionary = dictionary.with_static_dir(dir);
        }

        Ok(Self {
            db_path: env::var("MUZZLE_DB_PATH").unwrap_or_else(|_| "./muzzle.db".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            broker,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| redis_url_from_parts()),
            reload,
            dictionary,
        })
    }

    /// True when DATABASE_URL points at PostgreSQL.
    pub fn uses_postgres(&self) -> bool {
        self.database_url
            .as_deref()
            .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
    }

    /// Check that reload commands can reach other processes.
    /// Call this before publishing from a short-lived CLI process.
    pub fn require_redis(&self) -> Result<()> {
        if self.broker != BrokerBackend::Redis {
            anyhow::bail!(
                "MUZZLE_BROKER is not set to redis, so reload commands can't leave this process.\n\
                 Set MUZZLE_BROKER=redis (and REDIS_URL) in your .env file,\n\
                 or use POST /api/reload on the running server."
            );
        }
        if cfg!(not(feature = "redis")) {
            anyhow::bail!(
                "MUZZLE_BROKER=redis but the 'redis' feature is not compiled in.\n\
                 Rebuild with: cargo build --features redis"
            );
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got {v:?}")),
        Err(_) => Ok(default),
    }
}

fn parse_mask(value: Option<&str>) -> Result<char> {
    let Some(value) = value else {
        return Ok('*');
    };
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => anyhow::bail!("MUZZLE_MASK_CHAR must be exactly one character, got {value:?}"),
    }
}

fn parse_format(value: Option<&str>) -> Result<DictionaryFormat> {
    match value.map(str::trim) {
        None | Some("") => Ok(DictionaryFormat::default()),
        Some("0") | Some("none") => Ok(DictionaryFormat::Bare),
        Some(w) => {
            let weight = w
                .parse()
                .with_context(|| format!("MUZZLE_DICT_WEIGHT must be a number or \"none\", got {w:?}"))?;
            Ok(DictionaryFormat::Weighted(weight))
        }
    }
}

/// `redis://[:password@]host[/db]` from REDIS_HOST, REDIS_PASSWORD and REDIS_DB.
fn redis_url_from_parts() -> String {
    build_redis_url(
        env::var("REDIS_HOST").ok().as_deref(),
        env::var("REDIS_PASSWORD").ok().as_deref(),
        env::var("REDIS_DB").ok().as_deref(),
    )
}

fn build_redis_url(host: Option<&str>, password: Option<&str>, db: Option<&str>) -> String {
    let host = host.filter(|h| !h.is_empty()).unwrap_or("127.0.0.1:6379");
    let auth = match password.filter(|p| !p.is_empty()) {
        Some(p) => format!(":{}@", utf8_percent_encode(p, NON_ALPHANUMERIC)),
        None => String::new(),
    };
    let db = match db.filter(|d| !d.is_empty()) {
        Some(d) => format!("/{d}"),
        None => String::new(),
    };
    format!("redis://{auth}{host}{db}")
}
