use crate::table::{DEFAULT_POLL_INTERVAL, DEFAULT_TABLE_WAIT, WaitPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TABLE: &str = "credential-store";
pub const DEFAULT_KEY_ALIAS: &str = "alias/credstash";
pub const DEFAULT_CAPACITY: i64 = 1;

const TABLE_ENV: &str = "CREDSTORE_TABLE";
const KEY_ALIAS_ENV: &str = "CREDSTORE_KEY_ALIAS";
const READ_CAPACITY_ENV: &str = "CREDSTORE_READ_CAPACITY";
const WRITE_CAPACITY_ENV: &str = "CREDSTORE_WRITE_CAPACITY";
const TABLE_WAIT_ENV: &str = "CREDSTORE_TABLE_WAIT_SECS";
const TABLE_POLL_ENV: &str = "CREDSTORE_TABLE_POLL_MS";

/// Store-level settings shared by every caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub table: String,
    pub key_alias: String,
    pub read_capacity: i64,
    pub write_capacity: i64,
    pub wait: WaitPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            key_alias: DEFAULT_KEY_ALIAS.to_string(),
            read_capacity: DEFAULT_CAPACITY,
            write_capacity: DEFAULT_CAPACITY,
            wait: WaitPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Load settings from the environment.
    ///
    /// * `CREDSTORE_TABLE` names the table (default: `credential-store`).
    /// * `CREDSTORE_KEY_ALIAS` is the key used for new writes (default: `alias/credstash`).
    /// * `CREDSTORE_READ_CAPACITY` / `CREDSTORE_WRITE_CAPACITY` size a new table (default: 1).
    /// * `CREDSTORE_TABLE_WAIT_SECS` bounds the wait for a new table (default: 30).
    /// * `CREDSTORE_TABLE_POLL_MS` is the status poll interval (default: 1000).
    ///
    /// Blank or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            table: env_string(TABLE_ENV).unwrap_or(defaults.table),
            key_alias: env_string(KEY_ALIAS_ENV).unwrap_or(defaults.key_alias),
            read_capacity: env_parse(READ_CAPACITY_ENV)
                .filter(|v: &i64| *v > 0)
                .unwrap_or(defaults.read_capacity),
            write_capacity: env_parse(WRITE_CAPACITY_ENV)
                .filter(|v: &i64| *v > 0)
                .unwrap_or(defaults.write_capacity),
            wait: WaitPolicy {
                timeout: env_parse(TABLE_WAIT_ENV)
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_TABLE_WAIT),
                interval: env_parse(TABLE_POLL_ENV)
                    .filter(|ms: &u64| *ms > 0)
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
            },
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.trim().parse().ok())
}
