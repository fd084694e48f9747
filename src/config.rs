use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::{EngineSettings, UserPolicy};

/// Runtime configuration from `ROOMBOOK_*` environment variables.
/// Unset or unparsable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub users_file: Option<PathBuf>,
    pub rooms: Vec<String>,
    pub allow_raw_users: bool,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
            data_dir: PathBuf::from("./data"),
            users_file: None,
            rooms: EngineSettings::default().rooms,
            allow_raw_users: false,
            metrics_port: None,
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let rooms: Vec<String> = lookup("ROOMBOOK_ROOMS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind: lookup("ROOMBOOK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "ROOMBOOK_PORT").unwrap_or(defaults.port),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            users_file: lookup("ROOMBOOK_USERS_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            rooms: if rooms.is_empty() { defaults.rooms } else { rooms },
            allow_raw_users: parsed(&lookup, "ROOMBOOK_ALLOW_RAW_USERS").unwrap_or(defaults.allow_raw_users),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            rooms: self.rooms.clone(),
            user_policy: if self.allow_raw_users {
                UserPolicy::AllowRaw
            } else {
                UserPolicy::Strict
            },
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.addr(), "0.0.0.0:8000");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/roombook.wal"));
        assert_eq!(cfg.engine_settings().user_policy, UserPolicy::Strict);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config(&[
            ("ROOMBOOK_BIND", "127.0.0.1"),
            ("ROOMBOOK_PORT", "9000"),
            ("ROOMBOOK_DATA_DIR", "/var/lib/roombook"),
            ("ROOMBOOK_USERS_FILE", "/etc/roombook/users.json"),
            ("ROOMBOOK_ROOMS", " B1, B2 ,,B3"),
            ("ROOMBOOK_ALLOW_RAW_USERS", "true"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
            ("ROOMBOOK_COMPACT_THRESHOLD", "50"),
        ]);
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/roombook"));
        assert_eq!(cfg.users_file, Some(PathBuf::from("/etc/roombook/users.json")));
        assert_eq!(cfg.rooms, vec!["B1", "B2", "B3"]);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.engine_settings().user_policy, UserPolicy::AllowRaw);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = config(&[
            ("ROOMBOOK_PORT", "eighty"),
            ("ROOMBOOK_ALLOW_RAW_USERS", "yes"),
            ("ROOMBOOK_METRICS_PORT", "-1"),
            ("ROOMBOOK_ROOMS", " , "),
            ("ROOMBOOK_USERS_FILE", ""),
        ]);
        assert_eq!(cfg, Config::default());
    }
}
