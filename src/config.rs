use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `FLEETBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    /// Comma separated login names with the admin role.
    pub admins: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub sync_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parsed(&get, "FLEETBOOK_PORT").unwrap_or(5434),
            bind: get("FLEETBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("FLEETBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("FLEETBOOK_PASSWORD").unwrap_or_else(|| "fleetbook".into()),
            admins: get("FLEETBOOK_ADMINS").unwrap_or_else(|| "admin".into()),
            max_connections: parsed(&get, "FLEETBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "FLEETBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            sync_interval: Duration::from_secs(
                parsed::<u64>(&get, "FLEETBOOK_SYNC_INTERVAL_SECS")
                    .filter(|s| *s > 0)
                    .unwrap_or(30),
            ),
            metrics_port: parsed(&get, "FLEETBOOK_METRICS_PORT"),
            tls_cert: get("FLEETBOOK_TLS_CERT"),
            tls_key: get("FLEETBOOK_TLS_KEY"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleetbook.wal")
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.addr(), "0.0.0.0:5434");
        assert_eq!(c.wal_path(), PathBuf::from("./data/fleetbook.wal"));
        assert_eq!(c.password, "fleetbook");
        assert_eq!(c.admins, "admin");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.sync_interval, Duration::from_secs(30));
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.tls_cert, None);
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("FLEETBOOK_PORT", "6000"),
            ("FLEETBOOK_BIND", "127.0.0.1"),
            ("FLEETBOOK_DATA_DIR", "/var/lib/fleetbook"),
            ("FLEETBOOK_ADMINS", "ops,root"),
            ("FLEETBOOK_SYNC_INTERVAL_SECS", "5"),
            ("FLEETBOOK_METRICS_PORT", "9100"),
        ]);
        assert_eq!(c.addr(), "127.0.0.1:6000");
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/fleetbook/fleetbook.wal"));
        assert_eq!(c.admins, "ops,root");
        assert_eq!(c.sync_interval, Duration::from_secs(5));
        assert_eq!(c.metrics_port, Some(9100));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let c = config(&[
            ("FLEETBOOK_PORT", "http"),
            ("FLEETBOOK_MAX_CONNECTIONS", "-1"),
            ("FLEETBOOK_SYNC_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(c.port, 5434);
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.sync_interval, Duration::from_secs(30));
    }

    #[test]
    fn numbers_parse_into_their_own_widths() {
        let c = config(&[
            ("FLEETBOOK_PORT", " 7000 "),
            ("FLEETBOOK_MAX_CONNECTIONS", "64"),
            ("FLEETBOOK_COMPACT_THRESHOLD", "5000000000"),
            ("FLEETBOOK_METRICS_PORT", "70000"),
        ]);
        assert_eq!(c.port, 7000);
        assert_eq!(c.max_connections, 64);
        assert_eq!(c.compact_threshold, 5_000_000_000);
        // Out of range for a port.
        assert_eq!(c.metrics_port, None);
    }
}
