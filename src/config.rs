use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = lookup("DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database_url = Some(v);
            }
        }
        if let Some(v) = lookup("SCHOOL_STATS_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse::<u32>() {
                if n > 0 {
                    cfg.max_connections = n;
                }
            }
        }
        if let Some(v) = lookup("SCHOOL_STATS_LOG") {
            cfg.log_level = v;
        }
        if let Some(v) = lookup("SCHOOL_STATS_LOG_JSON") {
            cfg.log_json = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        cfg
    }
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.log_json);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/school"),
            ("SCHOOL_STATS_MAX_CONNECTIONS", "many"),
            ("SCHOOL_STATS_LOG", "debug"),
            ("SCHOOL_STATS_LOG_JSON", "TRUE"),
        ]));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/school"));
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.log_level, "debug");
        assert!(cfg.log_json);
    }
}
