//! Server configuration.
//!
//! Loaded from a YAML file, then overridden by `TROVE_*` environment
//! variables using `__` as the section separator (`TROVE_HTTP__PORT=9000`
//! sets `http.port`). Every knob has a default so an empty file boots a
//! development server.

use serde::Deserialize;

/// How update calls treat fields outside the alterable whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Reject with `Forbidden`.
    Strict,
    /// Strip the fields and log a warning; the result shape is unchanged.
    Lenient,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Key authenticating the `/system` admin surface.
    pub admin_key: String,
    /// Origins trusted for `auth.login` app requests.
    pub trusted_origins: Vec<String>,
    /// Personal session lifetime in seconds.
    pub session_max_age: f64,
    /// Password reset request lifetime in seconds.
    pub password_reset_max_age: f64,
    /// HMAC key for attachment read tokens and session derivation.
    pub secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_key: String::new(),
            trusted_origins: vec!["*".into()],
            session_max_age: 60.0 * 60.0 * 24.0 * 14.0,
            password_reset_max_age: 60.0 * 60.0,
            secret: "insecure-dev-secret".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Cap on any single result array.
    pub array_limit: usize,
    /// Per-method wall-clock budget in seconds.
    pub method_timeout_secs: u64,
    /// Maximum accepted attachment upload size in bytes.
    pub attachment_max_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            array_limit: crate::result::DEFAULT_ARRAY_LIMIT,
            method_timeout_secs: 15,
            attachment_max_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NatsConfig {
    pub enabled: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    /// Opaque build id carried in `meta.serial`.
    pub serial: String,
    /// Static document relayed by `service.info`.
    pub info: serde_json::Value,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "trove".into(),
            serial: "dev".into(),
            info: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TroveConfig {
    pub http: HttpConfig,
    pub auth: AuthConfig,
    pub limits: LimitsConfig,
    pub caches: CacheConfig,
    pub nats: NatsConfig,
    pub service: ServiceConfig,
    pub update_mode: UpdateMode,
}

impl Default for TroveConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            caches: CacheConfig::default(),
            nats: NatsConfig::default(),
            service: ServiceConfig::default(),
            update_mode: UpdateMode::Strict,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl TroveConfig {
    /// Load from a YAML file, then apply `TROVE_*` env overrides.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content, std::env::vars())
    }

    /// Defaults plus env overrides only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_yaml_str("{}", std::env::vars())
    }

    fn from_yaml_str(
        content: &str,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let mut tree: serde_yaml::Value = serde_yaml::from_str(content)?;
        if tree.is_null() {
            tree = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        for (key, value) in vars {
            let Some(path) = key.strip_prefix("TROVE_") else {
                continue;
            };
            let segments: Vec<String> = path
                .split("__")
                .map(|s| s.to_ascii_lowercase())
                .collect();
            set_path(&mut tree, &segments, &value);
        }
        Ok(serde_yaml::from_value(tree)?)
    }
}

fn set_path(tree: &mut serde_yaml::Value, segments: &[String], raw: &str) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if !tree.is_mapping() {
        *tree = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let Some(map) = tree.as_mapping_mut() else {
        return;
    };
    let key = serde_yaml::Value::String(head.clone());
    if rest.is_empty() {
        // Let YAML parsing decide the scalar type (number, bool, string).
        let value =
            serde_yaml::from_str(raw).unwrap_or(serde_yaml::Value::String(raw.to_string()));
        map.insert(key, value);
    } else {
        let child = map
            .entry(key)
            .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
        set_path(child, rest, raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_boot_without_a_file() {
        let config = TroveConfig::from_yaml_str("{}", std::iter::empty()).unwrap();
        assert_eq!(config.http.port, 3000);
        assert_eq!(config.update_mode, UpdateMode::Strict);
        assert!(config.caches.enabled);
    }

    #[test]
    fn yaml_values_override_defaults() {
        let yaml = "http:\n  port: 8080\nupdate_mode: lenient\n";
        let config = TroveConfig::from_yaml_str(yaml, std::iter::empty()).unwrap();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.update_mode, UpdateMode::Lenient);
    }

    #[test]
    fn env_overrides_win_over_yaml() {
        let yaml = "http:\n  port: 8080\n";
        let vars = vec![
            ("TROVE_HTTP__PORT".to_string(), "9000".to_string()),
            ("TROVE_CACHES__ENABLED".to_string(), "false".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ];
        let config = TroveConfig::from_yaml_str(yaml, vars.into_iter()).unwrap();
        assert_eq!(config.http.port, 9000);
        assert!(!config.caches.enabled);
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trove.yaml");
        std::fs::write(&path, "service:\n  serial: '2024'\n").unwrap();
        let config = TroveConfig::load(&path).unwrap();
        assert_eq!(config.service.serial, "2024");
    }
}
