//! Relay configuration
//!
//! Loads configuration from config.yml, with `.env` and environment overrides.

use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_WPP_URL: &str = "http://localhost:21465";
pub const SESSION_NAME: &str = "alfa-ofertas";
pub const GROUP_INVITE_CODE: &str = "EOwarEsjc6bIWnIQptnglz";
pub const BACKUP_GROUP_ID: &str = "120363423459795612@g.us";
pub const QR_PATH: &str = "static/whatsapp_qr.png";
pub const GROUP_KEYWORDS: [&str; 3] = ["Alfa", "Ofertas", "Promo"];
pub const POLL_INTERVAL_SECS: u64 = 3;
pub const CONNECT_TIMEOUT_SECS: u64 = 300;
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    server: Option<ServerConfig>,
    whatsapp: Option<WhatsAppConfig>,
    qr: Option<QrConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerConfig {
    host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    port: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppConfig {
    base_url: Option<String>,
    session: Option<String>,
    secret_key: Option<String>,
    token: Option<String>,
    invite_code: Option<String>,
    backup_group_id: Option<String>,
    group_keywords: Option<Vec<String>>,
    poll_interval_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QrConfig {
    path: Option<String>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub wpp_base_url: String,
    pub session_name: String,
    pub secret_key: Option<String>,
    pub token: Option<String>,
    pub invite_code: String,
    pub backup_group_id: String,
    pub group_keywords: Vec<String>,
    pub qr_path: PathBuf,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| {
                Self::load_dotenv();
                Self::from_yaml(YamlConfig::default())
            })
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return Some(env_val);
        }
        value.filter(|v| !(v.starts_with("${") && v.ends_with('}')))
    }

    /// Resolve a port from string config or env var
    fn resolve_env_port(value: Option<String>, env_key: &str) -> u16 {
        Self::resolve_env_string(value, env_key)
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)?;
        Ok(Self::from_yaml(yaml))
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        let server = yaml.server.unwrap_or_default();
        let whatsapp = yaml.whatsapp.unwrap_or_default();
        let qr = yaml.qr.unwrap_or_default();

        let group_keywords = whatsapp
            .group_keywords
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| GROUP_KEYWORDS.iter().map(|k| k.to_string()).collect());

        Self {
            host: server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: Self::resolve_env_port(server.port, "RELAY_PORT"),
            wpp_base_url: Self::resolve_env_string(whatsapp.base_url, "WPP_BASE_URL")
                .unwrap_or_else(|| DEFAULT_WPP_URL.to_string()),
            session_name: Self::resolve_env_string(whatsapp.session, "WPP_SESSION")
                .unwrap_or_else(|| SESSION_NAME.to_string()),
            secret_key: Self::resolve_env_string(whatsapp.secret_key, "WPP_SECRET_KEY"),
            token: Self::resolve_env_string(whatsapp.token, "WPP_TOKEN"),
            invite_code: Self::resolve_env_string(whatsapp.invite_code, "GROUP_INVITE_CODE")
                .unwrap_or_else(|| GROUP_INVITE_CODE.to_string()),
            backup_group_id: Self::resolve_env_string(whatsapp.backup_group_id, "BACKUP_GROUP_ID")
                .unwrap_or_else(|| BACKUP_GROUP_ID.to_string()),
            group_keywords,
            qr_path: Self::resolve_env_string(qr.path, "QR_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(QR_PATH)),
            poll_interval: Duration::from_secs(
                whatsapp.poll_interval_secs.unwrap_or(POLL_INTERVAL_SECS),
            ),
            connect_timeout: Duration::from_secs(
                whatsapp.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            ),
            request_timeout: Duration::from_secs(
                whatsapp.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS),
            ),
        }
    }

    /// Built-in defaults, ignoring files and environment
    pub fn defaults() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            wpp_base_url: DEFAULT_WPP_URL.to_string(),
            session_name: SESSION_NAME.to_string(),
            secret_key: None,
            token: None,
            invite_code: GROUP_INVITE_CODE.to_string(),
            backup_group_id: BACKUP_GROUP_ID.to_string(),
            group_keywords: GROUP_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            qr_path: PathBuf::from(QR_PATH),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    /// Socket address the HTTP server binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const ENV_KEYS: [&str; 8] = [
        "RELAY_PORT",
        "WPP_BASE_URL",
        "WPP_SESSION",
        "WPP_SECRET_KEY",
        "WPP_TOKEN",
        "GROUP_INVITE_CODE",
        "BACKUP_GROUP_ID",
        "QR_PATH",
    ];

    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn unset(key: &str) -> Self {
            let original = std::env::var(key).ok();
            std::env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(value) => std::env::set_var(&self.key, value),
                None => std::env::remove_var(&self.key),
            }
        }
    }

    fn clear_env() -> Vec<EnvGuard> {
        ENV_KEYS.iter().map(|k| EnvGuard::unset(k)).collect()
    }

    fn write_yaml(name: &str, yaml: &str) -> PathBuf {
        let temp_file = std::env::temp_dir().join(name);
        std::fs::write(&temp_file, yaml).unwrap();
        temp_file
    }

    #[test]
    fn defaults_match_builtin_constants() {
        let config = Config::defaults();
        assert_eq!(config.port, 3001);
        assert_eq!(config.session_name, "alfa-ofertas");
        assert_eq!(config.invite_code, "EOwarEsjc6bIWnIQptnglz");
        assert_eq!(config.backup_group_id, "120363423459795612@g.us");
        assert_eq!(config.group_keywords, vec!["Alfa", "Ofertas", "Promo"]);
        assert_eq!(config.qr_path, PathBuf::from("static/whatsapp_qr.png"));
        assert!(config.secret_key.is_none());
    }

    #[test]
    fn listen_addr_combines_host_and_port() {
        let config = Config::defaults();
        assert_eq!(
            config.listen_addr().unwrap(),
            "0.0.0.0:3001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn listen_addr_rejects_bad_host() {
        let config = Config {
            host: "not a host".into(),
            ..Config::defaults()
        };
        assert!(matches!(config.listen_addr(), Err(Error::Config(_))));
    }

    #[test]
    fn load_from_yaml() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = clear_env();
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

whatsapp:
  base_url: "http://wpp:21465"
  session: "test-session"
  token: "abc"
  group_keywords: ["Deals"]
  poll_interval_secs: 1

qr:
  path: "/tmp/qr.png"
"#;
        let temp_file = write_yaml("relay_config_yaml.yml", yaml);

        let config = Config::load_from_file(&temp_file).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.wpp_base_url, "http://wpp:21465");
        assert_eq!(config.session_name, "test-session");
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.group_keywords, vec!["Deals"]);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.qr_path, PathBuf::from("/tmp/qr.png"));
        assert_eq!(config.invite_code, GROUP_INVITE_CODE);

        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn env_placeholders_are_resolved_from_environment() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = clear_env();
        let yaml = r#"
whatsapp:
  secret_key: "${RELAY_TEST_SECRET}"
  token: "${RELAY_TEST_TOKEN}"
"#;
        let temp_file = write_yaml("relay_config_env.yml", yaml);
        let _guards = [
            EnvGuard::set("RELAY_TEST_SECRET", "s3cret"),
            EnvGuard::set("RELAY_TEST_TOKEN", "tok"),
        ];

        let config = Config::load_from_file(&temp_file).unwrap();

        assert_eq!(config.secret_key.as_deref(), Some("s3cret"));
        assert_eq!(config.token.as_deref(), Some("tok"));

        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn unresolved_placeholder_is_dropped() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = clear_env();
        let yaml = r#"
whatsapp:
  secret_key: "${RELAY_TEST_NEVER_SET}"
"#;
        let temp_file = write_yaml("relay_config_unresolved.yml", yaml);
        let _guard = EnvGuard::unset("RELAY_TEST_NEVER_SET");

        let config = Config::load_from_file(&temp_file).unwrap();
        assert!(config.secret_key.is_none());

        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn env_overrides_yaml_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = clear_env();
        let yaml = r#"
server:
  port: 8080
whatsapp:
  invite_code: "FROMYAML"
"#;
        let temp_file = write_yaml("relay_config_override.yml", yaml);
        let _guards = [
            EnvGuard::set("RELAY_PORT", "9090"),
            EnvGuard::set("GROUP_INVITE_CODE", "FROMENV"),
        ];

        let config = Config::load_from_file(&temp_file).unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.invite_code, "FROMENV");

        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn empty_keyword_list_falls_back_to_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = clear_env();
        let temp_file = write_yaml(
            "relay_config_keywords.yml",
            "whatsapp:\n  group_keywords: []\n",
        );

        let config = Config::load_from_file(&temp_file).unwrap();
        assert_eq!(config.group_keywords.len(), 3);

        std::fs::remove_file(temp_file).ok();
    }

    #[test]
    fn load_from_file_fails_on_missing_file() {
        let result = Config::load_from_file("/nonexistent/path/config.yml");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn load_from_file_fails_on_invalid_yaml() {
        let temp_file = write_yaml("relay_config_invalid.yml", "{ invalid yaml [");

        let result = Config::load_from_file(&temp_file);
        assert!(result.is_err());

        std::fs::remove_file(temp_file).ok();
    }
}
