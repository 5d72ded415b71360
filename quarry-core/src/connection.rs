//! Connection configuration and the named connection registry

use crate::driver::{Connect, Driver};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Credentials for one named connection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub socket: Option<String>,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub charset: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: "mysql".to_string(),
            host: "localhost".to_string(),
            port: 3306,
            socket: None,
            user: String::new(),
            password: None,
            database: String::new(),
            charset: "utf8mb4".to_string(),
        }
    }
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_ttl_secs: 60,
        }
    }
}

/// Top-level database configuration parsed from a TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    /// Name of the default connection; the first one listed when omitted
    pub default: Option<String>,
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl DatabaseConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The name of the connection that starts out as default
    pub fn default_name(&self) -> Option<&str> {
        self.default
            .as_deref()
            .or_else(|| self.connections.keys().next().map(String::as_str))
    }
}

/// Loads database configuration from a TOML file at the given path.
///
/// ```no_run
/// let config = quarry_core::load_config("database.toml")?;
/// println!("{:?}", config.default_name());
/// # Ok::<(), quarry_core::Error>(())
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DatabaseConfig> {
    let content = fs::read_to_string(path)?;
    DatabaseConfig::from_toml(&content)
}

struct Registry<D> {
    drivers: HashMap<String, Arc<D>>,
    default: Option<String>,
}

/// Named live connections, one of which is the default.
///
/// A connection is never changed after it is added; it can only be removed,
/// or replaced by adding another under the same name.
pub struct Connections<D> {
    inner: RwLock<Registry<D>>,
}

impl<D: Driver> Default for Connections<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> Connections<D> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Registry {
                drivers: HashMap::new(),
                default: None,
            }),
        }
    }

    /// Register a connection. The first one added becomes the default.
    pub async fn add(&self, name: impl Into<String>, driver: D) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("connection name is required"));
        }

        let mut registry = self.inner.write().await;
        if registry.default.is_none() {
            registry.default = Some(name.clone());
        }
        registry.drivers.insert(name.clone(), Arc::new(driver));
        tracing::info!(connection = %name, "added connection");
        Ok(())
    }

    /// Make `name` the default connection
    pub async fn set_default(&self, name: &str) -> Result<()> {
        let mut registry = self.inner.write().await;
        if !registry.drivers.contains_key(name) {
            return Err(unknown_connection(name));
        }
        registry.default = Some(name.to_string());
        tracing::info!(connection = %name, "switched default connection");
        Ok(())
    }

    pub async fn default_name(&self) -> Option<String> {
        self.inner.read().await.default.clone()
    }

    /// Look up a connection, or the default one when `name` is `None`
    pub async fn get(&self, name: Option<&str>) -> Result<Arc<D>> {
        let registry = self.inner.read().await;
        let name = match name.or(registry.default.as_deref()) {
            Some(name) => name,
            None => return Err(Error::invalid_connection("no default connection")),
        };
        registry
            .drivers
            .get(name)
            .cloned()
            .ok_or_else(|| unknown_connection(name))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.drivers.contains_key(name)
    }

    /// Remove a connection. Removing the default leaves no default.
    pub async fn remove(&self, name: &str) -> Option<Arc<D>> {
        let mut registry = self.inner.write().await;
        let removed = registry.drivers.remove(name);
        if registry.default.as_deref() == Some(name) {
            registry.default = None;
        }
        if removed.is_some() {
            tracing::info!(connection = %name, "removed connection");
        }
        removed
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<D: Connect> Connections<D> {
    /// Open every configured connection.
    ///
    /// Fails with `MissingDependency` when a connection asks for a driver
    /// other than `D`.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let connections = Self::new();
        for (name, settings) in &config.connections {
            if !settings.driver.eq_ignore_ascii_case(D::NAME) {
                return Err(Error::missing_dependency(format!(
                    "driver '{}' for connection '{}' is not available",
                    settings.driver, name
                )));
            }
            connections.add(name.clone(), D::connect(settings).await?).await?;
        }
        if let Some(default) = config.default_name() {
            connections.set_default(default).await?;
        }
        Ok(connections)
    }
}

fn unknown_connection(name: &str) -> Error {
    Error::invalid_connection(format!("no connection named '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;

    const SAMPLE_CONFIG: &str = r#"
default = "main"

[connections.main]
host = "127.0.0.1"
user = "app"
password = "secret"
database = "app"

[connections.archive]
driver = "mysql"
socket = "/var/run/mysqld/mysqld.sock"
user = "app"
database = "archive"
charset = "latin1"

[cache]
enabled = true
default_ttl_secs = 30
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = DatabaseConfig::from_toml(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.default_name(), Some("main"));

        let main = &config.connections["main"];
        assert_eq!(main.driver, "mysql");
        assert_eq!(main.port, 3306);
        assert_eq!(main.charset, "utf8mb4");
        assert_eq!(main.password.as_deref(), Some("secret"));

        let archive = &config.connections["archive"];
        assert_eq!(archive.host, "localhost");
        assert_eq!(archive.socket.as_deref(), Some("/var/run/mysqld/mysqld.sock"));
        assert_eq!(archive.charset, "latin1");

        assert!(config.cache.enabled);
        assert_eq!(config.cache.default_ttl_secs, 30);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = DatabaseConfig::from_toml("connections = 5").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_first_connection_is_default() {
        let connections = Connections::new();
        connections.add("main", RecordingDriver::new()).await.unwrap();
        connections.add("other", RecordingDriver::new()).await.unwrap();

        assert_eq!(connections.default_name().await.as_deref(), Some("main"));
        assert!(connections.get(None).await.is_ok());
        assert!(connections.get(Some("other")).await.is_ok());

        connections.set_default("other").await.unwrap();
        assert_eq!(connections.default_name().await.as_deref(), Some("other"));
        assert_eq!(connections.names().await, vec!["main", "other"]);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let connections: Connections<RecordingDriver> = Connections::new();
        let err = connections.get(None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConnection { .. }));

        connections.add("main", RecordingDriver::new()).await.unwrap();
        assert!(connections.set_default("nope").await.is_err());
        assert!(connections.remove("main").await.is_some());
        assert!(connections.get(Some("main")).await.is_err());
        assert!(connections.get(None).await.is_err());
    }

    #[test]
    fn test_empty_connection_name_rejected() {
        let connections = Connections::new();
        tokio_test::assert_err!(tokio_test::block_on(connections.add(" ", RecordingDriver::new())));
        tokio_test::assert_ok!(tokio_test::block_on(connections.add("main", RecordingDriver::new())));
    }

    #[tokio::test]
    async fn test_from_config_checks_driver() {
        let config = DatabaseConfig::from_toml(SAMPLE_CONFIG).unwrap();
        let connections = Connections::<RecordingDriver>::from_config(&config).await.unwrap();
        assert_eq!(connections.default_name().await.as_deref(), Some("main"));

        let config = DatabaseConfig::from_toml(
            r#"
[connections.main]
driver = "oracle"
database = "x"
"#,
        )
        .unwrap();
        let err = Connections::<RecordingDriver>::from_config(&config).await.err().unwrap();
        assert!(matches!(err, Error::MissingDependency { .. }));
    }
}
