//! Server configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`volplane.toml`)
//! 2. Environment variables (with `VOLPLANE_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:7979"
//! schema_validation = true
//! task_retention_secs = 60
//! response_timeout_secs = 60
//! backend_workers = 1
//!
//! [services.local]
//! driver = "mock"
//!
//! [services.local.options]
//! delay_ms = 10
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::task::{RegistryConfig, DEFAULT_BACKEND_WORKERS, DEFAULT_TASK_RETENTION};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "volplane.toml";

/// Main server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, used in logs.
    pub name: String,

    /// Address the HTTP server binds to.
    pub listen: String,

    /// Validate task results against their result schemas.
    pub schema_validation: bool,

    /// Seconds a completed task stays inspectable. `0` keeps tasks forever.
    pub task_retention_secs: u64,

    /// Seconds a synchronous request waits for its task before answering
    /// with the still-running task.
    pub response_timeout_secs: u64,

    /// Concurrent driver calls per service unless the service overrides it.
    pub backend_workers: usize,

    /// Storage services by name.
    #[serde(skip)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "volplane".to_string(),
            listen: "127.0.0.1:7979".to_string(),
            schema_validation: true,
            task_retention_secs: DEFAULT_TASK_RETENTION.as_secs(),
            response_timeout_secs: 60,
            backend_workers: DEFAULT_BACKEND_WORKERS,
            services: BTreeMap::new(),
        }
    }
}

/// One configured storage service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Driver name. Defaults to the service name.
    pub driver: Option<String>,

    /// Overrides [`ServerConfig::backend_workers`] for this service.
    pub workers: Option<usize>,

    /// Driver-specific options.
    pub options: Map<String, Value>,
}

impl ServiceConfig {
    /// A service using `driver` with no options.
    pub fn with_driver(driver: &str) -> Self {
        Self {
            driver: Some(driver.to_string()),
            ..Self::default()
        }
    }

    /// The driver to construct for the service called `service`.
    pub fn driver_name<'a>(&'a self, service: &'a str) -> &'a str {
        self.driver.as_deref().unwrap_or(service)
    }
}

impl ServerConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `volplane.toml` in the working directory
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = match std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content.
    ///
    /// Service names are lower-cased; two services that differ only in
    /// case are rejected.
    pub fn from_toml(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            server: ServerConfig,
            #[serde(default)]
            services: BTreeMap<String, ServiceConfig>,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        let mut config = full.server;
        for (name, service) in full.services {
            let key = name.to_ascii_lowercase();
            if config.services.insert(key.clone(), service).is_some() {
                return Err(Error::Config(format!("duplicate service '{key}'")));
            }
        }
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(name) = var("VOLPLANE_NAME") {
            self.name = name;
        }
        if let Some(listen) = var("VOLPLANE_LISTEN") {
            self.listen = listen;
        }
        if let Some(v) = var("VOLPLANE_SCHEMA_VALIDATION").and_then(|v| v.parse().ok()) {
            self.schema_validation = v;
        }
        if let Some(v) = var("VOLPLANE_TASK_RETENTION_SECS").and_then(|v| v.parse().ok()) {
            self.task_retention_secs = v;
        }
        if let Some(v) = var("VOLPLANE_RESPONSE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.response_timeout_secs = v;
        }
        if let Some(v) = var("VOLPLANE_BACKEND_WORKERS").and_then(|v| v.parse().ok()) {
            self.backend_workers = v;
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            retention: (self.task_retention_secs > 0)
                .then(|| Duration::from_secs(self.task_retention_secs)),
            schema_validation: self.schema_validation,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Effective worker count for a service.
    pub fn workers_for(&self, service: &ServiceConfig) -> usize {
        service.workers.unwrap_or(self.backend_workers).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [server]
        listen = "0.0.0.0:8080"
        task_retention_secs = 0

        [services.Local]
        driver = "mock"
        workers = 2

        [services.local.options]
        delay_ms = 5
    "#;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert!(config.schema_validation);
        assert_eq!(config.response_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.registry_config().retention,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn rejects_services_differing_only_in_case() {
        let err = ServerConfig::from_toml(SAMPLE).unwrap_err();
        assert!(err.to_string().contains("duplicate service 'local'"));
    }

    #[test]
    fn parses_services() {
        let config = ServerConfig::from_toml(
            r#"
            [server]
            task_retention_secs = 0

            [services.Local]
            driver = "mock"
            workers = 2

            [services.Local.options]
            delay_ms = 5
            "#,
        )
        .unwrap();
        let local = &config.services["local"];
        assert_eq!(local.driver_name("local"), "mock");
        assert_eq!(config.workers_for(local), 2);
        assert_eq!(local.options["delay_ms"], 5);
        assert_eq!(config.registry_config().retention, None);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("VOLPLANE_LISTEN", "127.0.0.1:1"),
            ("VOLPLANE_BACKEND_WORKERS", "4"),
            ("VOLPLANE_SCHEMA_VALIDATION", "not-a-bool"),
        ]);
        let mut config = ServerConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.listen, "127.0.0.1:1");
        assert_eq!(config.backend_workers, 4);
        assert!(config.schema_validation);
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[services.ebs]").unwrap();
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.services["ebs"].driver_name("ebs"), "ebs");
    }
}
