//! Declarative tunnel configuration.
//!
//! A [`Config`] lists SSH hosts ([`TunnelConfig`]), each with named
//! datasources. Opening it yields [`Datasources`]: one cached connector per
//! datasource, sharing one tunnel per host and backend.

mod env;
mod tunnel;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendRegistry, Connection, Connector};
use crate::error::{ConfigError, TunnelError};
use crate::ssh::SshTransport;
use crate::tunnel::{CachedConnector, Tunnel};

pub use env::ENV_PREFIX;
pub use tunnel::{DatasourceConfig, TunnelConfig};

/// Read and parse a config file, picking the format from its extension.
fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    tracing::debug!("Loading config from: {:?}", path);

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
        Some("json") => Ok(serde_json::from_str(&content)?),
        Some("toml") => Ok(toml::from_str(&content)?),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// A list of tunnel definitions.
///
/// YAML and JSON files may hold a bare list; any format accepts a table with
/// a `tunnels` list (the only shape TOML allows).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ConfigRepr")]
pub struct Config {
    pub tunnels: Vec<TunnelConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigRepr {
    List(Vec<TunnelConfig>),
    Table { tunnels: Vec<TunnelConfig> },
}

impl From<ConfigRepr> for Config {
    fn from(repr: ConfigRepr) -> Self {
        match repr {
            ConfigRepr::List(tunnels) | ConfigRepr::Table { tunnels } => Config { tunnels },
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_file(path)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// `"<hostport>: <datasource>"` for every datasource, in the order
    /// [`Config::open`] returns them.
    pub fn describe(&self) -> Vec<String> {
        self.tunnels
            .iter()
            .flat_map(|tc| {
                tc.datasources
                    .keys()
                    .map(move |name| format!("{}: {}", tc.hostport, name))
            })
            .collect()
    }

    fn check_unique_names(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for name in self.tunnels.iter().flat_map(|tc| tc.datasources.keys()) {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateDatasource(name.clone()));
            }
        }
        Ok(())
    }

    /// Open every tunnel config. Either all datasources are returned or none.
    pub fn open(&self, registry: &BackendRegistry) -> Result<Datasources, ConfigError> {
        self.open_with_transport(registry, None)
    }

    pub fn open_with_transport(
        &self,
        registry: &BackendRegistry,
        transport: Option<Arc<dyn SshTransport>>,
    ) -> Result<Datasources, ConfigError> {
        self.check_unique_names()?;
        let mut all = Datasources::default();
        for tc in &self.tunnels {
            let opened = tc.open_with_transport(registry, transport.clone())?;
            all.tunnels.extend(opened.tunnels);
            all.entries.extend(opened.entries);
        }
        Ok(all)
    }
}

/// A configured datasource: its cached connector and the tunnel behind it.
#[derive(Clone)]
pub struct Datasource {
    name: String,
    address: String,
    connector: Arc<CachedConnector>,
    tunnel: Tunnel,
}

impl Datasource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn backend_name(&self) -> &str {
        self.tunnel.backend_name()
    }

    pub fn connector(&self) -> Arc<CachedConnector> {
        Arc::clone(&self.connector)
    }

    pub fn tunnel(&self) -> &Tunnel {
        &self.tunnel
    }

    /// Open a connection that cannot be cancelled.
    pub async fn connect(&self) -> Result<Box<dyn Connection>, TunnelError> {
        self.connector
            .connect(&tokio_util::sync::CancellationToken::new())
            .await
    }
}

impl std::fmt::Debug for Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("backend", &self.backend_name())
            .finish()
    }
}

/// Datasources opened from a config.
#[derive(Debug, Default)]
pub struct Datasources {
    tunnels: Vec<Tunnel>,
    entries: Vec<Datasource>,
}

impl Datasources {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Datasource> {
        self.entries.iter().find(|ds| ds.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Datasource> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|ds| ds.name.as_str()).collect()
    }

    /// Distinct tunnels, one per host and backend.
    pub fn tunnels(&self) -> &[Tunnel] {
        &self.tunnels
    }

    /// Close every tunnel concurrently, returning the first error after trying them all.
    pub async fn close(&self) -> Result<(), TunnelError> {
        let results = join_all(self.tunnels.iter().map(|tunnel| tunnel.close())).await;

        let mut first_err = None;
        for (tunnel, result) in self.tunnels.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(address = %tunnel.address(), "Closing tunnel failed: {}", e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
