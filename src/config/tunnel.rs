use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendRegistry;
use crate::error::{ConfigError, SshError};
use crate::ssh::{
    HostKeyPolicy, SshConfig, SshTransport, decode_private_key, load_private_key,
    load_public_key, parse_public_key,
};
use crate::tunnel::Tunnel;
use crate::validation::{split_host_port, validate_username};

use super::{Datasource, Datasources};

/// One named database reachable through a tunnel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasourceConfig {
    /// Name of a registered backend
    #[serde(alias = "backend")]
    pub driver_name: String,
    /// Backend-specific connection string
    pub dsn: String,
}

/// One SSH host and the datasources reached through it.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// `host:port`, `host%zone:port`, `[host]:port` or `[host%zone]:port`
    #[serde(default)]
    pub hostport: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pwd: String,
    /// Private key file. Mutually exclusive with `client_key`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_key_file: String,
    /// Inline PEM private key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_key_pwd: String,
    /// Server public key file. Mutually exclusive with `server_public_key`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_public_key_file: String,
    /// Server key in `authorized_keys` format. Without one, any host key is accepted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    /// Zero disables keepalives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_secs: Option<u64>,
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceConfig>,
}

impl std::fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(value: &str) -> &'static str {
            if value.is_empty() { "" } else { "[REDACTED]" }
        }
        f.debug_struct("TunnelConfig")
            .field("hostport", &self.hostport)
            .field("user_id", &self.user_id)
            .field("pwd", &redact(&self.pwd))
            .field("client_key_file", &self.client_key_file)
            .field("client_key", &redact(&self.client_key))
            .field("client_key_pwd", &redact(&self.client_key_pwd))
            .field("server_public_key_file", &self.server_public_key_file)
            .field("server_public_key", &self.server_public_key)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("datasources", &self.datasources)
            .finish()
    }
}

impl TunnelConfig {
    /// Load a single tunnel definition from a `.yaml`, `.yml`, `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        super::load_file(path)
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

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            addr: self.hostport.clone(),
            reason: reason.into(),
        }
    }

    /// Check the definition without touching the network or key files.
    pub fn validate(&self, registry: &BackendRegistry) -> Result<(), ConfigError> {
        if self.hostport.trim().is_empty() {
            return Err(self.invalid("address may not be blank"));
        }
        split_host_port(self.hostport.trim()).map_err(|e| self.invalid(e.message))?;
        validate_username(self.user_id.trim()).map_err(|e| self.invalid(e.message))?;
        if self.pwd.is_empty() && self.client_key.is_empty() && self.client_key_file.is_empty() {
            return Err(self.invalid("no authenticate methods specified"));
        }
        if !self.client_key.is_empty() && !self.client_key_file.is_empty() {
            return Err(self.invalid("may not specify a key and a key file"));
        }
        if !self.server_public_key.is_empty() && !self.server_public_key_file.is_empty() {
            return Err(self.invalid(
                "may not specify a server public key and a server public key file",
            ));
        }
        if self.datasources.is_empty() {
            return Err(self.invalid("at least one datasource must be specified"));
        }

        for (name, ds) in &self.datasources {
            if registry.get(&ds.driver_name).is_none() {
                return Err(ConfigError::UnknownBackend {
                    addr: self.hostport.clone(),
                    datasource: name.clone(),
                    backend: ds.driver_name.clone(),
                });
            }
            if ds.dsn.trim().is_empty() {
                return Err(self.invalid(format!("datasource '{name}': dsn may not be blank")));
            }
        }
        Ok(())
    }

    /// Build the SSH client configuration, reading any key files.
    pub fn ssh_config(&self) -> Result<SshConfig, ConfigError> {
        let key_err = |source: SshError| ConfigError::Key {
            addr: self.hostport.clone(),
            source,
        };

        let host_key = if !self.server_public_key.is_empty() {
            HostKeyPolicy::Fixed(parse_public_key(&self.server_public_key).map_err(key_err)?)
        } else if !self.server_public_key_file.is_empty() {
            let path = expand_tilde(&self.server_public_key_file);
            HostKeyPolicy::Fixed(load_public_key(&path).map_err(key_err)?)
        } else {
            tracing::warn!(
                address = %self.hostport,
                "No server public key configured; host key will not be verified"
            );
            HostKeyPolicy::InsecureIgnore
        };

        let mut cfg = SshConfig::new(self.user_id.trim(), host_key);
        if !self.pwd.is_empty() {
            cfg = cfg.with_password(self.pwd.clone());
        }

        let passphrase = Some(self.client_key_pwd.as_str()).filter(|p| !p.is_empty());
        if !self.client_key.is_empty() {
            cfg = cfg.with_private_key(decode_private_key(&self.client_key, passphrase).map_err(key_err)?);
        } else if !self.client_key_file.is_empty() {
            let path = expand_tilde(&self.client_key_file);
            cfg = cfg.with_private_key(load_private_key(&path, passphrase).map_err(key_err)?);
        }

        if let Some(secs) = self.connect_timeout_secs {
            cfg = cfg.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.keepalive_secs {
            cfg = cfg.with_keepalive_interval(Duration::from_secs(secs));
        }
        Ok(cfg)
    }

    /// Validate, build one tunnel per backend used and one connector per datasource.
    ///
    /// Nothing is dialed. On error no datasources are returned.
    pub fn open(&self, registry: &BackendRegistry) -> Result<Datasources, ConfigError> {
        self.open_with_transport(registry, None)
    }

    /// [`TunnelConfig::open`] with a custom SSH transport.
    pub fn open_with_transport(
        &self,
        registry: &BackendRegistry,
        transport: Option<Arc<dyn SshTransport>>,
    ) -> Result<Datasources, ConfigError> {
        self.validate(registry)?;
        let ssh_config = Arc::new(self.ssh_config()?);
        let address = self.hostport.trim();

        let mut tunnels: BTreeMap<&str, Tunnel> = BTreeMap::new();
        let mut datasources = Datasources::default();

        for (name, ds) in &self.datasources {
            let tunnel = match tunnels.get(ds.driver_name.as_str()) {
                Some(tunnel) => tunnel.clone(),
                None => {
                    let backend = registry.get(&ds.driver_name).ok_or_else(|| {
                        ConfigError::UnknownBackend {
                            addr: self.hostport.clone(),
                            datasource: name.clone(),
                            backend: ds.driver_name.clone(),
                        }
                    })?;
                    let mut builder = Tunnel::builder()
                        .backend(backend)
                        .ssh_config(Arc::clone(&ssh_config))
                        .address(address);
                    if let Some(transport) = &transport {
                        builder = builder.transport(Arc::clone(transport));
                    }
                    let tunnel = builder.build().map_err(|source| ConfigError::Tunnel {
                        addr: self.hostport.clone(),
                        source,
                    })?;
                    tunnels.insert(ds.driver_name.as_str(), tunnel.clone());
                    datasources.tunnels.push(tunnel.clone());
                    tunnel
                }
            };

            let connector = tunnel
                .open_connector(&ds.dsn)
                .map_err(|source| ConfigError::Connector {
                    addr: self.hostport.clone(),
                    datasource: name.clone(),
                    source,
                })?;

            datasources.entries.push(Datasource {
                name: name.clone(),
                address: address.to_string(),
                connector,
                tunnel,
            });
        }

        tracing::debug!(
            address = %address,
            tunnels = datasources.tunnels.len(),
            datasources = datasources.entries.len(),
            "Opened tunnel config"
        );
        Ok(datasources)
    }
}

/// Expand a leading `~/` against the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Platform home directory, falling back to `HOME`.
fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
}
