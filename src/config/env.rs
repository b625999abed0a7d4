use std::collections::BTreeMap;

use crate::error::ConfigError;

use super::tunnel::{DatasourceConfig, TunnelConfig};

/// Prefix of the per-backend connection variable; the upper-cased backend name follows.
pub const ENV_PREFIX: &str = "SSHDB_CLIENT_CONNECTION_";

impl TunnelConfig {
    /// Read `SSHDB_CLIENT_CONNECTION_<BACKEND>` into a one-datasource config.
    ///
    /// The value is `host:port,user,password,key_file,key_passphrase,server_pubkey_file,dsn`.
    pub fn from_env(backend_name: &str) -> Result<Self, ConfigError> {
        let var = format!("{ENV_PREFIX}{}", backend_name.to_uppercase());
        let value = std::env::var(&var)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingEnv(var))?;
        Ok(Self::from_env_value(backend_name, &value))
    }

    /// Parse the connection variable format. Missing trailing fields are empty
    /// and the dsn keeps any commas of its own.
    pub fn from_env_value(backend_name: &str, value: &str) -> Self {
        let mut parts = value.splitn(7, ',').map(str::to_string);
        let mut next = || parts.next().unwrap_or_default();
        let (hostport, user_id, pwd, client_key_file, client_key_pwd, server_public_key_file, dsn) =
            (next(), next(), next(), next(), next(), next(), next());

        let mut datasources = BTreeMap::new();
        datasources.insert(
            backend_name.to_string(),
            DatasourceConfig {
                driver_name: backend_name.to_string(),
                dsn,
            },
        );

        TunnelConfig {
            hostport,
            user_id,
            pwd,
            client_key_file,
            client_key_pwd,
            server_public_key_file,
            datasources,
            ..Default::default()
        }
    }
}
