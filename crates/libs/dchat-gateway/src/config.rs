use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use dchat_bus::Credentials;
use dchat_wire::session::RESERVED_KINDS;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::DmPolicy;

/// Per-account settings, keyed by account id under `[accounts.<id>]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccountConfig {
    pub enabled: bool,
    /// Hex wallet seed. Required for enabled accounts.
    pub seed: Option<String>,
    pub identifier: Option<String>,
    pub num_sub_clients: u32,
    pub seed_rpc_servers: Vec<String>,
    pub dm_policy: DmPolicy,
    pub allow_from: Vec<String>,
    /// Topic names (with or without `#`) subscribed after every connect.
    pub topics: Vec<String>,
    /// Subscription lifetime in blocks.
    pub subscribe_duration: u32,
    pub subscribe_fee: String,
    /// Longest outbound text message, in characters.
    pub text_chunk_limit: usize,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: None,
            identifier: None,
            num_sub_clients: 4,
            seed_rpc_servers: Vec::new(),
            dm_policy: DmPolicy::default(),
            allow_from: Vec::new(),
            topics: Vec::new(),
            subscribe_duration: 400_000,
            subscribe_fee: "0".to_string(),
            text_chunk_limit: 4000,
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
        }
    }
}

impl AccountConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            seed: self.seed.clone().unwrap_or_default(),
            identifier: self.identifier.clone(),
            num_sub_clients: self.num_sub_clients,
            seed_rpc_servers: self.seed_rpc_servers.clone(),
        }
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    fn validate(&self, id: &str) -> Result<(), ConfigError> {
        if id.is_empty() {
            return Err(ConfigError::invalid(id, "account id must not be empty"));
        }
        if id.contains(':') {
            return Err(ConfigError::invalid(id, "account id must not contain ':'"));
        }
        if RESERVED_KINDS.contains(&id) {
            return Err(ConfigError::invalid(id, "account id is reserved"));
        }
        if !self.enabled {
            return Ok(());
        }
        if self.seed.as_deref().map_or(true, |seed| seed.trim().is_empty()) {
            return Err(ConfigError::invalid(id, "enabled account needs a seed"));
        }
        if self.num_sub_clients == 0 {
            return Err(ConfigError::invalid(id, "num_sub_clients must be at least 1"));
        }
        if self.text_chunk_limit == 0 {
            return Err(ConfigError::invalid(id, "text_chunk_limit must be at least 1"));
        }
        if self.reconnect_initial_delay_ms > self.reconnect_max_delay_ms {
            return Err(ConfigError::invalid(
                id,
                "reconnect_initial_delay_ms exceeds reconnect_max_delay_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
}

impl GatewayConfig {
    /// Parse and validate.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.accounts.iter().try_for_each(|(id, account)| account.validate(id))
    }

    pub fn account(&self, id: &str) -> Result<&AccountConfig, ConfigError> {
        self.accounts.get(id).ok_or_else(|| ConfigError::UnknownAccount(id.to_string()))
    }

    pub fn enabled_accounts(&self) -> impl Iterator<Item = (&str, &AccountConfig)> {
        self.accounts
            .iter()
            .filter(|(_, account)| account.enabled)
            .map(|(id, account)| (id.as_str(), account))
    }
}
