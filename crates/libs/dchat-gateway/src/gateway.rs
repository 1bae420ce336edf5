use std::collections::HashMap;
use std::sync::Arc;

use dchat_bus::RelayConnector;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collab::{PairingStore, ReplyDispatcher};
use crate::config::GatewayConfig;
use crate::error::ConfigError;
use crate::session::AccountSession;

/// Host-provided capabilities shared by every account.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn RelayConnector>,
    pub pairing: Arc<dyn PairingStore>,
    pub dispatcher: Arc<dyn ReplyDispatcher>,
}

struct RunningAccount {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Supervises one [`AccountSession`] task per started account. Accounts
/// share nothing but the collaborators.
pub struct Gateway {
    config: GatewayConfig,
    collaborators: Collaborators,
    running: HashMap<String, RunningAccount>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, collaborators, running: HashMap::new() })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Spawn the session for `account_id`. Starting a running account is a
    /// no-op; a disabled one is an error.
    pub fn start_account(&mut self, account_id: &str) -> Result<(), ConfigError> {
        let account = self.config.account(account_id)?;
        if !account.enabled {
            return Err(ConfigError::invalid(account_id, "account is disabled"));
        }
        if self.running.get(account_id).is_some_and(|running| !running.task.is_finished()) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let session = AccountSession::new(account_id, account.clone(), &self.collaborators);
        let task = tokio::spawn(session.run(cancel.clone()));
        self.running.insert(account_id.to_string(), RunningAccount { cancel, task });
        log::info!("gateway: started account {account_id}");
        Ok(())
    }

    /// Start every enabled account; returns how many were started.
    pub fn start_all(&mut self) -> usize {
        let ids: Vec<String> =
            self.config.enabled_accounts().map(|(id, _)| id.to_string()).collect();
        let mut started = 0;
        for id in &ids {
            match self.start_account(id) {
                Ok(()) => started += 1,
                Err(err) => log::warn!("gateway: failed to start account {id}: {err}"),
            }
        }
        started
    }

    /// Cancel the account's session and wait for it to finish. Returns
    /// `false` if it was not running.
    pub async fn stop_account(&mut self, account_id: &str) -> bool {
        let Some(running) = self.running.remove(account_id) else {
            return false;
        };
        running.cancel.cancel();
        if let Err(err) = running.task.await {
            log::error!("gateway: account {account_id} task failed: {err}");
        }
        log::info!("gateway: stopped account {account_id}");
        true
    }

    pub async fn stop_all(&mut self) {
        let ids: Vec<String> = self.running.keys().cloned().collect();
        for id in ids {
            self.stop_account(&id).await;
        }
    }

    pub fn is_running(&self, account_id: &str) -> bool {
        self.running.get(account_id).is_some_and(|running| !running.task.is_finished())
    }

    pub fn running_accounts(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.running.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        for running in self.running.values() {
            running.cancel.cancel();
        }
    }
}
