use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::{Gateway, GatewayError};

/// Gateways of the logged-in accounts, keyed by account name.
///
/// Cloning yields another handle onto the same set of connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    gateways: Arc<RwLock<HashMap<String, Arc<dyn Gateway>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the gateway for `account`, returning the one it replaces.
    pub async fn register(
        &self,
        account: impl Into<String>,
        gateway: Arc<dyn Gateway>,
    ) -> Option<Arc<dyn Gateway>> {
        let account = account.into();
        info!(account = %account, gateway = gateway.name(), "account connected");
        self.gateways.write().await.insert(account, gateway)
    }

    pub async fn get(&self, account: &str) -> Result<Arc<dyn Gateway>, GatewayError> {
        self.gateways
            .read()
            .await
            .get(account)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownAccount(account.to_string()))
    }

    /// Forgets `account`. In-flight transfers keep their own handle.
    pub async fn remove(&self, account: &str) -> Option<Arc<dyn Gateway>> {
        let removed = self.gateways.write().await.remove(account);
        if removed.is_some() {
            info!(account, "account disconnected");
        }
        removed
    }

    /// Registered account names, sorted.
    pub async fn accounts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gateways.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn clear(&self) {
        self.gateways.write().await.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.gateways.read().await.is_empty()
    }
}
