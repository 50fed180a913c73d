//! Per-provider client pool.
//!
//! Workers share one client per provider id, so HTTP connection pools and
//! per-client state are reused across jobs. Configuration changes are picked
//! up by invalidating the affected entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::LlmError;
use crate::store::LlmProviderConfig;

use super::client::LlmProvider;
use super::registry;

/// Pool of LLM clients keyed by provider id.
#[derive(Default)]
pub struct ClientPool {
    clients: RwLock<HashMap<i64, Arc<dyn LlmProvider>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached client for a provider, building one on first use.
    ///
    /// # Errors
    ///
    /// Propagates the registry's construction error for unknown provider
    /// types or invalid configuration.
    pub fn get_or_create(
        &self,
        config: &LlmProviderConfig,
    ) -> Result<Arc<dyn LlmProvider>, LlmError> {
        if let Ok(clients) = self.clients.read() {
            if let Some(client) = clients.get(&config.id) {
                return Ok(Arc::clone(client));
            }
        }

        let client = registry::create_client(config)?;

        if let Ok(mut clients) = self.clients.write() {
            // Another worker may have built one concurrently; keep the first.
            let entry = clients
                .entry(config.id)
                .or_insert_with(|| Arc::clone(&client));
            debug!(provider_id = config.id, "LLM client pooled");
            return Ok(Arc::clone(entry));
        }

        Ok(client)
    }

    /// Drops the cached client for a provider, forcing a rebuild on next use.
    pub fn invalidate(&self, provider_id: i64) {
        if let Ok(mut clients) = self.clients.write() {
            clients.remove(&provider_id);
        }
    }

    /// Drops all cached clients.
    pub fn clear(&self) {
        if let Ok(mut clients) = self.clients.write() {
            clients.clear();
        }
    }

    /// Number of pooled clients.
    pub fn len(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
