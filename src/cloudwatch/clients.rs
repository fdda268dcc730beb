//! Per-cycle cache of regional CloudWatch clients.

use crate::cloudwatch::{CloudWatchApi, Session};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Memoizes one client per region for the duration of a collection cycle.
pub struct RegionalClients {
    session: Arc<dyn Session>,
    clients: HashMap<String, Arc<dyn CloudWatchApi>>,
}

impl RegionalClients {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            clients: HashMap::new(),
        }
    }

    /// Get the client for `region`, creating it on first use.
    pub fn get(&mut self, region: &str) -> Arc<dyn CloudWatchApi> {
        if let Some(client) = self.clients.get(region) {
            return Arc::clone(client);
        }

        debug!(region = %region, "creating regional CloudWatch client");
        let client = self.session.client(region);
        self.clients.insert(region.to_string(), Arc::clone(&client));
        client
    }

    /// Drop every memoized client.
    pub fn reset(&mut self) {
        self.clients.clear();
    }

    /// Number of memoized clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
