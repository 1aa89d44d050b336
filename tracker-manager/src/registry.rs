//! Connector registry - selects a connector implementation by tracker kind.
//!
//! Built-in kinds are registered by [`ConnectorRegistry::with_builtin`];
//! anything else can be added with [`ConnectorRegistry::register`]. Unknown
//! kinds fail with [`TrackerError::NotImplemented`] rather than doing nothing.

use crate::connectors::jira::{JiraConnector, JiraFlavor};
use crate::error::TrackerError;
use crate::Connector;
use hub::config::ConnectorConfig;
use hub::model::{JIRA_CLOUD, JIRA_DATACENTER, JIRA_SERVER};
use hub::{Keyring, Tracker};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an unbound connector.
pub type ConnectorFactory = Arc<dyn Fn() -> Box<dyn Connector> + Send + Sync>;

/// Maps tracker kinds to connector factories.
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the Jira connectors registered.
    pub fn with_builtin(keyring: Arc<Keyring>, config: &ConnectorConfig) -> Self {
        let mut registry = Self::new();
        let timeout = config.request_timeout();

        for (kind, flavor) in [
            (JIRA_CLOUD, JiraFlavor::Cloud),
            (JIRA_SERVER, JiraFlavor::Server),
            (JIRA_DATACENTER, JiraFlavor::Server),
        ] {
            let keyring = Arc::clone(&keyring);
            registry.register(
                kind,
                Arc::new(move || {
                    Box::new(JiraConnector::new(kind, flavor, Arc::clone(&keyring), timeout))
                        as Box<dyn Connector>
                }),
            );
        }

        registry
    }

    /// Registers (or replaces) the factory for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: ConnectorFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Constructs a connector for the tracker's kind, bound to the tracker.
    pub fn resolve(&self, tracker: &Tracker) -> Result<Box<dyn Connector>, TrackerError> {
        let factory = self
            .factories
            .get(&tracker.kind)
            .ok_or_else(|| TrackerError::NotImplemented(tracker.kind.clone()))?;
        let mut connector = factory();
        connector.bind(tracker.clone());
        Ok(connector)
    }
}
