//! Shared fixtures for unit tests: a scriptable in-memory connector and
//! helpers to seed a throwaway store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hub::{Application, Identity, Keyring, Metadata, Repository, Store, Ticket, Tracker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connector::{Connector, RefreshOutcome};
use crate::error::TrackerError;
use crate::registry::{ConnectorFactory, ConnectorRegistry};

pub const FAKE_KIND: &str = "fake";

pub fn keyring() -> Keyring {
    Keyring::new(&BASE64.encode([0u8; 32])).unwrap()
}

pub fn sample_tracker(kind: &str) -> Tracker {
    let identity = keyring()
        .seal_identity("jira-bot", "bot@example.com", "api-token")
        .unwrap();
    let mut tracker = Tracker::new(kind, "Jira", "https://example.atlassian.net", identity);
    tracker.id = 1;
    tracker
}

pub fn sample_ticket(id: i64) -> Ticket {
    let app = Application {
        id: 1,
        name: "inventory".to_string(),
    };
    let mut ticket = Ticket::new(1, app, "Epic", "MIG");
    ticket.id = id;
    ticket
}

/// Scripted behaviour and recorded calls, shared by every connector a
/// [`FakeConnector::factory`] builds.
#[derive(Default)]
pub struct FakeState {
    pub bound: Vec<i64>,
    pub test_calls: usize,
    pub metadata_calls: usize,
    pub create_calls: Vec<i64>,
    pub refresh_all_calls: usize,

    /// `Err` from test_connection
    pub test_error: Option<String>,
    /// `Ok(false)` from test_connection
    pub test_refused: bool,
    pub metadata: Metadata,
    pub metadata_error: Option<String>,
    pub create_error: Option<String>,
    pub batch_error: Option<String>,
    /// Remote issues: reference -> status
    pub remote: HashMap<String, String>,
    next_key: u32,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
    tracker: Option<Tracker>,
}

impl FakeConnector {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn factory(&self) -> ConnectorFactory {
        let state = Arc::clone(&self.state);
        Arc::new(move || {
            Box::new(FakeConnector {
                state: Arc::clone(&state),
                tracker: None,
            }) as Box<dyn Connector>
        })
    }

    /// Registry serving the fake under [`FAKE_KIND`].
    pub fn registry(&self) -> Arc<ConnectorRegistry> {
        let mut registry = ConnectorRegistry::new();
        registry.register(FAKE_KIND, self.factory());
        Arc::new(registry)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn kind(&self) -> &str {
        FAKE_KIND
    }

    fn bind(&mut self, tracker: Tracker) {
        self.state().bound.push(tracker.id);
        self.tracker = Some(tracker);
    }

    async fn create(&self, ticket: &mut Ticket) -> Result<()> {
        let mut state = self.state();
        state.create_calls.push(ticket.id);
        if let Some(message) = state.create_error.clone() {
            ticket.mark_failed(message.clone(), Utc::now());
            return Err(TrackerError::Create {
                ticket_id: ticket.id,
                message,
            }
            .into());
        }
        state.next_key += 1;
        let reference = format!("{}-{}", ticket.parent, state.next_key);
        state.remote.insert(reference.clone(), "To Do".to_string());
        let link = format!("https://fake.example/browse/{}", reference);
        ticket.mark_created(reference, link, Utc::now());
        Ok(())
    }

    async fn refresh(&self, ticket: &mut Ticket) -> Result<()> {
        let status = self.state().remote.get(&ticket.reference).cloned();
        match status {
            Some(status) => {
                ticket.mark_refreshed(status, Utc::now());
                Ok(())
            }
            None => {
                let message = format!("issue {} not found", ticket.reference);
                ticket.mark_failed(message.clone(), Utc::now());
                Err(TrackerError::Refresh {
                    ticket_id: ticket.id,
                    message,
                }
                .into())
            }
        }
    }

    async fn refresh_all(&self) -> Result<Vec<RefreshOutcome>> {
        let mut state = self.state();
        state.refresh_all_calls += 1;
        if let Some(message) = state.batch_error.clone() {
            return Err(anyhow!(message));
        }
        let tracker = self
            .tracker
            .as_ref()
            .ok_or_else(|| anyhow!("fake connector is not bound"))?;
        let now = Utc::now();
        Ok(tracker
            .created_tickets()
            .map(|t| {
                let mut ticket = t.clone();
                match state.remote.get(&ticket.reference) {
                    Some(status) => {
                        ticket.mark_refreshed(status.clone(), now);
                        RefreshOutcome::Found(ticket)
                    }
                    None => RefreshOutcome::Missing(ticket),
                }
            })
            .collect())
    }

    async fn get_metadata(&self) -> Result<Metadata> {
        let mut state = self.state();
        state.metadata_calls += 1;
        match state.metadata_error.clone() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(state.metadata.clone()),
        }
    }

    async fn test_connection(&self) -> Result<bool> {
        let mut state = self.state();
        state.test_calls += 1;
        match state.test_error.clone() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(!state.test_refused),
        }
    }
}

/// In-memory store with one identity and one application.
pub struct Seeded {
    pub store: Arc<Store>,
    pub identity: Identity,
    pub app: Application,
}

impl Seeded {
    pub fn new() -> Self {
        let store = Store::open(":memory:").unwrap();
        let mut identity = keyring()
            .seal_identity("jira-bot", "bot@example.com", "api-token")
            .unwrap();
        identity.id = store.insert_identity(&identity).unwrap();
        let app = store.insert_application("inventory").unwrap();
        Self {
            store: Arc::new(store),
            identity,
            app,
        }
    }

    pub fn tracker(&self, kind: &str, name: &str, connected: bool) -> Tracker {
        let mut tracker = Tracker::new(kind, name, "https://example.test", self.identity.clone());
        tracker.connected = connected;
        tracker.id = self.store.insert_tracker(&tracker).unwrap();
        tracker
    }

    pub fn pending_ticket(&self, tracker: &Tracker) -> Ticket {
        let mut ticket = Ticket::new(tracker.id, self.app.clone(), "Epic", "MIG");
        ticket.id = self.store.insert_ticket(&ticket).unwrap();
        ticket
    }

    pub fn created_ticket(&self, tracker: &Tracker, reference: &str) -> Ticket {
        let mut ticket = Ticket::new(tracker.id, self.app.clone(), "Epic", "MIG");
        ticket.mark_created(
            reference.to_string(),
            format!("https://example.test/browse/{}", reference),
            Utc::now(),
        );
        ticket.status = "To Do".to_string();
        ticket.id = self.store.insert_ticket(&ticket).unwrap();
        ticket
    }

    pub fn repo(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.store) as Arc<dyn Repository>
    }

    pub fn reload(&self, tracker_id: i64) -> Tracker {
        self.store.get_tracker(tracker_id).unwrap().unwrap()
    }
}

/// Reads through to a store but fails every write.
pub struct ReadOnlyRepository {
    pub inner: Arc<Store>,
}

impl Repository for ReadOnlyRepository {
    fn find_trackers(&self, connected: bool) -> Result<Vec<Tracker>> {
        self.inner.find_trackers(connected)
    }

    fn save_tracker(&self, _tracker: &Tracker) -> Result<()> {
        Err(anyhow!("database is read-only"))
    }

    fn save_ticket(&self, _ticket: &Ticket) -> Result<()> {
        Err(anyhow!("database is read-only"))
    }

    fn delete_ticket(&self, _ticket: &Ticket) -> Result<()> {
        Err(anyhow!("database is read-only"))
    }
}
