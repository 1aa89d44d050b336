//! Tracker and ticket records shared by the store and the reconciliation engine.
//!
//! A [`Tracker`] is one configured external issue tracker; it owns the
//! [`Ticket`]s mirrored into it. Only the reconciliation engine mutates the
//! connection fields of a tracker and the remote-state fields of a ticket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::Sealed;

mod metadata;


pub use metadata::{IssueType, Metadata, Project};

/// Jira Cloud (basic auth with an API token).
pub const JIRA_CLOUD: &str = "jira-cloud";
/// Self-hosted Jira Server.
pub const JIRA_SERVER: &str = "jira-server";
/// Self-hosted Jira Data Center.
pub const JIRA_DATACENTER: &str = "jira-datacenter";

/// Message recorded when a failure carries no text of its own.
const UNKNOWN_FAILURE: &str = "unknown failure";

/// Credential reference owned by the credential store.
///
/// User and password are kept sealed; see [`crate::credentials::Keyring::decrypt`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub user: Sealed,
    pub password: Sealed,
}

/// Application a ticket is raised for.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub name: String,
}

/// One external tracker instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tracker {
    pub id: i64,
    /// Selects the connector implementation (e.g. "jira-cloud")
    pub kind: String,
    pub name: String,
    /// Base URL of the tracker
    pub url: String,
    pub identity: Identity,
    /// Opaque vendor capability document, `null` until first connection
    pub metadata: Value,
    /// Last connection error, empty when connected
    pub message: String,
    pub connected: bool,
    /// Time of the last connection attempt
    pub last_updated: Option<DateTime<Utc>>,
    /// Tickets owned by this tracker (eager-loaded by the store)
    #[serde(default)]
    pub tickets: Vec<Ticket>,
}

impl Tracker {
    /// Creates a disconnected tracker that has never been attempted.
    pub fn new(kind: &str, name: &str, url: &str, identity: Identity) -> Self {
        Self {
            id: 0,
            kind: kind.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            identity,
            metadata: Value::Null,
            message: String::new(),
            connected: false,
            last_updated: None,
            tickets: Vec::new(),
        }
    }

    /// Returns true when a reconnect may be attempted at `now`.
    ///
    /// Connected trackers are never due; disconnected ones are due once
    /// `backoff` has elapsed since the last attempt.
    pub fn reconnect_due(&self, now: DateTime<Utc>, backoff: chrono::Duration) -> bool {
        if self.connected {
            return false;
        }
        match self.last_updated {
            Some(last) => now - last >= backoff,
            None => true,
        }
    }

    /// Tickets not yet pushed to the external tracker.
    pub fn pending_tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.iter().filter(|t| !t.created)
    }

    /// Tickets that exist remotely and can be refreshed by reference.
    pub fn created_tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets
            .iter()
            .filter(|t| t.created && !t.reference.is_empty())
    }
}

/// One work item mirrored into an external tracker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    /// Vendor issue type name
    pub kind: String,
    /// Vendor project/container key
    pub parent: String,
    /// Extra fields forwarded verbatim on creation
    pub fields: Value,
    /// Whether the ticket exists in the external tracker
    pub created: bool,
    /// Vendor-assigned key, empty until created
    pub reference: String,
    /// Vendor URL, empty until created
    pub link: String,
    /// Vendor workflow state, empty until first refresh
    pub status: String,
    /// Whether the last remote operation failed
    pub error: bool,
    pub message: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub tracker_id: i64,
    pub application: Application,
}

impl Ticket {
    /// Creates a ticket in the not-yet-created state.
    pub fn new(tracker_id: i64, application: Application, kind: &str, parent: &str) -> Self {
        Self {
            id: 0,
            kind: kind.to_string(),
            parent: parent.to_string(),
            fields: Value::Object(Default::default()),
            created: false,
            reference: String::new(),
            link: String::new(),
            status: String::new(),
            error: false,
            message: String::new(),
            last_updated: None,
            tracker_id,
            application,
        }
    }

    /// Records a successful remote creation.
    pub fn mark_created(&mut self, reference: String, link: String, now: DateTime<Utc>) {
        self.created = true;
        self.error = false;
        self.message.clear();
        self.reference = reference;
        self.link = link;
        self.last_updated = Some(now);
    }

    /// Records a failed remote interaction. Leaves `created` and `reference` alone.
    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        let message = message.into();
        self.error = true;
        self.message = if message.trim().is_empty() {
            UNKNOWN_FAILURE.to_string()
        } else {
            message
        };
        self.last_updated = Some(now);
    }

    /// Records fresh remote status.
    pub fn mark_refreshed(&mut self, status: String, now: DateTime<Utc>) {
        self.status = status;
        self.error = false;
        self.message.clear();
        self.last_updated = Some(now);
    }
}
