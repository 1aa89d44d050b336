//! Jira connector (Cloud, Server and Data Center).
//!
//! Cloud authenticates with user + API token. Server and Data Center accept
//! a personal access token in the password field when no user is set.

mod api;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use hub::model::{IssueType, Project};
use hub::{Keyring, Metadata, Ticket, Tracker};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::connector::{Connector, RefreshOutcome};
use crate::error::TrackerError;
use api::{JiraAuth, JiraClient};

/// Deployment flavour, which decides the auth scheme and the search and
/// metadata endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JiraFlavor {
    Cloud,
    Server,
}

pub struct JiraConnector {
    kind: &'static str,
    flavor: JiraFlavor,
    keyring: Arc<Keyring>,
    timeout: Duration,
    tracker: Option<Tracker>,
}

impl JiraConnector {
    pub fn new(
        kind: &'static str,
        flavor: JiraFlavor,
        keyring: Arc<Keyring>,
        timeout: Duration,
    ) -> Self {
        Self {
            kind,
            flavor,
            keyring,
            timeout,
            tracker: None,
        }
    }

    fn tracker(&self) -> Result<&Tracker> {
        self.tracker
            .as_ref()
            .ok_or_else(|| anyhow!("Jira connector is not bound to a tracker"))
    }

    /// Decrypts the identity and builds a client for the bound tracker.
    fn client(&self) -> Result<JiraClient> {
        let tracker = self.tracker()?;
        let creds = self.keyring.decrypt(&tracker.identity)?;
        let auth = match self.flavor {
            JiraFlavor::Server if creds.user.is_empty() => JiraAuth::Bearer(creds.password),
            _ => JiraAuth::Basic {
                user: creds.user,
                password: creds.password,
            },
        };
        JiraClient::new(&tracker.url, auth, self.flavor, self.timeout)
    }

    fn browse_link(&self, key: &str) -> Result<String> {
        let tracker = self.tracker()?;
        Ok(format!("{}/browse/{}", tracker.url.trim_end_matches('/'), key))
    }

    async fn try_create(&self, ticket: &Ticket) -> Result<(String, String)> {
        let client = self.client()?;
        let issue = client.create_issue(issue_fields(ticket)).await?;
        if issue.key.is_empty() {
            return Err(anyhow!("Jira returned issue {} without a key", issue.id));
        }
        let link = self.browse_link(&issue.key)?;
        Ok((issue.key, link))
    }

    async fn try_refresh(&self, reference: &str) -> Result<Option<String>> {
        if reference.is_empty() {
            return Err(anyhow!("ticket has no reference"));
        }
        let client = self.client()?;
        let issue = client.get_issue(reference).await?;
        Ok(issue.status_name().map(str::to_string))
    }
}

/// Builds the create payload.
///
/// Summary and description defaults may be overridden by the ticket's own
/// fields; project and issue type always come from the ticket columns.
fn issue_fields(ticket: &Ticket) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        "summary".to_string(),
        json!(format!("Migrate {}", ticket.application.name)),
    );
    fields.insert(
        "description".to_string(),
        json!(format!(
            "Migration of application {} raised by the migration hub.",
            ticket.application.name
        )),
    );
    if let Value::Object(extra) = &ticket.fields {
        for (name, value) in extra {
            fields.insert(name.clone(), value.clone());
        }
    }
    fields.insert("project".to_string(), json!({ "key": ticket.parent }));
    fields.insert("issuetype".to_string(), json!({ "name": ticket.kind }));
    fields
}

#[async_trait]
impl Connector for JiraConnector {
    fn kind(&self) -> &str {
        self.kind
    }

    fn bind(&mut self, tracker: Tracker) {
        self.tracker = Some(tracker);
    }

    async fn create(&self, ticket: &mut Ticket) -> Result<()> {
        match self.try_create(ticket).await {
            Ok((reference, link)) => {
                debug!(ticket_id = ticket.id, reference = %reference, "Jira issue created");
                ticket.mark_created(reference, link, Utc::now());
                Ok(())
            }
            Err(e) => {
                let message = TrackerError::describe(&e);
                ticket.mark_failed(message.clone(), Utc::now());
                Err(TrackerError::Create {
                    ticket_id: ticket.id,
                    message,
                }
                .into())
            }
        }
    }

    async fn refresh(&self, ticket: &mut Ticket) -> Result<()> {
        match self.try_refresh(&ticket.reference).await {
            Ok(status) => {
                let status = status.unwrap_or_else(|| ticket.status.clone());
                ticket.mark_refreshed(status, Utc::now());
                Ok(())
            }
            Err(e) => {
                let message = TrackerError::describe(&e);
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
        let tracker = self.tracker()?;
        let created: Vec<&Ticket> = tracker.created_tickets().collect();
        if created.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.client()?;
        let keys: Vec<String> = created.iter().map(|t| t.reference.clone()).collect();
        let issues = client.search_keys(&keys).await?;

        let statuses: HashMap<String, Option<String>> = issues
            .into_iter()
            .map(|issue| {
                let status = issue.status_name().map(str::to_string);
                (issue.key, status)
            })
            .collect();

        // A key absent from the search may belong to a moved issue, which the
        // search returns under its new key. Only a 404 on the old key counts
        // as gone; any other lookup error fails the whole batch.
        let now = Utc::now();
        let mut outcomes = Vec::with_capacity(created.len());
        for t in created {
            let mut ticket = t.clone();
            let status = match statuses.get(&ticket.reference) {
                Some(status) => Some(status.clone()),
                None => client
                    .find_issue(&ticket.reference)
                    .await?
                    .map(|issue| {
                        debug!(
                            ticket_id = ticket.id,
                            reference = %ticket.reference,
                            key = %issue.key,
                            "Jira issue found under another key"
                        );
                        issue.status_name().map(str::to_string)
                    }),
            };
            match status {
                Some(status) => {
                    let status = status.unwrap_or_else(|| ticket.status.clone());
                    ticket.mark_refreshed(status, now);
                    outcomes.push(RefreshOutcome::Found(ticket));
                }
                None => outcomes.push(RefreshOutcome::Missing(ticket)),
            }
        }

        Ok(outcomes)
    }

    async fn get_metadata(&self) -> Result<Metadata> {
        let projects = self
            .client()?
            .projects()
            .await?
            .into_iter()
            .map(|p| Project {
                id: p.id,
                key: p.key,
                name: p.name,
                issue_types: p
                    .issuetypes
                    .into_iter()
                    .map(|t| IssueType {
                        id: t.id,
                        name: t.name,
                    })
                    .collect(),
            })
            .collect();
        Ok(Metadata { projects })
    }

    async fn test_connection(&self) -> Result<bool> {
        let user = self.client()?.myself().await?;
        debug!(
            tracker = %self.tracker()?.name,
            user = user.display_name.as_deref().unwrap_or("unknown"),
            "Jira connection verified"
        );
        Ok(true)
    }
}
