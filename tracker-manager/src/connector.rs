use anyhow::Result;
use async_trait::async_trait;
use hub::{Metadata, Ticket, Tracker};

/// Result of a batch status pull for one ticket.
///
/// Carries an owned copy of the ticket: `Found` with status and
/// `last_updated` refreshed, `Missing` unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshOutcome {
    /// The reference still resolves remotely.
    Found(Ticket),
    /// The reference no longer resolves; the local record should go.
    Missing(Ticket),
}

impl RefreshOutcome {
    pub fn ticket(&self) -> &Ticket {
        match self {
            RefreshOutcome::Found(t) | RefreshOutcome::Missing(t) => t,
        }
    }
}

/// Adapter for one kind of external issue tracker.
///
/// A connector is constructed by the [`ConnectorRegistry`](crate::registry::ConnectorRegistry)
/// and bound to a single tracker before use. Every remote operation decrypts
/// the tracker's identity first, so credential failures surface as operation
/// failures.
///
/// # Outcome encoding
/// `create` and `refresh` record their outcome on the ticket itself
/// (`mark_created` / `mark_refreshed` on success, `mark_failed` on failure)
/// and additionally return the failure so callers can log it. A ticket is
/// never left half-updated.
///
/// # Example
/// ```no_run
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use hub::{Metadata, Ticket, Tracker};
/// use tracker_manager::{Connector, RefreshOutcome};
///
/// struct NullConnector {
///     tracker: Option<Tracker>,
/// }
///
/// #[async_trait]
/// impl Connector for NullConnector {
///     fn kind(&self) -> &str {
///         "null"
///     }
///     fn bind(&mut self, tracker: Tracker) {
///         self.tracker = Some(tracker);
///     }
///     async fn create(&self, ticket: &mut Ticket) -> Result<()> {
///         ticket.mark_created("NULL-1".into(), "about:blank".into(), chrono::Utc::now());
///         Ok(())
///     }
///     async fn refresh(&self, ticket: &mut Ticket) -> Result<()> {
///         ticket.mark_refreshed("Open".into(), chrono::Utc::now());
///         Ok(())
///     }
///     async fn refresh_all(&self) -> Result<Vec<RefreshOutcome>> {
///         Ok(vec![])
///     }
///     async fn get_metadata(&self) -> Result<Metadata> {
///         Ok(Metadata::default())
///     }
///     async fn test_connection(&self) -> Result<bool> {
///         Ok(true)
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Tracker kind this connector serves (e.g. "jira-cloud").
    fn kind(&self) -> &str;

    /// Associates the connector with one tracker's configuration,
    /// credentials and tickets. No remote call is made.
    fn bind(&mut self, tracker: Tracker);

    /// Pushes a not-yet-created ticket to the external tracker.
    ///
    /// On success: created, reference and link set, error cleared.
    /// On failure: error and message set, `created` stays false.
    async fn create(&self, ticket: &mut Ticket) -> Result<()>;

    /// Pulls current status for one created ticket. Never resets `created`.
    async fn refresh(&self, ticket: &mut Ticket) -> Result<()>;

    /// Pulls status for every created ticket of the bound tracker in one
    /// batch query keyed by reference.
    ///
    /// A transport-level failure returns only the error; callers must not
    /// mutate any ticket in that case.
    async fn refresh_all(&self) -> Result<Vec<RefreshOutcome>>;

    /// Fetches the vendor capability description (projects, issue types).
    async fn get_metadata(&self) -> Result<Metadata>;

    /// Cheap reachability and authentication check.
    async fn test_connection(&self) -> Result<bool>;
}
