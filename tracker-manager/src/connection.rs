//! Reconnect phase: revalidates disconnected trackers once their backoff
//! has elapsed and refreshes their metadata.

use chrono::Utc;
use hub::{Repository, Tracker};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connector::Connector;
use crate::error::TrackerError;
use crate::registry::ConnectorRegistry;

/// Message recorded when a connection test answers "no" without an error.
const CONNECTION_REFUSED: &str = "connection test failed";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectStats {
    /// Trackers whose backoff had elapsed and were tested
    pub attempted: usize,
    pub connected: usize,
    pub failed: usize,
    /// Trackers of a kind with no connector
    pub skipped: usize,
}

pub struct ConnectionManager {
    repo: Arc<dyn Repository>,
    registry: Arc<ConnectorRegistry>,
    backoff: chrono::Duration,
}

impl ConnectionManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        registry: Arc<ConnectorRegistry>,
        backoff: chrono::Duration,
    ) -> Self {
        Self {
            repo,
            registry,
            backoff,
        }
    }

    /// Attempts every disconnected tracker that is due.
    ///
    /// Each attempt is persisted with `last_updated` set, so a failing
    /// tracker is retried no sooner than one backoff later.
    pub async fn run(&self) -> ReconnectStats {
        let mut stats = ReconnectStats::default();

        let trackers = match self.repo.find_trackers(false) {
            Ok(trackers) => trackers,
            Err(e) => {
                let err = TrackerError::Persistence(TrackerError::describe(&e));
                warn!(error = %err, "Failed to load disconnected trackers");
                return stats;
            }
        };

        let now = Utc::now();
        for mut tracker in trackers
            .into_iter()
            .filter(|t| t.reconnect_due(now, self.backoff))
        {
            let connector = match self.registry.resolve(&tracker) {
                Ok(connector) => connector,
                Err(e) => {
                    debug!(
                        tracker_id = tracker.id,
                        tracker = %tracker.name,
                        error = %e,
                        "Skipping tracker"
                    );
                    stats.skipped += 1;
                    continue;
                }
            };

            stats.attempted += 1;
            if self.reconnect(&mut tracker, connector.as_ref()).await {
                stats.connected += 1;
            } else {
                stats.failed += 1;
            }

            if let Err(e) = self.repo.save_tracker(&tracker) {
                let err = TrackerError::Persistence(TrackerError::describe(&e));
                warn!(
                    tracker_id = tracker.id,
                    tracker = %tracker.name,
                    error = %err,
                    "Failed to save tracker"
                );
            }
        }

        stats
    }

    /// Tests the connection and fetches metadata, recording the outcome on
    /// the tracker. Returns whether the tracker ended up connected.
    async fn reconnect(&self, tracker: &mut Tracker, connector: &dyn Connector) -> bool {
        let failure = match connector.test_connection().await {
            Ok(true) => match connector.get_metadata().await {
                Ok(metadata) => match serde_json::to_value(&metadata) {
                    Ok(value) => {
                        tracker.metadata = value;
                        None
                    }
                    Err(e) => Some(TrackerError::Metadata(e.to_string())),
                },
                Err(e) => Some(TrackerError::Metadata(TrackerError::describe(&e))),
            },
            Ok(false) => Some(TrackerError::Connection(CONNECTION_REFUSED.to_string())),
            Err(e) => Some(TrackerError::Connection(TrackerError::describe(&e))),
        };

        tracker.last_updated = Some(Utc::now());
        match failure {
            None => {
                tracker.connected = true;
                tracker.message.clear();
                info!(
                    tracker_id = tracker.id,
                    tracker = %tracker.name,
                    kind = %tracker.kind,
                    "Tracker connected"
                );
                true
            }
            Some(err) => {
                tracker.connected = false;
                tracker.message = failure_message(&err);
                warn!(
                    tracker_id = tracker.id,
                    tracker = %tracker.name,
                    error = %err,
                    "Tracker connection failed"
                );
                false
            }
        }
    }
}

/// The text stored on the tracker: the underlying cause without the
/// taxonomy prefix.
fn failure_message(err: &TrackerError) -> String {
    match err {
        TrackerError::Connection(m) | TrackerError::Metadata(m) => m.clone(),
        other => other.to_string(),
    }
}
