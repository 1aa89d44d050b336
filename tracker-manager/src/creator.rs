//! Create phase: pushes tickets that do not yet exist remotely.

use hub::Repository;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::registry::ConnectorRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CreateStats {
    pub created: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct PendingCreator {
    repo: Arc<dyn Repository>,
    registry: Arc<ConnectorRegistry>,
}

impl PendingCreator {
    pub fn new(repo: Arc<dyn Repository>, registry: Arc<ConnectorRegistry>) -> Self {
        Self { repo, registry }
    }

    /// Creates every pending ticket of every connected tracker.
    ///
    /// The ticket is saved whatever the outcome, so a failure stays visible
    /// on the row and is retried next tick.
    pub async fn run(&self) -> CreateStats {
        let mut stats = CreateStats::default();

        let trackers = match self.repo.find_trackers(true) {
            Ok(trackers) => trackers,
            Err(e) => {
                let err = TrackerError::Persistence(TrackerError::describe(&e));
                warn!(error = %err, "Failed to load connected trackers");
                return stats;
            }
        };

        for tracker in &trackers {
            if tracker.pending_tickets().next().is_none() {
                continue;
            }

            let connector = match self.registry.resolve(tracker) {
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

            for pending in tracker.pending_tickets() {
                let mut ticket = pending.clone();
                match connector.create(&mut ticket).await {
                    Ok(()) => {
                        info!(
                            tracker_id = tracker.id,
                            tracker = %tracker.name,
                            ticket_id = ticket.id,
                            reference = %ticket.reference,
                            "Ticket created"
                        );
                        stats.created += 1;
                    }
                    Err(e) => {
                        let message = TrackerError::describe(&e);
                        warn!(
                            tracker_id = tracker.id,
                            tracker = %tracker.name,
                            error = %message,
                            "Ticket creation failed"
                        );
                        stats.failed += 1;
                    }
                }

                if let Err(e) = self.repo.save_ticket(&ticket) {
                    let err = TrackerError::Persistence(TrackerError::describe(&e));
                    warn!(ticket_id = ticket.id, error = %err, "Failed to save ticket");
                }
            }
        }

        stats
    }
}
