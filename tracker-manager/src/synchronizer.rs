//! Sync phase: pulls remote status for the created tickets of every
//! connected tracker and drops local tickets whose remote issue is gone.

use hub::Repository;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connector::RefreshOutcome;
use crate::error::TrackerError;
use crate::registry::ConnectorRegistry;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Trackers whose batch query succeeded
    pub trackers: usize,
    pub refreshed: usize,
    pub deleted: usize,
    /// Trackers whose batch query failed
    pub failed: usize,
    pub skipped: usize,
}

pub struct TicketSynchronizer {
    repo: Arc<dyn Repository>,
    registry: Arc<ConnectorRegistry>,
}

impl TicketSynchronizer {
    pub fn new(repo: Arc<dyn Repository>, registry: Arc<ConnectorRegistry>) -> Self {
        Self { repo, registry }
    }

    pub async fn run(&self) -> SyncStats {
        let mut stats = SyncStats::default();

        let trackers = match self.repo.find_trackers(true) {
            Ok(trackers) => trackers,
            Err(e) => {
                let err = TrackerError::Persistence(TrackerError::describe(&e));
                warn!(error = %err, "Failed to load connected trackers");
                return stats;
            }
        };

        for tracker in &trackers {
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

            let outcomes = match connector.refresh_all().await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    let err = TrackerError::BatchRefresh(TrackerError::describe(&e));
                    warn!(
                        tracker_id = tracker.id,
                        tracker = %tracker.name,
                        error = %err,
                        "Ticket refresh failed"
                    );
                    stats.failed += 1;
                    continue;
                }
            };
            stats.trackers += 1;

            for outcome in outcomes {
                let ticket = outcome.ticket();
                let result = match &outcome {
                    RefreshOutcome::Found(ticket) => self.repo.save_ticket(ticket),
                    RefreshOutcome::Missing(ticket) => self.repo.delete_ticket(ticket),
                };

                match (&outcome, result) {
                    (RefreshOutcome::Found(_), Ok(())) => stats.refreshed += 1,
                    (RefreshOutcome::Missing(_), Ok(())) => {
                        info!(
                            tracker_id = tracker.id,
                            tracker = %tracker.name,
                            ticket_id = ticket.id,
                            reference = %ticket.reference,
                            "Remote issue gone, ticket deleted"
                        );
                        stats.deleted += 1;
                    }
                    (_, Err(e)) => {
                        let err = TrackerError::Persistence(TrackerError::describe(&e));
                        warn!(
                            ticket_id = ticket.id,
                            error = %err,
                            "Failed to store refreshed ticket"
                        );
                    }
                }
            }
        }

        stats
    }
}
