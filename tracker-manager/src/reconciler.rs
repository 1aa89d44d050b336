//! Reconciliation loop.
//!
//! Every interval the loop runs three phases in order: reconnect
//! disconnected trackers, sync created tickets, create pending tickets.
//! Shutdown is observed before each phase and during the sleep.

use anyhow::Result;
use hub::config::ReconcilerConfig;
use hub::Repository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::connection::{ConnectionManager, ReconnectStats};
use crate::creator::{CreateStats, PendingCreator};
use crate::registry::ConnectorRegistry;
use crate::synchronizer::{SyncStats, TicketSynchronizer};

/// Outcome of one pass over the three phases.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub reconnect: ReconnectStats,
    pub sync: SyncStats,
    pub create: CreateStats,
    /// The pass stopped early because shutdown was requested
    pub interrupted: bool,
}

impl TickReport {
    fn is_quiet(&self) -> bool {
        self.reconnect.attempted == 0
            && self.sync.deleted == 0
            && self.sync.failed == 0
            && self.create.created == 0
            && self.create.failed == 0
    }
}

pub struct Reconciler {
    connections: ConnectionManager,
    synchronizer: TicketSynchronizer,
    creator: PendingCreator,
    interval: Duration,
    span: Span,
}

impl Reconciler {
    /// Fails when `config` holds timing values the loop cannot run with.
    pub fn new(
        repo: Arc<dyn Repository>,
        registry: Arc<ConnectorRegistry>,
        config: &ReconcilerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connections: ConnectionManager::new(
                Arc::clone(&repo),
                Arc::clone(&registry),
                config.reconnect_backoff()?,
            ),
            synchronizer: TicketSynchronizer::new(Arc::clone(&repo), Arc::clone(&registry)),
            creator: PendingCreator::new(repo, registry),
            interval: config.interval(),
            span: info_span!("reconciler"),
        })
    }

    /// Spawns the loop. It exits once `shutdown` turns true or its sender
    /// is dropped; an in-flight remote call is allowed to finish.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let span = self.span.clone();
        tokio::spawn(async move { self.run(shutdown).await }.instrument(span))
    }

    /// Runs all three phases once.
    pub async fn tick(&self) -> TickReport {
        self.pass(None).await
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Reconciler started");

        while !stopping(&shutdown) {
            let report = self.pass(Some(&shutdown)).await;
            if report.is_quiet() {
                debug!(?report, "Reconcile pass complete");
            } else {
                info!(?report, "Reconcile pass complete");
            }
            if report.interrupted {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    async fn pass(&self, shutdown: Option<&watch::Receiver<bool>>) -> TickReport {
        let mut report = TickReport::default();
        let stop = || shutdown.map(stopping).unwrap_or(false);

        if stop() {
            report.interrupted = true;
            return report;
        }
        report.reconnect = self.connections.run().await;

        if stop() {
            report.interrupted = true;
            return report;
        }
        report.sync = self.synchronizer.run().await;

        if stop() {
            report.interrupted = true;
            return report;
        }
        report.create = self.creator.run().await;

        report
    }
}

/// True once shutdown was signalled or the signalling side went away.
fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, Seeded, FAKE_KIND};
    use hub::Ticket;

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            interval_secs: 1,
            reconnect_backoff_secs: 10,
        }
    }

    #[tokio::test]
    async fn test_new_tracker_connects_and_creates_in_one_tick() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        let tracker = seeded.tracker(FAKE_KIND, "Jira", false);
        let ticket = seeded.pending_ticket(&tracker);

        let report = Reconciler::new(seeded.repo(), fake.registry(), &config())
            .unwrap()
            .tick()
            .await;
        assert_eq!(report.reconnect.connected, 1);
        assert_eq!(report.create.created, 1);
        assert!(!report.interrupted);

        let tracker = seeded.reload(tracker.id);
        assert!(tracker.connected);
        let stored = seeded.store.get_ticket(ticket.id).unwrap().unwrap();
        assert!(stored.created);
    }

    #[tokio::test]
    async fn test_created_ticket_synced_next_tick() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        let tracker = seeded.tracker(FAKE_KIND, "Jira", true);
        let ticket = seeded.pending_ticket(&tracker);
        let reconciler = Reconciler::new(seeded.repo(), fake.registry(), &config()).unwrap();

        reconciler.tick().await;
        fake.state()
            .remote
            .insert("MIG-1".to_string(), "Done".to_string());
        let report = reconciler.tick().await;
        assert_eq!(report.sync.refreshed, 1);
        assert_eq!(report.create, CreateStats::default());

        let stored = seeded.store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(stored.status, "Done");
    }

    fn without_timestamps(mut tickets: Vec<Ticket>) -> Vec<Ticket> {
        tickets.sort_by_key(|t| t.id);
        for ticket in &mut tickets {
            ticket.last_updated = None;
        }
        tickets
    }

    #[tokio::test]
    async fn test_repeated_tick_changes_only_timestamps() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        let tracker = seeded.tracker(FAKE_KIND, "Jira", true);
        seeded.created_ticket(&tracker, "MIG-100");
        seeded.pending_ticket(&tracker);
        fake.state()
            .remote
            .insert("MIG-100".to_string(), "In Progress".to_string());
        let reconciler = Reconciler::new(seeded.repo(), fake.registry(), &config()).unwrap();

        let first = reconciler.tick().await;
        assert_eq!(first.create.created, 1);
        let after_first = seeded.reload(tracker.id);

        let second = reconciler.tick().await;
        assert_eq!(second.create, CreateStats::default());
        assert_eq!(second.sync.deleted, 0);
        assert_eq!(second.sync.refreshed, 2);
        assert_eq!(second.reconnect, ReconnectStats::default());
        assert_eq!(fake.state().create_calls.len(), 1);

        let after_second = seeded.reload(tracker.id);
        assert_eq!(after_second.connected, after_first.connected);
        assert_eq!(after_second.message, after_first.message);
        assert_eq!(after_second.metadata, after_first.metadata);
        assert_eq!(
            without_timestamps(after_second.tickets),
            without_timestamps(after_first.tickets)
        );
    }

    #[test]
    fn test_refresh_only_pass_is_quiet() {
        let mut report = TickReport::default();
        report.sync.trackers = 1;
        report.sync.refreshed = 3;
        assert!(report.is_quiet());

        report.create.created = 1;
        assert!(!report.is_quiet());

        let mut report = TickReport::default();
        report.sync.deleted = 1;
        assert!(!report.is_quiet());
    }

    #[tokio::test]
    async fn test_remote_deletion_removes_ticket() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        let tracker = seeded.tracker(FAKE_KIND, "Jira", true);
        let ticket = seeded.created_ticket(&tracker, "MIG-77");

        let report = Reconciler::new(seeded.repo(), fake.registry(), &config())
            .unwrap()
            .tick()
            .await;
        assert_eq!(report.sync.deleted, 1);
        assert!(seeded.store.get_ticket(ticket.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_connection_blocks_creation() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        fake.state().test_error = Some("connection refused".to_string());
        let tracker = seeded.tracker(FAKE_KIND, "Jira", false);
        let ticket = seeded.pending_ticket(&tracker);

        let report = Reconciler::new(seeded.repo(), fake.registry(), &config())
            .unwrap()
            .tick()
            .await;
        assert_eq!(report.reconnect.failed, 1);
        assert!(fake.state().create_calls.is_empty());
        assert!(!seeded.store.get_ticket(ticket.id).unwrap().unwrap().created);
    }

    #[tokio::test]
    async fn test_pass_interrupted_by_shutdown() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        seeded.tracker(FAKE_KIND, "Jira", false);
        let reconciler = Reconciler::new(seeded.repo(), fake.registry(), &config()).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let report = reconciler.pass(Some(&rx)).await;

        assert!(report.interrupted);
        assert_eq!(fake.state().test_calls, 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        let tracker = seeded.tracker(FAKE_KIND, "Jira", false);
        let config = ReconcilerConfig {
            interval_secs: 60,
            reconnect_backoff_secs: 10,
        };

        let (tx, rx) = watch::channel(false);
        let handle = Reconciler::new(seeded.repo(), fake.registry(), &config)
            .unwrap()
            .start(rx);

        // The first pass runs immediately; wait for it, then stop during the sleep.
        for _ in 0..100 {
            if seeded.reload(tracker.id).connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seeded.reload(tracker.id).connected);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        let config = ReconcilerConfig {
            interval_secs: 1,
            reconnect_backoff_secs: u64::MAX,
        };
        assert!(Reconciler::new(seeded.repo(), fake.registry(), &config).is_err());

        let config = ReconcilerConfig {
            interval_secs: 0,
            reconnect_backoff_secs: 10,
        };
        assert!(Reconciler::new(seeded.repo(), fake.registry(), &config).is_err());
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_loop() {
        let seeded = Seeded::new();
        let fake = FakeConnector::default();
        let (tx, rx) = watch::channel(false);
        let handle = Reconciler::new(seeded.repo(), fake.registry(), &config())
            .unwrap()
            .start(rx);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }
}
