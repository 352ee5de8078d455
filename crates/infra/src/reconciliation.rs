//! Asynchronous paperwork reconciliation.
//!
//! Every committed movement gets one best-effort probe of the external
//! paperwork collaborator. Missing paperwork produces a
//! `documentation.required` fact; nothing else happens. This is a
//! notice-generation mechanism, not enforcement — there is no retry and no
//! scheduled re-check, and a late-arriving invoice is never retroactively
//! reconciled here.

use std::collections::HashSet;
use std::sync::{mpsc, Arc, RwLock};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use equiptrack_core::LedgerEntryId;
use equiptrack_events::{DocumentationRequired, DomainEvent};
use equiptrack_warehouse::MovementKind;

use crate::publisher::EventPublisher;

#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("paperwork store unavailable: {0}")]
    Unavailable(String),
}

/// Boolean query answered by the external paperwork collaborator, keyed by
/// ledger entry identity.
pub trait PaperworkProbe: Send + Sync {
    fn has_document(&self, entry_id: LedgerEntryId) -> Result<bool, ProbeError>;
}

impl<P> PaperworkProbe for Arc<P>
where
    P: PaperworkProbe + ?Sized,
{
    fn has_document(&self, entry_id: LedgerEntryId) -> Result<bool, ProbeError> {
        (**self).has_document(entry_id)
    }
}

/// In-memory paperwork records (test double / dev).
#[derive(Debug, Default)]
pub struct InMemoryPaperworkStore {
    documents: RwLock<HashSet<LedgerEntryId>>,
}

impl InMemoryPaperworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a paperwork record against a ledger entry.
    pub fn file_document(&self, entry_id: LedgerEntryId) {
        if let Ok(mut documents) = self.documents.write() {
            documents.insert(entry_id);
        }
    }
}

impl PaperworkProbe for InMemoryPaperworkStore {
    fn has_document(&self, entry_id: LedgerEntryId) -> Result<bool, ProbeError> {
        let documents = self
            .documents
            .read()
            .map_err(|_| ProbeError::Unavailable("lock poisoned".to_string()))?;
        Ok(documents.contains(&entry_id))
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Budget for the whole check; on expiry the attempt is abandoned.
    pub deadline: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(3),
        }
    }
}

/// Schedules detached, single-attempt paperwork checks.
///
/// Checks never touch the per-item commit lock and never surface failures to
/// the caller that committed the transaction.
pub struct ReconciliationChecker {
    probe: Arc<dyn PaperworkProbe>,
    publisher: EventPublisher,
    deadline: Duration,
}

impl ReconciliationChecker {
    pub fn new(
        probe: Arc<dyn PaperworkProbe>,
        publisher: EventPublisher,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            probe,
            publisher,
            deadline: config.deadline,
        }
    }

    /// Fire-and-forget check for one committed entry.
    pub fn schedule(&self, entry_id: LedgerEntryId, kind: MovementKind) {
        let probe = Arc::clone(&self.probe);
        let publisher = self.publisher.clone();
        let deadline = self.deadline;

        let spawned = thread::Builder::new()
            .name("paperwork-check".to_string())
            .spawn(move || run_check(probe, publisher, deadline, entry_id, kind));

        if let Err(e) = spawned {
            warn!(%entry_id, error = %e, "failed to spawn paperwork check");
        }
    }
}

fn run_check(
    probe: Arc<dyn PaperworkProbe>,
    publisher: EventPublisher,
    deadline: Duration,
    entry_id: LedgerEntryId,
    kind: MovementKind,
) {
    // The probe runs on its own thread so a stuck collaborator can be
    // abandoned at the deadline instead of pinning this check forever.
    let (tx, rx) = mpsc::channel();
    let probe_thread = thread::Builder::new()
        .name("paperwork-probe".to_string())
        .spawn(move || {
            let _ = tx.send(probe.has_document(entry_id));
        });

    if let Err(e) = probe_thread {
        warn!(%entry_id, error = %e, "failed to spawn paperwork probe");
        return;
    }

    match rx.recv_timeout(deadline) {
        Ok(Ok(true)) => {
            debug!(%entry_id, "paperwork on file");
        }
        Ok(Ok(false)) => {
            publisher.publish(DomainEvent::DocumentationRequired(DocumentationRequired {
                entry_id,
                kind,
                noticed_at: Utc::now(),
            }));
        }
        Ok(Err(e)) => {
            warn!(%entry_id, error = %e, "paperwork probe failed");
        }
        Err(_) => {
            warn!(%entry_id, "paperwork probe timed out, abandoning");
        }
    }
}
