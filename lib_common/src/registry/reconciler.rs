//! # Reconciler
//!
//! Read-repair from the topic into the record store. One direction only: the
//! topic is never written here, and records the topic does not know about are
//! left for the unsubscribe path to clean up, so a subscriber inside the
//! confirmation window is never dropped by a listing.

use std::sync::Arc;

use tracing::{debug, info};

use super::records::RecordStore;
use super::topic::TopicGateway;

/// What a reconciliation pass saw and changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records read from the store.
    pub examined: usize,
    /// Records rewritten to match the topic.
    pub repaired: usize,
    /// Records with no topic entry, left untouched.
    pub untracked: usize,
}

pub struct Reconciler {
    topic: Arc<dyn TopicGateway>,
    records: Arc<dyn RecordStore>,
}

impl Reconciler {
    pub fn new(topic: Arc<dyn TopicGateway>, records: Arc<dyn RecordStore>) -> Self {
        Self { topic, records }
    }

    /// Takes one snapshot of each store and rewrites every record whose
    /// `status` or external ref differs from its topic entry.
    pub async fn reconcile(&self) -> anyhow::Result<ReconcileReport> {
        let members = self.topic.list_members().await?;
        let records = self.records.scan_all().await?;

        let mut report = ReconcileReport {
            examined: records.len(),
            ..ReconcileReport::default()
        };

        for record in &records {
            let Some(entry) = members.get(record.email.as_str()) else {
                report.untracked += 1;
                continue;
            };
            if record.status == entry.status && record.external_ref == entry.topic_ref {
                continue;
            }
            debug!(
                email = %record.email,
                from = %record.status,
                to = %entry.status,
                "repairing drifted record"
            );
            self.records
                .update_status(&record.email, entry.status, &entry.topic_ref)
                .await?;
            report.repaired += 1;
        }

        if report.repaired > 0 {
            info!(
                examined = report.examined,
                repaired = report.repaired,
                untracked = report.untracked,
                "record store reconciled with topic"
            );
        }
        Ok(report)
    }
}
