//! # Registry Service
//!
//! Request-handling core. Composes the topic gateway, the record store and
//! the reconciler into three idempotent operations.
//!
//! ```text
//! ABSENT -> PENDING -> CONFIRMED
//!           PENDING -> ABSENT      (unsubscribe before confirmation)
//!           CONFIRMED -> ABSENT    (unsubscribe after confirmation)
//!           CONFIRMED -> UNKNOWN   (external drift, repaired on next list)
//! ```
//!
//! Capacity is check-then-act: concurrent subscribes can both pass the
//! count and overshoot `max_subs` briefly.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::error::{RegistryError, RegistryResult};
use super::model::{SubscriberEmail, SubscriberRecord, SubscriptionStatus, TopicRef};
use super::reconciler::Reconciler;
use super::records::RecordStore;
use super::topic::TopicGateway;

/// Default ceiling on stored subscribers.
pub const DEFAULT_MAX_SUBS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub max_subs: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_subs: DEFAULT_MAX_SUBS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Topic subscription requested and a `PENDING` record stored.
    Created { email: SubscriberEmail },
    /// A record already existed; nothing was touched.
    AlreadyPresent {
        email: SubscriberEmail,
        status: SubscriptionStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// A live topic subscription was removed.
    Removed { email: SubscriberEmail },
    /// The subscription never got confirmed; only the local record went away.
    WasPending { email: SubscriberEmail },
    /// Nothing live on the topic; any local record was dropped as stale.
    NoLiveSubscription { email: SubscriberEmail },
}

impl fmt::Display for SubscribeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeOutcome::Created { email } => write!(
                f,
                "We sent a confirmation email to {}. It must be accepted.",
                email
            ),
            SubscribeOutcome::AlreadyPresent { email, status } => {
                write!(f, "{} was already {}", email, status)
            }
        }
    }
}

impl fmt::Display for UnsubscribeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsubscribeOutcome::Removed { email } => {
                write!(f, "{} unsubscribed successfully.", email)
            }
            UnsubscribeOutcome::WasPending { email } => write!(
                f,
                "{} was pending confirmation. Removed from the local list.",
                email
            ),
            UnsubscribeOutcome::NoLiveSubscription { email } => write!(
                f,
                "No active topic subscription found for {}. Removed from the list.",
                email
            ),
        }
    }
}

/// Where the unsubscribe path found (or failed to find) a handle.
enum Resolved {
    Live(String),
    Pending,
    Nothing,
}

pub struct RegistryService {
    topic: Arc<dyn TopicGateway>,
    records: Arc<dyn RecordStore>,
    reconciler: Reconciler,
    config: RegistryConfig,
}

impl RegistryService {
    pub fn new(
        topic: Arc<dyn TopicGateway>,
        records: Arc<dyn RecordStore>,
        config: RegistryConfig,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&topic), Arc::clone(&records));
        Self {
            topic,
            records,
            reconciler,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub async fn subscribe(&self, raw_email: &str) -> RegistryResult<SubscribeOutcome> {
        let email = SubscriberEmail::parse(raw_email)?;

        let count = self.records.count().await.map_err(RegistryError::Unavailable)?;
        if count >= self.config.max_subs {
            warn!(%email, count, max = self.config.max_subs, "subscribe rejected, registry full");
            return Err(RegistryError::CapacityExceeded {
                max: self.config.max_subs,
            });
        }

        if let Some(existing) = self.records.get(&email).await.map_err(RegistryError::Unavailable)? {
            debug!(%email, status = %existing.status, "subscribe is a no-op");
            return Ok(SubscribeOutcome::AlreadyPresent {
                email,
                status: existing.status,
            });
        }

        // A failure between these two writes leaves a pending topic
        // subscription with no record; a retry then creates a second one.
        self.topic
            .create_pending(&email)
            .await
            .map_err(RegistryError::Unavailable)?;
        self.records
            .put(&SubscriberRecord::pending(email.clone(), Utc::now()))
            .await
            .map_err(RegistryError::Unavailable)?;

        info!(%email, "subscription requested, confirmation pending");
        Ok(SubscribeOutcome::Created { email })
    }

    pub async fn unsubscribe(&self, raw_email: &str) -> RegistryResult<UnsubscribeOutcome> {
        let email = SubscriberEmail::parse(raw_email)?;

        let stored = self
            .records
            .get(&email)
            .await
            .map_err(RegistryError::Unavailable)?
            .map(|r| r.external_ref);

        let resolved = match stored.as_ref().and_then(TopicRef::live_handle) {
            Some(handle) => Resolved::Live(handle.to_string()),
            None => match self.resolve_from_topic(&email).await? {
                // The topic lost track of it; the record still says pending.
                Resolved::Nothing if stored == Some(TopicRef::Pending) => Resolved::Pending,
                resolved => resolved,
            },
        };

        let outcome = match resolved {
            Resolved::Pending => UnsubscribeOutcome::WasPending { email },
            Resolved::Nothing => UnsubscribeOutcome::NoLiveSubscription { email },
            Resolved::Live(handle) => match self.topic.remove(&handle).await {
                Ok(()) => UnsubscribeOutcome::Removed { email },
                Err(err) => self.after_failed_remove(email, &handle, err).await?,
            },
        };

        self.records
            .delete(outcome_email(&outcome))
            .await
            .map_err(RegistryError::Unavailable)?;
        info!(email = %outcome_email(&outcome), "{}", outcome);
        Ok(outcome)
    }

    /// Runs read-repair, then returns every record ordered by email.
    pub async fn list(&self) -> RegistryResult<Vec<SubscriberRecord>> {
        let report = self
            .reconciler
            .reconcile()
            .await
            .map_err(RegistryError::Unavailable)?;
        debug!(?report, "reconciled before listing");

        let mut records = self.records.scan_all().await.map_err(RegistryError::Unavailable)?;
        records.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(records)
    }

    async fn resolve_from_topic(&self, email: &SubscriberEmail) -> RegistryResult<Resolved> {
        let members = self
            .topic
            .list_members()
            .await
            .map_err(RegistryError::Unavailable)?;
        let resolved = match members.get(email.as_str()).map(|m| &m.topic_ref) {
            Some(TopicRef::Pending) => Resolved::Pending,
            Some(r) => match r.live_handle() {
                Some(handle) => Resolved::Live(handle.to_string()),
                None => Resolved::Nothing,
            },
            None => Resolved::Nothing,
        };
        Ok(resolved)
    }

    /// The stored handle was refused. A fresh topic snapshot decides: the
    /// same handle still live means the failure is real; a different live
    /// handle (re-subscribed elsewhere) is removed instead; otherwise the
    /// record is stale and only the local copy goes away.
    async fn after_failed_remove(
        &self,
        email: SubscriberEmail,
        handle: &str,
        err: anyhow::Error,
    ) -> RegistryResult<UnsubscribeOutcome> {
        let Ok(members) = self.topic.list_members().await else {
            return Err(RegistryError::Unavailable(err));
        };
        let current = members.get(email.as_str()).map(|m| &m.topic_ref);

        match current.and_then(TopicRef::live_handle) {
            Some(live) if live == handle => Err(RegistryError::Unavailable(err)),
            Some(live) => {
                warn!(%email, stale = handle, live, "stored handle outdated, removing the live one");
                self.topic
                    .remove(live)
                    .await
                    .map_err(RegistryError::Unavailable)?;
                Ok(UnsubscribeOutcome::Removed { email })
            }
            None if current == Some(&TopicRef::Pending) => {
                Ok(UnsubscribeOutcome::WasPending { email })
            }
            None => {
                warn!(%email, handle, "stored handle no longer on topic, dropping stale record");
                Ok(UnsubscribeOutcome::NoLiveSubscription { email })
            }
        }
    }
}

fn outcome_email(outcome: &UnsubscribeOutcome) -> &SubscriberEmail {
    match outcome {
        UnsubscribeOutcome::Removed { email }
        | UnsubscribeOutcome::WasPending { email }
        | UnsubscribeOutcome::NoLiveSubscription { email } => email,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::memory::{MemoryRecordStore, MemoryTopic};
    use crate::registry::model::PENDING_SENTINEL;

    const HANDLE: &str = "arn:aws:sns:us-east-1:123456789012:news:0f1e2d3c";

    struct Fixture {
        topic: Arc<MemoryTopic>,
        store: Arc<MemoryRecordStore>,
        service: RegistryService,
    }

    fn fixture(max_subs: usize) -> Fixture {
        let topic = Arc::new(MemoryTopic::with_page_size(2));
        let store = Arc::new(MemoryRecordStore::new());
        let service = RegistryService::new(
            topic.clone(),
            store.clone(),
            RegistryConfig { max_subs },
        );
        Fixture { topic, store, service }
    }

    fn email(raw: &str) -> SubscriberEmail {
        SubscriberEmail::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_creates_pending_record_and_topic_entry() {
        let fx = fixture(7);
        let outcome = fx.service.subscribe("  U@D.com ").await.unwrap();

        assert_eq!(outcome, SubscribeOutcome::Created { email: email("u@d.com") });
        let record = fx.store.get(&email("u@d.com")).await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Pending);
        assert_eq!(record.external_ref, TopicRef::Absent);
        assert_eq!(fx.topic.created().await, vec!["u@d.com".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_twice_is_a_no_op() {
        let fx = fixture(7);
        fx.service.subscribe("a@x.com").await.unwrap();
        let second = fx.service.subscribe("a@x.com").await.unwrap();

        assert_eq!(
            second,
            SubscribeOutcome::AlreadyPresent {
                email: email("a@x.com"),
                status: SubscriptionStatus::Pending,
            }
        );
        assert_eq!(second.to_string(), "a@x.com was already PENDING");
        assert_eq!(fx.store.count().await.unwrap(), 1);
        assert_eq!(fx.topic.created().await.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_limit_rejects_third_subscriber() {
        let fx = fixture(2);
        fx.service.subscribe("a@x.com").await.unwrap();
        fx.service.subscribe("b@x.com").await.unwrap();

        let err = fx.service.subscribe("c@x.com").await.unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded { max: 2 }));

        let listed: Vec<String> = fx
            .service
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.email.to_string())
            .collect();
        assert_eq!(listed, vec!["a@x.com", "b@x.com"]);
        assert_eq!(fx.topic.created().await.len(), 2);
    }

    #[tokio::test]
    async fn test_full_registry_rejects_even_known_email() {
        // The count check runs before the existence check.
        let fx = fixture(1);
        fx.service.subscribe("a@x.com").await.unwrap();
        let err = fx.service.subscribe("a@x.com").await.unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn test_malformed_emails_never_reach_the_stores() {
        let fx = fixture(7);
        fx.store.set_outage(true);
        fx.topic.set_outage(true);

        for raw in ["not-an-email", "", "a@b"] {
            let err = fx.service.subscribe(raw).await.unwrap_err();
            assert!(matches!(err, RegistryError::InvalidInput(_)), "subscribe {raw:?}");
            let err = fx.service.unsubscribe(raw).await.unwrap_err();
            assert!(matches!(err, RegistryError::InvalidInput(_)), "unsubscribe {raw:?}");
        }
    }

    #[tokio::test]
    async fn test_valid_email_passes_validation() {
        let fx = fixture(7);
        assert!(fx.service.subscribe("a@b.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_email_succeeds() {
        let fx = fixture(7);
        let outcome = fx.service.unsubscribe("ghost@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::NoLiveSubscription { email: email("ghost@x.com") });
        assert_eq!(fx.store.count().await.unwrap(), 0);
        assert!(fx.topic.removed().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_pending_sentinel_skips_topic_removal() {
        let fx = fixture(7);
        fx.topic.insert("p@x.com", PENDING_SENTINEL).await;
        let mut record = SubscriberRecord::pending(email("p@x.com"), Utc::now());
        record.external_ref = TopicRef::Pending;
        fx.store.put(&record).await.unwrap();

        let outcome = fx.service.unsubscribe("p@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::WasPending { email: email("p@x.com") });
        assert!(fx.topic.removed().await.is_empty());
        assert_eq!(fx.store.get(&email("p@x.com")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unsubscribe_pending_record_missing_from_topic() {
        let fx = fixture(7);
        let mut record = SubscriberRecord::pending(email("gone@x.com"), Utc::now());
        record.external_ref = TopicRef::Pending;
        fx.store.put(&record).await.unwrap();

        let outcome = fx.service.unsubscribe("gone@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::WasPending { email: email("gone@x.com") });
        assert_eq!(
            outcome.to_string(),
            "gone@x.com was pending confirmation. Removed from the local list."
        );
        assert!(fx.topic.removed().await.is_empty());
        assert_eq!(fx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_marks_confirmed_subscriber_unknown_after_drift() {
        let fx = fixture(7);
        fx.topic.insert("c@x.com", "").await;
        let mut record = SubscriberRecord::pending(email("c@x.com"), Utc::now());
        record.status = SubscriptionStatus::Confirmed;
        record.external_ref = TopicRef::Handle(HANDLE.to_string());
        fx.store.put(&record).await.unwrap();

        let listed = fx.service.list().await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SubscriptionStatus::Unknown);
        assert_eq!(listed[0].external_ref, TopicRef::Absent);
    }

    #[tokio::test]
    async fn test_unsubscribe_uses_stored_handle_without_listing() {
        let fx = fixture(7);
        fx.topic.insert("c@x.com", HANDLE).await;
        let mut record = SubscriberRecord::pending(email("c@x.com"), Utc::now());
        record.status = SubscriptionStatus::Confirmed;
        record.external_ref = TopicRef::Handle(HANDLE.to_string());
        fx.store.put(&record).await.unwrap();

        let outcome = fx.service.unsubscribe("c@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::Removed { email: email("c@x.com") });
        assert_eq!(fx.topic.removed().await, vec![HANDLE.to_string()]);
        assert_eq!(fx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_resolves_handle_from_topic_when_record_is_pending() {
        let fx = fixture(7);
        fx.service.subscribe("late@x.com").await.unwrap();
        fx.topic.confirm("late@x.com", HANDLE).await;

        let outcome = fx.service.unsubscribe("late@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::Removed { email: email("late@x.com") });
        assert_eq!(fx.topic.removed().await, vec![HANDLE.to_string()]);
    }

    #[tokio::test]
    async fn test_unsubscribe_never_passes_malformed_ref_to_topic() {
        let fx = fixture(7);
        fx.topic.insert("odd@x.com", "sub-1234").await;

        let outcome = fx.service.unsubscribe("odd@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::NoLiveSubscription { email: email("odd@x.com") });
        assert!(fx.topic.removed().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_stored_handle_drops_record() {
        let fx = fixture(7);
        let mut record = SubscriberRecord::pending(email("old@x.com"), Utc::now());
        record.status = SubscriptionStatus::Confirmed;
        record.external_ref = TopicRef::Handle(HANDLE.to_string());
        fx.store.put(&record).await.unwrap();

        let outcome = fx.service.unsubscribe("old@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::NoLiveSubscription { email: email("old@x.com") });
        assert_eq!(fx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_outdated_stored_handle_removes_current_one() {
        let fx = fixture(7);
        let current = "arn:aws:sns:us-east-1:123456789012:news:ffff";
        fx.topic.insert("re@x.com", current).await;
        let mut record = SubscriberRecord::pending(email("re@x.com"), Utc::now());
        record.external_ref = TopicRef::Handle(HANDLE.to_string());
        fx.store.put(&record).await.unwrap();

        let outcome = fx.service.unsubscribe("re@x.com").await.unwrap();

        assert_eq!(outcome, UnsubscribeOutcome::Removed { email: email("re@x.com") });
        assert_eq!(fx.topic.removed().await, vec![HANDLE.to_string(), current.to_string()]);
        assert!(fx.topic.list_members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_email() {
        let fx = fixture(7);
        fx.service.subscribe("z@x.com").await.unwrap();
        fx.service.subscribe("a@x.com").await.unwrap();

        let emails: Vec<String> = fx
            .service
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.email.to_string())
            .collect();
        assert_eq!(emails, vec!["a@x.com", "z@x.com"]);
    }

    #[tokio::test]
    async fn test_list_repairs_confirmed_subscriber() {
        let fx = fixture(7);
        fx.service.subscribe("u@d.com").await.unwrap();
        fx.topic.confirm("u@d.com", HANDLE).await;

        let listed = fx.service.list().await.unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SubscriptionStatus::Confirmed);
        assert_eq!(listed[0].external_ref, TopicRef::Handle(HANDLE.to_string()));
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_unavailable() {
        let fx = fixture(7);
        fx.store.set_outage(true);
        let err = fx.service.subscribe("a@x.com").await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));
        assert!(fx.topic.created().await.is_empty());
    }

    #[tokio::test]
    async fn test_topic_outage_fails_list_and_unresolved_unsubscribe() {
        let fx = fixture(7);
        fx.service.subscribe("a@x.com").await.unwrap();
        fx.topic.set_outage(true);

        assert!(matches!(fx.service.list().await, Err(RegistryError::Unavailable(_))));
        assert!(matches!(
            fx.service.unsubscribe("a@x.com").await,
            Err(RegistryError::Unavailable(_))
        ));
        // The record survives a failed unsubscribe.
        assert_eq!(fx.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_lifecycle() {
        let fx = fixture(7);

        fx.service.subscribe("u@d.com").await.unwrap();
        let record = fx.store.get(&email("u@d.com")).await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Pending);

        assert!(fx.topic.confirm("u@d.com", HANDLE).await);
        let listed = fx.service.list().await.unwrap();
        assert_eq!(listed[0].status, SubscriptionStatus::Confirmed);

        let outcome = fx.service.unsubscribe("u@d.com").await.unwrap();
        assert_eq!(outcome.to_string(), "u@d.com unsubscribed successfully.");
        assert_eq!(fx.topic.removed().await, vec![HANDLE.to_string()]);
        assert_eq!(fx.store.get(&email("u@d.com")).await.unwrap(), None);

        assert!(fx.service.list().await.unwrap().is_empty());
    }
}
