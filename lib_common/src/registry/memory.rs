//! In-process stand-ins for the topic provider and the record store.
//!
//! Used by the test suites and by the server's `--in-memory` development mode.
//! Both can be switched into an outage where every call fails.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::{SubscriberEmail, SubscriberRecord, SubscriptionStatus, TopicRef, PENDING_SENTINEL};
use super::records::RecordStore;
use super::topic::{membership_from_pairs, Membership, TopicGateway};

#[derive(Default)]
struct TopicState {
    /// `(endpoint, raw ref)` in provider order.
    subscriptions: Vec<(String, String)>,
    created: Vec<String>,
    removed: Vec<String>,
}

/// Provider double that pages its listing like the real one.
pub struct MemoryTopic {
    state: RwLock<TopicState>,
    page_size: usize,
    outage: AtomicBool,
}

impl Default for MemoryTopic {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTopic {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: RwLock::new(TopicState::default()),
            page_size: page_size.max(1),
            outage: AtomicBool::new(false),
        }
    }

    /// Seeds an entry exactly as the provider would report it.
    pub async fn insert(&self, endpoint: &str, raw_ref: &str) {
        self.state
            .write()
            .await
            .subscriptions
            .push((endpoint.to_string(), raw_ref.to_string()));
    }

    /// Simulates the subscriber clicking the confirmation link.
    pub async fn confirm(&self, endpoint: &str, handle: &str) -> bool {
        let mut state = self.state.write().await;
        let mut hit = false;
        for (ep, raw_ref) in state.subscriptions.iter_mut() {
            if ep.eq_ignore_ascii_case(endpoint) {
                *raw_ref = handle.to_string();
                hit = true;
            }
        }
        hit
    }

    /// Simulates a removal made outside this system (provider console, bounce).
    pub async fn drop_endpoint(&self, endpoint: &str) {
        self.state
            .write()
            .await
            .subscriptions
            .retain(|(ep, _)| !ep.eq_ignore_ascii_case(endpoint));
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Endpoints passed to `create_pending`, in call order.
    pub async fn created(&self) -> Vec<String> {
        self.state.read().await.created.clone()
    }

    /// Handles passed to `remove`, in call order.
    pub async fn removed(&self) -> Vec<String> {
        self.state.read().await.removed.clone()
    }

    fn check_outage(&self) -> anyhow::Result<()> {
        if self.outage.load(Ordering::SeqCst) {
            anyhow::bail!("topic provider unreachable");
        }
        Ok(())
    }

    async fn page(&self, start: usize) -> (Vec<(String, String)>, Option<usize>) {
        let state = self.state.read().await;
        let end = (start + self.page_size).min(state.subscriptions.len());
        let items = state.subscriptions[start.min(end)..end].to_vec();
        let next = (end < state.subscriptions.len()).then_some(end);
        (items, next)
    }
}

#[async_trait]
impl TopicGateway for MemoryTopic {
    async fn list_members(&self) -> anyhow::Result<Membership> {
        let mut raw = Vec::new();
        let mut cursor = Some(0usize);
        while let Some(start) = cursor {
            self.check_outage()?;
            let (items, next) = self.page(start).await;
            raw.extend(items);
            cursor = next;
        }
        Ok(membership_from_pairs(
            raw.iter().map(|(ep, r)| (Some(ep.as_str()), Some(r.as_str()))),
        ))
    }

    async fn create_pending(&self, email: &SubscriberEmail) -> anyhow::Result<()> {
        self.check_outage()?;
        let mut state = self.state.write().await;
        state.created.push(email.to_string());
        let known = state
            .subscriptions
            .iter()
            .any(|(ep, _)| ep.eq_ignore_ascii_case(email.as_str()));
        if !known {
            state
                .subscriptions
                .push((email.to_string(), PENDING_SENTINEL.to_string()));
        }
        Ok(())
    }

    async fn remove(&self, handle: &str) -> anyhow::Result<()> {
        self.check_outage()?;
        let mut state = self.state.write().await;
        state.removed.push(handle.to_string());
        let before = state.subscriptions.len();
        state.subscriptions.retain(|(_, r)| r != handle);
        if state.subscriptions.len() == before {
            anyhow::bail!("subscription '{}' not found", handle);
        }
        Ok(())
    }
}

/// Record store double backed by a sorted map.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<SubscriberEmail, SubscriberRecord>>,
    outage: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn check_outage(&self) -> anyhow::Result<()> {
        if self.outage.load(Ordering::SeqCst) {
            anyhow::bail!("record store unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn count(&self) -> anyhow::Result<usize> {
        self.check_outage()?;
        Ok(self.records.read().await.len())
    }

    async fn get(&self, email: &SubscriberEmail) -> anyhow::Result<Option<SubscriberRecord>> {
        self.check_outage()?;
        Ok(self.records.read().await.get(email).cloned())
    }

    async fn put(&self, record: &SubscriberRecord) -> anyhow::Result<()> {
        self.check_outage()?;
        self.records
            .write()
            .await
            .entry(record.email.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        email: &SubscriberEmail,
        status: SubscriptionStatus,
        external_ref: &TopicRef,
    ) -> anyhow::Result<()> {
        self.check_outage()?;
        if let Some(record) = self.records.write().await.get_mut(email) {
            record.status = status;
            record.external_ref = external_ref.clone();
        }
        Ok(())
    }

    async fn delete(&self, email: &SubscriberEmail) -> anyhow::Result<()> {
        self.check_outage()?;
        self.records.write().await.remove(email);
        Ok(())
    }

    async fn scan_all(&self) -> anyhow::Result<Vec<SubscriberRecord>> {
        self.check_outage()?;
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_topic_pages_through_everything() {
        let topic = MemoryTopic::with_page_size(2);
        for i in 0..5 {
            topic
                .insert(&format!("u{i}@x.com"), &format!("arn:aws:sns:r:1:t:{i}"))
                .await;
        }
        let members = topic.list_members().await.unwrap();
        assert_eq!(members.len(), 5);
        assert!(members.values().all(|m| m.status == SubscriptionStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_memory_topic_remove_of_unknown_handle_fails() {
        let topic = MemoryTopic::new();
        assert!(topic.remove("arn:aws:sns:r:1:t:missing").await.is_err());
        assert_eq!(topic.removed().await, vec!["arn:aws:sns:r:1:t:missing".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_put_keeps_existing_record() {
        let store = MemoryRecordStore::new();
        let email = SubscriberEmail::parse("a@x.com").unwrap();
        let first = SubscriberRecord::pending(email.clone(), Utc::now());
        store.put(&first).await.unwrap();

        let mut second = first.clone();
        second.status = SubscriptionStatus::Confirmed;
        store.put(&second).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(&email).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let store = MemoryRecordStore::new();
        store.set_outage(true);
        assert!(store.count().await.is_err());
        assert!(store.scan_all().await.is_err());

        let topic = MemoryTopic::new();
        topic.set_outage(true);
        assert!(topic.list_members().await.is_err());
    }
}
