//! # Topic Gateway
//!
//! Adapter over the pub/sub provider that actually delivers mail. The provider
//! is authoritative for who is subscribed and whether they confirmed.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{MemberEntry, SubscriberEmail, TopicRef};
use crate::retrieve::ky_http::ApiClient;

/// Full topic snapshot keyed by normalized endpoint.
pub type Membership = BTreeMap<String, MemberEntry>;

/// Builds a [`Membership`] from raw `(endpoint, ref)` pairs as the provider
/// reports them. Endpoints are trimmed and lowercased, empty endpoints are
/// dropped, and a repeated endpoint keeps its last entry.
pub fn membership_from_pairs<'a, I>(pairs: I) -> Membership
where
    I: IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
{
    let mut out = Membership::new();
    for (endpoint, raw_ref) in pairs {
        let endpoint = endpoint.unwrap_or_default().trim().to_lowercase();
        if endpoint.is_empty() {
            continue;
        }
        out.insert(endpoint, MemberEntry::new(TopicRef::from_provider(raw_ref)));
    }
    out
}

#[async_trait]
pub trait TopicGateway: Send + Sync {
    /// Every endpoint currently on the topic. Drains all provider pages
    /// before returning; a partial snapshot is never returned.
    async fn list_members(&self) -> anyhow::Result<Membership>;

    /// Asks the provider to create an email subscription. The provider mails
    /// the confirmation link itself; no handle comes back.
    async fn create_pending(&self, email: &SubscriberEmail) -> anyhow::Result<()>;

    /// Removes a live subscription. Only call with a handle that passed
    /// [`super::model::is_real_handle`].
    async fn remove(&self, handle: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Deserialize)]
struct SubscriptionPage {
    #[serde(default)]
    subscriptions: Vec<ProviderSubscription>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderSubscription {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    subscription_ref: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSubscription<'a> {
    protocol: &'static str,
    endpoint: &'a str,
}

/// Topic gateway speaking the provider's JSON API.
///
/// ```text
/// GET    topics/{topic}/subscriptions[?next_token=T]
/// POST   topics/{topic}/subscriptions   {"protocol":"email","endpoint":...}
/// DELETE subscriptions/{ref}
/// ```
///
/// The provider must issue SNS-shaped handles (`arn:aws:sns:...`, see
/// [`super::model::is_real_handle`]). A handle of any other shape still lists
/// as `CONFIRMED`, but unsubscribe treats it as "no live handle": the local
/// record is dropped and `remove` is never called, so delivery continues.
pub struct HttpTopicGateway {
    client: ApiClient,
    topic_id: String,
}

impl HttpTopicGateway {
    pub fn new(
        api_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
        topic_id: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = ApiClient::new(api_url, auth_token, timeout)
            .context("building topic provider client")?;
        Ok(Self::with_client(client, topic_id))
    }

    pub fn with_client(client: ApiClient, topic_id: impl Into<String>) -> Self {
        Self {
            client,
            topic_id: topic_id.into(),
        }
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    async fn fetch_page(&self, token: Option<&str>) -> anyhow::Result<SubscriptionPage> {
        let query: Vec<(&str, &str)> = token.map(|t| ("next_token", t)).into_iter().collect();
        let resp = self
            .client
            .request::<SubscriptionPage, ()>(
                Method::GET,
                &["topics", self.topic_id.as_str(), "subscriptions"],
                &query,
                None,
            )
            .await?
            .error_for_status()?;
        resp.data
            .context("provider returned a success status without a subscription page")
    }
}

#[async_trait]
impl TopicGateway for HttpTopicGateway {
    async fn list_members(&self) -> anyhow::Result<Membership> {
        let mut raw: Vec<ProviderSubscription> = Vec::new();
        let mut token: Option<String> = None;
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = self
                .fetch_page(token.as_deref())
                .await
                .with_context(|| format!("listing subscriptions of topic '{}'", self.topic_id))?;
            pages += 1;
            raw.extend(page.subscriptions);

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(next) if !seen_tokens.insert(next.clone()) => {
                    anyhow::bail!(
                        "provider repeated pagination token '{}' for topic '{}'",
                        next,
                        self.topic_id
                    );
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let members = membership_from_pairs(
            raw.iter()
                .map(|s| (s.endpoint.as_deref(), s.subscription_ref.as_deref())),
        );
        debug!(topic = %self.topic_id, pages, members = members.len(), "topic membership listed");
        Ok(members)
    }

    async fn create_pending(&self, email: &SubscriberEmail) -> anyhow::Result<()> {
        let body = CreateSubscription {
            protocol: "email",
            endpoint: email.as_str(),
        };
        self.client
            .send(
                Method::POST,
                &["topics", self.topic_id.as_str(), "subscriptions"],
                Some(&body),
            )
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("subscribing {} to topic '{}'", email, self.topic_id))?;
        Ok(())
    }

    async fn remove(&self, handle: &str) -> anyhow::Result<()> {
        self.client
            .send::<()>(Method::DELETE, &["subscriptions", handle], None)
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("removing subscription '{}'", handle))?;
        Ok(())
    }
}
