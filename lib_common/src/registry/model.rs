//! Domain types shared by the adapters, the reconciler and the service.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder the provider reports for a subscription whose confirmation
/// email has not been accepted yet.
pub const PENDING_SENTINEL: &str = "PendingConfirmation";

/// Prefix every live provider handle starts with.
const HANDLE_PREFIX: &str = "arn:aws:sns:";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid email address: '{0}'")]
pub struct EmailError(pub String);

/// A trimmed, lowercased and validated email address. Primary key of the
/// record store and the endpoint on the topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(raw: &str) -> Result<Self, EmailError> {
        let normalized = raw.trim().to_lowercase();
        if EMAIL_RE.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(EmailError(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Pending,
    Confirmed,
    Unknown,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "PENDING",
            SubscriptionStatus::Confirmed => "CONFIRMED",
            SubscriptionStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SubscriptionStatus::Pending),
            "CONFIRMED" => Ok(SubscriptionStatus::Confirmed),
            "UNKNOWN" => Ok(SubscriptionStatus::Unknown),
            other => Err(format!("unrecognized subscription status '{}'", other)),
        }
    }
}

/// The provider's subscription handle, with its sentinel lifted into a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicRef {
    /// Created on the topic, confirmation not accepted yet.
    Pending,
    /// Opaque handle issued after confirmation. Not necessarily well formed;
    /// see [`TopicRef::live_handle`].
    Handle(String),
    /// No handle at all.
    Absent,
}

impl TopicRef {
    /// Lifts the provider's string form. `None`, empty and whitespace map to
    /// `Absent`.
    pub fn from_provider(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => TopicRef::Absent,
            Some(PENDING_SENTINEL) => TopicRef::Pending,
            Some(handle) => TopicRef::Handle(handle.to_string()),
        }
    }

    /// The string form the provider uses, `None` for `Absent`.
    pub fn to_provider(&self) -> Option<&str> {
        match self {
            TopicRef::Pending => Some(PENDING_SENTINEL),
            TopicRef::Handle(h) => Some(h.as_str()),
            TopicRef::Absent => None,
        }
    }

    /// The handle, if it is one that may be passed to the provider's removal call.
    pub fn live_handle(&self) -> Option<&str> {
        match self {
            TopicRef::Handle(h) if is_real_handle(h) => Some(h.as_str()),
            _ => None,
        }
    }

    /// Delivery status implied by this ref on the topic side.
    pub fn status(&self) -> SubscriptionStatus {
        match self {
            TopicRef::Pending => SubscriptionStatus::Pending,
            TopicRef::Handle(_) => SubscriptionStatus::Confirmed,
            TopicRef::Absent => SubscriptionStatus::Unknown,
        }
    }
}

/// True iff `handle` is non-empty, not the pending sentinel, and shaped like a
/// provider subscription handle.
pub fn is_real_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle != PENDING_SENTINEL
        && handle.starts_with(HANDLE_PREFIX)
        && handle.matches(':').count() >= 5
}

/// One row of the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberRecord {
    pub email: SubscriberEmail,
    pub status: SubscriptionStatus,
    pub external_ref: TopicRef,
    pub created_at: DateTime<Utc>,
}

impl SubscriberRecord {
    /// A freshly subscribed, unconfirmed record.
    pub fn pending(email: SubscriberEmail, created_at: DateTime<Utc>) -> Self {
        Self {
            email,
            status: SubscriptionStatus::Pending,
            external_ref: TopicRef::Absent,
            created_at,
        }
    }
}

/// One endpoint of the topic as reported by the provider. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub topic_ref: TopicRef,
    pub status: SubscriptionStatus,
}

impl MemberEntry {
    pub fn new(topic_ref: TopicRef) -> Self {
        let status = topic_ref.status();
        Self { topic_ref, status }
    }
}
