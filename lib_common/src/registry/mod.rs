//! # Subscription Registry
//!
//! Manages email subscribers to a single pub/sub topic. The topic provider is
//! the source of truth for membership and confirmation; a local record store
//! keeps per-subscriber metadata and is repaired from the topic on every
//! listing.
//!
//! - [`topic`]: provider adapter and the [`TopicGateway`] seam
//! - [`records`]: the [`RecordStore`] seam and its Postgres implementation
//! - [`reconciler`]: one-way read-repair from topic to records
//! - [`service`]: subscribe / unsubscribe / list
//! - [`memory`]: in-process doubles for tests and local runs

pub mod error;
pub mod memory;
pub mod model;
pub mod reconciler;
pub mod records;
pub mod service;
pub mod topic;

pub use error::{RegistryError, RegistryResult};
pub use memory::{MemoryRecordStore, MemoryTopic};
pub use model::{
    is_real_handle, EmailError, MemberEntry, SubscriberEmail, SubscriberRecord,
    SubscriptionStatus, TopicRef, PENDING_SENTINEL,
};
pub use reconciler::{ReconcileReport, Reconciler};
pub use records::{PgRecordStore, RecordStore, TableNameError};
pub use service::{
    RegistryConfig, RegistryService, SubscribeOutcome, UnsubscribeOutcome, DEFAULT_MAX_SUBS,
};
pub use topic::{membership_from_pairs, HttpTopicGateway, Membership, TopicGateway};
