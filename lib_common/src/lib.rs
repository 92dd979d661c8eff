//! # lib_common
//!
//! Shared building blocks for the subscription registry workspace. Every
//! top-level module sits behind a cargo feature of the same name so binaries
//! only compile what they use.

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "registry")]
pub mod registry;

// Re-export the types most callers need
#[cfg(feature = "registry")]
pub use registry::{
    RecordStore, RegistryConfig, RegistryError, RegistryService, SubscriberEmail,
    SubscriberRecord, SubscriptionStatus, TopicGateway, TopicRef,
};
