//! # Data Retrieval Module
//!
//! Generic HTTP clients shared by adapters that talk to external JSON APIs.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A JSON `ApiClient` built on `reqwest`. Single attempt per
//!   call with a bounded timeout; callers decide what a failure means.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic JSON HTTP API client.
pub mod ky_http;
