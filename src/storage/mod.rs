//! Object storage access.
//!
//! The [`backend::ObjectStore`] trait abstracts over the storage service a
//! console session talks to.  Implementations include the AWS SDK client
//! and an in-memory store for development.  Handles are memoized per
//! identity by [`cache::ClientCache`], and [`service::StorageService`]
//! builds the console's bucket and object operations on top.

pub mod aws;
pub mod backend;
pub mod cache;
pub mod errors;
pub mod memory;
pub mod service;
