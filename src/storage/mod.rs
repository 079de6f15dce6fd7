//! Document storage collaborator
//!
//! The application usages never persist anything themselves. They read and
//! write whole documents through [`Storage`], passing the caller's expected
//! version tag along; the backend is responsible for refusing a write whose
//! tag no longer matches (compare-and-swap per document).

mod memory;

pub use memory::MemoryStorage;

use crate::error::XcapResult;
use crate::uri::XcapUri;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A stored document and its version tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub data: Vec<u8>,
    pub etag: String,
}

/// Whether a successful put created the resource or replaced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    Created,
    Replaced,
}

/// Result of a successful put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub etag: String,
    pub status: PutStatus,
}

impl PutOutcome {
    /// Same write, reported as a creation
    pub fn created(self) -> Self {
        PutOutcome {
            status: PutStatus::Created,
            ..self
        }
    }
}

/// One watcher, as a field name → value map
pub type Watcher = BTreeMap<String, String>;

/// Storage backend used by the application usages
///
/// `check_etag` is the caller's expected version tag. When present, a
/// backend must fail with `XcapError::VersionMismatch` if the stored tag
/// differs (or the document is missing), and must do so atomically with
/// the write.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch a document; `Ok(None)` if it does not exist
    async fn get_document(
        &self,
        uri: &XcapUri,
        check_etag: Option<&str>,
    ) -> XcapResult<Option<Fetched>>;

    /// Create or replace a document
    async fn put_document(
        &self,
        uri: &XcapUri,
        document: &[u8],
        check_etag: Option<&str>,
    ) -> XcapResult<PutOutcome>;

    /// Remove a document; `XcapError::ResourceNotFound` if it does not exist
    async fn delete_document(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<()>;

    /// Watchers of the user owning `uri`
    async fn get_watchers(&self, uri: &XcapUri) -> XcapResult<Vec<Watcher>>;
}
