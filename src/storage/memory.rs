//! In-memory storage backend
//!
//! Keeps every document in a map guarded by a single lock. The version check
//! and the write happen under the same write guard, which is what makes
//! conditional puts atomic.

use super::{Fetched, PutOutcome, PutStatus, Storage, Watcher};
use crate::error::{XcapError, XcapResult};
use crate::uri::{XcapUri, XcapUser};
use crate::utils::generate_etag;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Vec<u8>,
    etag: String,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<String, StoredDocument>,
    watchers: HashMap<XcapUser, Vec<Watcher>>,
    revision: u64,
}

/// Storage backed by a process-local map
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the watcher list reported for `user`
    pub fn set_watchers(&self, user: XcapUser, watchers: Vec<Watcher>) {
        self.state.write().watchers.insert(user, watchers);
    }

    /// Stored bytes for `uri`, bypassing version checks
    pub fn raw_document(&self, uri: &XcapUri) -> Option<Vec<u8>> {
        self.state
            .read()
            .documents
            .get(&uri.document_key())
            .map(|d| d.data.clone())
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_version(stored: Option<&StoredDocument>, check_etag: Option<&str>) -> XcapResult<()> {
    match (check_etag, stored) {
        (None, _) => Ok(()),
        (Some("*"), Some(_)) => Ok(()),
        (Some(expected), Some(doc)) if doc.etag == expected => Ok(()),
        _ => Err(XcapError::VersionMismatch),
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_document(
        &self,
        uri: &XcapUri,
        check_etag: Option<&str>,
    ) -> XcapResult<Option<Fetched>> {
        let key = uri.document_key();
        let state = self.state.read();
        let stored = state.documents.get(&key);
        debug!("get {} (found={})", key, stored.is_some());

        let Some(doc) = stored else {
            return Ok(None);
        };
        check_version(Some(doc), check_etag)?;
        Ok(Some(Fetched {
            data: doc.data.clone(),
            etag: doc.etag.clone(),
        }))
    }

    async fn put_document(
        &self,
        uri: &XcapUri,
        document: &[u8],
        check_etag: Option<&str>,
    ) -> XcapResult<PutOutcome> {
        let key = uri.document_key();
        let mut state = self.state.write();
        check_version(state.documents.get(&key), check_etag)?;

        state.revision += 1;
        let etag = generate_etag(document, state.revision);
        let previous = state.documents.insert(
            key.clone(),
            StoredDocument {
                data: document.to_vec(),
                etag: etag.clone(),
            },
        );
        let status = if previous.is_some() {
            PutStatus::Replaced
        } else {
            PutStatus::Created
        };
        debug!("put {} -> {} ({:?})", key, etag, status);

        Ok(PutOutcome { etag, status })
    }

    async fn delete_document(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<()> {
        let key = uri.document_key();
        let mut state = self.state.write();
        let stored = state.documents.get(&key);
        if stored.is_none() && check_etag.is_none() {
            return Err(XcapError::ResourceNotFound(key));
        }
        check_version(stored, check_etag)?;
        state.documents.remove(&key);
        debug!("delete {}", key);
        Ok(())
    }

    async fn get_watchers(&self, uri: &XcapUri) -> XcapResult<Vec<Watcher>> {
        let user = uri
            .user()
            .ok_or_else(|| XcapError::ResourceNotFound(uri.document_key()))?;
        Ok(self
            .state
            .read()
            .watchers
            .get(user)
            .cloned()
            .unwrap_or_default())
    }
}
