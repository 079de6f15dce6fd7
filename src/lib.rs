//! # xcap-appusage - XCAP Application Usages
//!
//! The application-usage layer of an XCAP (RFC 4825) server. It enforces
//! per-application semantics when clients read or change stored XML
//! configuration documents:
//!
//! - **Sub-resource editing**: documents, elements, attributes and namespace
//!   bindings addressed by node selector, each turned into a read-modify-write
//!   of the whole document
//! - **Validation**: well-formedness, UTF-8, schema, and application
//!   constraints (resource-list uniqueness)
//! - **Optimistic concurrency**: every write carries the caller's expected
//!   version tag through to storage
//! - **Synthesized documents**: `xcap-caps` and `watchers`
//!
//! HTTP framing and durable storage live outside this crate; storage is
//! reached through the [`Storage`] trait.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use xcap_appusage::{ApplicationRegistry, MemoryStorage, ServerConfig, XcapResult, XcapUser};
//!
//! # async fn run() -> XcapResult<()> {
//! let registry = ApplicationRegistry::new(ServerConfig::default(), Arc::new(MemoryStorage::new()));
//! let alice = XcapUser::parse("sip:alice@example.com")?;
//!
//! let uri = registry.parse_uri(
//!     "http://localhost/xcap-root/resource-lists/users/sip:alice@example.com/index",
//! )?;
//! let body = br#"<?xml version="1.0" encoding="UTF-8"?>
//! <resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists"><list name="friends"/></resource-lists>"#;
//! let created = registry.put(Some(&alice), &uri, body, None).await?;
//!
//! // Add an entry by node selector, conditional on the version just written
//! let entry = registry.parse_uri(
//!     "http://localhost/xcap-root/resource-lists/users/sip:alice@example.com/index/~~/resource-lists/list%5b@name=%22friends%22%5d/entry",
//! )?;
//! registry
//!     .put(Some(&alice), &entry, br#"<entry uri="sip:bob@example.com"/>"#, Some(&created.etag))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod appusage;
pub mod config;
pub mod error;
pub mod registry;
pub mod selector;
pub mod storage;
pub mod uri;
pub mod utils;
pub mod xml;

pub use appusage::{
    AnyCaller, Application, ApplicationDescriptor, ApplicationUsage, AuthorizationPolicy, OwnerOnly,
    SchemaCatalog, SchemaValidator, UsageContext, XsdSchema,
};
pub use config::{EnabledApplications, ServerConfig};
pub use error::{XcapError, XcapResult};
pub use registry::{ApplicationRegistry, RegistryBuilder, Reply, Resource};
pub use selector::{NodeSelector, SelectorError};
pub use storage::{Fetched, MemoryStorage, PutOutcome, PutStatus, Storage, Watcher};
pub use uri::{DocumentSelector, DocumentTree, XcapUri, XcapUser};
