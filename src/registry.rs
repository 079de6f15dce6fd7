//! Application registry and request dispatch
//!
//! Built once at startup from the [`ServerConfig`]; read-only afterwards.
//! Maps each enabled AUID to its [`ApplicationUsage`] and routes a request to
//! the document, element, attribute or namespace-binding operation its URI
//! addresses.

use crate::appusage::{
    Application, ApplicationUsage, AuthorizationPolicy, SchemaCatalog, UsageContext,
    ATTRIBUTE_MIME_TYPE, ELEMENT_MIME_TYPE, NS_BINDINGS_MIME_TYPE,
};
use crate::config::ServerConfig;
use crate::error::{XcapError, XcapResult};
use crate::selector::TerminalSelector;
use crate::storage::{Fetched, PutOutcome, Storage};
use crate::uri::{XcapUri, XcapUser};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What part of a document a URI addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Document,
    Element,
    Attribute,
    NamespaceBindings,
}

impl Resource {
    /// Classify by node selector shape
    ///
    /// A selector that does not parse is routed as an element; the element
    /// operation then reports it as a missing resource or a missing parent.
    pub fn of(uri: &XcapUri) -> Self {
        match uri.parse_node_selector() {
            None => Resource::Document,
            Some(Ok(selector)) => match selector.terminal {
                None => Resource::Element,
                Some(TerminalSelector::Attribute(_)) => Resource::Attribute,
                Some(TerminalSelector::NamespaceBindings) => Resource::NamespaceBindings,
            },
            Some(Err(_)) => Resource::Element,
        }
    }
}

/// Successful read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub data: Vec<u8>,
    pub etag: String,
    pub mime_type: &'static str,
}

impl Reply {
    fn new(fetched: Fetched, mime_type: &'static str) -> Self {
        Reply {
            data: fetched.data,
            etag: fetched.etag,
            mime_type,
        }
    }
}

/// Builder for [`ApplicationRegistry`]
pub struct RegistryBuilder {
    config: ServerConfig,
    storage: Arc<dyn Storage>,
    schemas: SchemaCatalog,
    policies: Vec<(Application, Arc<dyn AuthorizationPolicy>)>,
}

impl RegistryBuilder {
    pub fn new(config: ServerConfig, storage: Arc<dyn Storage>) -> Self {
        RegistryBuilder {
            config,
            storage,
            schemas: SchemaCatalog::with_defaults(),
            policies: Vec::new(),
        }
    }

    /// Use a different schema catalog
    pub fn schemas(mut self, schemas: SchemaCatalog) -> Self {
        self.schemas = schemas;
        self
    }

    /// Override one application's authorization policy
    pub fn authorization(mut self, application: Application, policy: Arc<dyn AuthorizationPolicy>) -> Self {
        self.policies.push((application, policy));
        self
    }

    pub fn build(self) -> ApplicationRegistry {
        let enabled = self.config.applications.applications();
        let context = Arc::new(UsageContext::new(
            self.config.document_validation,
            self.schemas,
            enabled,
        ));

        let mut usages = HashMap::new();
        for &application in enabled {
            let mut usage =
                ApplicationUsage::new(application, Arc::clone(&self.storage), Arc::clone(&context));
            if let Some((_, policy)) = self.policies.iter().rev().find(|(app, _)| *app == application) {
                usage = usage.with_authorization(Arc::clone(policy));
            }
            usages.insert(application.id().to_string(), Arc::new(usage));
        }
        for (application, _) in &self.policies {
            if !enabled.contains(application) {
                warn!("authorization policy for disabled application {} ignored", application);
            }
        }

        let mut auids: Vec<&String> = usages.keys().collect();
        auids.sort();
        info!(
            "Application registry ready: {:?} (document validation {})",
            auids,
            if self.config.document_validation { "on" } else { "off" }
        );

        ApplicationRegistry {
            root: self.config.root,
            usages,
            context,
        }
    }
}

/// AUID → application usage, plus dispatch
pub struct ApplicationRegistry {
    root: String,
    usages: HashMap<String, Arc<ApplicationUsage>>,
    context: Arc<UsageContext>,
}

impl std::fmt::Debug for ApplicationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRegistry")
            .field("root", &self.root)
            .field("applications", &self.context.enabled())
            .finish()
    }
}

impl ApplicationRegistry {
    pub fn new(config: ServerConfig, storage: Arc<dyn Storage>) -> Self {
        RegistryBuilder::new(config, storage).build()
    }

    pub fn builder(config: ServerConfig, storage: Arc<dyn Storage>) -> RegistryBuilder {
        RegistryBuilder::new(config, storage)
    }

    /// XCAP root URI
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Parse a request URI relative to this server's root
    pub fn parse_uri(&self, uri: &str) -> XcapResult<XcapUri> {
        XcapUri::parse(&self.root, uri)
    }

    pub fn usage(&self, auid: &str) -> Option<&Arc<ApplicationUsage>> {
        self.usages.get(auid)
    }

    /// Usage for the application a URI names
    pub fn usage_for(&self, uri: &XcapUri) -> XcapResult<&Arc<ApplicationUsage>> {
        self.usage(&uri.application_id)
            .ok_or_else(|| XcapError::ApplicationNotFound(uri.application_id.clone()))
    }

    /// Default namespace of every enabled application, by AUID
    pub fn namespaces(&self) -> BTreeMap<&str, &str> {
        self.usages
            .values()
            .map(|usage| (usage.id(), usage.default_namespace()))
            .collect()
    }

    fn authorized(&self, user: Option<&XcapUser>, uri: &XcapUri) -> XcapResult<&Arc<ApplicationUsage>> {
        let usage = self.usage_for(uri)?;
        if !usage.is_authorized(user, uri) {
            debug!("{:?} is not authorized for {}", user.map(|u| u.to_string()), uri);
            return Err(XcapError::NotAuthorized);
        }
        Ok(usage)
    }

    /// Read whatever the URI addresses
    pub async fn get(
        &self,
        user: Option<&XcapUser>,
        uri: &XcapUri,
        check_etag: Option<&str>,
    ) -> XcapResult<Reply> {
        let usage = self.authorized(user, uri)?;
        let resource = Resource::of(uri);
        debug!("GET {} ({:?})", uri, resource);

        match resource {
            Resource::Document => Ok(Reply::new(
                usage.get_document(uri, check_etag).await?,
                usage.mime_type(),
            )),
            Resource::Element => Ok(Reply::new(
                usage.get_element(uri, check_etag).await?,
                ELEMENT_MIME_TYPE,
            )),
            Resource::Attribute => Ok(Reply::new(
                usage.get_attribute(uri, check_etag).await?,
                ATTRIBUTE_MIME_TYPE,
            )),
            Resource::NamespaceBindings => Ok(Reply::new(
                usage.get_ns_bindings(uri, check_etag).await?,
                NS_BINDINGS_MIME_TYPE,
            )),
        }
    }

    /// Create or replace whatever the URI addresses
    pub async fn put(
        &self,
        user: Option<&XcapUser>,
        uri: &XcapUri,
        body: &[u8],
        check_etag: Option<&str>,
    ) -> XcapResult<PutOutcome> {
        let usage = self.authorized(user, uri)?;
        let resource = Resource::of(uri);
        debug!("PUT {} ({:?}, {} bytes)", uri, resource, body.len());

        match resource {
            Resource::Document => usage.put_document(uri, body, check_etag).await,
            Resource::Element => usage.put_element(uri, body, check_etag).await,
            Resource::Attribute => usage.put_attribute(uri, body, check_etag).await,
            Resource::NamespaceBindings => Err(XcapError::MethodNotAllowed(
                "namespace bindings are read-only".to_string(),
            )),
        }
    }

    /// Remove whatever the URI addresses
    ///
    /// Returns the document's new version tag, or `None` once the whole
    /// document is gone.
    pub async fn delete(
        &self,
        user: Option<&XcapUser>,
        uri: &XcapUri,
        check_etag: Option<&str>,
    ) -> XcapResult<Option<String>> {
        let usage = self.authorized(user, uri)?;
        let resource = Resource::of(uri);
        debug!("DELETE {} ({:?})", uri, resource);

        match resource {
            Resource::Document => usage.delete_document(uri, check_etag).await.map(|()| None),
            Resource::Element => Ok(Some(usage.delete_element(uri, check_etag).await?.etag)),
            Resource::Attribute => Ok(Some(usage.delete_attribute(uri, check_etag).await?.etag)),
            Resource::NamespaceBindings => Err(XcapError::MethodNotAllowed(
                "namespace bindings are read-only".to_string(),
            )),
        }
    }
}
