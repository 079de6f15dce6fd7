//! XCAP application usages
//!
//! An application usage couples an [`Application`] (AUID, default namespace,
//! MIME type, schema reference, structural constraints) with the storage
//! collaborator and turns every XCAP sub-resource operation into a
//! read-modify-write of the whole document:
//!
//! ```text
//! fetch document ─▶ locate / edit by node selector ─▶ verify ─▶ write back
//! ```
//!
//! The verification step re-reads the edited document at the request's
//! address: after a put the address must return exactly what was put, after
//! a delete it must return nothing. Otherwise the write is abandoned with
//! `CannotInsert` / `CannotDelete`.

mod capabilities;
mod resource_lists;
pub mod validator;
mod watchers;

pub use validator::{validate_document, SchemaCatalog, SchemaValidator, XsdSchema};

use crate::error::{XcapError, XcapResult};
use crate::selector::{NodeSelector, QName, TerminalSelector};
use crate::storage::{Fetched, PutOutcome, PutStatus, Storage};
use crate::uri::{XcapUri, XcapUser};
use crate::utils::content_etag;
use crate::xml::element::{self, find_attribute, locate_path};
use crate::xml::tree::{escape_attribute, is_xml_char};
use crate::xml::{SelectorContext, XmlDocument};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, error};

pub use capabilities::XCAP_CAPS_NS;

pub const PRES_RULES_NS: &str = "urn:ietf:params:xml:ns:pres-rules";
pub const RESOURCE_LISTS_NS: &str = "urn:ietf:params:xml:ns:resource-lists";
pub const RLS_SERVICES_NS: &str = "urn:ietf:params:xml:ns:rls-services";
pub const PIDF_NS: &str = "urn:ietf:params:xml:ns:pidf";
pub const WATCHERS_NS: &str = "http://openxcap.org/ns/watchers";
pub const TEST_APP_NS: &str = "test-app";

/// MIME type of an element body
pub const ELEMENT_MIME_TYPE: &str = "application/xcap-el+xml";
/// MIME type of an attribute body
pub const ATTRIBUTE_MIME_TYPE: &str = "application/xcap-att+xml";
/// MIME type of a namespace-bindings body
pub const NS_BINDINGS_MIME_TYPE: &str = "application/xcap-ns+xml";

/// Static facts about one application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationDescriptor {
    pub id: &'static str,
    pub default_namespace: &'static str,
    pub mime_type: &'static str,
    pub schema_ref: Option<&'static str>,
}

const XCAP_CAPS: ApplicationDescriptor = ApplicationDescriptor {
    id: "xcap-caps",
    default_namespace: XCAP_CAPS_NS,
    mime_type: "application/xcap-caps+xml",
    schema_ref: None,
};

const PRES_RULES: ApplicationDescriptor = ApplicationDescriptor {
    id: "pres-rules",
    default_namespace: PRES_RULES_NS,
    mime_type: "application/auth-policy+xml",
    schema_ref: Some("common-policy.xsd"),
};

const OMA_PRES_RULES: ApplicationDescriptor = ApplicationDescriptor {
    id: "org.openmobilealliance.pres-rules",
    ..PRES_RULES
};

const RESOURCE_LISTS: ApplicationDescriptor = ApplicationDescriptor {
    id: "resource-lists",
    default_namespace: RESOURCE_LISTS_NS,
    mime_type: "application/resource-lists+xml",
    schema_ref: Some("resource-lists.xsd"),
};

const RLS_SERVICES: ApplicationDescriptor = ApplicationDescriptor {
    id: "rls-services",
    default_namespace: RLS_SERVICES_NS,
    mime_type: "application/rls-services+xml",
    schema_ref: Some("rls-services.xsd"),
};

const PIDF_MANIPULATION: ApplicationDescriptor = ApplicationDescriptor {
    id: "pidf-manipulation",
    default_namespace: PIDF_NS,
    mime_type: "application/pidf+xml",
    schema_ref: Some("pidf.xsd"),
};

const WATCHERS: ApplicationDescriptor = ApplicationDescriptor {
    id: "watchers",
    default_namespace: WATCHERS_NS,
    mime_type: "application/xml",
    schema_ref: Some("watchers.xsd"),
};

const TEST_APP: ApplicationDescriptor = ApplicationDescriptor {
    id: "test-app",
    default_namespace: TEST_APP_NS,
    mime_type: "application/test-app+xml",
    schema_ref: None,
};

/// The supported XCAP applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Application {
    XcapCaps,
    PresRules,
    OmaPresRules,
    ResourceLists,
    RlsServices,
    PidfManipulation,
    Watchers,
    /// Schema-free application for protocol conformance tests
    TestApp,
}

impl Application {
    /// Applications enabled by `applications = "all"`
    pub const PRODUCTION: [Application; 7] = [
        Application::XcapCaps,
        Application::PresRules,
        Application::OmaPresRules,
        Application::ResourceLists,
        Application::RlsServices,
        Application::PidfManipulation,
        Application::Watchers,
    ];

    pub fn from_auid(auid: &str) -> Option<Self> {
        Self::PRODUCTION
            .into_iter()
            .chain(std::iter::once(Application::TestApp))
            .find(|app| app.id() == auid)
    }

    pub fn descriptor(self) -> &'static ApplicationDescriptor {
        match self {
            Application::XcapCaps => &XCAP_CAPS,
            Application::PresRules => &PRES_RULES,
            Application::OmaPresRules => &OMA_PRES_RULES,
            Application::ResourceLists => &RESOURCE_LISTS,
            Application::RlsServices => &RLS_SERVICES,
            Application::PidfManipulation => &PIDF_MANIPULATION,
            Application::Watchers => &WATCHERS,
            Application::TestApp => &TEST_APP,
        }
    }

    pub fn id(self) -> &'static str {
        self.descriptor().id
    }

    pub fn default_namespace(self) -> &'static str {
        self.descriptor().default_namespace
    }

    pub fn mime_type(self) -> &'static str {
        self.descriptor().mime_type
    }

    pub fn schema_ref(self) -> Option<&'static str> {
        self.descriptor().schema_ref
    }

    /// Documents of read-only applications are synthesized, never stored
    pub fn is_read_only(self) -> bool {
        matches!(self, Application::XcapCaps | Application::Watchers)
    }

    /// Structural rules beyond the schema
    pub fn check_additional_constraints(self, document: &XmlDocument) -> XcapResult<()> {
        match self {
            Application::ResourceLists => {
                resource_lists::check_uniqueness(document, &[RESOURCE_LISTS_NS])
            }
            Application::RlsServices => {
                resource_lists::check_uniqueness(document, &[RLS_SERVICES_NS, RESOURCE_LISTS_NS])
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Decides whether a caller may access a document
pub trait AuthorizationPolicy: Send + Sync {
    fn is_authorized(&self, user: Option<&XcapUser>, uri: &XcapUri) -> bool;
}

/// Callers may access the documents in their own users tree only
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOnly;

impl AuthorizationPolicy for OwnerOnly {
    fn is_authorized(&self, user: Option<&XcapUser>, uri: &XcapUri) -> bool {
        match (user, uri.user()) {
            (Some(caller), Some(owner)) => caller == owner,
            _ => false,
        }
    }
}

/// Any identified caller, any document
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyCaller;

impl AuthorizationPolicy for AnyCaller {
    fn is_authorized(&self, user: Option<&XcapUser>, _uri: &XcapUri) -> bool {
        user.is_some()
    }
}

/// Settings shared by every usage of one registry
#[derive(Debug, Clone)]
pub struct UsageContext {
    /// Run schema validation on document writes
    pub document_validation: bool,
    pub schemas: SchemaCatalog,
    enabled: Vec<(String, String)>,
}

impl UsageContext {
    pub fn new(document_validation: bool, schemas: SchemaCatalog, enabled: &[Application]) -> Self {
        UsageContext {
            document_validation,
            schemas,
            enabled: enabled
                .iter()
                .map(|app| (app.id().to_string(), app.default_namespace().to_string()))
                .collect(),
        }
    }

    /// `(auid, default namespace)` of every enabled application
    pub fn enabled(&self) -> &[(String, String)] {
        &self.enabled
    }
}

/// Whether a malformed or unresolvable selector means "not found" or "no parent"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Read,
    Write,
}

/// One application bound to its storage and shared settings
pub struct ApplicationUsage {
    application: Application,
    storage: Arc<dyn Storage>,
    context: Arc<UsageContext>,
    authorization: Arc<dyn AuthorizationPolicy>,
    capabilities: OnceCell<Fetched>,
}

impl std::fmt::Debug for ApplicationUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationUsage")
            .field("application", &self.application)
            .finish_non_exhaustive()
    }
}

impl ApplicationUsage {
    pub fn new(application: Application, storage: Arc<dyn Storage>, context: Arc<UsageContext>) -> Self {
        let authorization: Arc<dyn AuthorizationPolicy> = match application {
            Application::XcapCaps => Arc::new(AnyCaller),
            _ => Arc::new(OwnerOnly),
        };
        ApplicationUsage {
            application,
            storage,
            context,
            authorization,
            capabilities: OnceCell::new(),
        }
    }

    /// Replace the authorization policy
    pub fn with_authorization(mut self, policy: Arc<dyn AuthorizationPolicy>) -> Self {
        self.authorization = policy;
        self
    }

    pub fn application(&self) -> Application {
        self.application
    }

    pub fn id(&self) -> &'static str {
        self.application.id()
    }

    pub fn default_namespace(&self) -> &'static str {
        self.application.default_namespace()
    }

    pub fn mime_type(&self) -> &'static str {
        self.application.mime_type()
    }

    pub fn schema_ref(&self) -> Option<&'static str> {
        self.application.schema_ref()
    }

    pub fn is_authorized(&self, user: Option<&XcapUser>, uri: &XcapUri) -> bool {
        self.authorization.is_authorized(user, uri)
    }

    /// Run the validation pipeline over a document body
    pub fn validate_document(&self, document: &[u8]) -> XcapResult<()> {
        validate_document(document, self.application, &self.context)
    }

    // ---------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------

    /// Current document, or `None` if there is none
    pub async fn fetch_document(
        &self,
        uri: &XcapUri,
        check_etag: Option<&str>,
    ) -> XcapResult<Option<Fetched>> {
        let fetched = match self.application {
            Application::XcapCaps => Some(self.capabilities_document()?.clone()),
            Application::Watchers => {
                let watchers = self.storage.get_watchers(uri).await?;
                let data = watchers::render(&watchers)?;
                let etag = content_etag(&data);
                Some(Fetched { data, etag })
            }
            _ => return self.storage.get_document(uri, check_etag).await,
        };
        if let (Some(doc), Some(expected)) = (&fetched, check_etag) {
            if expected != "*" && expected != doc.etag {
                return Err(XcapError::VersionMismatch);
            }
        }
        Ok(fetched)
    }

    pub async fn get_document(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<Fetched> {
        self.fetch_document(uri, check_etag)
            .await?
            .ok_or_else(|| XcapError::ResourceNotFound(uri.document_key()))
    }

    /// Validate and store a whole document
    pub async fn put_document(
        &self,
        uri: &XcapUri,
        document: &[u8],
        check_etag: Option<&str>,
    ) -> XcapResult<PutOutcome> {
        self.ensure_writable()?;
        self.validate_document(document)?;
        self.storage.put_document(uri, document, check_etag).await
    }

    pub async fn delete_document(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<()> {
        self.ensure_writable()?;
        self.storage.delete_document(uri, check_etag).await
    }

    fn capabilities_document(&self) -> XcapResult<&Fetched> {
        self.capabilities.get_or_try_init(|| {
            let data = capabilities::render(self.context.enabled())?;
            debug!("synthesized xcap-caps document ({} bytes)", data.len());
            let etag = content_etag(&data);
            Ok(Fetched { data, etag })
        })
    }

    fn ensure_writable(&self) -> XcapResult<()> {
        if self.application.is_read_only() {
            error!("rejecting mutation of read-only application {}", self.id());
            return Err(XcapError::ReadOnly(self.id().to_string()));
        }
        Ok(())
    }

    /// Store an edited document without re-running the validation pipeline
    async fn store_document(
        &self,
        uri: &XcapUri,
        document: &[u8],
        check_etag: Option<&str>,
    ) -> XcapResult<PutOutcome> {
        self.storage.put_document(uri, document, check_etag).await
    }

    // ---------------------------------------------------------------
    // Elements
    // ---------------------------------------------------------------

    pub async fn get_element(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<Fetched> {
        let selector = self.node_selector(uri, Intent::Read)?;
        let current = self.get_document(uri, check_etag).await?;
        let ctx = SelectorContext::new(self.default_namespace(), &selector.bindings);

        let found = element::locate(document_text(&current)?, &selector.element, &ctx)
            .ok_or_else(|| not_found(uri))?;
        Ok(Fetched {
            data: found.into_bytes(),
            etag: current.etag,
        })
    }

    /// Insert or replace the element the URI addresses
    pub async fn put_element(
        &self,
        uri: &XcapUri,
        fragment: &[u8],
        check_etag: Option<&str>,
    ) -> XcapResult<PutOutcome> {
        self.ensure_writable()?;
        let fragment = std::str::from_utf8(fragment)
            .ok()
            .filter(|text| XmlDocument::parse_fragment(text).is_ok())
            .ok_or(XcapError::NotXmlFragment)?;

        let selector = self.node_selector(uri, Intent::Write)?;
        let current = self
            .fetch_document(uri, check_etag)
            .await?
            .ok_or(XcapError::NoParent)?;
        let ctx = SelectorContext::new(self.default_namespace(), &selector.bindings);

        let fixed = element::fix_star(&selector.element, fragment);
        let (new_document, created) =
            element::insert_or_replace(document_text(&current)?, &fixed, fragment, &ctx)
                .ok_or(XcapError::NoParent)?;

        match element::locate(&new_document, &selector.element, &ctx) {
            Some(found) if found.trim() == fragment.trim() => {}
            _ => {
                error!("{}: element put would not be readable at the same address", uri);
                return Err(XcapError::CannotInsert);
            }
        }

        let outcome = self
            .put_document(uri, new_document.as_bytes(), check_etag)
            .await?;
        Ok(if created { outcome.created() } else { outcome })
    }

    pub async fn delete_element(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<PutOutcome> {
        self.ensure_writable()?;
        let selector = self.node_selector(uri, Intent::Read)?;
        let current = self.get_document(uri, check_etag).await?;
        let ctx = SelectorContext::new(self.default_namespace(), &selector.bindings);

        let new_document = element::delete(document_text(&current)?, &selector.element, &ctx)
            .ok_or_else(|| not_found(uri))?;
        if element::find(&new_document, &selector.element, &ctx) {
            error!("{}: element delete would leave a node at the same address", uri);
            return Err(XcapError::CannotDelete);
        }

        self.put_document(uri, new_document.as_bytes(), check_etag).await
    }

    // ---------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------

    pub async fn get_attribute(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<Fetched> {
        let selector = self.node_selector(uri, Intent::Read)?;
        let name = selector.attribute().ok_or_else(|| not_found(uri))?;
        let current = self.get_document(uri, check_etag).await?;
        let document = parse_stored(&current)?;
        let ctx = SelectorContext::new(self.default_namespace(), &selector.bindings);

        let value = attribute_value(&document, &selector, name, &ctx).ok_or_else(|| not_found(uri))?;
        Ok(Fetched {
            data: value.into_bytes(),
            etag: current.etag,
        })
    }

    /// Set the attribute the URI addresses
    ///
    /// The body is the attribute's value as text. The edited document is
    /// written back without running the validation pipeline again.
    pub async fn put_attribute(
        &self,
        uri: &XcapUri,
        value: &[u8],
        check_etag: Option<&str>,
    ) -> XcapResult<PutOutcome> {
        self.ensure_writable()?;
        let value = std::str::from_utf8(value).map_err(|_| XcapError::NotXmlAttributeValue)?;
        if !value.chars().all(is_xml_char) {
            return Err(XcapError::NotXmlAttributeValue);
        }

        let selector = self.node_selector(uri, Intent::Write)?;
        let name = selector.attribute().ok_or(XcapError::NoParent)?;
        let current = self
            .fetch_document(uri, check_etag)
            .await?
            .ok_or(XcapError::NoParent)?;
        let mut document = parse_stored(&current)?;
        let ctx = SelectorContext::new(self.default_namespace(), &selector.bindings);

        let path = locate_path(&document, &selector.element, &ctx).ok_or(XcapError::NoParent)?;
        let scope = document.scope_at(&path).ok_or(XcapError::NoParent)?;
        let target = document.root_mut().descendant_mut(&path).ok_or(XcapError::NoParent)?;

        let existing = find_attribute(target, &scope, name, &ctx).map(str::to_string);
        let created = existing.is_none();
        let qname = match existing {
            Some(qname) => qname,
            None => {
                let (qname, declaration) = new_attribute_name(name, &scope, &ctx)?;
                if let Some((attr, namespace)) = declaration {
                    target.set_attribute(&attr, &namespace);
                }
                qname
            }
        };
        target.set_attribute(&qname, value);

        let new_document = document.to_xml();
        let reread = XmlDocument::parse(&new_document).map_err(|_| XcapError::CannotInsert)?;
        if attribute_value(&reread, &selector, name, &ctx).as_deref() != Some(value) {
            error!("{}: attribute put would not be readable at the same address", uri);
            return Err(XcapError::CannotInsert);
        }

        let outcome = self
            .store_document(uri, new_document.as_bytes(), check_etag)
            .await?;
        Ok(if created { outcome.created() } else { outcome })
    }

    pub async fn delete_attribute(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<PutOutcome> {
        self.ensure_writable()?;
        let selector = self.node_selector(uri, Intent::Read)?;
        let name = selector.attribute().ok_or_else(|| not_found(uri))?;
        let current = self.get_document(uri, check_etag).await?;
        let mut document = parse_stored(&current)?;
        let ctx = SelectorContext::new(self.default_namespace(), &selector.bindings);

        let path = locate_path(&document, &selector.element, &ctx).ok_or_else(|| not_found(uri))?;
        let scope = document.scope_at(&path).ok_or_else(|| not_found(uri))?;
        let target = document
            .root_mut()
            .descendant_mut(&path)
            .ok_or_else(|| not_found(uri))?;
        let qname = find_attribute(target, &scope, name, &ctx)
            .map(str::to_string)
            .ok_or_else(|| not_found(uri))?;
        target.remove_attribute(&qname);

        let new_document = document.to_xml();
        let reread = XmlDocument::parse(&new_document).map_err(|_| XcapError::CannotDelete)?;
        if attribute_value(&reread, &selector, name, &ctx).is_some() {
            error!("{}: attribute delete would leave a value at the same address", uri);
            return Err(XcapError::CannotDelete);
        }

        self.store_document(uri, new_document.as_bytes(), check_etag)
            .await
            .map(|outcome| PutOutcome {
                status: PutStatus::Replaced,
                ..outcome
            })
    }

    // ---------------------------------------------------------------
    // Namespace bindings
    // ---------------------------------------------------------------

    /// Every namespace binding in scope at the addressed element
    ///
    /// Returned as an empty element with the addressed element's name that
    /// declares each binding, nearest declaration winning.
    pub async fn get_ns_bindings(&self, uri: &XcapUri, check_etag: Option<&str>) -> XcapResult<Fetched> {
        let selector = self.node_selector(uri, Intent::Read)?;
        if selector.terminal != Some(TerminalSelector::NamespaceBindings) {
            return Err(not_found(uri));
        }
        let current = self.get_document(uri, check_etag).await?;
        let document = parse_stored(&current)?;
        let ctx = SelectorContext::new(self.default_namespace(), &selector.bindings);

        let path = locate_path(&document, &selector.element, &ctx).ok_or_else(|| not_found(uri))?;
        let target = document.root().descendant(&path).ok_or_else(|| not_found(uri))?;
        let scope = document.scope_at(&path).ok_or_else(|| not_found(uri))?;

        let mut out = format!("<{}", target.name());
        for (prefix, namespace) in scope.effective() {
            let namespace = escape_attribute(&namespace);
            match prefix {
                Some(prefix) => out.push_str(&format!(" xmlns:{}=\"{}\"", prefix, namespace)),
                None => out.push_str(&format!(" xmlns=\"{}\"", namespace)),
            }
        }
        out.push_str("/>");

        Ok(Fetched {
            data: out.into_bytes(),
            etag: current.etag,
        })
    }

    fn node_selector(&self, uri: &XcapUri, intent: Intent) -> XcapResult<NodeSelector> {
        let unusable = || match intent {
            Intent::Read => not_found(uri),
            Intent::Write => XcapError::NoParent,
        };
        match uri.parse_node_selector() {
            Some(Ok(selector)) => Ok(selector),
            Some(Err(e)) => {
                debug!("{}: unusable node selector: {}", uri, e);
                Err(unusable())
            }
            None => Err(unusable()),
        }
    }
}

fn not_found(uri: &XcapUri) -> XcapError {
    XcapError::ResourceNotFound(uri.to_string())
}

fn document_text(fetched: &Fetched) -> XcapResult<&str> {
    std::str::from_utf8(&fetched.data)
        .map_err(|e| XcapError::Storage(format!("stored document is not UTF-8: {}", e)))
}

fn parse_stored(fetched: &Fetched) -> XcapResult<XmlDocument> {
    XmlDocument::parse(document_text(fetched)?)
        .map_err(|e| XcapError::Storage(format!("stored document is not well-formed: {}", e)))
}

/// Value of the selected attribute on the single element the selector admits
fn attribute_value(
    document: &XmlDocument,
    selector: &NodeSelector,
    name: &QName,
    ctx: &SelectorContext<'_>,
) -> Option<String> {
    let path = locate_path(document, &selector.element, ctx)?;
    let target = document.root().descendant(&path)?;
    let scope = document.scope_at(&path)?;
    let qname = find_attribute(target, &scope, name, ctx)?;
    target.attribute(qname).map(|v| v.into_owned())
}

/// Qualified name for a new attribute, plus a declaration to add if needed
fn new_attribute_name(
    name: &QName,
    scope: &crate::xml::NamespaceScope,
    ctx: &SelectorContext<'_>,
) -> XcapResult<(String, Option<(String, String)>)> {
    let Some(prefix) = &name.prefix else {
        return Ok((name.local.clone(), None));
    };
    let namespace = ctx.bindings.get(prefix).ok_or(XcapError::NoParent)?;

    let in_scope = scope
        .effective()
        .into_iter()
        .find_map(|(p, ns)| p.filter(|_| &ns == namespace));
    if let Some(existing) = in_scope {
        return Ok((format!("{}:{}", existing, name.local), None));
    }
    if scope.resolve(Some(prefix.as_str())).is_some() {
        return Err(XcapError::CannotInsert);
    }
    Ok((
        format!("{}:{}", prefix, name.local),
        Some((format!("xmlns:{}", prefix), namespace.clone())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::uri::DocumentSelector;

    fn usage(application: Application) -> (ApplicationUsage, MemoryStorage) {
        let storage = MemoryStorage::new();
        let context = Arc::new(UsageContext::new(
            true,
            SchemaCatalog::with_defaults(),
            &Application::PRODUCTION,
        ));
        (
            ApplicationUsage::new(application, Arc::new(storage.clone()), context),
            storage,
        )
    }

    fn alice() -> XcapUser {
        XcapUser::parse("sip:alice@example.com").unwrap()
    }

    fn doc_uri(auid: &str) -> XcapUri {
        XcapUri::new(auid, DocumentSelector::user(alice(), "index"))
    }

    const LISTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="friends">
    <entry uri="sip:bob@example.com"/>
  </list>
</resource-lists>"#;

    #[test]
    fn test_descriptors() {
        assert_eq!(Application::from_auid("resource-lists"), Some(Application::ResourceLists));
        assert_eq!(Application::from_auid("test-app"), Some(Application::TestApp));
        assert_eq!(Application::from_auid("nope"), None);
        assert_eq!(Application::OmaPresRules.default_namespace(), PRES_RULES_NS);
        assert_eq!(Application::OmaPresRules.schema_ref(), Some("common-policy.xsd"));
        assert_eq!(Application::Watchers.mime_type(), "application/xml");
        assert!(Application::TestApp.schema_ref().is_none());
        assert!(!Application::PRODUCTION.contains(&Application::TestApp));
    }

    #[test]
    fn test_owner_only_policy() {
        let (usage, _) = usage(Application::ResourceLists);
        let bob = XcapUser::parse("sip:bob@example.com").unwrap();
        assert!(usage.is_authorized(Some(&alice()), &doc_uri("resource-lists")));
        assert!(!usage.is_authorized(Some(&bob), &doc_uri("resource-lists")));
        assert!(!usage.is_authorized(None, &doc_uri("resource-lists")));

        let global = XcapUri::new("resource-lists", DocumentSelector::global("index"));
        assert!(!usage.is_authorized(Some(&alice()), &global));
    }

    #[test]
    fn test_policy_override() {
        let (usage, _) = usage(Application::ResourceLists);
        let usage = usage.with_authorization(Arc::new(AnyCaller));
        let global = XcapUri::new("resource-lists", DocumentSelector::global("index"));
        assert!(usage.is_authorized(Some(&alice()), &global));
    }

    #[tokio::test]
    async fn test_put_element_replaces_and_inserts() {
        let (usage, storage) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        usage.put_document(&uri, LISTS.as_bytes(), None).await.unwrap();

        let entry = uri
            .clone()
            .with_node_selector("/resource-lists/list[@name=\"friends\"]/entry[@uri=\"sip:carol@example.com\"]");
        let fragment = r#"<entry uri="sip:carol@example.com"/>"#;
        let outcome = usage.put_element(&entry, fragment.as_bytes(), None).await.unwrap();
        assert_eq!(outcome.status, PutStatus::Created);

        let stored = String::from_utf8(storage.raw_document(&uri).unwrap()).unwrap();
        assert!(stored.contains("<entry uri=\"sip:bob@example.com\"/>"));
        assert!(stored.contains(fragment));

        let outcome = usage.put_element(&entry, fragment.as_bytes(), None).await.unwrap();
        assert_eq!(outcome.status, PutStatus::Replaced);

        let got = usage.get_element(&entry, None).await.unwrap();
        assert_eq!(got.data, fragment.as_bytes());
        assert_eq!(got.etag, outcome.etag);
    }

    #[tokio::test]
    async fn test_put_element_cannot_insert() {
        let (usage, _) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        usage.put_document(&uri, LISTS.as_bytes(), None).await.unwrap();

        // Selector promises uri="sip:x", body carries a different uri.
        let entry = uri
            .clone()
            .with_node_selector("/resource-lists/list[@name=\"friends\"]/entry[@uri=\"sip:x@example.com\"]");
        let result = usage
            .put_element(&entry, br#"<entry uri="sip:y@example.com"/>"#, None)
            .await;
        assert!(matches!(result, Err(XcapError::CannotInsert)));
    }

    #[tokio::test]
    async fn test_put_element_rejects_bad_fragment() {
        let (usage, _) = usage(Application::ResourceLists);
        let entry = doc_uri("resource-lists").with_node_selector("/resource-lists/list");
        let result = usage.put_element(&entry, b"<list><oops></list>", None).await;
        assert!(matches!(result, Err(XcapError::NotXmlFragment)));
    }

    #[tokio::test]
    async fn test_delete_element() {
        let (usage, _) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        usage.put_document(&uri, LISTS.as_bytes(), None).await.unwrap();

        let entry = uri
            .clone()
            .with_node_selector("/resource-lists/list[@name=\"friends\"]/entry");
        usage.delete_element(&entry, None).await.unwrap();
        assert!(matches!(
            usage.get_element(&entry, None).await,
            Err(XcapError::ResourceNotFound(_))
        ));
        assert!(matches!(
            usage.delete_element(&entry, None).await,
            Err(XcapError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_positional_delete_cannot_delete() {
        let (usage, _) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="a"/>
  <list name="b"/>
</resource-lists>"#;
        usage.put_document(&uri, body.as_bytes(), None).await.unwrap();

        // Removing the first list shifts the second one into position 1.
        let first = uri.clone().with_node_selector("/resource-lists/list[1]");
        assert!(matches!(
            usage.delete_element(&first, None).await,
            Err(XcapError::CannotDelete)
        ));
    }

    #[tokio::test]
    async fn test_attribute_operations() {
        let (usage, _) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        usage.put_document(&uri, LISTS.as_bytes(), None).await.unwrap();

        let attr = uri
            .clone()
            .with_node_selector("/resource-lists/list[@name=\"friends\"]/@display");
        assert!(matches!(
            usage.get_attribute(&attr, None).await,
            Err(XcapError::ResourceNotFound(_))
        ));

        let outcome = usage.put_attribute(&attr, b"My <Friends>", None).await.unwrap();
        assert_eq!(outcome.status, PutStatus::Created);
        let got = usage.get_attribute(&attr, None).await.unwrap();
        assert_eq!(got.data, b"My <Friends>");

        let outcome = usage.put_attribute(&attr, b"Pals", None).await.unwrap();
        assert_eq!(outcome.status, PutStatus::Replaced);

        usage.delete_attribute(&attr, None).await.unwrap();
        assert!(matches!(
            usage.delete_attribute(&attr, None).await,
            Err(XcapError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attribute_put_changing_its_own_predicate() {
        let (usage, _) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        usage.put_document(&uri, LISTS.as_bytes(), None).await.unwrap();

        let attr = uri
            .clone()
            .with_node_selector("/resource-lists/list[@name=\"friends\"]/@name");
        assert!(matches!(
            usage.put_attribute(&attr, b"family", None).await,
            Err(XcapError::CannotInsert)
        ));
    }

    #[tokio::test]
    async fn test_prefixed_attribute_gets_declaration() {
        let (usage, storage) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        usage.put_document(&uri, LISTS.as_bytes(), None).await.unwrap();

        let attr = uri
            .clone()
            .with_binding("x", "urn:example:extra")
            .with_node_selector("/resource-lists/list[@name=\"friends\"]/@x:color");
        usage.put_attribute(&attr, b"blue", None).await.unwrap();

        let stored = String::from_utf8(storage.raw_document(&uri).unwrap()).unwrap();
        assert!(stored.contains("xmlns:x=\"urn:example:extra\""));
        assert!(stored.contains("x:color=\"blue\""));
        assert_eq!(usage.get_attribute(&attr, None).await.unwrap().data, b"blue");
    }

    #[tokio::test]
    async fn test_ns_bindings() {
        let (usage, _) = usage(Application::ResourceLists);
        let uri = doc_uri("resource-lists");
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists" xmlns:a="urn:a">
  <list name="l" xmlns:b="urn:b" xmlns:a="urn:a2"/>
</resource-lists>"#;
        usage.put_document(&uri, body.as_bytes(), None).await.unwrap();

        let ns = uri
            .clone()
            .with_node_selector("/resource-lists/list/namespace::*");
        let got = usage.get_ns_bindings(&ns, None).await.unwrap();
        assert_eq!(
            String::from_utf8(got.data).unwrap(),
            r#"<list xmlns="urn:ietf:params:xml:ns:resource-lists" xmlns:a="urn:a2" xmlns:b="urn:b"/>"#
        );
    }

    #[tokio::test]
    async fn test_capabilities_cached() {
        let (usage, _) = usage(Application::XcapCaps);
        let uri = XcapUri::new("xcap-caps", DocumentSelector::global("index"));
        let first = usage.get_document(&uri, None).await.unwrap();
        let second = usage.get_document(&uri, None).await.unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first.data).unwrap();
        assert!(text.contains("<auid>resource-lists</auid>"));
        assert!(!text.contains("test-app"));

        assert!(matches!(
            usage.put_document(&uri, b"<xcap-caps/>", None).await,
            Err(XcapError::ReadOnly(_))
        ));
        assert!(matches!(
            usage.get_document(&uri, Some("stale")).await,
            Err(XcapError::VersionMismatch)
        ));
    }

    #[tokio::test]
    async fn test_watchers_read_only() {
        let (usage, storage) = usage(Application::Watchers);
        let uri = doc_uri("watchers");
        let mut watcher = crate::storage::Watcher::new();
        watcher.insert("id".to_string(), "sip:bob@example.com".to_string());
        watcher.insert("status".to_string(), "active".to_string());
        storage.set_watchers(alice(), vec![watcher]);

        let doc = usage.get_document(&uri, None).await.unwrap();
        let text = String::from_utf8(doc.data).unwrap();
        assert!(text.contains("http://openxcap.org/ns/watchers"));
        assert!(text.contains("sip:bob@example.com"));

        let element = uri.clone().with_node_selector("/watchers/watcher");
        assert!(matches!(
            usage.put_element(&element, b"not even xml", None).await,
            Err(XcapError::ReadOnly(_))
        ));
        assert!(matches!(
            usage.delete_document(&uri, None).await,
            Err(XcapError::ReadOnly(_))
        ));
    }
}
