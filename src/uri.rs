//! XCAP URIs
//!
//! ```text
//! <root>/<auid>/users/<xui>/<document path>[/~~/<node selector>][?xmlns(p=uri)...]
//! <root>/<auid>/global/<document path>[/~~/<node selector>]
//! ```

use crate::error::{XcapError, XcapResult};
use crate::selector::{NodeSelector, SelectorError};
use std::collections::BTreeMap;

/// Separator between the document selector and the node selector
pub const NODE_SELECTOR_SEPARATOR: &str = "/~~/";

/// XCAP user identifier (XUI)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XcapUser {
    pub username: String,
    pub domain: Option<String>,
}

impl XcapUser {
    /// Parse `sip:user@domain`, `user@domain` or a bare `user`
    pub fn parse(xui: &str) -> XcapResult<Self> {
        let bare = xui
            .strip_prefix("sip:")
            .or_else(|| xui.strip_prefix("sips:"))
            .unwrap_or(xui);
        let (username, domain) = match bare.rsplit_once('@') {
            Some((u, d)) => (u, Some(d)),
            None => (bare, None),
        };
        if username.is_empty() || domain.map(str::is_empty).unwrap_or(false) {
            return Err(XcapError::InvalidUri(format!("invalid XUI: {}", xui)));
        }
        Ok(XcapUser {
            username: username.to_string(),
            domain: domain.map(|d| d.to_ascii_lowercase()),
        })
    }
}

impl std::fmt::Display for XcapUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "sip:{}@{}", self.username, domain),
            None => write!(f, "sip:{}", self.username),
        }
    }
}

/// Which tree of the application the document lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentTree {
    Global,
    Users(XcapUser),
}

/// Application-relative location of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentSelector {
    pub tree: DocumentTree,
    /// Path below the tree (`index`, `dir/doc.xml`)
    pub path: String,
}

impl DocumentSelector {
    pub fn user(user: XcapUser, path: impl Into<String>) -> Self {
        DocumentSelector {
            tree: DocumentTree::Users(user),
            path: path.into(),
        }
    }

    pub fn global(path: impl Into<String>) -> Self {
        DocumentSelector {
            tree: DocumentTree::Global,
            path: path.into(),
        }
    }
}

/// Parsed XCAP URI
///
/// The node selector is kept as decoded text; callers parse it in the
/// context of the operation so that a malformed selector can be reported
/// as a missing resource or a missing parent, whichever applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XcapUri {
    pub application_id: String,
    pub document: DocumentSelector,
    pub node_selector: Option<String>,
    pub namespace_bindings: BTreeMap<String, String>,
}

impl XcapUri {
    pub fn new(application_id: impl Into<String>, document: DocumentSelector) -> Self {
        XcapUri {
            application_id: application_id.into(),
            document,
            node_selector: None,
            namespace_bindings: BTreeMap::new(),
        }
    }

    /// Address a node inside the document
    pub fn with_node_selector(mut self, selector: impl Into<String>) -> Self {
        self.node_selector = Some(selector.into());
        self
    }

    /// Declare a prefix for use in the node selector
    pub fn with_binding(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.namespace_bindings
            .insert(prefix.into(), namespace.into());
        self
    }

    /// Same document, no node selector
    pub fn document_uri(&self) -> XcapUri {
        XcapUri {
            application_id: self.application_id.clone(),
            document: self.document.clone(),
            node_selector: None,
            namespace_bindings: BTreeMap::new(),
        }
    }

    /// Split an absolute URI under `root` into its XCAP components
    pub fn parse(root: &str, uri: &str) -> XcapResult<Self> {
        let root = root.trim_end_matches('/');
        let relative = uri
            .strip_prefix(root)
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| XcapError::InvalidUri(format!("{} is not under {}", uri, root)))?;

        let (resource, query) = match relative.split_once('?') {
            Some((r, q)) => (r, Some(q)),
            None => (relative, None),
        };
        let (document_part, node_selector) = match resource.split_once(NODE_SELECTOR_SEPARATOR) {
            Some((d, n)) => (d, Some(format!("/{}", decode(n)?))),
            None => (resource, None),
        };

        let mut segments = document_part.trim_start_matches('/').splitn(3, '/');
        let application_id = decode(segments.next().unwrap_or_default())?;
        if application_id.is_empty() {
            return Err(XcapError::InvalidUri("missing application id".to_string()));
        }

        let document = match segments.next() {
            Some("global") => DocumentSelector::global(decode(segments.next().unwrap_or_default())?),
            Some("users") => {
                let rest = segments.next().unwrap_or_default();
                let (xui, path) = rest.split_once('/').unwrap_or((rest, ""));
                DocumentSelector::user(XcapUser::parse(&decode(xui)?)?, decode(path)?)
            }
            _ => {
                return Err(XcapError::InvalidUri(
                    "document tree must be 'global' or 'users'".to_string(),
                ))
            }
        };
        if document.path.is_empty() || document.path.ends_with('/') {
            return Err(XcapError::InvalidUri("missing document name".to_string()));
        }

        let namespace_bindings = match query {
            Some(q) => parse_bindings(&decode(q)?),
            None => BTreeMap::new(),
        };

        Ok(XcapUri {
            application_id,
            document,
            node_selector,
            namespace_bindings,
        })
    }

    /// Owning user, for documents in the users tree
    pub fn user(&self) -> Option<&XcapUser> {
        match &self.document.tree {
            DocumentTree::Users(user) => Some(user),
            DocumentTree::Global => None,
        }
    }

    /// Parse the node selector, if the URI has one
    pub fn parse_node_selector(&self) -> Option<Result<NodeSelector, SelectorError>> {
        self.node_selector
            .as_deref()
            .map(|s| NodeSelector::parse(s, self.namespace_bindings.clone()))
    }

    /// Key identifying the document in storage
    pub fn document_key(&self) -> String {
        match &self.document.tree {
            DocumentTree::Global => {
                format!("{}/global/{}", self.application_id, self.document.path)
            }
            DocumentTree::Users(user) => format!(
                "{}/users/{}/{}",
                self.application_id, user, self.document.path
            ),
        }
    }
}

impl std::fmt::Display for XcapUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.document_key())?;
        if let Some(selector) = &self.node_selector {
            write!(f, "/~~{}", selector)?;
        }
        Ok(())
    }
}

fn decode(text: &str) -> XcapResult<String> {
    urlencoding::decode(text)
        .map(|s| s.into_owned())
        .map_err(|e| XcapError::InvalidUri(e.to_string()))
}

/// Collect `xmlns(prefix=uri)` entries from a decoded query string
fn parse_bindings(query: &str) -> BTreeMap<String, String> {
    let mut bindings = BTreeMap::new();
    let mut rest = query;
    while let Some(start) = rest.find("xmlns(") {
        let body = &rest[start + "xmlns(".len()..];
        let Some(end) = body.find(')') else {
            break;
        };
        if let Some((prefix, uri)) = body[..end].split_once('=') {
            bindings.insert(prefix.trim().to_string(), uri.trim().to_string());
        }
        rest = &body[end + 1..];
    }
    bindings
}
