//! Element selection and editing
//!
//! Evaluates an [`ElementSelector`] against an [`XmlDocument`] and performs
//! the whole-document edits XCAP needs: locate, insert-or-replace and delete.
//! Every edit works on a freshly parsed copy and returns the re-serialized
//! document; nothing here touches storage.

use crate::selector::{ElementSelector, NameTest, QName, Step};
use crate::xml::tree::{append_child, Element, NamespaceScope, Node, XmlDocument};
use std::collections::BTreeMap;

/// Child-index path from the root element to a located element
pub type ElementPath = Vec<usize>;

/// How selector names resolve to namespaces
#[derive(Debug, Clone, Copy)]
pub struct SelectorContext<'a> {
    /// Namespace of unprefixed element names (the application's)
    pub default_namespace: &'a str,
    /// Prefix bindings declared by the request
    pub bindings: &'a BTreeMap<String, String>,
}

impl<'a> SelectorContext<'a> {
    pub fn new(default_namespace: &'a str, bindings: &'a BTreeMap<String, String>) -> Self {
        SelectorContext {
            default_namespace,
            bindings,
        }
    }

    fn element_namespace(&self, name: &QName) -> Option<&'a str> {
        match &name.prefix {
            None => Some(self.default_namespace),
            Some(prefix) => self.bindings.get(prefix).map(String::as_str),
        }
    }

    /// Namespace of an attribute name; unprefixed attributes have none
    pub fn attribute_namespace(&self, name: &QName) -> Option<Option<&'a str>> {
        match &name.prefix {
            None => Some(None),
            Some(prefix) => self.bindings.get(prefix).map(|ns| Some(ns.as_str())),
        }
    }
}

/// Name test with prefixes already resolved
enum ResolvedName<'s> {
    Any,
    Exact { namespace: Option<&'s str>, local: &'s str },
}

impl<'s> ResolvedName<'s> {
    fn resolve(test: &'s NameTest, ctx: &SelectorContext<'s>) -> Option<Self> {
        match test {
            NameTest::Any => Some(ResolvedName::Any),
            NameTest::Name(q) => Some(ResolvedName::Exact {
                namespace: Some(ctx.element_namespace(q)?),
                local: &q.local,
            }),
            NameTest::Expanded { namespace, local } => Some(ResolvedName::Exact {
                namespace: namespace.as_deref(),
                local,
            }),
        }
    }

    fn admits(&self, element: &Element, scope: &NamespaceScope) -> bool {
        match self {
            ResolvedName::Any => true,
            ResolvedName::Exact { namespace, local } => {
                if element.local_name() != *local {
                    return false;
                }
                match namespace {
                    None => true,
                    Some(ns) => scope.element_namespace(element.name()).unwrap_or("") == *ns,
                }
            }
        }
    }
}

/// Find an element's attribute by selector name
///
/// Returns the attribute's qualified name as written in the document.
pub fn find_attribute<'e>(
    element: &'e Element,
    scope: &NamespaceScope,
    name: &QName,
    ctx: &SelectorContext<'_>,
) -> Option<&'e str> {
    let wanted_ns = ctx.attribute_namespace(name)?;
    element
        .plain_attributes()
        .find(|attr| {
            crate::xml::tree::split_qname(&attr.name).1 == name.local
                && scope.attribute_namespace(&attr.name) == wanted_ns
        })
        .map(|attr| attr.name.as_str())
}

fn step_candidates(
    document: &XmlDocument,
    parent: &[usize],
    step: &Step,
    ctx: &SelectorContext<'_>,
) -> Option<Vec<ElementPath>> {
    let name = ResolvedName::resolve(&step.name, ctx)?;
    let parent_element = document.root().descendant(parent)?;
    let scope = document.scope_at(parent)?;

    let mut admitted = Vec::new();
    for (index, child) in parent_element.child_elements() {
        let mut child_scope = scope.clone();
        child_scope.push(child);
        if name.admits(child, &child_scope) {
            admitted.push((index, child, child_scope));
        }
    }

    let mut matches = Vec::new();
    for (position, (index, child, child_scope)) in admitted.into_iter().enumerate() {
        if let Some(wanted) = step.position {
            if position + 1 != wanted {
                continue;
            }
        }
        if let Some(test) = &step.attribute {
            let value = find_attribute(child, &child_scope, &test.name, ctx)
                .and_then(|qname| child.attribute(qname));
            if value.as_deref() != Some(test.value.as_str()) {
                continue;
            }
        }
        let mut path = parent.to_vec();
        path.push(index);
        matches.push(path);
    }
    Some(matches)
}

/// Every element the selector admits
pub fn select(
    document: &XmlDocument,
    selector: &ElementSelector,
    ctx: &SelectorContext<'_>,
) -> Vec<ElementPath> {
    let Some((first, rest)) = selector.steps.split_first() else {
        return Vec::new();
    };

    let root_matches = {
        let root_scope = match document.scope_at(&[]) {
            Some(s) => s,
            None => return Vec::new(),
        };
        let Some(name) = ResolvedName::resolve(&first.name, ctx) else {
            return Vec::new();
        };
        let position_ok = first.position.map(|p| p == 1).unwrap_or(true);
        let attribute_ok = match &first.attribute {
            None => true,
            Some(test) => find_attribute(document.root(), &root_scope, &test.name, ctx)
                .and_then(|q| document.root().attribute(q))
                .as_deref()
                == Some(test.value.as_str()),
        };
        name.admits(document.root(), &root_scope) && position_ok && attribute_ok
    };
    if !root_matches {
        return Vec::new();
    }

    let mut current: Vec<ElementPath> = vec![Vec::new()];
    for step in rest {
        let mut next = Vec::new();
        for path in &current {
            match step_candidates(document, path, step, ctx) {
                Some(found) => next.extend(found),
                None => return Vec::new(),
            }
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

/// The single element the selector admits, if exactly one
pub fn locate_path(
    document: &XmlDocument,
    selector: &ElementSelector,
    ctx: &SelectorContext<'_>,
) -> Option<ElementPath> {
    let mut found = select(document, selector, ctx);
    if found.len() == 1 {
        found.pop()
    } else {
        None
    }
}

/// Serialization of the single element the selector admits
pub fn locate(document: &str, selector: &ElementSelector, ctx: &SelectorContext<'_>) -> Option<String> {
    let document = XmlDocument::parse(document).ok()?;
    let path = locate_path(&document, selector, ctx)?;
    document.root().descendant(&path).map(Element::to_xml)
}

/// True if the selector admits any element at all
pub fn find(document: &str, selector: &ElementSelector, ctx: &SelectorContext<'_>) -> bool {
    XmlDocument::parse(document)
        .map(|doc| !select(&doc, selector, ctx).is_empty())
        .unwrap_or(false)
}

/// Path of the single parent element of what the selector addresses
pub fn locate_parent(
    document: &XmlDocument,
    selector: &ElementSelector,
    ctx: &SelectorContext<'_>,
) -> Option<ElementPath> {
    locate_path(document, &selector.parent()?, ctx)
}

/// Put `fragment` where `selector` points
///
/// Replaces the addressed element when exactly one exists; otherwise inserts
/// a new child under the addressed parent. Returns the new document and
/// whether the element was newly created, or `None` when there is no single
/// parent or no position that satisfies the selector.
pub fn insert_or_replace(
    document: &str,
    selector: &ElementSelector,
    fragment: &str,
    ctx: &SelectorContext<'_>,
) -> Option<(String, bool)> {
    let mut document = XmlDocument::parse(document).ok()?;
    let element = XmlDocument::parse_fragment(fragment).ok()?;

    let existing = select(&document, selector, ctx);
    match existing.len() {
        0 => {}
        1 => {
            let path = &existing[0];
            match path.split_last() {
                None => *document.root_mut() = element,
                Some((&index, parent)) => {
                    let parent = document.root_mut().descendant_mut(parent)?;
                    parent.children_mut()[index] = Node::Element(element);
                }
            }
            return Some((document.to_xml(), false));
        }
        _ => return None,
    }

    let parent_path = locate_parent(&document, selector, ctx)?;
    let step = selector.last_step()?;
    let index = insertion_index(&document, &parent_path, step, ctx)?;

    let parent = document.root_mut().descendant_mut(&parent_path)?;
    match index {
        Some(index) => parent.children_mut().insert(index, Node::Element(element)),
        None => append_child(parent, Node::Element(element)),
    }
    Some((document.to_xml(), true))
}

/// Child index to insert before; `Some(None)` means append
fn insertion_index(
    document: &XmlDocument,
    parent: &[usize],
    step: &Step,
    ctx: &SelectorContext<'_>,
) -> Option<Option<usize>> {
    let Some(position) = step.position else {
        return Some(None);
    };

    let name_only = Step {
        name: step.name.clone(),
        position: None,
        attribute: None,
    };
    let siblings = step_candidates(document, parent, &name_only, ctx)?;

    if position <= siblings.len() {
        siblings[position - 1].last().copied().map(Some)
    } else if position == siblings.len() + 1 {
        match siblings.last().and_then(|p| p.last()) {
            Some(&last) => Some(Some(last + 1)),
            None => Some(None),
        }
    } else {
        None
    }
}

/// Remove the single element the selector admits
///
/// The root element cannot be removed this way.
pub fn delete(document: &str, selector: &ElementSelector, ctx: &SelectorContext<'_>) -> Option<String> {
    let mut document = XmlDocument::parse(document).ok()?;
    let path = locate_path(&document, selector, ctx)?;
    let (&index, parent) = path.split_last()?;
    document.root_mut().descendant_mut(parent)?.children_mut().remove(index);
    Some(document.to_xml())
}

/// Resolve a trailing unpositioned `*` against the element being put
///
/// The wildcard becomes the fragment's own name, so the server rather than
/// the client decides where the new element lands.
pub fn fix_star(selector: &ElementSelector, fragment: &str) -> ElementSelector {
    let mut fixed = selector.clone();
    let Some(last) = fixed.steps.last_mut() else {
        return fixed;
    };
    if last.name != NameTest::Any || last.position.is_some() {
        return fixed;
    }
    let Ok(element) = XmlDocument::parse_fragment(fragment) else {
        return fixed;
    };

    let mut scope = NamespaceScope::default();
    scope.push(&element);
    last.name = NameTest::Expanded {
        namespace: scope.element_namespace(element.name()).map(str::to_string),
        local: element.local_name().to_string(),
    };
    fixed
}
