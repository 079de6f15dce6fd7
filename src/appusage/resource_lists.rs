//! Sibling uniqueness for resource lists
//!
//! Within any element, these children must not repeat a value:
//!
//! | child        | attribute | namespace                         |
//! |--------------|-----------|-----------------------------------|
//! | `list`       | `name`    | resource-lists (and rls-services) |
//! | `entry`      | `uri`     | resource-lists                    |
//! | `entry-ref`  | `ref`     | resource-lists                    |
//! | `external`   | `anchor`  | resource-lists                    |
//!
//! Children that lack the attribute are not compared.

use super::RESOURCE_LISTS_NS;
use crate::error::{XcapError, XcapResult};
use crate::xml::{Element, NamespaceScope, XmlDocument};
use std::collections::HashSet;
use tracing::error;

/// Check every element of `document` for duplicate sibling keys
///
/// `list_namespaces` are the namespaces whose `list` elements are keyed by
/// `name`.
pub(crate) fn check_uniqueness(document: &XmlDocument, list_namespaces: &[&str]) -> XcapResult<()> {
    let mut scope = NamespaceScope::default();
    scope.push(document.root());
    check_children(document.root(), &scope, list_namespaces)
}

fn key_attribute(local: &str, namespace: &str, list_namespaces: &[&str]) -> Option<&'static str> {
    match local {
        "list" if list_namespaces.contains(&namespace) => Some("name"),
        "entry" if namespace == RESOURCE_LISTS_NS => Some("uri"),
        "entry-ref" if namespace == RESOURCE_LISTS_NS => Some("ref"),
        "external" if namespace == RESOURCE_LISTS_NS => Some("anchor"),
        _ => None,
    }
}

fn check_children(
    parent: &Element,
    scope: &NamespaceScope,
    list_namespaces: &[&str],
) -> XcapResult<()> {
    let mut seen: HashSet<(&str, String)> = HashSet::new();

    for (_, child) in parent.child_elements() {
        let mut child_scope = scope.clone();
        child_scope.push(child);

        let namespace = child_scope.element_namespace(child.name()).unwrap_or("");
        if let Some(attribute) = key_attribute(child.local_name(), namespace, list_namespaces) {
            if let Some(value) = child.attribute(attribute) {
                let value = value.into_owned();
                if !seen.insert((attribute, value.clone())) {
                    error!(
                        "duplicate <{}> {}=\"{}\" under <{}>",
                        child.local_name(),
                        attribute,
                        value,
                        parent.name()
                    );
                    return Err(XcapError::UniquenessViolation {
                        element: child.local_name().to_string(),
                        attribute: attribute.to_string(),
                        value,
                    });
                }
            }
        }

        check_children(child, &child_scope, list_namespaces)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appusage::RLS_SERVICES_NS;

    fn check(text: &str) -> XcapResult<()> {
        let doc = XmlDocument::parse(text).unwrap();
        check_uniqueness(&doc, &[RESOURCE_LISTS_NS])
    }

    #[test]
    fn test_distinct_siblings_pass() {
        let doc = r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="a"><entry uri="sip:x@d"/><entry uri="sip:y@d"/></list>
  <list name="b"><entry uri="sip:x@d"/></list>
</resource-lists>"#;
        assert!(check(doc).is_ok());
    }

    #[test]
    fn test_duplicate_entry_uri() {
        let doc = r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="a"><entry uri="sip:x@d"/><entry uri="sip:x@d"/></list>
</resource-lists>"#;
        match check(doc) {
            Err(XcapError::UniquenessViolation {
                element,
                attribute,
                value,
            }) => {
                assert_eq!(element, "entry");
                assert_eq!(attribute, "uri");
                assert_eq!(value, "sip:x@d");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_duplicates_in_nested_lists() {
        let doc = r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="a"><list name="n"/><list name="n"/></list>
</resource-lists>"#;
        assert!(check(doc).is_err());

        let doc = r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="a"><external anchor="http://x"/><external anchor="http://x"/></list>
</resource-lists>"#;
        assert!(check(doc).is_err());

        let doc = r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="a"><entry-ref ref="r"/><entry-ref ref="r"/></list>
</resource-lists>"#;
        assert!(check(doc).is_err());
    }

    #[test]
    fn test_missing_attribute_not_compared() {
        let doc = r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list><entry/><entry/></list>
  <list/>
</resource-lists>"#;
        assert!(check(doc).is_ok());
    }

    #[test]
    fn test_foreign_namespace_ignored() {
        let doc = r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists" xmlns:x="urn:example">
  <list name="a"><x:entry uri="1"/><x:entry uri="1"/></list>
</resource-lists>"#;
        assert!(check(doc).is_ok());
    }

    #[test]
    fn test_rls_lists_keyed_by_name() {
        let doc = r#"<rls-services xmlns="urn:ietf:params:xml:ns:rls-services">
  <service uri="sip:s@d"><list name="l"/><list name="l"/></service>
</rls-services>"#;
        let parsed = XmlDocument::parse(doc).unwrap();
        assert!(check_uniqueness(&parsed, &[RESOURCE_LISTS_NS]).is_ok());
        assert!(check_uniqueness(&parsed, &[RLS_SERVICES_NS, RESOURCE_LISTS_NS]).is_err());
    }
}
