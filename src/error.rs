//! Error types for XCAP operations

use thiserror::Error;

/// XCAP operation result type
pub type XcapResult<T> = Result<T, XcapError>;

/// XCAP operation errors
///
/// Every kind is terminal for the operation that raised it. Nothing here is
/// retried internally; a `VersionMismatch` in particular is handed back so the
/// client can re-fetch and try again.
#[derive(Error, Debug)]
pub enum XcapError {
    /// Document body could not be parsed as XML
    #[error("Document is not well-formed: {0}")]
    NotWellFormed(String),

    /// Document declares an encoding other than UTF-8
    #[error("Document is not UTF-8 encoded (declared encoding: {0})")]
    NotUtf8(String),

    /// Document does not validate against the application's schema
    #[error("Schema validation failed: {0}")]
    SchemaViolation(String),

    /// Application-specific structural constraint failed
    #[error("Constraint failure: {0}")]
    ConstraintViolation(String),

    /// Sibling elements share a value that must be unique
    #[error("Uniqueness failure: <{element}> siblings share {attribute}=\"{value}\"")]
    UniquenessViolation {
        element: String,
        attribute: String,
        value: String,
    },

    /// Element body is not a single well-formed XML fragment
    #[error("Body is not a well-formed XML fragment")]
    NotXmlFragment,

    /// Attribute body is not a legal XML attribute value
    #[error("Body is not a valid XML attribute value")]
    NotXmlAttributeValue,

    /// The parent of the addressed node does not exist
    #[error("Parent of the addressed node does not exist")]
    NoParent,

    /// Addressed document, element, attribute or binding does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A GET on the same URI would not return what was just put
    #[error("Cannot insert: the result would not be retrievable at the same URI")]
    CannotInsert,

    /// A GET on the same URI would still find a node after the delete
    #[error("Cannot delete: a node would remain selected by the same URI")]
    CannotDelete,

    /// Expected version tag does not match the stored one
    #[error("Version tag mismatch")]
    VersionMismatch,

    /// AUID is not among the enabled applications
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    /// Mutation attempted on a read-only application
    #[error("Application is read-only: {0}")]
    ReadOnly(String),

    /// Caller may not access the addressed document
    #[error("Not authorized")]
    NotAuthorized,

    /// URI could not be split into XCAP components
    #[error("Invalid XCAP URI: {0}")]
    InvalidUri(String),

    /// Method does not apply to the addressed resource
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XcapError {
    /// True for the constraint-failure family, uniqueness failures included
    pub fn is_constraint_failure(&self) -> bool {
        matches!(
            self,
            XcapError::ConstraintViolation(_) | XcapError::UniquenessViolation { .. }
        )
    }

    /// HTTP status the transport layer reports for this error
    pub fn status_code(&self) -> u16 {
        match self {
            XcapError::NotWellFormed(_)
            | XcapError::NotUtf8(_)
            | XcapError::SchemaViolation(_)
            | XcapError::ConstraintViolation(_)
            | XcapError::UniquenessViolation { .. }
            | XcapError::NotXmlFragment
            | XcapError::NotXmlAttributeValue
            | XcapError::NoParent
            | XcapError::CannotInsert
            | XcapError::CannotDelete => 409,
            XcapError::ResourceNotFound(_)
            | XcapError::ApplicationNotFound(_)
            | XcapError::ReadOnly(_) => 404,
            XcapError::VersionMismatch => 412,
            XcapError::NotAuthorized => 401,
            XcapError::MethodNotAllowed(_) => 405,
            XcapError::InvalidUri(_) => 400,
            XcapError::Storage(_)
            | XcapError::Internal(_)
            | XcapError::Config(_)
            | XcapError::Io(_) => 500,
        }
    }

    /// `application/xcap-error+xml` body for the conflict kinds
    ///
    /// Returns `None` for kinds that are reported by status code alone.
    pub fn error_document(&self) -> Option<String> {
        let element = match self {
            XcapError::NotWellFormed(_) => "<not-well-formed/>".to_string(),
            XcapError::NotUtf8(_) => "<not-utf-8/>".to_string(),
            XcapError::SchemaViolation(_) => "<schema-validation-error/>".to_string(),
            XcapError::ConstraintViolation(phrase) => format!(
                "<constraint-failure phrase=\"{}\"/>",
                quick_xml::escape::escape(phrase.as_str())
            ),
            XcapError::UniquenessViolation {
                element, attribute, ..
            } => format!(
                "<uniqueness-failure><exists field=\"{}/@{}\"/></uniqueness-failure>",
                quick_xml::escape::escape(element.as_str()),
                quick_xml::escape::escape(attribute.as_str())
            ),
            XcapError::NotXmlFragment => "<not-xml-frag/>".to_string(),
            XcapError::NotXmlAttributeValue => "<not-xml-att-value/>".to_string(),
            XcapError::NoParent => "<no-parent/>".to_string(),
            XcapError::CannotInsert => "<cannot-insert/>".to_string(),
            XcapError::CannotDelete => "<cannot-delete/>".to_string(),
            _ => return None,
        };

        Some(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <xcap-error xmlns=\"urn:ietf:params:xml:ns:xcap-error\">{}</xcap-error>",
            element
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(XcapError::NoParent.status_code(), 409);
        assert_eq!(XcapError::VersionMismatch.status_code(), 412);
        assert_eq!(
            XcapError::ResourceNotFound("x".to_string()).status_code(),
            404
        );
        assert_eq!(
            XcapError::ApplicationNotFound("nope".to_string()).status_code(),
            404
        );
        assert_eq!(XcapError::NotAuthorized.status_code(), 401);
    }

    #[test]
    fn test_constraint_family() {
        let uniqueness = XcapError::UniquenessViolation {
            element: "entry".to_string(),
            attribute: "uri".to_string(),
            value: "sip:a@b".to_string(),
        };
        assert!(uniqueness.is_constraint_failure());
        assert!(XcapError::ConstraintViolation("x".to_string()).is_constraint_failure());
        assert!(!XcapError::NoParent.is_constraint_failure());
    }

    #[test]
    fn test_error_document() {
        let doc = XcapError::NoParent.error_document().unwrap();
        assert!(doc.contains("<no-parent/>"));
        assert!(doc.contains("urn:ietf:params:xml:ns:xcap-error"));

        let doc = XcapError::UniquenessViolation {
            element: "list".to_string(),
            attribute: "name".to_string(),
            value: "a".to_string(),
        }
        .error_document()
        .unwrap();
        assert!(doc.contains("<uniqueness-failure><exists field=\"list/@name\"/>"));

        assert!(XcapError::VersionMismatch.error_document().is_none());
    }
}
