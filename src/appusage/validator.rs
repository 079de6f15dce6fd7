//! Document validation pipeline
//!
//! Every whole-document write passes through [`validate_document`]:
//!
//! 1. the body must parse as well-formed XML
//! 2. the declared encoding must be UTF-8
//! 3. when validation is enabled and the application names a schema, the
//!    schema registered for it in the [`SchemaCatalog`] must accept it
//! 4. the application's additional constraints must hold
//!
//! The first failing step decides the error; later steps are not run.

use super::{Application, UsageContext};
use crate::error::{XcapError, XcapResult};
use crate::xml::XmlDocument;
use libxml::error::StructuredError;
use libxml::parser::Parser;
use libxml::schemas::{SchemaParserContext, SchemaValidationContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// Directory holding the schemas shipped with the crate
pub const DEFAULT_SCHEMA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/schemas");

/// Schema files the built-in applications refer to
pub const SCHEMA_FILES: [&str; 5] = [
    "common-policy.xsd",
    "resource-lists.xsd",
    "rls-services.xsd",
    "pidf.xsd",
    "watchers.xsd",
];

/// Serializes every call into libxml2
static LIBXML: Mutex<()> = parking_lot::const_mutex(());

/// Schema check for one schema reference
pub trait SchemaValidator: Send + Sync {
    /// Accept or reject a parsed document
    ///
    /// Rejections are [`XcapError::SchemaViolation`]; a validator that
    /// cannot run at all reports [`XcapError::Internal`].
    fn validate(&self, document: &XmlDocument) -> XcapResult<()>;
}

/// W3C XML Schema, checked by libxml2
///
/// The schema file is compiled on each validation. Imports are resolved
/// relative to the file, so a schema and the schemas it imports live in
/// the same directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XsdSchema {
    path: PathBuf,
}

impl XsdSchema {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        XsdSchema { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SchemaValidator for XsdSchema {
    fn validate(&self, document: &XmlDocument) -> XcapResult<()> {
        let path = self.path.to_str().ok_or_else(|| {
            XcapError::Internal(format!("schema path {} is not UTF-8", self.path.display()))
        })?;
        let text = document.to_xml();

        let _guard = LIBXML.lock();
        let mut parser = SchemaParserContext::from_file(path);
        let mut schema = SchemaValidationContext::from_parser(&mut parser).map_err(|errors| {
            XcapError::Internal(format!(
                "cannot load schema {}: {}",
                self.path.display(),
                describe(&errors)
            ))
        })?;
        let parsed = Parser::default()
            .parse_string(&text)
            .map_err(|e| XcapError::NotWellFormed(format!("{:?}", e)))?;

        schema
            .validate_document(&parsed)
            .map_err(|errors| XcapError::SchemaViolation(describe(&errors)))
    }
}

/// One line per libxml2 message
fn describe(errors: &[StructuredError]) -> String {
    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|e| e.message.as_deref())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .collect();
    if messages.is_empty() {
        return "document does not match the schema".to_string();
    }
    messages.join("; ")
}

/// Schema validators keyed by schema reference (`resource-lists.xsd`)
#[derive(Clone, Default)]
pub struct SchemaCatalog {
    validators: HashMap<String, Arc<dyn SchemaValidator>>,
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut refs: Vec<&String> = self.validators.keys().collect();
        refs.sort();
        f.debug_struct("SchemaCatalog").field("schemas", &refs).finish()
    }
}

impl SchemaCatalog {
    /// Catalog with no schemas at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// The shipped XSDs for every schema the applications refer to
    pub fn with_defaults() -> Self {
        let mut catalog = Self::empty();
        for file in SCHEMA_FILES {
            catalog.register(file, XsdSchema::new(Path::new(DEFAULT_SCHEMA_DIR).join(file)));
        }
        catalog
    }

    /// XSDs from another directory; every well-known schema file must exist
    pub fn from_directory(dir: impl AsRef<Path>) -> XcapResult<Self> {
        let dir = dir.as_ref();
        let mut catalog = Self::empty();
        for file in SCHEMA_FILES {
            let path = dir.join(file);
            if !path.is_file() {
                return Err(XcapError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("schema {} not found", path.display()),
                )));
            }
            catalog.register(file, XsdSchema::new(path));
        }
        debug!("loaded {} schemas from {}", SCHEMA_FILES.len(), dir.display());
        Ok(catalog)
    }

    /// Register (or replace) the validator for a schema reference
    pub fn register(&mut self, schema_ref: impl Into<String>, validator: impl SchemaValidator + 'static) {
        self.validators.insert(schema_ref.into(), Arc::new(validator));
    }

    pub fn contains(&self, schema_ref: &str) -> bool {
        self.validators.contains_key(schema_ref)
    }

    /// Run the validator for `schema_ref`; unknown references pass
    pub fn validate(&self, schema_ref: &str, document: &XmlDocument) -> XcapResult<()> {
        let Some(validator) = self.validators.get(schema_ref) else {
            debug!("no validator registered for {}, skipping", schema_ref);
            return Ok(());
        };
        validator.validate(document).map_err(|e| {
            error!("document rejected by {}: {}", schema_ref, e);
            e
        })
    }
}

/// Run the full pipeline for `application` over a document body
pub fn validate_document(
    body: &[u8],
    application: Application,
    context: &UsageContext,
) -> XcapResult<()> {
    let document = XmlDocument::parse_bytes(body).map_err(|e| {
        error!("{}: document is not well-formed: {}", application.id(), e);
        XcapError::NotWellFormed(e.to_string())
    })?;

    if !document.declares_utf8() {
        let encoding = document.encoding().unwrap_or_default().to_string();
        error!("{}: document encoding is {}", application.id(), encoding);
        return Err(XcapError::NotUtf8(encoding));
    }

    if context.document_validation {
        if let Some(schema_ref) = application.schema_ref() {
            context.schemas.validate(schema_ref, &document)?;
        }
    }

    application.check_additional_constraints(&document)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(document_validation: bool) -> UsageContext {
        UsageContext::new(document_validation, SchemaCatalog::with_defaults(), &[])
    }

    const LISTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="friends"/>
</resource-lists>"#;

    #[test]
    fn test_accepts_valid_document() {
        assert!(validate_document(LISTS.as_bytes(), Application::ResourceLists, &context(true)).is_ok());
    }

    #[test]
    fn test_not_well_formed() {
        let result = validate_document(b"<resource-lists>", Application::ResourceLists, &context(true));
        assert!(matches!(result, Err(XcapError::NotWellFormed(_))));
    }

    #[test]
    fn test_not_utf8() {
        let body = br#"<?xml version="1.0" encoding="ISO-8859-1"?><resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists"/>"#;
        let result = validate_document(body, Application::ResourceLists, &context(true));
        assert!(matches!(result, Err(XcapError::NotUtf8(e)) if e == "ISO-8859-1"));
    }

    #[test]
    fn test_schema_only_when_enabled() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?><wrong xmlns="urn:example"/>"#;
        assert!(matches!(
            validate_document(body, Application::ResourceLists, &context(true)),
            Err(XcapError::SchemaViolation(_))
        ));
        assert!(validate_document(body, Application::ResourceLists, &context(false)).is_ok());
    }

    #[test]
    fn test_well_formedness_precedes_everything() {
        // Invalid under every later step too; only the first failure is reported.
        let body = br#"<?xml version="1.0" encoding="ISO-8859-1"?><wrong"#;
        assert!(matches!(
            validate_document(body, Application::ResourceLists, &context(true)),
            Err(XcapError::NotWellFormed(_))
        ));
    }

    #[test]
    fn test_constraints_run_last() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="a"/>
  <list name="a"/>
</resource-lists>"#;
        let result = validate_document(body.as_bytes(), Application::ResourceLists, &context(false));
        assert!(matches!(result, Err(XcapError::UniquenessViolation { .. })));
    }

    #[test]
    fn test_schemaless_application_skips_schema() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?><anything/>"#;
        assert!(validate_document(body, Application::TestApp, &context(true)).is_ok());
    }

    #[test]
    fn test_unregistered_schema_passes() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?><anything/>"#;
        let ctx = UsageContext::new(true, SchemaCatalog::empty(), &[]);
        assert!(validate_document(body, Application::PresRules, &ctx).is_ok());
    }

    #[test]
    fn test_schema_rejects_content_under_correct_root() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <bogus/>
  <list><entry/><nonsense x="1">text</nonsense></list>
</resource-lists>"#;
        match validate_document(body, Application::ResourceLists, &context(true)) {
            Err(XcapError::SchemaViolation(reason)) => assert!(reason.contains("bogus"), "{}", reason),
            other => panic!("expected a schema violation, got {:?}", other),
        }
        assert!(validate_document(body, Application::ResourceLists, &context(false)).is_ok());
    }

    #[test]
    fn test_schema_requires_entry_uri() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists">
  <list name="friends"><entry><display-name>Bob</display-name></entry></list>
</resource-lists>"#;
        match validate_document(body, Application::ResourceLists, &context(true)) {
            Err(XcapError::SchemaViolation(reason)) => assert!(reason.contains("uri"), "{}", reason),
            other => panic!("expected a schema violation, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_accepts_each_application() {
        let cases: [(Application, &str); 5] = [
            (
                Application::ResourceLists,
                r#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists" xmlns:x="urn:example:x">
  <list name="friends" x:color="red">
    <display-name xml:lang="en">Friends</display-name>
    <entry uri="sip:bob@example.com"><display-name>Bob</display-name></entry>
    <entry-ref ref="resource-lists/users/sip:bob@example.com/index/~~/resource-lists/list%5b1%5d"/>
    <external anchor="http://xcap.example.com/xcap-root/resource-lists/users/sip:carol@example.com/index"/>
    <list name="nested"/>
  </list>
</resource-lists>"#,
            ),
            (
                Application::RlsServices,
                r#"<rls-services xmlns="urn:ietf:params:xml:ns:rls-services" xmlns:rl="urn:ietf:params:xml:ns:resource-lists">
  <service uri="sip:friends@example.com">
    <list name="friends"><rl:entry uri="sip:bob@example.com"/></list>
    <packages><package>presence</package></packages>
  </service>
  <service uri="sip:work@example.com">
    <resource-list>http://xcap.example.com/xcap-root/resource-lists/users/sip:alice@example.com/index</resource-list>
  </service>
</rls-services>"#,
            ),
            (
                Application::PresRules,
                r#"<cp:ruleset xmlns:cp="urn:ietf:params:xml:ns:common-policy" xmlns:pr="urn:ietf:params:xml:ns:pres-rules">
  <cp:rule id="allow_bob">
    <cp:conditions><cp:identity><cp:one id="sip:bob@example.com"/></cp:identity></cp:conditions>
    <cp:actions><pr:sub-handling>allow</pr:sub-handling></cp:actions>
    <cp:transformations/>
  </cp:rule>
</cp:ruleset>"#,
            ),
            (
                Application::PidfManipulation,
                r#"<presence xmlns="urn:ietf:params:xml:ns:pidf" entity="sip:alice@example.com">
  <tuple id="t1"><status><basic>open</basic></status><contact priority="0.8">sip:alice@pc.example.com</contact></tuple>
  <note xml:lang="en">Working</note>
</presence>"#,
            ),
            (
                Application::Watchers,
                r#"<watchers xmlns="http://openxcap.org/ns/watchers">
  <watcher><id>sip:bob@example.com</id><status>active</status></watcher>
</watchers>"#,
            ),
        ];
        for (application, body) in cases {
            let result = validate_document(body.as_bytes(), application, &context(true));
            assert!(result.is_ok(), "{}: {:?}", application, result);
        }
    }

    #[test]
    fn test_schema_rejects_bad_rule() {
        // Every rule needs an id
        let body = br#"<ruleset xmlns="urn:ietf:params:xml:ns:common-policy">
  <rule><conditions/></rule>
</ruleset>"#;
        assert!(matches!(
            validate_document(body, Application::PresRules, &context(true)),
            Err(XcapError::SchemaViolation(_))
        ));

        let body = br#"<presence xmlns="urn:ietf:params:xml:ns:pidf" entity="sip:a@b">
  <tuple id="t"><status><basic>maybe</basic></status></tuple>
</presence>"#;
        assert!(matches!(
            validate_document(body, Application::PidfManipulation, &context(true)),
            Err(XcapError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_lexical_errors_are_not_well_formed() {
        let bodies: [&[u8]; 4] = [
            br#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists"><list name="a<b"/></resource-lists>"#,
            br#"<resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists"><list name="a"><1bad/></list></resource-lists>"#,
            b"<resource-lists xmlns=\"urn:ietf:params:xml:ns:resource-lists\"><list name=\"a\x01\"/></resource-lists>",
            b"<resource-lists xmlns=\"urn:ietf:params:xml:ns:resource-lists\">\x0c</resource-lists>",
        ];
        for body in bodies {
            for validation in [true, false] {
                let result = validate_document(body, Application::ResourceLists, &context(validation));
                assert!(matches!(result, Err(XcapError::NotWellFormed(_))), "{:?}", result);
            }
        }
    }

    #[test]
    fn test_encoding_name_is_case_insensitive() {
        let lower = br#"<?xml version="1.0" encoding="utf-8"?><resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists"/>"#;
        assert!(validate_document(lower, Application::ResourceLists, &context(true)).is_ok());

        let utf16 = br#"<?xml version="1.0" encoding="utf-16"?><resource-lists xmlns="urn:ietf:params:xml:ns:resource-lists"/>"#;
        assert!(matches!(
            validate_document(utf16, Application::ResourceLists, &context(true)),
            Err(XcapError::NotUtf8(e)) if e == "utf-16"
        ));
    }

    #[test]
    fn test_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SchemaCatalog::from_directory(dir.path()),
            Err(XcapError::Io(_))
        ));

        let catalog = SchemaCatalog::from_directory(DEFAULT_SCHEMA_DIR).unwrap();
        for file in SCHEMA_FILES {
            assert!(catalog.contains(file));
        }
    }

    #[test]
    fn test_missing_schema_file_is_internal() {
        let mut catalog = SchemaCatalog::empty();
        catalog.register("resource-lists.xsd", XsdSchema::new("/nonexistent/resource-lists.xsd"));
        let ctx = UsageContext::new(true, catalog, &[]);
        assert!(matches!(
            validate_document(LISTS.as_bytes(), Application::ResourceLists, &ctx),
            Err(XcapError::Internal(_))
        ));
    }
}
