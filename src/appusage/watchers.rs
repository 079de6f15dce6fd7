//! Watcher list projection
//!
//! The watchers document is not stored; it is rebuilt on every read from the
//! storage collaborator's watcher records:
//!
//! ```xml
//! <watchers xmlns="http://openxcap.org/ns/watchers">
//!   <watcher>
//!     <id>sip:bob@example.com</id>
//!     <status>active</status>
//!   </watcher>
//! </watchers>
//! ```

use super::WATCHERS_NS;
use crate::error::{XcapError, XcapResult};
use crate::storage::Watcher;
use crate::xml::tree::is_ncname;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::error;

/// Serialize watcher records as a `watchers` document
///
/// A field whose name cannot be an element name fails the whole read.
pub(crate) fn render(watchers: &[Watcher]) -> XcapResult<Vec<u8>> {
    if let Some(field) = watchers
        .iter()
        .flat_map(|w| w.keys())
        .find(|field| !is_element_name(field))
    {
        error!("watcher record has invalid field name {:?}", field);
        return Err(XcapError::Internal(format!(
            "invalid watcher field name {:?}",
            field
        )));
    }
    write_document(watchers).map_err(|e| XcapError::Internal(e.to_string()))
}

fn write_document(watchers: &[Watcher]) -> quick_xml::Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("watchers");
    root.push_attribute(("xmlns", WATCHERS_NS));
    if watchers.is_empty() {
        writer.write_event(Event::Empty(root))?;
        return Ok(writer.into_inner());
    }
    writer.write_event(Event::Start(root))?;

    for watcher in watchers {
        writer.write_event(Event::Start(BytesStart::new("watcher")))?;
        for (field, value) in watcher {
            writer.write_event(Event::Start(BytesStart::new(field.as_str())))?;
            writer.write_event(Event::Text(BytesText::new(value)))?;
            writer.write_event(Event::End(BytesEnd::new(field.as_str())))?;
        }
        writer.write_event(Event::End(BytesEnd::new("watcher")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("watchers")))?;
    Ok(writer.into_inner())
}

/// Unprefixed XML name check for field names coming from storage
fn is_element_name(name: &str) -> bool {
    is_ncname(name) && !name.to_ascii_lowercase().starts_with("xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlDocument;

    fn watcher(fields: &[(&str, &str)]) -> Watcher {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_watchers() {
        let bytes = render(&[
            watcher(&[("id", "sip:bob@example.com"), ("status", "active")]),
            watcher(&[("id", "sip:carol@example.com"), ("status", "pending")]),
        ])
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let doc = XmlDocument::parse(&text).unwrap();

        assert_eq!(doc.root().name(), "watchers");
        let ids: Vec<String> = doc
            .root()
            .descendants()
            .filter(|e| e.name() == "id")
            .map(|e| e.text())
            .collect();
        assert_eq!(ids, vec!["sip:bob@example.com", "sip:carol@example.com"]);
    }

    #[test]
    fn test_values_are_escaped() {
        let bytes = render(&[watcher(&[("note", "a < b & c")])]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("a &lt; b &amp; c"));

        let doc = XmlDocument::parse(&text).unwrap();
        let note = doc.root().descendants().find(|e| e.name() == "note").unwrap();
        assert_eq!(note.text(), "a < b & c");
    }

    #[test]
    fn test_empty_watcher_list() {
        let text = String::from_utf8(render(&[]).unwrap()).unwrap();
        assert!(XmlDocument::parse(&text).is_ok());
    }

    #[test]
    fn test_invalid_field_name_fails() {
        let result = render(&[
            watcher(&[("id", "sip:bob@example.com")]),
            watcher(&[("bad name", "x"), ("id", "y")]),
        ]);
        assert!(matches!(result, Err(XcapError::Internal(msg)) if msg.contains("bad name")));

        assert!(render(&[watcher(&[("xmlns", "x")])]).is_err());
    }
}
