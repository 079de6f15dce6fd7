//! Synthesized `xcap-caps` document (RFC 4825 §12)

use crate::error::{XcapError, XcapResult};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::BTreeSet;

pub const XCAP_CAPS_NS: &str = "urn:ietf:params:xml:ns:xcap-caps";

/// Render the capabilities document for the enabled applications
///
/// `applications` pairs each AUID with its default namespace. Both lists
/// come out sorted, each value once.
pub(crate) fn render(applications: &[(String, String)]) -> XcapResult<Vec<u8>> {
    let mut auids: Vec<&str> = applications.iter().map(|(auid, _)| auid.as_str()).collect();
    auids.sort_unstable();
    auids.dedup();
    let namespaces: BTreeSet<&str> = applications.iter().map(|(_, ns)| ns.as_str()).collect();

    write_document(&auids, &namespaces).map_err(|e| XcapError::Internal(e.to_string()))
}

fn write_document(auids: &[&str], namespaces: &BTreeSet<&str>) -> quick_xml::Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("xcap-caps");
    root.push_attribute(("xmlns", XCAP_CAPS_NS));
    writer.write_event(Event::Start(root))?;

    write_list(&mut writer, "auids", "auid", auids.iter().copied())?;
    writer.write_event(Event::Empty(BytesStart::new("extensions")))?;
    write_list(&mut writer, "namespaces", "namespace", namespaces.iter().copied())?;

    writer.write_event(Event::End(BytesEnd::new("xcap-caps")))?;
    Ok(writer.into_inner())
}

fn write_list<'a>(
    writer: &mut Writer<Vec<u8>>,
    container: &str,
    item: &str,
    values: impl Iterator<Item = &'a str>,
) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(container)))?;
    for value in values {
        writer.write_event(Event::Start(BytesStart::new(item)))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new(item)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(container)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlDocument;

    fn apps() -> Vec<(String, String)> {
        vec![
            ("resource-lists".to_string(), "urn:ietf:params:xml:ns:resource-lists".to_string()),
            ("pres-rules".to_string(), "urn:ietf:params:xml:ns:pres-rules".to_string()),
            (
                "org.openmobilealliance.pres-rules".to_string(),
                "urn:ietf:params:xml:ns:pres-rules".to_string(),
            ),
        ]
    }

    #[test]
    fn test_render_is_well_formed() {
        let bytes = render(&apps()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let doc = XmlDocument::parse(&text).unwrap();
        assert_eq!(doc.root().name(), "xcap-caps");
        assert!(doc.declares_utf8());

        let auids: Vec<String> = doc
            .root()
            .descendants()
            .filter(|e| e.name() == "auid")
            .map(|e| e.text())
            .collect();
        assert_eq!(
            auids,
            vec!["org.openmobilealliance.pres-rules", "pres-rules", "resource-lists"]
        );
    }

    #[test]
    fn test_namespaces_deduplicated() {
        let text = String::from_utf8(render(&apps()).unwrap()).unwrap();
        assert_eq!(text.matches("urn:ietf:params:xml:ns:pres-rules").count(), 1);
        assert!(text.contains("<extensions/>"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut reversed = apps();
        reversed.reverse();
        assert_eq!(render(&apps()).unwrap(), render(&reversed).unwrap());
    }
}
