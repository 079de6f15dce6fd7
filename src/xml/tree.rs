//! Owned XML tree
//!
//! A small mutable tree built from `quick-xml` events. Start tags, attribute
//! values and character data keep their raw (escaped) source text so that a
//! node nobody touched serializes back to exactly the bytes it was parsed
//! from. Editing an element's attributes drops its raw start tag; the tag is
//! then regenerated from the attribute list.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;

/// Namespace reserved for the `xml:` prefix
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse failure with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<quick_xml::Error> for ParseError {
    fn from(e: quick_xml::Error) -> Self {
        ParseError(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ParseError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        ParseError(e.to_string())
    }
}

/// Child node of an element (or of the document prolog/epilog)
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    /// Character data, raw (still escaped)
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    DocType(String),
}

/// Attribute as written in the start tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified name (`uri`, `xml:lang`, `xmlns:rl`)
    pub name: String,
    /// Raw value, still escaped
    pub raw_value: String,
}

impl Attribute {
    /// Unescaped value
    ///
    /// Literal tabs and line breaks read as spaces; their character
    /// references (`&#9;`, `&#10;`, `&#13;`) keep them.
    pub fn value(&self) -> Cow<'_, str> {
        if !self.raw_value.contains(['\t', '\n', '\r']) {
            return quick_xml::escape::unescape(&self.raw_value)
                .unwrap_or(Cow::Borrowed(&self.raw_value));
        }
        let normalized = self
            .raw_value
            .replace("\r\n", " ")
            .replace(['\t', '\n', '\r'], " ");
        let value = match quick_xml::escape::unescape(&normalized) {
            Ok(v) => v.into_owned(),
            Err(_) => normalized.clone(),
        };
        Cow::Owned(value)
    }

    /// Namespace declaration carried by this attribute, if any
    ///
    /// `Some((None, uri))` for `xmlns="uri"`, `Some((Some(p), uri))` for
    /// `xmlns:p="uri"`.
    pub fn as_declaration(&self) -> Option<(Option<&str>, Cow<'_, str>)> {
        if self.name == "xmlns" {
            Some((None, self.value()))
        } else {
            self.name
                .strip_prefix("xmlns:")
                .map(|prefix| (Some(prefix), self.value()))
        }
    }
}

/// XML element
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    name: String,
    raw_start: Option<String>,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
    self_closing: bool,
}

impl Element {
    /// Create an element with no attributes or children
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            raw_start: None,
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: true,
        }
    }

    fn from_start(start: &BytesStart<'_>, self_closing: bool) -> Result<Self, ParseError> {
        let raw = std::str::from_utf8(start)
            .map_err(|e| ParseError(e.to_string()))?
            .to_string();
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| ParseError(e.to_string()))?
            .to_string();
        if !is_qname(&name) {
            return Err(ParseError(format!("invalid element name {:?}", name)));
        }

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let name = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| ParseError(e.to_string()))?
                .to_string();
            if !is_qname(&name) {
                return Err(ParseError(format!("invalid attribute name {:?}", name)));
            }
            let raw_value = std::str::from_utf8(&attr.value)
                .map_err(|e| ParseError(e.to_string()))?
                .to_string();
            if raw_value.contains('<') {
                return Err(ParseError(format!("'<' in value of attribute {}", name)));
            }
            let value = quick_xml::escape::unescape(&raw_value)
                .map_err(|e| ParseError(format!("attribute {}: {}", name, e)))?;
            check_chars(&value)?;
            attributes.push(Attribute { name, raw_value });
        }

        Ok(Element {
            name,
            raw_start: Some(raw),
            attributes,
            children: Vec::new(),
            self_closing,
        })
    }

    /// Qualified name as written (`entry`, `rl:entry`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix of the qualified name
    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// Local part of the qualified name
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// All attributes, namespace declarations included
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Namespace declarations made on this element
    pub fn declarations(&self) -> impl Iterator<Item = (Option<&str>, Cow<'_, str>)> {
        self.attributes.iter().filter_map(|a| a.as_declaration())
    }

    /// Attributes that are not namespace declarations
    pub fn plain_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.as_declaration().is_none())
    }

    /// Unescaped value of the attribute with this exact qualified name
    pub fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value())
    }

    /// Set an attribute from an unescaped value, replacing any existing one
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        let raw_value = escape_attribute(value);
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.raw_value = raw_value,
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                raw_value,
            }),
        }
        self.raw_start = None;
    }

    /// Remove an attribute; returns false if it was not present
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        let before = self.attributes.len();
        self.attributes.retain(|a| a.name != name);
        if self.attributes.len() == before {
            return false;
        }
        self.raw_start = None;
        true
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Child elements with their index in `children()`
    pub fn child_elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.children.iter().enumerate().filter_map(|(i, n)| match n {
            Node::Element(e) => Some((i, e)),
            _ => None,
        })
    }

    /// Element reached by following child indices from this element
    pub fn descendant(&self, path: &[usize]) -> Option<&Element> {
        let mut current = self;
        for &index in path {
            match current.children.get(index) {
                Some(Node::Element(e)) => current = e,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn descendant_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &index in path {
            match current.children.get_mut(index) {
                Some(Node::Element(e)) => current = e,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Concatenated character data of the direct children, unescaped
    pub fn text(&self) -> String {
        let mut text = String::new();
        for child in &self.children {
            match child {
                Node::Text(raw) => match quick_xml::escape::unescape(raw) {
                    Ok(unescaped) => text.push_str(&unescaped),
                    Err(_) => text.push_str(raw),
                },
                Node::CData(data) => text.push_str(data),
                _ => {}
            }
        }
        text
    }

    /// Depth-first iterator over this element and all element descendants
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Serialize this element and its subtree
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        match &self.raw_start {
            Some(raw) => out.push_str(raw),
            None => {
                out.push_str(&self.name);
                for attr in &self.attributes {
                    let quote = if attr.raw_value.contains('"') { '\'' } else { '"' };
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push('=');
                    out.push(quote);
                    out.push_str(&attr.raw_value);
                    out.push(quote);
                }
            }
        }

        if self.children.is_empty() && self.self_closing {
            out.push_str("/>");
            return;
        }

        out.push('>');
        for child in &self.children {
            child.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl Node {
    fn write_to(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write_to(out),
            Node::Text(t) => out.push_str(t),
            Node::CData(t) => {
                out.push_str("<![CDATA[");
                out.push_str(t);
                out.push_str("]]>");
            }
            Node::Comment(t) => {
                out.push_str("<!--");
                out.push_str(t);
                out.push_str("-->");
            }
            Node::ProcessingInstruction(t) => {
                out.push_str("<?");
                out.push_str(t);
                out.push_str("?>");
            }
            Node::DocType(t) => {
                out.push_str("<!DOCTYPE");
                out.push_str(t);
                out.push('>');
            }
        }
    }

    fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text(t) if t.trim().is_empty())
    }
}

/// Depth-first element iterator
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        let children: Vec<&Element> = next.child_elements().map(|(_, e)| e).collect();
        self.stack.extend(children.into_iter().rev());
        Some(next)
    }
}

/// The `<?xml ...?>` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

/// Parsed XML document
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    declaration: Option<Declaration>,
    prolog: Vec<Node>,
    root: Element,
    epilog: Vec<Node>,
}

impl XmlDocument {
    /// Parse a complete document
    ///
    /// Checks structural well-formedness (single root, balanced tags, valid
    /// escapes, unique attributes), lexical well-formedness (legal names and
    /// characters) and namespace well-formedness (every prefix in use is
    /// declared in scope).
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        check_chars(text)?;
        let mut reader = Reader::from_str(text);

        let mut declaration = None;
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<Element> = None;
        let mut stack: Vec<Element> = Vec::new();
        let mut first_event = true;

        loop {
            let event = reader.read_event()?;
            let at_start = std::mem::replace(&mut first_event, false);

            let node = match event {
                Event::Eof => break,
                Event::Decl(decl) => {
                    if !at_start {
                        return Err(ParseError(
                            "XML declaration allowed only at the start of the document".into(),
                        ));
                    }
                    declaration = Some(read_declaration(&decl)?);
                    continue;
                }
                Event::Start(start) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(ParseError("multiple root elements".into()));
                    }
                    stack.push(Element::from_start(&start, false)?);
                    continue;
                }
                Event::Empty(start) => Node::Element(Element::from_start(&start, true)?),
                Event::End(end) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ParseError("unexpected closing tag".into()))?;
                    if end.name().as_ref() != element.name.as_bytes() {
                        return Err(ParseError(format!(
                            "closing tag does not match <{}>",
                            element.name
                        )));
                    }
                    Node::Element(element)
                }
                Event::Text(t) => {
                    let raw = utf8(&t)?;
                    if raw.contains("]]>") {
                        return Err(ParseError("']]>' in character data".into()));
                    }
                    check_chars(&t.unescape().map_err(|e| ParseError(e.to_string()))?)?;
                    Node::Text(raw)
                }
                Event::CData(t) => Node::CData(utf8(&t)?),
                Event::Comment(t) => {
                    let comment = utf8(&t)?;
                    if comment.contains("--") || comment.ends_with('-') {
                        return Err(ParseError("'--' inside a comment".into()));
                    }
                    Node::Comment(comment)
                }
                Event::PI(t) => Node::ProcessingInstruction(utf8(&t)?),
                Event::DocType(t) => Node::DocType(utf8(&t)?),
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
                continue;
            }

            match node {
                Node::Element(element) => {
                    if root.is_some() {
                        return Err(ParseError("multiple root elements".into()));
                    }
                    root = Some(element);
                }
                Node::Text(t) if !t.trim().is_empty() => {
                    return Err(ParseError("text outside the root element".into()));
                }
                Node::CData(_) => {
                    return Err(ParseError("CDATA outside the root element".into()));
                }
                other => {
                    if root.is_some() {
                        epilog.push(other);
                    } else {
                        prolog.push(other);
                    }
                }
            }
        }

        if let Some(open) = stack.last() {
            return Err(ParseError(format!("unclosed element <{}>", open.name)));
        }
        let root = root.ok_or_else(|| ParseError("no root element".into()))?;

        let document = XmlDocument {
            declaration,
            prolog,
            root,
            epilog,
        };
        document.check_namespaces()?;
        Ok(document)
    }

    /// Parse a document given as bytes
    ///
    /// Bytes that are not valid UTF-8 are still parsed (lossily) when the
    /// declaration names another encoding, so that the caller can report the
    /// encoding rather than a well-formedness error.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::parse(text),
            Err(e) => {
                let lossy = String::from_utf8_lossy(bytes);
                let document = Self::parse(&lossy)?;
                if document.declares_utf8() {
                    return Err(ParseError(format!("invalid UTF-8: {}", e)));
                }
                Ok(document)
            }
        }
    }

    /// Parse a single element, optionally surrounded by whitespace or comments
    pub fn parse_fragment(text: &str) -> Result<Element, ParseError> {
        let document = Self::parse(text)?;
        if document.declaration.is_some() {
            return Err(ParseError("fragment carries an XML declaration".into()));
        }
        if document
            .prolog
            .iter()
            .chain(document.epilog.iter())
            .any(|n| matches!(n, Node::DocType(_) | Node::ProcessingInstruction(_)))
        {
            return Err(ParseError("fragment carries document-level markup".into()));
        }
        Ok(document.root)
    }

    pub fn declaration(&self) -> Option<&Declaration> {
        self.declaration.as_ref()
    }

    /// Declared encoding, if the document has a declaration naming one
    pub fn encoding(&self) -> Option<&str> {
        self.declaration
            .as_ref()
            .and_then(|d| d.encoding.as_deref())
    }

    /// True when the document is, by declaration or by default, UTF-8
    pub fn declares_utf8(&self) -> bool {
        self.encoding()
            .map(|e| e.eq_ignore_ascii_case("UTF-8"))
            .unwrap_or(true)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    /// Namespace bindings in scope at the element reached by `path`
    ///
    /// Built by walking from the root; a nearer declaration of the same
    /// prefix replaces a farther one.
    pub fn scope_at(&self, path: &[usize]) -> Option<NamespaceScope> {
        let mut scope = NamespaceScope::default();
        let mut current = &self.root;
        scope.push(current);
        for &index in path {
            match current.children.get(index) {
                Some(Node::Element(e)) => {
                    current = e;
                    scope.push(current);
                }
                _ => return None,
            }
        }
        Some(scope)
    }

    /// Serialize with a UTF-8 declaration
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        match &self.declaration {
            Some(decl) => {
                out.push_str("<?xml version=\"");
                out.push_str(&decl.version);
                out.push('"');
                if let Some(encoding) = &decl.encoding {
                    out.push_str(" encoding=\"");
                    out.push_str(encoding);
                    out.push('"');
                }
                if let Some(standalone) = &decl.standalone {
                    out.push_str(" standalone=\"");
                    out.push_str(standalone);
                    out.push('"');
                }
                out.push_str("?>");
            }
            None => out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"),
        }
        for node in &self.prolog {
            node.write_to(&mut out);
        }
        self.root.write_to(&mut out);
        for node in &self.epilog {
            node.write_to(&mut out);
        }
        out
    }

    fn check_namespaces(&self) -> Result<(), ParseError> {
        fn walk(element: &Element, scope: &mut NamespaceScope) -> Result<(), ParseError> {
            let mark = scope.len();
            scope.push(element);

            if let Some(prefix) = element.prefix() {
                if scope.resolve(Some(prefix)).is_none() {
                    return Err(ParseError(format!(
                        "undeclared namespace prefix '{}' on <{}>",
                        prefix, element.name
                    )));
                }
            }
            for attr in element.plain_attributes() {
                if let Some(prefix) = split_qname(&attr.name).0 {
                    if scope.resolve(Some(prefix)).is_none() {
                        return Err(ParseError(format!(
                            "undeclared namespace prefix '{}' on attribute {}",
                            prefix, attr.name
                        )));
                    }
                }
            }
            for (_, child) in element.child_elements() {
                walk(child, scope)?;
            }

            scope.truncate(mark);
            Ok(())
        }

        walk(&self.root, &mut NamespaceScope::default())
    }
}

/// Namespace bindings visible at some element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceScope {
    bindings: Vec<(Option<String>, String)>,
}

impl NamespaceScope {
    /// Add the declarations made on `element`
    pub fn push(&mut self, element: &Element) {
        for (prefix, uri) in element.declarations() {
            self.bindings
                .push((prefix.map(str::to_string), uri.into_owned()));
        }
    }

    fn len(&self) -> usize {
        self.bindings.len()
    }

    fn truncate(&mut self, len: usize) {
        self.bindings.truncate(len);
    }

    /// Namespace URI bound to `prefix` (`None` is the default namespace)
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
            .filter(|uri| !(prefix.is_none() && uri.is_empty()))
    }

    /// Namespace of an element name in this scope (unprefixed → default)
    pub fn element_namespace(&self, qname: &str) -> Option<&str> {
        self.resolve(split_qname(qname).0)
    }

    /// Namespace of an attribute name in this scope (unprefixed → none)
    pub fn attribute_namespace(&self, qname: &str) -> Option<&str> {
        split_qname(qname).0.and_then(|p| self.resolve(Some(p)))
    }

    /// Effective bindings, nearest declaration winning, ordered by prefix
    ///
    /// The default namespace (if any, and not undeclared) sorts first.
    pub fn effective(&self) -> Vec<(Option<String>, String)> {
        let mut seen: Vec<(Option<String>, String)> = Vec::new();
        for (prefix, uri) in self.bindings.iter().rev() {
            if seen.iter().any(|(p, _)| p == prefix) {
                continue;
            }
            seen.push((prefix.clone(), uri.clone()));
        }
        seen.retain(|(prefix, uri)| prefix.is_some() || !uri.is_empty());
        seen.sort();
        seen
    }
}

/// `Char` production of XML 1.0
pub fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}'
            | '\u{300}'..='\u{36F}'
            | '\u{203F}'..='\u{2040}')
}

/// Name without a colon (`NCName` in XML Namespaces)
pub fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_name_start_char(c) => chars.all(is_name_char),
        _ => false,
    }
}

/// `local` or `prefix:local`, both parts NCNames
pub fn is_qname(name: &str) -> bool {
    match split_qname(name) {
        (Some(prefix), local) => is_ncname(prefix) && is_ncname(local),
        (None, local) => is_ncname(local),
    }
}

fn check_chars(text: &str) -> Result<(), ParseError> {
    match text.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(ParseError(format!(
            "character U+{:04X} is not allowed in XML",
            c as u32
        ))),
        None => Ok(()),
    }
}

/// Escape an attribute value, whitespace other than space included
pub(crate) fn escape_attribute(value: &str) -> String {
    let escaped = quick_xml::escape::escape(value);
    if !escaped.contains(['\t', '\n', '\r']) {
        return escaped.into_owned();
    }
    escaped
        .replace('\t', "&#9;")
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
}

/// Split `prefix:local` into its parts
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

/// Insert `node` as the last child of `parent`, ahead of trailing whitespace
pub(crate) fn append_child(parent: &mut Element, node: Node) {
    let index = match parent.children.last() {
        Some(last) if last.is_whitespace() => parent.children.len() - 1,
        _ => parent.children.len(),
    };
    parent.children.insert(index, node);
}

fn utf8(bytes: &[u8]) -> Result<String, ParseError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ParseError(e.to_string()))
}

fn read_declaration(decl: &quick_xml::events::BytesDecl<'_>) -> Result<Declaration, ParseError> {
    let version = utf8(&decl.version()?)?;
    let encoding = match decl.encoding() {
        Some(e) => Some(utf8(&e?)?),
        None => None,
    };
    let standalone = match decl.standalone() {
        Some(s) => Some(utf8(&s?)?),
        None => None,
    };
    Ok(Declaration {
        version,
        encoding,
        standalone,
    })
}
