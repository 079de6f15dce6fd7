//! Node selector grammar
//!
//! The restricted XPath subset XCAP uses to address a node inside a
//! document:
//!
//! ```text
//! node-selector = element-selector ["/" terminal-selector]
//! step          = ("*" / qname) ["[" position "]"] ["[@" qname "=" quoted "]"]
//! terminal      = "@" qname / "namespace::*"
//! ```

use std::collections::BTreeMap;
use thiserror::Error;

/// Node selector syntax errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("node selector must start with '/'")]
    NotAbsolute,

    #[error("empty step in node selector")]
    EmptyStep,

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("unterminated quote or bracket")]
    Unterminated,

    #[error("terminal selector must be the last step")]
    MisplacedTerminal,
}

/// Qualified name as written in the selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn parse(text: &str) -> Result<Self, SelectorError> {
        let (prefix, local) = match text.split_once(':') {
            Some((p, l)) => (Some(p), l),
            None => (None, text),
        };
        if let Some(p) = prefix {
            check_ncname(p)?;
        }
        check_ncname(local)?;
        Ok(QName {
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
        })
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", p, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

/// Which elements a step's name part admits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    /// `*`
    Any,
    /// Name as written; the prefix resolves through request bindings and an
    /// unprefixed name means the application's default namespace
    Name(QName),
    /// Already-resolved name; `namespace: None` matches on local name alone
    Expanded {
        namespace: Option<String>,
        local: String,
    },
}

/// `[@name="value"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTest {
    pub name: QName,
    pub value: String,
}

/// One `/`-separated step of an element selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: NameTest,
    /// 1-based position among siblings admitted by `name`
    pub position: Option<usize>,
    pub attribute: Option<AttributeTest>,
}

impl Step {
    fn parse(text: &str) -> Result<Self, SelectorError> {
        if text.is_empty() {
            return Err(SelectorError::EmptyStep);
        }

        let name_end = text.find('[').unwrap_or(text.len());
        let name = match &text[..name_end] {
            "*" => NameTest::Any,
            qname => NameTest::Name(QName::parse(qname)?),
        };

        let mut step = Step {
            name,
            position: None,
            attribute: None,
        };

        let mut rest = &text[name_end..];
        while !rest.is_empty() {
            let close = closing_bracket(rest)?;
            let predicate = &rest[1..close];
            rest = &rest[close + 1..];

            if let Some(test) = predicate.strip_prefix('@') {
                if step.attribute.is_some() {
                    return Err(SelectorError::InvalidPredicate(predicate.to_string()));
                }
                step.attribute = Some(parse_attribute_test(test)?);
            } else {
                if step.position.is_some() || step.attribute.is_some() {
                    return Err(SelectorError::InvalidPredicate(predicate.to_string()));
                }
                let position: usize = predicate
                    .trim()
                    .parse()
                    .map_err(|_| SelectorError::InvalidPredicate(predicate.to_string()))?;
                if position == 0 {
                    return Err(SelectorError::InvalidPredicate(predicate.to_string()));
                }
                step.position = Some(position);
            }
        }

        Ok(step)
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            NameTest::Any => write!(f, "*")?,
            NameTest::Name(q) => write!(f, "{}", q)?,
            NameTest::Expanded { local, .. } => write!(f, "{}", local)?,
        }
        if let Some(p) = self.position {
            write!(f, "[{}]", p)?;
        }
        if let Some(a) = &self.attribute {
            write!(f, "[@{}=\"{}\"]", a.name, a.value)?;
        }
        Ok(())
    }
}

/// Sequence of steps from the document root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSelector {
    pub steps: Vec<Step>,
}

impl ElementSelector {
    /// Selector for the parent element, if there is one
    pub fn parent(&self) -> Option<ElementSelector> {
        if self.steps.len() < 2 {
            return None;
        }
        Some(ElementSelector {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }
}

impl std::fmt::Display for ElementSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for step in &self.steps {
            write!(f, "/{}", step)?;
        }
        Ok(())
    }
}

/// What a node selector addresses beyond its element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalSelector {
    /// `@name`
    Attribute(QName),
    /// `namespace::*`
    NamespaceBindings,
}

/// Parsed node selector with its namespace bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSelector {
    pub element: ElementSelector,
    pub terminal: Option<TerminalSelector>,
    /// Prefix → namespace URI, from the request's `xmlns()` query
    pub bindings: BTreeMap<String, String>,
}

impl NodeSelector {
    /// Parse a decoded node selector
    pub fn parse(
        text: &str,
        bindings: BTreeMap<String, String>,
    ) -> Result<Self, SelectorError> {
        let text = text
            .strip_prefix('/')
            .ok_or(SelectorError::NotAbsolute)?;
        let parts = split_steps(text)?;

        let mut steps = Vec::with_capacity(parts.len());
        let mut terminal = None;
        let count = parts.len();

        for (i, part) in parts.into_iter().enumerate() {
            let is_last = i + 1 == count;
            if let Some(attr) = part.strip_prefix('@') {
                if !is_last {
                    return Err(SelectorError::MisplacedTerminal);
                }
                terminal = Some(TerminalSelector::Attribute(QName::parse(attr)?));
            } else if part == "namespace::*" {
                if !is_last {
                    return Err(SelectorError::MisplacedTerminal);
                }
                terminal = Some(TerminalSelector::NamespaceBindings);
            } else {
                steps.push(Step::parse(part)?);
            }
        }

        if steps.is_empty() {
            return Err(SelectorError::EmptyStep);
        }

        Ok(NodeSelector {
            element: ElementSelector { steps },
            terminal,
            bindings,
        })
    }

    /// Attribute name addressed by the terminal selector, if any
    pub fn attribute(&self) -> Option<&QName> {
        match &self.terminal {
            Some(TerminalSelector::Attribute(name)) => Some(name),
            _ => None,
        }
    }
}

/// Split on `/` outside quotes and brackets
fn split_steps(text: &str) -> Result<Vec<&str>, SelectorError> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.checked_sub(1).ok_or(SelectorError::Unterminated)?,
            (None, '/') if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(SelectorError::Unterminated);
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// Index of the `]` closing the predicate `text` starts with
fn closing_bracket(text: &str) -> Result<usize, SelectorError> {
    if !text.starts_with('[') {
        return Err(SelectorError::InvalidPredicate(text.to_string()));
    }
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, ']') => return Ok(i),
            _ => {}
        }
    }
    Err(SelectorError::Unterminated)
}

fn parse_attribute_test(text: &str) -> Result<AttributeTest, SelectorError> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| SelectorError::InvalidPredicate(text.to_string()))?;
    let value = value.trim();
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .ok_or_else(|| SelectorError::InvalidPredicate(text.to_string()))?;
    Ok(AttributeTest {
        name: QName::parse(name.trim())?,
        value: unquoted.to_string(),
    })
}

fn check_ncname(name: &str) -> Result<(), SelectorError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(SelectorError::InvalidName(name.to_string()))
    }
}
