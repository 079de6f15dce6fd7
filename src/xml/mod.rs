//! XML tree and node-selector editing
//!
//! - [`tree`]: owned, byte-faithful XML tree over `quick-xml`
//! - [`element`]: locate / insert-or-replace / delete by node selector

pub mod element;
pub mod tree;

pub use element::{ElementPath, SelectorContext};
pub use tree::{Attribute, Element, NamespaceScope, Node, ParseError, XmlDocument};
