use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use roxmltree::{Document, Node};

use crate::error::{Result, XmlBlasterError};

/// Indentation step of the generated xml
pub const INDENT: &str = " ";

/// Line break plus indentation for one nesting level below `extra_offset`.
#[inline]
pub fn offset(extra_offset: &str) -> String {
    format!("\n{}{}", INDENT, extra_offset)
}

/// Escapes the xml special characters of attribute values and text nodes.
pub fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '\'', '"']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Parses `xml`, an empty or blank input yields `None`.
pub fn parse_document(xml: &str) -> Result<Option<Document<'_>>> {
    if xml.trim().is_empty() {
        return Ok(None);
    }
    let doc = Document::parse(xml).map_err(XmlBlasterError::from)?;
    Ok(Some(doc))
}

/// Element nesting while walking a QoS document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Qos,
    Route,
    Topic,
    Queue,
    Address,
    Callback,
    Session,
    Security,
    Filter,
    History,
    Exception,
}

#[derive(Debug, Clone)]
pub struct ScopeStack(Vec<Scope>);

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    #[inline]
    pub fn new() -> Self {
        ScopeStack(vec![Scope::Qos])
    }

    #[inline]
    pub fn push(&mut self, scope: Scope) {
        self.0.push(scope)
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Scope> {
        self.0.pop()
    }

    #[inline]
    pub fn current(&self) -> Option<Scope> {
        self.0.last().copied()
    }

    #[inline]
    pub fn inside(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    /// Checks whether element `tag` may appear at the current position,
    /// an illegal nesting is logged and the element must be skipped.
    pub fn allows(&self, tag: &str) -> bool {
        let tag = tag.to_ascii_lowercase();
        let ok = match tag.as_str() {
            "node" => self.current() == Some(Scope::Route),
            "route" => !self.inside(Scope::Route),
            "queue" => !self.inside(Scope::Callback) && !self.inside(Scope::Address),
            "address" | "callback" => !self.inside(Scope::Callback) && !self.inside(Scope::Address),
            "burstmode" | "compress" | "ptp" if self.inside(Scope::Queue) => {
                self.inside(Scope::Callback) || self.inside(Scope::Address)
            }
            _ => true,
        };
        if !ok {
            log::error!("<{}> is not allowed inside {}, element ignored", tag, self);
        }
        ok
    }
}

impl fmt::Display for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.0.iter().map(|s| format!("{:?}", s).to_ascii_lowercase()).collect::<Vec<_>>();
        write!(f, "<{}>", path.join("/"))
    }
}

#[inline]
pub fn is_tag(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(name)
}

/// Child elements of `node`, text and comments skipped
#[inline]
pub fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

/// Case insensitive attribute lookup
#[inline]
pub fn attr<'a>(node: &Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes().find(|a| a.name().eq_ignore_ascii_case(name)).map(|a| a.value())
}

/// Concatenated direct text content, trimmed
pub fn text(node: &Node) -> String {
    raw_text(node).trim().to_owned()
}

/// Text content with surrounding whitespace kept
pub fn raw_text(node: &Node) -> String {
    let mut s = String::new();
    for child in node.children().filter(|n| n.is_text()) {
        if let Some(t) = child.text() {
            s.push_str(t);
        }
    }
    s
}

/// Parses a number, an invalid value is logged and yields `None`.
pub fn parse_num<T: FromStr>(value: &str, name: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("invalid value '{}' for '{}', keeping the default", value, name);
            None
        }
    }
}

/// Numeric attribute, `None` if absent or invalid
#[inline]
pub fn attr_num<T: FromStr>(node: &Node, name: &str) -> Option<T> {
    attr(node, name).and_then(|v| parse_num(v, name))
}

/// Parses a boolean attribute value, anything but `true`/`false` is logged and yields `None`.
pub fn parse_bool(value: &str, name: &str) -> Option<bool> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => {
            log::warn!("invalid boolean '{}' for '{}', keeping the default", value, name);
            None
        }
    }
}

#[inline]
pub fn attr_bool(node: &Node, name: &str) -> Option<bool> {
    attr(node, name).and_then(|v| parse_bool(v, name))
}

/// Flag element such as `<isDurable/>`, an empty element means true.
#[inline]
pub fn flag(node: &Node) -> Option<bool> {
    let t = text(node);
    if t.is_empty() {
        Some(true)
    } else {
        parse_bool(&t, node.tag_name().name())
    }
}

/// Writes `<tag/>` for true and `<tag>false</tag>` for false
#[inline]
pub fn write_flag(sb: &mut String, offset: &str, tag: &str, value: bool) {
    if value {
        sb.push_str(&format!("{}<{}/>", offset, tag));
    } else {
        sb.push_str(&format!("{}<{}>false</{}>", offset, tag, tag));
    }
}

#[inline]
pub fn write_attr<V: fmt::Display>(sb: &mut String, name: &str, value: V) {
    sb.push_str(&format!(" {}='{}'", name, escape(&value.to_string())));
}
